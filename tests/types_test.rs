use email_intake::*;

// --- EmailCandidate ---

#[test]
fn test_candidate_accessors() {
    let candidate = EmailCandidate::new(b"From: a@example.com\r\n\r\n".to_vec())
        .unwrap()
        .with_file_name("a.eml")
        .with_declared_type("message/rfc822");
    assert_eq!(candidate.size(), 23);
    assert_eq!(candidate.file_name(), Some("a.eml"));
    assert_eq!(candidate.declared_type(), Some("message/rfc822"));
}

#[test]
fn test_candidate_rejects_empty() {
    assert!(EmailCandidate::new(Vec::new()).is_err());
}

// --- Tier ---

#[test]
fn test_tier_names_round_trip() {
    for tier in Tier::ALL {
        assert_eq!(tier.name().parse::<Tier>().unwrap(), tier);
    }
    assert_eq!("EML_Strict".parse::<Tier>().unwrap(), Tier::EmlStrict);
}

#[test]
fn test_unknown_tier_name() {
    assert!(matches!(
        "eml_best".parse::<Tier>(),
        Err(ParseError::UnknownTier(name)) if name == "eml_best"
    ));
}

#[test]
fn test_tier_tables() {
    assert_eq!(
        FormatFamily::Eml.tiers(),
        &[Tier::EmlStrict, Tier::EmlLenient, Tier::EmlHeuristic]
    );
    assert_eq!(
        FormatFamily::Msg.tiers(),
        &[Tier::MsgCompound, Tier::MsgRawScan, Tier::MsgConvert]
    );
    assert_eq!(FormatFamily::Unknown.tiers(), FormatFamily::Eml.tiers());
    assert!(
        FormatFamily::Msg
            .tiers()
            .iter()
            .all(|tier| tier.family() == FormatFamily::Msg)
    );
}

// --- Attachment ---

#[test]
fn test_attachment_type_inference() {
    assert_eq!(infer_content_type("scan.PNG", None), "image/png");
    assert_eq!(
        infer_content_type("fwd.eml", Some("application/octet-stream")),
        "message/rfc822"
    );
    assert_eq!(infer_content_type("x.bin", Some("text/csv")), "text/csv");
    assert_eq!(infer_content_type("x.unknown", None), "application/octet-stream");
}

#[test]
fn test_attachment_default_name() {
    let attachment = Attachment::new(None, None, None, vec![1, 2, 3]);
    assert_eq!(attachment.file_name, "attachment");
    assert_eq!(attachment.size, 3);
}

// --- ParsedEmail serialization ---

#[test]
fn test_failed_record_json() {
    let trace = vec![ParserAttempt::failed(Tier::EmlStrict, 0, "boom")];
    let email = ParsedEmail::failed(10, FormatFamily::Unknown, trace);

    let json: serde_json::Value = serde_json::from_str(&email.to_json().unwrap()).unwrap();

    assert_eq!(json["parse_status"], "failed");
    assert_eq!(json["format"], "unknown");
    assert_eq!(json["parser_trace"][0]["tier"], "eml_strict");
    assert_eq!(json["parser_trace"][0]["outcome"], "error");
    assert_eq!(json["parser_trace"][0]["error"], "boom");
    assert!(json["sender"].is_null());
    assert!(json["subject_id"].is_null());
}

#[test]
fn test_parsed_json_round_trip() {
    let candidate = EmailCandidate::new(
        b"From: a@example.com\r\nSubject: 20250115\r\n\r\nSee example[.]org".to_vec(),
    )
    .unwrap();
    let email = parse_candidate(&candidate);

    let back: ParsedEmail = serde_json::from_str(&email.to_json().unwrap()).unwrap();

    assert_eq!(back, email);
    assert_eq!(back.subject_id.as_deref(), Some("20250115T000000"));
}

// --- StandardEmail ---

#[test]
fn test_standard_email() {
    let candidate = EmailCandidate::new(
        b"From: a@example.com\r\n\
          To: b@example.com, c@example.com\r\n\
          Subject: Reference\r\n\
          Message-ID: <ref@example.com>\r\n\r\n\
          Call 555-123-4567 or visit www.example.com/help and 10.0.0.1\r\n"
            .to_vec(),
    )
    .unwrap();
    let email = parse_candidate(&candidate);

    let standard = StandardEmail::from_parsed(&email, &Region::US);

    assert_eq!(standard.to_address.as_deref(), Some("b@example.com, c@example.com"));
    assert_eq!(standard.from_address.as_deref(), Some("a@example.com"));
    assert!(standard.cc.is_none());
    assert_eq!(standard.body_text_numbers, vec!["+15551234567"]);
    assert_eq!(standard.body_urls, vec!["https://www.example.com/help"]);
    assert_eq!(standard.message_id.as_deref(), Some("<ref@example.com>"));
}

// --- ParserConfig ---

#[test]
fn test_config_defaults() {
    let config = ParserConfig::default();
    assert_eq!(config.default_region, "US");
    assert_eq!(config.sniff_window, 4096);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_zero_window_rejected() {
    assert!(ParserConfig::from_toml_str("sniff_window = 0").is_err());
}
