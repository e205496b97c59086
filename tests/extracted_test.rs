use email_intake::*;

fn extract(text: &str) -> ExtractedEntities {
    let config = ParserConfig::default();
    ExtractedEntities::extract(Some(text), None, &config, &Region::US)
}

#[test]
fn test_extract_urls() {
    let entities = extract(
        "Visit https://portal.example.com/login or \
         hxxp://files[.]example[.]org/x.zip or www.example.com.",
    );

    let originals: Vec<&str> = entities.urls.iter().map(|u| u.original.as_str()).collect();
    assert_eq!(
        originals,
        vec![
            "https://portal.example.com/login",
            "hxxp://files[.]example[.]org/x.zip",
            "www.example.com.",
        ]
    );
    assert_eq!(entities.urls[1].normalized, "http://files.example.org/x.zip");
    assert_eq!(
        urls::dedupe(entities.urls.into_iter().filter_map(|u| u.domain)),
        vec!["example.com", "example.org"]
    );
}

#[test]
fn test_url_normalization_idempotent() {
    for input in [
        "hxxps://evil[.]example(dot)com/path",
        "www.example.com)",
        "example{.}net",
        "ftp://files.example.com/",
    ] {
        let once = urls::normalize_url(input);
        assert_eq!(urls::normalize_url(&once), once);
    }
}

#[test]
fn test_parsed_domains_have_known_suffix() {
    let domains = urls::extract_domains(
        "https://a.example.co.uk b[.]test[.]invalidtld https://10.1.2.3/x evil[.]example[.]com",
    );
    assert_eq!(domains, vec!["example.co.uk", "example.com"]);
}

#[test]
fn test_extract_phone() {
    let entities = extract("Call me at (555) 123-4567 or +1-555-987-6543 or 555.123.4567");

    let numbers: Vec<&str> = entities
        .phone_numbers
        .iter()
        .map(|p| p.e164.as_str())
        .collect();
    assert_eq!(numbers, vec!["+15551234567", "+15559876543"]);
    assert!(numbers.iter().all(|n| n.starts_with('+') && n[1..].len() >= 10));
}

#[test]
fn test_phone_list_one_per_line() {
    let entities = extract("Contacts:\n555-123-4567\n555-987-6543\n");

    let numbers: Vec<&str> = entities
        .phone_numbers
        .iter()
        .map(|p| p.e164.as_str())
        .collect();
    assert_eq!(numbers, vec!["+15551234567", "+15559876543"]);
}

#[test]
fn test_e164_shape_in_mixed_text() {
    let e164 = regex::Regex::new(r"^\+\d{10,14}$").unwrap();
    let text = "Reported 2025-01-15 555-123-4567 at 10:30:00 UTC\n\
                Ticket 20250115103000 ref 4821-9917-3310-2245\n\
                Order #12345678 shipped 01/15/2025; call (555) 987-6543\n\
                IP 192.168.10.25 port 8443, case ID 0042-117\n\
                +44 20 7946 0958\t+1 555 222 3333 x12\n";

    let entities = extract(text);

    assert!(!entities.phone_numbers.is_empty());
    for phone in &entities.phone_numbers {
        assert!(e164.is_match(&phone.e164), "{phone:?}");
    }
    let numbers: Vec<&str> = entities
        .phone_numbers
        .iter()
        .map(|p| p.e164.as_str())
        .collect();
    assert!(numbers.contains(&"+15551234567"));
    assert!(numbers.contains(&"+15559876543"));
}

#[test]
fn test_fields_multiline_value() {
    let fields = fields::extract_fields(
        "Additional Contacts: soc@example.com\n  abuse@example.com\nModel Confidence: high",
    );
    assert_eq!(
        fields.get("additional_contacts").map(String::as_str),
        Some("soc@example.com abuse@example.com")
    );

    let coerced = fields::BodyFields::from_map(&fields, &ParserConfig::default().date_formats);
    assert!(coerced.model_confidence.is_none());
    assert_eq!(coerced.coercion_errors.len(), 1);
    assert_eq!(coerced.coercion_errors[0].field, "model_confidence");
}

#[test]
fn test_html_flatten_table() {
    let text = html::flatten(
        "<table><tr><td>Callback Number:</td><td>+1-555-123-4567</td></tr></table>\
         <script>var x = 1;</script><p>Thanks</p>",
    );
    assert!(text.contains("Callback Number: +1-555-123-4567"));
    assert!(text.contains("Thanks"));
    assert!(!text.contains("var x"));
}

#[test]
fn test_charset_chain() {
    let decoded = charset::resolve(b"caf\xE9", Some("utf-8"), &[]);
    assert_eq!(decoded.text, "café");
    assert_eq!(decoded.step, charset::DecodeStep::Latin1);

    let decoded = charset::resolve(b"\x93quoted\x94", None, &[]);
    assert_eq!(decoded.text, "\u{201C}quoted\u{201D}");
    assert_eq!(decoded.step, charset::DecodeStep::Cp1252);

    let decoded = charset::resolve(b"caf\xC3\xA9", Some("no-such-charset"), &["utf-8"]);
    assert_eq!(decoded.step, charset::DecodeStep::LibraryCandidate);
}

#[test]
fn test_no_entities() {
    assert!(extract("Nothing to see here.").is_empty());
}
