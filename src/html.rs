//! HTML to field-extractable text
//!
//! Two-column table rows become `Label: Value` lines so that reports laid out
//! as tables feed the same field extractor as plain-text reports.

use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::LazyLock;
use tracing::debug;

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

static WS_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static TR_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<tr[\s>]").unwrap());

static TABLE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<table[\s>]").unwrap());

/// Convert HTML into newline-separated text. Never fails; when the DOM walk
/// yields nothing, falls back to stripping tags.
#[must_use]
pub fn flatten(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let text = flatten_dom(html);
    if text.is_empty() {
        debug!("DOM walk produced no text, falling back to tag stripping");
        return strip_tags(html);
    }
    text
}

/// Whether a body looks like markup rather than plain text
#[must_use]
pub fn looks_like_html(body: &str) -> bool {
    body.trim_start().starts_with('<') && body.contains('>')
}

/// Remove every `<...>` tag and collapse whitespace
#[must_use]
pub fn strip_tags(html: &str) -> String {
    let text = TAG_REGEX.replace_all(html, " ");
    collapse_whitespace(&text)
}

fn flatten_dom(html: &str) -> String {
    // Stray rows outside a table are dropped by the HTML tree builder.
    let source = if TR_REGEX.is_match(html) && !TABLE_REGEX.is_match(html) {
        format!("<table>{html}</table>")
    } else {
        html.to_string()
    };

    let document = Html::parse_document(&source);
    let mut lines = Vec::new();
    walk(document.root_element(), &mut lines);
    lines.join("\n")
}

fn walk(element: ElementRef<'_>, lines: &mut Vec<String>) {
    match element.value().name() {
        "script" | "style" | "noscript" | "template" => return,
        "tr" => {
            if let Some(line) = two_cell_row(element) {
                lines.push(line);
                return;
            }
        }
        _ => {}
    }

    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            walk(child_element, lines);
        } else if let Some(text) = child.value().as_text() {
            let line = collapse_whitespace(text);
            if !line.is_empty() {
                lines.push(line);
            }
        }
    }
}

fn two_cell_row(row: ElementRef<'_>) -> Option<String> {
    let cells: Vec<ElementRef<'_>> = row
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
        .collect();

    let [label, value] = cells.as_slice() else {
        return None;
    };

    let label = cell_text(*label);
    let value = cell_text(*value);
    let label = label.trim_end_matches(':').trim_end();
    if label.is_empty() || value.is_empty() {
        return None;
    }
    Some(format!("{label}: {value}"))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    let joined = cell.text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&joined)
}

fn collapse_whitespace(text: &str) -> String {
    WS_REGEX.replace_all(text, " ").trim().to_string()
}
