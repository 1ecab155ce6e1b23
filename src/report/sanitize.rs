/// Text cleanup for report output
///
/// Captured program output may contain terminal escape sequences, arbitrary
/// control bytes and markup characters. Everything written into the report
/// goes through [`clean_text`] or [`clean_attr`].
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// CSI sequences, OSC sequences (BEL or ST terminated) and two-byte escapes
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)|[@-Z\\-_])")
        .expect("ANSI escape pattern is valid")
});

pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}

/// XML 1.0 characters, minus DEL and the C1 control range
fn is_xml_char(c: char) -> bool {
    matches!(c as u32,
        0x9 | 0xA | 0xD
        | 0x20..=0x7E
        | 0xA0..=0xD7FF
        | 0xE000..=0xFFFD
        | 0x10000..=0x10FFFF)
}

/// Drop control characters and anything XML 1.0 cannot represent.
pub fn strip_invalid_chars(text: &str) -> Cow<'_, str> {
    if text.chars().all(is_xml_char) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|&c| is_xml_char(c)).collect())
    }
}

/// Limit `text` to `limit` characters, noting how many were cut.
pub fn cap(text: &str, limit: usize) -> Cow<'_, str> {
    let total = text.chars().count();
    if total <= limit {
        return Cow::Borrowed(text);
    }
    let mut capped: String = text.chars().take(limit).collect();
    capped.push_str(&format!("\n... {} more characters omitted", total - limit));
    Cow::Owned(capped)
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn sanitized(text: &str, limit: usize) -> String {
    let stripped = strip_ansi(text);
    let valid = strip_invalid_chars(&stripped);
    escape(&cap(&valid, limit))
}

/// Element content: escapes stripped, capped, escaped
pub fn clean_text(text: &str, limit: usize) -> String {
    sanitized(text, limit)
}

/// Attribute value: like [`clean_text`] with whitespace controls encoded
pub fn clean_attr(text: &str, limit: usize) -> String {
    sanitized(text, limit)
        .replace('\n', "&#10;")
        .replace('\r', "&#13;")
        .replace('\t', "&#9;")
}
