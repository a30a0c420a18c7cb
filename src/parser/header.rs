//! RFC 5322 header handling: block extraction, folding, encoded-words
//! (RFC 2047) and lenient date parsing.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

/// Return the header block of a raw message (everything before the first
/// empty line). The whole input is returned when there is no body.
pub fn header_block(message: &[u8]) -> &[u8] {
    let mut line_start = 0;
    for (i, &b) in message.iter().enumerate() {
        if b == b'\n' {
            let line = &message[line_start..i];
            if line.is_empty() || line == b"\r" {
                return &message[..line_start];
            }
            line_start = i + 1;
        }
    }
    message
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> Cow<'_, str> {
    // Strip BOM if present
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            Cow::Owned(decoded.into_owned())
        }
    }
}

/// Unfold headers: join continuation lines (starting with space or tab)
/// with the previous header.
///
/// Returns `(lowercase_name, value)` pairs in header order.
pub fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                if !last.1.is_empty() {
                    last.1.push(' ');
                }
                last.1.push_str(line.trim());
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_lowercase();
            let value = line[colon_pos + 1..].trim().to_string();
            result.push((name, value));
        }
        // Lines without a colon and not a continuation are silently skipped
    }

    result
}

/// Unfolded headers of one message, looked up case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Parse the header block of a raw message.
    pub fn from_message(message: &[u8]) -> Self {
        let text = decode_header_bytes(header_block(message));
        Self {
            entries: unfold_headers(&text),
        }
    }

    /// First value of `name`, if the header is present (possibly empty).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of `name`, in header order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Decode a header value for display.
///
/// Encoded-words are resolved; if any of them cannot be decoded (unknown
/// charset, broken base64) the raw value is returned unchanged and a
/// warning is logged.
pub fn decode_header_value(raw: &str) -> String {
    match try_decode_encoded_words(raw) {
        Ok(decoded) => decoded,
        Err(reason) => {
            warn!(value = raw, reason = %reason, "Could not decode header, keeping raw value");
            raw.to_string()
        }
    }
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// Text that merely looks like the start of an encoded-word (`=?` without a
/// well-formed `charset?enc?text?=` tail) is kept as-is. A well-formed word
/// that fails to decode is an error.
pub fn try_decode_encoded_words(input: &str) -> Result<String, String> {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two encoded words is dropped (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];
        match split_encoded_word(after_start) {
            Some(word) => {
                result.push_str(&word.decode()?);
                remaining = &after_start[word.consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = after_start;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    Ok(result)
}

struct EncodedWord<'a> {
    charset: &'a str,
    encoding: &'a str,
    text: &'a str,
    /// Bytes consumed from the string *after* the initial `=?`.
    consumed: usize,
}

impl EncodedWord<'_> {
    fn decode(&self) -> Result<String, String> {
        let bytes = match self.encoding.to_ascii_uppercase().as_str() {
            "B" => decode_b_encoding(self.text)
                .ok_or_else(|| format!("invalid base64 in encoded-word '{}'", self.text))?,
            "Q" => decode_q_encoding(self.text),
            other => return Err(format!("unknown encoded-word encoding '{other}'")),
        };
        decode_charset(self.charset, &bytes)
    }
}

/// Split `charset?encoding?encoded_text?=` off the front of `s`.
fn split_encoded_word(s: &str) -> Option<EncodedWord<'_>> {
    let first_q = s.find('?')?;
    let charset = &s[..first_q];
    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];
    if encoding.len() != 1 {
        return None;
    }

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let text = &rest2[..end];
    if text.contains(char::is_whitespace) {
        return None;
    }

    Some(EncodedWord {
        charset,
        encoding,
        text,
        consumed: first_q + 1 + second_q + 1 + end + 2,
    })
}

/// Decode B-encoding, accepting missing padding.
fn decode_b_encoding(input: &str) -> Option<Vec<u8>> {
    data_encoding::BASE64
        .decode(input.as_bytes())
        .or_else(|_| data_encoding::BASE64_NOPAD.decode(input.trim_end_matches('=').as_bytes()))
        .ok()
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' => match bytes.get(i + 1..i + 3).and_then(hex_byte) {
                Some(byte) => {
                    result.push(byte);
                    i += 3;
                }
                None => {
                    result.push(b'=');
                    i += 1;
                }
            },
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

fn hex_byte(pair: &[u8]) -> Option<u8> {
    if !pair.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    u8::from_str_radix(std::str::from_utf8(pair).ok()?, 16).ok()
}

/// Decode bytes using a named charset (an RFC 2231 language suffix is ignored).
fn decode_charset(charset: &str, bytes: &[u8]) -> Result<String, String> {
    let label = charset.split('*').next().unwrap_or(charset);
    match label.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => encoding_rs::Encoding::for_label(label.as_bytes())
            .map(|encoding| encoding.decode(bytes).0.into_owned())
            .ok_or_else(|| format!("unknown charset '{label}'")),
    }
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, named time zones and a few broken
/// real-world variants. Returns `None` when nothing matches.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    // Trailing comments such as "(UTC)" or "(PST)"
    let no_comment = match trimmed.find('(') {
        Some(pos) => trimmed[..pos].trim(),
        None => trimmed,
    };
    let no_dow = strip_day_of_week(no_comment);
    let replaced = replace_named_tz(&no_dow);

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
    ];

    for candidate in [no_dow.as_str(), replaced.as_str()] {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    mail_parser_date(trimmed)
}

/// Last resort: let `mail-parser` interpret the value.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    let fake_msg = format!("Date: {input}\n\n");
    let parsed = mail_parser::MessageParser::default().parse(fake_msg.as_bytes())?;
    let rfc3339 = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Strip a leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            if rest.starts_with(',') || rest.starts_with(' ') {
                return rest.trim_start_matches(',').trim().to_string();
            }
        }
    }
    s.to_string()
}

/// Replace a trailing time zone abbreviation with its numeric offset.
fn replace_named_tz(s: &str) -> String {
    const TZS: [(&str, &str); 13] = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CEST", "+0200"),
        ("CET", "+0100"),
        ("JST", "+0900"),
    ];
    for (name, offset) in TZS {
        if let Some(head) = s.strip_suffix(name) {
            return format!("{head}{offset}");
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_header_value("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_header_value("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_decode_multiple_encoded_words() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_header_value(input), "Hola mundo");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        let input = "Re: =?UTF-8?B?SG9sYQ==?= there";
        assert_eq!(decode_header_value(input), "Re: Hola there");
    }

    #[test]
    fn test_decode_windows1252_encoded_word() {
        assert_eq!(decode_header_value("=?Windows-1252?Q?M=FCller?="), "Müller");
    }

    #[test]
    fn test_decode_utf8_base64_japanese() {
        assert_eq!(decode_header_value("=?UTF-8?B?5bGx55Sw5aSq6YOO?="), "山田太郎");
    }

    #[test]
    fn test_decode_missing_padding() {
        assert_eq!(decode_header_value("=?UTF-8?B?SG9sYQ?="), "Hola");
    }

    #[test]
    fn test_unknown_charset_keeps_raw_value() {
        let raw = "=?x-no-such-charset?Q?abc?= tail";
        assert!(try_decode_encoded_words(raw).is_err());
        assert_eq!(decode_header_value(raw), raw);
    }

    #[test]
    fn test_broken_base64_keeps_raw_value() {
        let raw = "=?UTF-8?B?!!!!?=";
        assert_eq!(decode_header_value(raw), raw);
    }

    #[test]
    fn test_lookalike_text_untouched() {
        assert_eq!(decode_header_value("what =? is this"), "what =? is this");
    }

    #[test]
    fn test_header_block_lf_and_crlf() {
        assert_eq!(header_block(b"A: 1\nB: 2\n\nbody"), b"A: 1\nB: 2\n");
        assert_eq!(header_block(b"A: 1\r\n\r\nbody"), b"A: 1\r\n");
        assert_eq!(header_block(b"A: 1\n"), b"A: 1\n");
    }

    #[test]
    fn test_unfold_headers() {
        let text = "Subject: This is a long\n\tsubject line\nFrom: user@example.com\n";
        let headers = unfold_headers(text);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, "subject");
        assert_eq!(headers[0].1, "This is a long subject line");
    }

    #[test]
    fn test_header_map_lookup() {
        let raw = b"Received: from a\n by b\nReceived: from c\nX-Failed-Recipients:\nSubject: Hi\n\nbody";
        let headers = HeaderMap::from_message(raw);
        assert_eq!(headers.get_all("received"), vec!["from a by b", "from c"]);
        assert_eq!(headers.get("x-failed-recipients"), Some(""));
        assert_eq!(headers.get("SUBJECT"), Some("Hi"));
        assert_eq!(headers.get("diagnostic-code"), None);
    }

    #[test]
    fn test_header_bytes_latin1_fallback() {
        let decoded = decode_header_bytes(b"Subject: caf\xe9");
        assert_eq!(decoded, "Subject: café");
    }

    #[test]
    fn test_parse_date_rfc2822() {
        let dt = parse_date("Thu, 04 Jan 2024 10:00:00 +0000").unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-01-04");
    }

    #[test]
    fn test_parse_date_named_tz() {
        let dt = parse_date("Thu, 04 Jan 2024 10:00:00 EST").unwrap();
        assert_eq!(dt.format("%H").to_string(), "15");
    }

    #[test]
    fn test_parse_date_with_comment() {
        assert!(parse_date("Thu, 4 Jan 2024 10:00:00 +0000 (UTC)").is_some());
    }

    #[test]
    fn test_parse_date_iso8601() {
        assert!(parse_date("2024-01-04T10:00:00Z").is_some());
    }

    #[test]
    fn test_parse_date_garbage() {
        assert!(parse_date("").is_none());
        assert!(parse_date("   ").is_none());
    }
}
