// SPDX-License-Identifier: GPL-3.0-only

use crate::encoding::{decode_base64, decode_quoted_printable};
use std::collections::HashMap;

/// Replaces `\r\n` and bare `\r` with `\n`.
pub fn normalize_newlines(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    out
}

/// Splits `raw` at the first blank line (`"\n\n"`) into headers and body.
/// If no blank line exists, the whole input is treated as headers with an
/// empty body.
pub fn split_headers_body(raw: &str) -> (String, String) {
    match raw.find("\n\n") {
        Some(pos) => {
            let mut headers = raw[..pos].to_owned();
            let body = raw[pos + 2..].to_owned();
            if headers.starts_with(['\n', '\r']) {
                headers = headers.trim().to_owned();
            }
            (headers, body)
        }
        None => (raw.to_owned(), String::new()),
    }
}

/// Parses a header block into a lowercase-keyed map, folding continuation
/// lines (those starting with a space or tab) into the previous header and
/// discarding malformed lines (no colon, not a continuation).
pub fn parse_headers(header_block: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let mut last_key: Option<String> = None;

    for line in header_block.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.starts_with([' ', '\t']) {
            if let Some(key) = &last_key {
                let entry: &mut String = headers.entry(key.clone()).or_default();
                entry.push(' ');
                entry.push_str(line.trim());
            }
            continue;
        }

        match line.find(':') {
            Some(colon) => {
                let key = line[..colon].trim().to_ascii_lowercase();
                let value = decode_header_value(line[colon + 1..].trim());
                headers.insert(key.clone(), value);
                last_key = Some(key);
            }
            None => last_key = None,
        }
    }

    headers
}

/// Decodes RFC 2047 encoded-words (`=?charset?enc?text?=`) embedded in a
/// header value, leaving interleaved literal text untouched.
pub fn decode_header_value(value: &str) -> String {
    let Some(first) = value.find("=?") else {
        return value.to_owned();
    };

    let mut result = value[..first].to_owned();
    let mut cursor = first;

    while let Some(pos) = value[cursor..].find("=?").map(|p| p + cursor) {
        let Some(charset_end) = value[pos + 2..].find('?').map(|p| p + pos + 2) else {
            result.push_str(&value[cursor..]);
            return result;
        };
        let Some(encoding_end) = value[charset_end + 1..]
            .find('?')
            .map(|p| p + charset_end + 1)
        else {
            result.push_str(&value[cursor..]);
            return result;
        };
        let Some(end_marker) = value[encoding_end + 1..]
            .find("?=")
            .map(|p| p + encoding_end + 1)
        else {
            result.push_str(&value[cursor..]);
            return result;
        };

        let encoding = &value[charset_end + 1..encoding_end];
        let encoded_text = &value[encoding_end + 1..end_marker];

        let decoded = match encoding.to_ascii_lowercase().as_str() {
            "b" => String::from_utf8_lossy(&decode_base64(encoded_text)).into_owned(),
            "q" => {
                let bytes = decode_quoted_printable(encoded_text);
                String::from_utf8_lossy(&bytes).replace('_', " ")
            }
            _ => encoded_text.to_owned(),
        };

        result.push_str(&decoded);

        let next_word_start = end_marker + 2;
        match value[next_word_start..].find("=?") {
            Some(offset) => {
                let next_pos = next_word_start + offset;
                result.push_str(&value[next_word_start..next_pos]);
                cursor = next_pos;
            }
            None => {
                result.push_str(&value[next_word_start..]);
                return result;
            }
        }
    }

    result
}

/// Case-insensitively finds `paramname=` in `header_value` and returns its
/// value: quoted (with `\`-escapes) if the next character is `"` or `'`,
/// otherwise the run up to the next `;`, space, or tab. Empty if not found.
pub fn extract_parameter(header_value: &str, param_name: &str) -> String {
    let lowered = header_value.to_ascii_lowercase();
    let needle = format!("{}=", param_name.to_ascii_lowercase());

    let Some(start) = lowered.find(&needle) else {
        return String::new();
    };

    let bytes = header_value.as_bytes();
    let mut pos = start + needle.len();

    while pos < bytes.len() && (bytes[pos] as char).is_whitespace() {
        pos += 1;
    }
    if pos >= bytes.len() {
        return String::new();
    }

    let quote = match bytes[pos] {
        b'"' | b'\'' => {
            let q = bytes[pos];
            pos += 1;
            Some(q)
        }
        _ => None,
    };

    let mut result = String::new();
    while pos < bytes.len() {
        let c = bytes[pos];
        match quote {
            Some(q) if c == q => break,
            None if c == b';' || c == b' ' || c == b'\t' => break,
            _ => {}
        }

        if c == b'\\' && pos + 1 < bytes.len() {
            result.push(bytes[pos + 1] as char);
            pos += 2;
            continue;
        }

        result.push(c as char);
        pos += 1;
    }

    result
}
