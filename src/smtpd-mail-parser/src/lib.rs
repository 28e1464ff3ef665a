// SPDX-License-Identifier: GPL-3.0-only

//! Converts a raw RFC 5322/2045 octet stream into a structured
//! [`EmailMessage`]. [`parse`] is total: malformed input always yields a
//! best-effort message, it never panics or returns an error.

mod encoding;
mod headers;
mod message;
mod multipart;

pub use message::{BodyPart, EmailMessage, ParsedPart};

use headers::{extract_parameter, parse_headers, split_headers_body};
use multipart::split_multipart;
use std::collections::HashMap;

/// MIME part nesting is bounded to guard against pathological or malicious
/// boundary nesting; beyond this depth a part is folded in as an opaque
/// attachment instead of being recursed into further.
const MAX_MIME_DEPTH: u32 = 20;

/// Parses `raw` into an [`EmailMessage`]. Always succeeds.
#[must_use]
pub fn parse(raw: &[u8]) -> EmailMessage {
    let text = String::from_utf8_lossy(raw);
    let normalized = headers::normalize_newlines(&text);

    let (header_block, body_block) = split_headers_body(&normalized);
    let headers = parse_headers(&header_block);

    let header = |key: &str| headers.get(key).cloned().unwrap_or_default();

    let from = header("from");
    let mut out = EmailMessage {
        sender_name: extract_sender_name(&from),
        from,
        to: header("to"),
        cc: header("cc"),
        subject: header("subject"),
        date: header("date"),
        message_id: header("message-id"),
        plain_text_body: None,
        html_body: None,
        attachments: Vec::new(),
    };

    let mut parts = Vec::new();
    walk_entity(&headers, &body_block, &mut parts, 0);
    out.fold_parts(parts);
    out
}

/// Recursively walks one MIME entity, appending each leaf it discovers (in
/// depth-first order) to `parts`. Never mutates the final message shape
/// directly — see [`ParsedPart`] and [`EmailMessage::fold_parts`] for why
/// folding happens once, after the whole tree has been collected.
fn walk_entity(
    headers: &HashMap<String, String>,
    body: &str,
    parts: &mut Vec<ParsedPart>,
    depth: u32,
) {
    let content_type_raw = headers
        .get("content-type")
        .cloned()
        .unwrap_or_else(|| "text/plain".to_owned());
    let content_type = content_type_raw.to_ascii_lowercase();

    if content_type.contains("multipart/") && depth < MAX_MIME_DEPTH {
        let mut boundary = extract_parameter(&content_type_raw, "boundary");

        if boundary.is_empty() {
            tracing::trace!("multipart with no boundary, treating as plain text");
            let encoding = headers
                .get("content-transfer-encoding")
                .cloned()
                .unwrap_or_else(|| "7bit".to_owned());
            let decoded = encoding::decode_content(body, &encoding);
            parts.push(ParsedPart::PlainText(
                String::from_utf8_lossy(&decoded).into_owned(),
            ));
            return;
        }

        if boundary.len() >= 2 && boundary.starts_with('"') && boundary.ends_with('"') {
            boundary = boundary[1..boundary.len() - 1].to_owned();
        }

        for part in split_multipart(body, &boundary) {
            let (part_headers_block, part_body) = split_headers_body(&part);
            let part_headers_block = part_headers_block.trim();
            if part_headers_block.is_empty() {
                continue;
            }
            let part_headers = parse_headers(part_headers_block);
            walk_entity(&part_headers, &part_body, parts, depth + 1);
        }
        return;
    }

    let trimmed_body = body.trim_matches(['\r', '\n']);
    let encoding = headers
        .get("content-transfer-encoding")
        .cloned()
        .unwrap_or_else(|| "7bit".to_owned());
    let decoded = encoding::decode_content(trimmed_body, &encoding);

    if content_type.contains("text/plain") {
        parts.push(ParsedPart::PlainText(
            String::from_utf8_lossy(&decoded).into_owned(),
        ));
    } else if content_type.contains("text/html") {
        parts.push(ParsedPart::Html(String::from_utf8_lossy(&decoded).into_owned()));
    } else {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or(&content_type)
            .trim()
            .to_owned();
        parts.push(ParsedPart::Attachment(BodyPart {
            filename: resolve_attachment_filename(headers, &content_type, &media_type),
            content_type: media_type,
            content_bytes: decoded,
        }));
    }
}

fn resolve_attachment_filename(
    headers: &HashMap<String, String>,
    content_type_with_params: &str,
    media_type: &str,
) -> String {
    if let Some(disposition) = headers.get("content-disposition") {
        let filename = extract_parameter(disposition, "filename");
        if !filename.is_empty() {
            return filename;
        }
    }

    let filename = extract_parameter(content_type_with_params, "name");
    if !filename.is_empty() {
        return filename;
    }

    match media_type.split_once('/') {
        Some((_, subtype)) => format!("attachment.{subtype}"),
        None => "attachment".to_owned(),
    }
}

/// Extracts the display name from a raw `From` header: the text before the
/// first `<`, trimmed. If there's no `<` and the header looks like a bare
/// address (contains `@`), the name is empty; otherwise the whole header is
/// the name.
fn extract_sender_name(from_header: &str) -> String {
    match from_header.find('<') {
        Some(pos) => from_header[..pos].trim().to_owned(),
        None if from_header.contains('@') => String::new(),
        None => from_header.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sender_name_with_angle_brackets() {
        assert_eq!(extract_sender_name("Alice Example <alice@example.test>"), "Alice Example");
    }

    #[test]
    fn sender_name_bare_address_is_empty() {
        assert_eq!(extract_sender_name("alice@example.test"), "");
    }

    #[test]
    fn sender_name_no_address_is_whole_header() {
        assert_eq!(extract_sender_name("not an address"), "not an address");
    }

    #[test]
    fn simple_plain_text_message() {
        let raw = b"From: a@b.test\r\nSubject: hi\r\n\r\nhello\r\n";
        let msg = parse(raw);
        assert_eq!(msg.subject, "hi");
        assert_eq!(msg.plain_text_body.as_deref(), Some("hello"));
        assert!(msg.html_body.is_none());
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn encoded_word_subject_is_decoded() {
        let raw = b"Subject: =?utf-8?B?aGVsbG8=?=\r\n\r\nbody\r\n";
        assert_eq!(parse(raw).subject, "hello");
    }

    #[test]
    fn multipart_with_attachment_matches_spec_scenario() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"B\"\n\n--B\nContent-Type: text/plain\n\nhi\n--B\nContent-Type: application/octet-stream; name=\"f.bin\"\nContent-Transfer-Encoding: base64\n\nQUJD\n--B--";
        let msg = parse(raw);
        assert_eq!(msg.plain_text_body.as_deref(), Some("hi"));
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "f.bin");
        assert_eq!(msg.attachments[0].content_type, "application/octet-stream");
        assert_eq!(msg.attachments[0].content_bytes, b"ABC".to_vec());
    }

    #[test]
    fn multipart_alternative_keeps_first_plain_and_first_html() {
        let raw = b"Content-Type: multipart/alternative; boundary=\"B\"\n\n--B\nContent-Type: text/plain\n\nfirst plain\n--B\nContent-Type: text/html\n\n<p>first html</p>\n--B\nContent-Type: text/plain\n\nsecond plain, discarded\n--B--";
        let msg = parse(raw);
        assert_eq!(msg.plain_text_body.as_deref(), Some("first plain"));
        assert_eq!(msg.html_body.as_deref(), Some("<p>first html</p>"));
    }

    #[test]
    fn attachment_without_filename_falls_back_to_subtype() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"B\"\n\n--B\nContent-Type: application/pdf\nContent-Transfer-Encoding: base64\n\nQUJD\n--B--";
        let msg = parse(raw);
        assert_eq!(msg.attachments[0].filename, "attachment.pdf");
    }

    #[test]
    fn no_blank_line_yields_empty_body_and_all_headers() {
        let msg = parse(b"From: a@b.test\nSubject: no body here");
        assert_eq!(msg.subject, "no body here");
        // no Content-Type header defaults to text/plain, so the (empty) body
        // still fills plain_text_body rather than being dropped.
        assert_eq!(msg.plain_text_body.as_deref(), Some(""));
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn quoted_printable_soft_break_in_body() {
        let raw = b"Content-Transfer-Encoding: quoted-printable\n\nhello=\nworld";
        assert_eq!(parse(raw).plain_text_body.as_deref(), Some("helloworld"));
    }

    #[test]
    fn fold_parts_keeps_first_plain_first_html_and_all_attachments() {
        let mut msg = EmailMessage::default();
        msg.fold_parts(vec![
            ParsedPart::PlainText("first".to_owned()),
            ParsedPart::Attachment(BodyPart {
                filename: "a.bin".to_owned(),
                content_type: "application/octet-stream".to_owned(),
                content_bytes: vec![1],
            }),
            ParsedPart::Html("<p>first</p>".to_owned()),
            ParsedPart::PlainText("second, discarded".to_owned()),
            ParsedPart::Attachment(BodyPart {
                filename: "b.bin".to_owned(),
                content_type: "application/octet-stream".to_owned(),
                content_bytes: vec![2],
            }),
        ]);

        assert_eq!(msg.plain_text_body.as_deref(), Some("first"));
        assert_eq!(msg.html_body.as_deref(), Some("<p>first</p>"));
        assert_eq!(
            msg.attachments.iter().map(|a| a.filename.as_str()).collect::<Vec<_>>(),
            vec!["a.bin", "b.bin"]
        );
    }
}
