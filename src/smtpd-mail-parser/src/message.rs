// SPDX-License-Identifier: GPL-3.0-only

/// A fully decoded email: header values extracted verbatim (after RFC 2047
/// decoding), and a body folded down from a possibly-nested MIME structure
/// into at most one plain-text part, at most one HTML part, and an ordered
/// list of attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub sender_name: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub date: String,
    pub message_id: String,
    pub plain_text_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<BodyPart>,
}

/// A non-text (or explicitly attached) MIME part, fully decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPart {
    pub filename: String,
    pub content_type: String,
    pub content_bytes: Vec<u8>,
}

/// One leaf entity discovered during the depth-first MIME walk, in
/// discovery order. The recursive descent only ever produces this shape;
/// folding it down into [`EmailMessage`]'s "first plain, first html, all
/// attachments" rule happens once, after the whole tree has been walked,
/// rather than threading `&mut EmailMessage` through the recursion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPart {
    PlainText(String),
    Html(String),
    Attachment(BodyPart),
}

impl EmailMessage {
    /// Folds a depth-first sequence of [`ParsedPart`]s into this message:
    /// the first `PlainText` fills `plain_text_body`, the first `Html`
    /// fills `html_body` (subsequent matches of either are discarded), and
    /// every `Attachment` is appended in discovery order.
    pub(crate) fn fold_parts(&mut self, parts: Vec<ParsedPart>) {
        for part in parts {
            match part {
                ParsedPart::PlainText(text) => {
                    if self.plain_text_body.is_none() {
                        self.plain_text_body = Some(text);
                    }
                }
                ParsedPart::Html(html) => {
                    if self.html_body.is_none() {
                        self.html_body = Some(html);
                    }
                }
                ParsedPart::Attachment(attachment) => self.attachments.push(attachment),
            }
        }
    }
}
