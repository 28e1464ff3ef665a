// SPDX-License-Identifier: GPL-3.0-only

//! The per-connection SMTP command/response protocol, including DATA
//! capture and the end-of-DATA persistence transaction. Owns no I/O: a
//! reactor feeds it terminator-included lines and writes back whatever
//! reply lines it returns.

mod state;

pub use state::{ConnectionState, LineBuffer};

use smtpd_common::{domain_of, extract_sender, rstrip_crlf};
use smtpd_spf::{spf_allows, Resolver};
use smtpd_storage::{Param, Storage};

/// What the reactor should do after a line was handled: send `replies`
/// (each gets `\r\n` appended by the writer) and, if `close` is set,
/// half-close the socket once they're flushed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SessionOutcome {
    pub replies: Vec<String>,
    pub close: bool,
}

impl SessionOutcome {
    fn reply(line: impl Into<String>) -> Self {
        Self {
            replies: vec![line.into()],
            close: false,
        }
    }

    fn replies(lines: Vec<String>) -> Self {
        Self {
            replies: lines,
            close: false,
        }
    }

    fn none() -> Self {
        Self::default()
    }

    fn close_after(line: impl Into<String>) -> Self {
        Self {
            replies: vec![line.into()],
            close: true,
        }
    }
}

/// Handles one terminator-included line for `state`. `server_name` is used
/// in the HELO/EHLO greeting block.
pub async fn handle_line<R: Resolver>(
    state: &mut ConnectionState,
    raw_line: &[u8],
    server_name: &str,
    resolver: &R,
    storage: &mut Storage,
) -> SessionOutcome {
    let text = String::from_utf8_lossy(raw_line);
    let line = rstrip_crlf(&text);

    if state.in_data {
        return handle_data_line(state, line, storage).await;
    }

    handle_command_line(state, line, server_name, resolver).await
}

async fn handle_data_line(
    state: &mut ConnectionState,
    line: &str,
    storage: &mut Storage,
) -> SessionOutcome {
    if line == "." {
        state.in_data = false;
        let outcome = commit_message(state, storage).await;
        state.reset_transaction();
        return outcome;
    }

    state.data_buffer.push_str(line);
    state.data_buffer.push('\n');
    SessionOutcome::none()
}

async fn commit_message(state: &ConnectionState, storage: &mut Storage) -> SessionOutcome {
    let message = smtpd_mail_parser::parse(state.data_buffer.as_bytes());

    if let Err(error) = run_transaction(state, &message, storage).await {
        storage.rollback().await;
        tracing::warn!(%error, "message transaction failed");
        return SessionOutcome::reply("554 5.7.0 Message rejected due to server error");
    }

    SessionOutcome::reply("250 2.0.0 OK: Message accepted")
}

async fn run_transaction(
    state: &ConnectionState,
    message: &smtpd_mail_parser::EmailMessage,
    storage: &mut Storage,
) -> Result<(), smtpd_storage::StorageError> {
    storage.begin().await?;

    let recipients_literal = format!(
        "{{{}}}",
        state
            .recipients
            .iter()
            .map(|r| format!("\"{}\"", Storage::escape(r)))
            .collect::<Vec<_>>()
            .join(",")
    );

    let insert_email = format!(
        "INSERT INTO emails (sender, senderName, recipients, raw_body, subject, plain_text_body, html_body) \
         VALUES ('{}', '{}', '{}', '{}', '{}', '{}', '{}') RETURNING id",
        Storage::escape(&state.sender),
        Storage::escape(&message.sender_name),
        recipients_literal,
        Storage::escape(&state.data_buffer),
        Storage::escape(&message.subject),
        Storage::escape(message.plain_text_body.as_deref().unwrap_or("")),
        Storage::escape(message.html_body.as_deref().unwrap_or("")),
    );

    let email_result = storage.execute(&insert_email).await?;
    let email_id = email_result.inserted_id()?;

    for attachment in &message.attachments {
        let file_result = storage
            .execute_prepared(
                "file_insert",
                &[
                    Param::Text(&attachment.filename),
                    Param::Text(&attachment.content_type),
                    Param::Bytes(&attachment.content_bytes),
                ],
            )
            .await?;
        let file_id = file_result.inserted_id()?;

        let link_sql =
            format!("INSERT INTO email_attachments (email_id, file_id) VALUES ({email_id}, {file_id})");
        storage.execute(&link_sql).await?;
    }

    storage.commit().await
}

async fn handle_command_line<R: Resolver>(
    state: &mut ConnectionState,
    line: &str,
    server_name: &str,
    resolver: &R,
) -> SessionOutcome {
    if line.is_empty() {
        return SessionOutcome::none();
    }

    if line.starts_with("HELO") || line.starts_with("EHLO") {
        let client_name = line.find(' ').map_or("unknown", |pos| &line[pos + 1..]);
        return SessionOutcome::replies(vec![
            format!("250-{server_name} Hello {client_name}"),
            "250-SIZE 35882577".to_owned(),
            "250-8BITMIME".to_owned(),
            "250-PIPELINING".to_owned(),
            "250 HELP".to_owned(),
        ]);
    }

    if line.starts_with("MAIL FROM:") {
        return handle_mail_from(state, line, resolver).await;
    }

    if line.starts_with("RCPT TO:") {
        state.recipients.push(line["RCPT TO:".len()..].to_owned());
        return SessionOutcome::reply("250 OK");
    }

    if line == "DATA" {
        if state.sender.is_empty() || state.recipients.is_empty() {
            return SessionOutcome::reply("503 Bad sequence of commands");
        }
        state.in_data = true;
        return SessionOutcome::reply("354 End data with <CR><LF>.<CR><LF>");
    }

    if line == "RSET" {
        state.reset_transaction();
        return SessionOutcome::reply("250 OK");
    }

    if line == "NOOP" {
        return SessionOutcome::reply("250 OK");
    }

    if line == "VRFY" {
        return SessionOutcome::reply("252 Cannot VRFY user, but will accept message");
    }

    if line == "HELP" {
        return SessionOutcome::replies(vec![
            "214-Commands supported:".to_owned(),
            "214 HELO EHLO MAIL RCPT DATA RSET NOOP QUIT HELP VRFY".to_owned(),
        ]);
    }

    if line == "QUIT" {
        return SessionOutcome::close_after("221 Bye");
    }

    SessionOutcome::reply("502 Command not implemented")
}

async fn handle_mail_from<R: Resolver>(
    state: &mut ConnectionState,
    line: &str,
    resolver: &R,
) -> SessionOutcome {
    let sender = extract_sender(line).to_owned();
    let domain = domain_of(&sender).to_owned();

    if domain.is_empty() {
        return SessionOutcome::reply("501 Incorrect email format");
    }

    if !spf_allows(resolver, &domain, &state.peer_ip).await {
        return SessionOutcome::reply("550 5.7.1 Access denied: invalid sender");
    }

    state.sender = sender;
    SessionOutcome::reply("250 OK")
}
