// SPDX-License-Identifier: GPL-3.0-only

//! String and address helpers shared by every other crate in the workspace.

use once_cell::sync::Lazy;
use regex::Regex;

static MAILBOX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?x)
        ^ [A-Za-z0-9._%+-]+
        @ [A-Za-z0-9.-]+ \. [A-Za-z]{2,}
        $
    ")
    .expect("mailbox regex is valid")
});

/// Returns the substring after `@` if `mailbox` matches the mailbox
/// regular expression `^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$`,
/// otherwise the empty string.
#[must_use]
pub fn domain_of(mailbox: &str) -> &str {
    if !MAILBOX_RE.is_match(mailbox) {
        return "";
    }
    // Safe to unwrap: the regex above requires exactly one '@'-delimited tail.
    mailbox.split_once('@').map_or("", |(_, domain)| domain)
}

/// Extracts the mailbox from a `MAIL FROM:`/`RCPT TO:` line.
///
/// Returns the text between the first `<` and the following `>` if both are
/// present; otherwise, if `line` is longer than the 10-character
/// `"MAIL FROM:"` prefix, the trimmed remainder after that prefix; otherwise
/// the empty string.
#[must_use]
pub fn extract_sender(line: &str) -> &str {
    if let Some(start) = line.find('<') {
        if let Some(end) = line[start..].find('>') {
            let end = start + end;
            if end > start {
                return &line[start + 1..end];
            }
        }
    }

    const PREFIX_LEN: usize = "MAIL FROM:".len();
    if line.len() > PREFIX_LEN {
        return line[PREFIX_LEN..].trim();
    }

    ""
}

/// Removes trailing `\r` and `\n` bytes from `s`, in any combination.
#[must_use]
pub fn rstrip_crlf(s: &str) -> &str {
    s.trim_end_matches(['\r', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn domain_of_valid_mailbox() {
        assert_eq!(domain_of("a@b.test"), "b.test");
        assert_eq!(domain_of("first.last+tag@sub.example.co"), "sub.example.co");
    }

    #[test]
    fn domain_of_rejects_malformed() {
        assert_eq!(domain_of("not-an-address"), "");
        assert_eq!(domain_of("@b.test"), "");
        assert_eq!(domain_of("a@b"), "");
        assert_eq!(domain_of(""), "");
    }

    #[test]
    fn domain_of_nonempty_implies_regex_match() {
        for input in ["a@b.test", "weird", "x@y", "p@q.rs"] {
            if !domain_of(input).is_empty() {
                assert!(MAILBOX_RE.is_match(input));
            }
        }
    }

    #[test]
    fn extract_sender_angle_brackets() {
        assert_eq!(extract_sender("MAIL FROM:<a@b.test>"), "a@b.test");
        assert_eq!(extract_sender("RCPT TO:<r@x>"), "r@x");
    }

    #[test]
    fn extract_sender_angle_brackets_with_params() {
        assert_eq!(
            extract_sender("MAIL FROM:<a@b.test> SIZE=1000"),
            "a@b.test"
        );
    }

    #[test]
    fn extract_sender_falls_back_to_tail() {
        assert_eq!(extract_sender("MAIL FROM:a@b.test"), "a@b.test");
    }

    #[test]
    fn extract_sender_too_short_is_empty() {
        assert_eq!(extract_sender("MAIL FROM:"), "");
        assert_eq!(extract_sender("short"), "");
    }

    #[test]
    fn rstrip_crlf_removes_trailing_bytes() {
        assert_eq!(rstrip_crlf("abc\r\n"), "abc");
        assert_eq!(rstrip_crlf("abc\n"), "abc");
        assert_eq!(rstrip_crlf("abc\r\n\r\n"), "abc");
        assert_eq!(rstrip_crlf("abc"), "abc");
    }
}
