//! SMTP reply parsing.
//!
//! Replies are one or more `code-text` continuation lines closed by a
//! `code text` terminator (`/^\d{3} /`). The parser works incrementally on
//! a byte buffer: it either yields a complete reply plus the number of
//! bytes it consumed, or asks for more data.

use crate::error::{Result, SmtpError};

/// A complete (possibly multi-line) SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    /// All reply lines joined with newlines, trimmed.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n").trim().to_string()
    }

    /// Whether any line advertises the given EHLO capability keyword.
    #[must_use]
    pub fn advertises(&self, capability: &str) -> bool {
        self.lines.iter().any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|word| word.eq_ignore_ascii_case(capability))
        })
    }

    /// The space-separated arguments of a capability line, if advertised.
    #[must_use]
    pub fn capability_args(&self, capability: &str) -> Option<Vec<String>> {
        self.lines.iter().find_map(|line| {
            let mut words = line.split_whitespace();
            (words.next()?.eq_ignore_ascii_case(capability))
                .then(|| words.map(str::to_string).collect())
        })
    }
}

/// Attempts to parse one complete reply from the front of `buffer`.
///
/// Returns `Ok(None)` when the buffer holds only a partial reply.
///
/// # Errors
///
/// Returns [`SmtpError::Malformed`] for lines that do not follow the
/// `code[- ]text` grammar, or for continuation lines whose code differs
/// from the first line's.
pub fn parse_reply(buffer: &[u8]) -> Result<Option<(Reply, usize)>> {
    let mut lines = Vec::new();
    let mut code = None;
    let mut consumed = 0;

    loop {
        let rest = &buffer[consumed..];
        let Some(newline) = rest.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };

        let raw = &rest[..newline];
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = std::str::from_utf8(raw)
            .map_err(|_| SmtpError::Malformed("reply is not valid UTF-8".to_string()))?;
        consumed += newline + 1;

        let (line_code, last, text) = split_line(line)?;
        match code {
            None => code = Some(line_code),
            Some(first) if first != line_code => {
                return Err(SmtpError::Malformed(format!(
                    "continuation code {line_code} does not match {first}"
                )));
            }
            Some(_) => {}
        }
        lines.push(text.to_string());

        if last {
            // line_code is always Some(code) here
            return Ok(Some((
                Reply {
                    code: code.unwrap_or(line_code),
                    lines,
                },
                consumed,
            )));
        }
    }
}

/// Splits `250-text` / `250 text` / bare `250` into its parts.
fn split_line(line: &str) -> Result<(u16, bool, &str)> {
    if line.len() < 3 || !line.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
        return Err(SmtpError::Malformed(format!("bad reply line '{line}'")));
    }
    let code: u16 = line[..3]
        .parse()
        .map_err(|_| SmtpError::Malformed(format!("bad status code in '{line}'")))?;

    match line.as_bytes().get(3) {
        None => Ok((code, true, "")),
        Some(b' ') => Ok((code, true, &line[4..])),
        Some(b'-') => Ok((code, false, &line[4..])),
        Some(_) => Err(SmtpError::Malformed(format!(
            "bad separator in reply line '{line}'"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line_reply() {
        let (reply, consumed) = parse_reply(b"220 mail.example.com ESMTP ready\r\n")
            .unwrap()
            .expect("complete");
        assert_eq!(reply.code, 220);
        assert_eq!(reply.lines, vec!["mail.example.com ESMTP ready"]);
        assert_eq!(consumed, 34);
    }

    #[test]
    fn parses_multi_line_reply() {
        let data = b"250-mail.example.com\r\n250-STARTTLS\r\n250 AUTH LOGIN CRAM-MD5\r\n";
        let (reply, consumed) = parse_reply(data).unwrap().expect("complete");
        assert_eq!(reply.code, 250);
        assert_eq!(reply.lines.len(), 3);
        assert_eq!(consumed, data.len());
        assert!(reply.advertises("STARTTLS"));
        assert!(reply.advertises("starttls"));
        assert!(!reply.advertises("SIZE"));
    }

    #[test]
    fn capability_args_lists_mechanisms() {
        let data = b"250-mail.example.com\r\n250 AUTH LOGIN CRAM-MD5\r\n";
        let (reply, _) = parse_reply(data).unwrap().expect("complete");
        assert_eq!(
            reply.capability_args("AUTH"),
            Some(vec!["LOGIN".to_string(), "CRAM-MD5".to_string()])
        );
        assert_eq!(reply.capability_args("SIZE"), None);
    }

    #[test]
    fn incomplete_reply_asks_for_more() {
        assert!(parse_reply(b"250-partial\r\n250 OK").unwrap().is_none());
        assert!(parse_reply(b"25").unwrap().is_none());
        assert!(parse_reply(b"").unwrap().is_none());
    }

    #[test]
    fn bare_code_line_is_terminal() {
        let (reply, _) = parse_reply(b"354\r\n").unwrap().expect("complete");
        assert_eq!(reply.code, 354);
        assert_eq!(reply.lines, vec![String::new()]);
    }

    #[test]
    fn lf_only_line_endings_are_tolerated() {
        let (reply, consumed) = parse_reply(b"250 OK\n").unwrap().expect("complete");
        assert_eq!(reply.code, 250);
        assert_eq!(consumed, 7);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_reply(b"hello world\r\n").is_err());
        assert!(parse_reply(b"2x0 nope\r\n").is_err());
        assert!(parse_reply(b"250~weird\r\n").is_err());
    }

    #[test]
    fn rejects_mismatched_continuation() {
        let result = parse_reply(b"250-one\r\n251 two\r\n");
        assert!(matches!(result, Err(SmtpError::Malformed(_))));
    }

    #[test]
    fn only_first_reply_is_consumed() {
        let data = b"250 OK\r\n354 go ahead\r\n";
        let (reply, consumed) = parse_reply(data).unwrap().expect("complete");
        assert_eq!(reply.code, 250);
        assert_eq!(consumed, 8);
    }
}
