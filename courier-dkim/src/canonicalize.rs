//! Canonicalisation of bodies and headers prior to hashing and signing.
//!
//! The body uses simple canonicalisation: every line ending becomes CRLF,
//! trailing empty lines collapse, and the result always ends with exactly
//! one CRLF. Headers are folded to `lowercase-name:trimmed-value` lines.
//! Both steps must be deterministic; the signature is computed over their
//! output.

/// The fixed set of headers covered by the signature, in tag order.
pub const SIGNED_HEADERS: [&str; 5] = ["From", "To", "Subject", "Date", "Message-ID"];

/// Simple body canonicalisation.
///
/// CR, LF, and CRLF all normalise to CRLF; trailing CRLFs are stripped and
/// exactly one is appended. An empty body canonicalises to a single CRLF.
#[must_use]
pub fn canonicalize_body(body: &str) -> String {
    let mut normalized = String::with_capacity(body.len() + 2);
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                normalized.push_str("\r\n");
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\n' => normalized.push_str("\r\n"),
            other => normalized.push(other),
        }
    }

    while normalized.ends_with("\r\n") {
        normalized.truncate(normalized.len() - 2);
    }
    normalized.push_str("\r\n");
    normalized
}

/// One canonical header line: `lowercase(name):trim(value)` plus CRLF.
#[must_use]
pub fn canonicalize_header(name: &str, value: &str) -> String {
    format!("{}:{}\r\n", name.to_ascii_lowercase(), value.trim())
}

/// Folds the signed headers (those present) into the canonical block the
/// signature covers.
#[must_use]
pub fn canonical_header_block(headers: &[(String, String)]) -> String {
    let mut block = String::new();
    for name in SIGNED_HEADERS {
        if let Some((_, value)) = headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
        {
            block.push_str(&canonicalize_header(name, value));
        }
    }
    block
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn body_line_endings_normalise() {
        assert_eq!(canonicalize_body("Hello\n"), "Hello\r\n");
        assert_eq!(canonicalize_body("Hello\r"), "Hello\r\n");
        assert_eq!(canonicalize_body("Hello\r\n"), "Hello\r\n");
        assert_eq!(canonicalize_body("a\nb\rc\r\nd"), "a\r\nb\r\nc\r\nd\r\n");
    }

    #[test]
    fn trailing_blank_lines_collapse() {
        assert_eq!(canonicalize_body("Hello\r\n\r\n\r\n"), "Hello\r\n");
        assert_eq!(canonicalize_body("Hello\n\n\n"), "Hello\r\n");
    }

    #[test]
    fn empty_body_is_single_crlf() {
        assert_eq!(canonicalize_body(""), "\r\n");
        assert_eq!(canonicalize_body("\r\n\r\n"), "\r\n");
    }

    #[test]
    fn canonicalisation_is_idempotent() {
        for body in ["Hello\n", "a\rb\nc\r\n\r\n", "", "x", "line\n\nline\n"] {
            let once = canonicalize_body(body);
            assert_eq!(canonicalize_body(&once), once, "input {body:?}");
        }
    }

    #[test]
    fn header_folds_name_and_trims_value() {
        assert_eq!(
            canonicalize_header("Subject", "  Hello world  "),
            "subject:Hello world\r\n"
        );
        assert_eq!(
            canonicalize_header("Message-ID", "<x@h>"),
            "message-id:<x@h>\r\n"
        );
    }

    #[test]
    fn header_block_keeps_fixed_order_and_skips_absent() {
        let headers = vec![
            ("To".to_string(), "b@example.com".to_string()),
            ("From".to_string(), "a@example.com".to_string()),
            ("Subject".to_string(), "Hi".to_string()),
        ];
        assert_eq!(
            canonical_header_block(&headers),
            "from:a@example.com\r\nto:b@example.com\r\nsubject:Hi\r\n"
        );
    }
}
