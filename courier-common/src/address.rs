//! Syntactic validation of RFC 5321 mailboxes.
//!
//! This is deliberately narrower than a full address-list parser: the
//! subsystem only ever handles a single bare mailbox per message, so the
//! checks cover the `local@domain` shape, length limits, and the character
//! classes both sides accept. Display-name forms (`Name <addr>`) are
//! handled by [`extract_mailbox`].

use thiserror::Error;

/// RFC 5321 limits: 64 octets of local part, 255 of domain.
const MAX_LOCAL_LEN: usize = 64;
const MAX_DOMAIN_LEN: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address '{0}' is not a valid mailbox")]
    Malformed(String),
}

/// Validates a bare `local@domain` mailbox.
///
/// # Errors
///
/// Returns [`AddressError::Malformed`] when the address does not satisfy
/// the mailbox grammar.
pub fn validate_mailbox(address: &str) -> Result<(), AddressError> {
    let malformed = || AddressError::Malformed(address.to_string());

    let (local, domain) = address.split_once('@').ok_or_else(malformed)?;
    if local.is_empty()
        || local.len() > MAX_LOCAL_LEN
        || domain.is_empty()
        || domain.len() > MAX_DOMAIN_LEN
        || domain.contains('@')
    {
        return Err(malformed());
    }

    // Dot-atom local part: atext runs separated by single dots.
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return Err(malformed());
    }
    if !local.chars().all(is_atext_or_dot) {
        return Err(malformed());
    }

    // Domain: dot-separated labels of letters, digits, and inner hyphens.
    for label in domain.split('.') {
        if label.is_empty()
            || label.starts_with('-')
            || label.ends_with('-')
            || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(malformed());
        }
    }

    Ok(())
}

/// Whether the address passes [`validate_mailbox`].
#[must_use]
pub fn is_valid(address: &str) -> bool {
    validate_mailbox(address).is_ok()
}

/// Pulls the bare mailbox out of a header value, accepting both
/// `Name <local@domain>` and bare `local@domain` forms.
#[must_use]
pub fn extract_mailbox(header_value: &str) -> &str {
    header_value
        .rfind('<')
        .and_then(|open| {
            header_value[open..]
                .find('>')
                .map(|close| &header_value[open + 1..open + close])
        })
        .unwrap_or(header_value)
        .trim()
}

const fn is_atext_or_dot(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == '.'
        || matches!(
            c,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_mailboxes() {
        for address in [
            "user@example.com",
            "first.last@example.com",
            "user+tag@sub.example.co",
            "a@b.c",
            "odd!#$%&@example.com",
        ] {
            assert!(is_valid(address), "{address} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_mailboxes() {
        for address in [
            "",
            "plain",
            "@example.com",
            "user@",
            "user@@example.com",
            ".leading@example.com",
            "trailing.@example.com",
            "double..dot@example.com",
            "user@-bad.com",
            "user@bad-.com",
            "user@ex ample.com",
            "us er@example.com",
        ] {
            assert!(!is_valid(address), "{address} should be invalid");
        }
    }

    #[test]
    fn rejects_overlong_local_part() {
        let address = format!("{}@example.com", "a".repeat(MAX_LOCAL_LEN + 1));
        assert!(!is_valid(&address));
    }

    #[test]
    fn extracts_angle_addr() {
        assert_eq!(
            extract_mailbox("Example Sender <sender@example.com>"),
            "sender@example.com"
        );
        assert_eq!(extract_mailbox("sender@example.com"), "sender@example.com");
        assert_eq!(extract_mailbox(" <x@y.z> "), "x@y.z");
    }
}
