//! MIME helpers: boundary tokens and base64 body chunking.

use base64::Engine;
use rand::Rng;

/// RFC 2045 caps encoded lines at 76 characters.
const BASE64_LINE_WIDTH: usize = 76;

const BOUNDARY_LEN: usize = 32;

/// A fresh multipart boundary token.
#[must_use]
pub fn boundary() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(BOUNDARY_LEN)
        .map(char::from)
        .collect();
    format!("=_{token}")
}

/// Base64-encodes `data` and folds it at 76 columns with CRLF line ends.
#[must_use]
pub fn encode_base64_chunked(data: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    let mut folded = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_WIDTH * 2 + 2);
    let bytes = encoded.as_bytes();
    for chunk in bytes.chunks(BASE64_LINE_WIDTH) {
        // base64 output is pure ASCII, chunking cannot split a code point
        folded.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        folded.push_str("\r\n");
    }
    folded
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_are_unique() {
        let a = boundary();
        let b = boundary();
        assert_ne!(a, b);
        assert!(a.starts_with("=_"));
        assert_eq!(a.len(), BOUNDARY_LEN + 2);
    }

    #[test]
    fn chunked_lines_fit_the_limit() {
        let data = vec![0xAB_u8; 500];
        let folded = encode_base64_chunked(&data);
        for line in folded.lines() {
            assert!(line.len() <= BASE64_LINE_WIDTH, "line too long: {}", line.len());
        }
        assert!(folded.ends_with("\r\n"));

        let rejoined: String = folded.lines().collect();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(rejoined)
            .expect("valid base64");
        assert_eq!(decoded, data);
    }

    #[test]
    fn empty_input_encodes_to_nothing() {
        assert_eq!(encode_base64_chunked(&[]), "");
    }
}
