//! SASL mechanism encodings for AUTH LOGIN and AUTH CRAM-MD5 (RFC 4954,
//! RFC 2195).
//!
//! These functions only compute the continuation payloads; the dialogue
//! itself lives in the client. Everything returned here is credential
//! material and must never reach a log.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use md5::Md5;

use crate::error::{Result, SmtpError};

type HmacMd5 = Hmac<Md5>;

/// Credentials for an authenticated session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// The two base64 continuation lines of an AUTH LOGIN exchange.
#[must_use]
pub fn login_tokens(credentials: &Credentials) -> (String, String) {
    (
        BASE64.encode(&credentials.username),
        BASE64.encode(&credentials.password),
    )
}

/// Computes the CRAM-MD5 continuation: `base64(user + " " +
/// hex(hmac_md5(challenge, password)))`.
///
/// # Errors
///
/// Returns [`SmtpError::Malformed`] when the server's challenge is not
/// valid base64.
pub fn cram_md5_response(credentials: &Credentials, challenge_b64: &str) -> Result<String> {
    let challenge = BASE64
        .decode(challenge_b64.trim())
        .map_err(|e| SmtpError::Malformed(format!("bad CRAM-MD5 challenge: {e}")))?;

    let mut mac = HmacMd5::new_from_slice(credentials.password.as_bytes())
        .map_err(|e| SmtpError::Malformed(format!("unusable CRAM-MD5 key: {e}")))?;
    mac.update(&challenge);
    let digest = hex::encode(mac.finalize().into_bytes());

    Ok(BASE64.encode(format!("{} {digest}", credentials.username)))
}
