//! DKIM error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DkimError {
    /// The configured private key does not load as an RSA key.
    #[error("DKIM signing key is invalid: {0}")]
    SigningKeyInvalid(String),

    /// The RSA signing operation itself failed.
    #[error("DKIM signing failed: {0}")]
    SigningFailed(String),

    /// Key sizes must be positive multiples of 1024 bits.
    #[error("invalid DKIM key size {0}, expected a positive multiple of 1024")]
    InvalidKeyBits(usize),

    /// Key generation failed.
    #[error("DKIM key generation failed: {0}")]
    KeyGeneration(String),
}
