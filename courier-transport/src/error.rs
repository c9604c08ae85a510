//! Transport error taxonomy.
//!
//! The worker's retry decision hangs off [`TransportError::is_retryable`]:
//! network-ish failures are worth another attempt, upstream verdicts about
//! the request itself are not.

use std::path::PathBuf;

use thiserror::Error;

use courier_common::ConfigError;
use courier_message::MessageError;
use courier_smtp::SmtpError;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport's configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The message failed client-side validation or serialisation.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// An attachment could not be read where the transport treats that as
    /// fatal.
    #[error("attachment missing: {path}")]
    AttachmentMissing { path: PathBuf },

    /// Anything the SMTP client raised.
    #[error(transparent)]
    Smtp(#[from] SmtpError),

    /// The sendmail process exited non-zero.
    #[error("sendmail exited with status {status}: {stderr}")]
    Sendmail { status: i32, stderr: String },

    /// Mailgun rejected the request as malformed (HTTP 400).
    #[error("upstream rejected request: {0}")]
    InvalidRequest(String),

    /// Mailgun rejected the API key (HTTP 401).
    #[error("upstream authentication failed: {0}")]
    AuthFailed(String),

    /// Mailgun refused the message (HTTP 402 payment, HTTP 429 rate).
    #[error("upstream refused message ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    /// The sending domain is not known upstream (HTTP 404).
    #[error("sending domain not found upstream: {0}")]
    DomainMissing(String),

    /// The message exceeds the upstream size limit (HTTP 413).
    #[error("message too large for upstream: {0}")]
    MessageTooLarge(String),

    /// The upstream service is down (HTTP 5xx).
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Any other upstream surprise, including non-JSON response bodies.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The HTTPS round-trip itself failed.
    #[error("http error: {0}")]
    Http(String),
}

impl TransportError {
    /// Whether a later attempt could plausibly succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Smtp(_)
            | Self::Sendmail { .. }
            | Self::UpstreamUnavailable(_)
            | Self::Http(_) => true,
            Self::Rejected { status, .. } => *status == 429,
            Self::Config(_)
            | Self::Message(_)
            | Self::AttachmentMissing { .. }
            | Self::InvalidRequest(_)
            | Self::AuthFailed(_)
            | Self::DomainMissing(_)
            | Self::MessageTooLarge(_)
            | Self::Upstream(_) => false,
        }
    }

    /// Validation failures are terminal: retrying an invalid message can
    /// only fail the same way.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Message(_) | Self::Config(_))
    }
}
