//! SMTP client error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failures raised by the SMTP client.
///
/// Transport and timeout failures are transient from the caller's point of
/// view; protocol and authentication failures name what the server said.
/// Whatever the failure, the client's socket is closed before the error is
/// surfaced, so the next attempt starts from a disconnected state.
#[derive(Debug, Error)]
pub enum SmtpError {
    /// Network-level failure: connect, read, or write.
    #[error("SMTP transport error: {0}")]
    Transport(#[from] io::Error),

    /// The connection was closed mid-dialogue.
    #[error("SMTP connection closed unexpectedly")]
    ConnectionClosed,

    /// The server answered with an unexpected status code.
    #[error("SMTP protocol error: expected {expected}, got {got}: {reply}")]
    Protocol {
        expected: u16,
        got: u16,
        reply: String,
    },

    /// Authentication was refused.
    #[error("SMTP authentication failed: {0}")]
    AuthFailed(String),

    /// TLS negotiation failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// No complete response arrived within the read timeout.
    #[error("SMTP response timed out after {0:?}")]
    Timeout(Duration),

    /// The server's bytes did not parse as an SMTP response.
    #[error("malformed SMTP response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, SmtpError>;
