//! The mailer-level error, aggregating every subsystem's failures.

use thiserror::Error;

use courier_common::ConfigError;
use courier_dkim::DkimError;
use courier_message::MessageError;
use courier_queue::QueueError;
use courier_transport::TransportError;

#[derive(Debug, Error)]
pub enum MailerError {
    /// The rate limiter refused the send; try again later.
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Dkim(#[from] DkimError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl MailerError {
    /// Whether the worker should schedule another attempt.
    ///
    /// Rate-limit refusals inside a worker dispatch are ordinary retryable
    /// failures; validation failures never are.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Transport(e) => e.is_retryable(),
            Self::Queue(e) => matches!(e, QueueError::Unavailable(_)),
            Self::Config(_) | Self::Message(_) | Self::Dkim(_) => false,
        }
    }

    /// Whether this is a validation failure, which goes straight to the
    /// failed queue on first occurrence.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        match self {
            Self::Message(_) | Self::Config(_) => true,
            Self::Dkim(e) => matches!(
                e,
                DkimError::SigningKeyInvalid(_) | DkimError::InvalidKeyBits(_)
            ),
            Self::Transport(e) => e.is_validation(),
            Self::RateLimited { .. } | Self::Queue(_) => false,
        }
    }

    /// A short classifier for failed-job records and operator listings.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        use courier_smtp::SmtpError;

        match self {
            Self::RateLimited { .. } => "RateLimited",
            Self::Config(_) => "ConfigError",
            Self::Message(e) => match e {
                MessageError::RecipientInvalid(_) => "RecipientInvalid",
                MessageError::SubjectMissing => "SubjectMissing",
                MessageError::FromMissing => "FromMissing",
            },
            Self::Dkim(e) => match e {
                DkimError::SigningKeyInvalid(_) | DkimError::InvalidKeyBits(_) => {
                    "SigningKeyInvalid"
                }
                DkimError::SigningFailed(_) | DkimError::KeyGeneration(_) => "SigningFailed",
            },
            Self::Queue(_) => "QueueUnavailable",
            Self::Transport(e) => match e {
                TransportError::Config(_) => "ConfigError",
                TransportError::Message(MessageError::RecipientInvalid(_)) => "RecipientInvalid",
                TransportError::Message(MessageError::SubjectMissing) => "SubjectMissing",
                TransportError::Message(MessageError::FromMissing) => "FromMissing",
                TransportError::AttachmentMissing { .. } => "AttachmentMissing",
                TransportError::Smtp(e) => match e {
                    SmtpError::Protocol { .. } | SmtpError::Malformed(_) => "SmtpProtocolError",
                    SmtpError::AuthFailed(_) => "SmtpAuthFailed",
                    SmtpError::Transport(_)
                    | SmtpError::ConnectionClosed
                    | SmtpError::Tls(_)
                    | SmtpError::Timeout(_) => "SmtpTransportError",
                },
                TransportError::Sendmail { .. } => "SendmailError",
                TransportError::InvalidRequest(_) => "InvalidRequest",
                TransportError::AuthFailed(_) => "AuthFailed",
                TransportError::Rejected { .. } => "Rejected",
                TransportError::DomainMissing(_) => "DomainMissing",
                TransportError::MessageTooLarge(_) => "MessageTooLarge",
                TransportError::UpstreamUnavailable(_) => "UpstreamUnavailable",
                TransportError::Upstream(_) | TransportError::Http(_) => "UpstreamError",
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_retryable_but_not_validation() {
        let error = MailerError::RateLimited {
            retry_after_secs: 30,
        };
        assert!(error.is_retryable());
        assert!(!error.is_validation());
        assert_eq!(error.kind(), "RateLimited");
    }

    #[test]
    fn validation_errors_are_terminal() {
        let error = MailerError::Message(MessageError::SubjectMissing);
        assert!(!error.is_retryable());
        assert!(error.is_validation());
        assert_eq!(error.kind(), "SubjectMissing");

        let error = MailerError::Dkim(DkimError::SigningKeyInvalid("bad".to_string()));
        assert!(error.is_validation());
        assert_eq!(error.kind(), "SigningKeyInvalid");
    }

    #[test]
    fn smtp_failures_are_retryable() {
        let error = MailerError::Transport(TransportError::Smtp(
            courier_smtp::SmtpError::ConnectionClosed,
        ));
        assert!(error.is_retryable());
        assert!(!error.is_validation());
        assert_eq!(error.kind(), "SmtpTransportError");
    }

    #[test]
    fn queue_outage_is_retryable() {
        let error = MailerError::Queue(QueueError::Unavailable("down".to_string()));
        assert!(error.is_retryable());
        assert_eq!(error.kind(), "QueueUnavailable");
    }
}
