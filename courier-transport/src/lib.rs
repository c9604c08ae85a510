//! Pluggable delivery transports.
//!
//! Every transport implements the same [`Transport`] contract; which one a
//! mailer holds is decided by configuration through [`build_transport`].

pub mod error;
pub mod mailgun;
pub mod null;
pub mod sendmail;
pub mod smtp;

use std::sync::Arc;

use async_trait::async_trait;

use courier_common::config::{DriverKind, Drivers};
use courier_message::Message;

pub use error::TransportError;
pub use mailgun::MailgunClient;
pub use null::NullSink;
pub use sendmail::SendmailPipe;
pub use smtp::SmtpTransport;

/// A delivery mechanism for fully-built messages.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// The configuration name of this transport.
    fn name(&self) -> &'static str;

    /// Delivers one message, returning only when the transport has either
    /// accepted or refused it.
    async fn send(&self, message: &Message) -> Result<(), TransportError>;
}

/// Builds the transport selected by `driver` from its configuration
/// section.
///
/// # Errors
///
/// Returns [`TransportError::Config`] when the selected driver's
/// configuration fails validation.
pub fn build_transport(
    driver: DriverKind,
    drivers: &Drivers,
) -> Result<Arc<dyn Transport>, TransportError> {
    Ok(match driver {
        DriverKind::Smtp => Arc::new(SmtpTransport::new(drivers.smtp.clone())),
        DriverKind::Sendmail => Arc::new(SendmailPipe::new(drivers.sendmail.clone())),
        DriverKind::Mailgun => Arc::new(MailgunClient::new(drivers.mailgun.clone())?),
        DriverKind::Null => Arc::new(NullSink),
    })
}
