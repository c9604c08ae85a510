//! Courier: a mail delivery subsystem.
//!
//! Application code hands an outbound email to the [`Mailer`]; from there
//! it is composed into an RFC 5322 message, optionally DKIM-signed, rate
//! checked, and either dispatched through the configured transport or
//! enqueued for a [`Worker`] to deliver with retries.

pub mod error;
pub mod mailer;
pub mod worker;

pub use error::MailerError;
pub use mailer::Mailer;
pub use worker::Worker;
