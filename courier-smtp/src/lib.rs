//! SMTP client for outbound delivery.
//!
//! Connection lifecycle, STARTTLS upgrade, AUTH LOGIN / CRAM-MD5, and DATA
//! framing per RFC 5321, RFC 3207, and RFC 4954.

pub mod auth;
pub mod client;
pub mod connection;
pub mod error;
pub mod response;

pub use auth::Credentials;
pub use client::SmtpClient;
pub use error::{Result, SmtpError};
pub use response::Reply;
