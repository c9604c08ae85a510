//! Delivery over a remote SMTP relay.
//!
//! Each send is one complete dialogue on a fresh connection; there is no
//! connection reuse, so a failed attempt can never leave a half-open
//! session behind for the next one.

use async_trait::async_trait;

use courier_common::address::extract_mailbox;
use courier_common::config::{Encryption, SmtpConfig};
use courier_message::Message;
use courier_smtp::{Credentials, SmtpClient};

use crate::{Transport, TransportError};

const HELO_DOMAIN: &str = "localhost";

#[derive(Debug)]
pub struct SmtpTransport {
    config: SmtpConfig,
    accept_invalid_certs: bool,
}

impl SmtpTransport {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            accept_invalid_certs: false,
        }
    }

    /// Accept self-signed certificates. Test rigs only.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.timeout_secs.max(1))
    }

    async fn open(&self) -> Result<SmtpClient, TransportError> {
        let client = match self.config.encryption {
            Encryption::Ssl => {
                SmtpClient::connect_tls(
                    &self.config.host,
                    self.config.port,
                    self.timeout(),
                    self.accept_invalid_certs,
                )
                .await?
            }
            Encryption::Tls | Encryption::None => {
                SmtpClient::connect(&self.config.host, self.config.port, self.timeout())
                    .await?
                    .accept_invalid_certs(self.accept_invalid_certs)
            }
        };
        Ok(client)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let serialized = message.to_rfc5322()?;
        // A message this transport cannot reproduce in full must not go
        // out at all.
        if let Some(warning) = serialized.warnings.first() {
            return Err(TransportError::AttachmentMissing {
                path: warning.path.clone(),
            });
        }

        let envelope_from = message
            .from_header()
            .map(extract_mailbox)
            .unwrap_or_default()
            .to_string();

        let mut client = self.open().await?;
        client.greeting().await?;
        client.ehlo(HELO_DOMAIN).await?;

        match self.config.encryption {
            Encryption::Tls if client.supports_starttls() => {
                client.starttls().await?;
                client.ehlo(HELO_DOMAIN).await?;
            }
            Encryption::Ssl => {
                // The session is already encrypted; the second EHLO simply
                // refreshes the capability list.
                client.ehlo(HELO_DOMAIN).await?;
            }
            _ => {}
        }

        if !self.config.username.is_empty() && !self.config.password.is_empty() {
            let credentials =
                Credentials::new(self.config.username.clone(), self.config.password.clone());
            client.authenticate(&credentials).await?;
        }

        client.mail_from(&envelope_from).await?;
        client.rcpt_to(message.to_address()).await?;
        client.data().await?;
        client.send_payload(&serialized.data).await?;
        client.quit().await;

        tracing::debug!(
            recipient = %message.to_address(),
            host = %self.config.host,
            "message relayed over SMTP"
        );
        Ok(())
    }
}
