//! The SMTP client dialogue.
//!
//! One [`SmtpClient`] value is one connection attempt. The happy path walks
//! greeting → EHLO → (STARTTLS → EHLO) → AUTH → MAIL FROM → RCPT TO → DATA
//! → QUIT; any unexpected reply or transport failure closes the socket
//! before the error is returned, so a retry always starts from a fresh
//! connection.

use std::time::Duration;

use crate::auth::{Credentials, cram_md5_response, login_tokens};
use crate::connection::Connection;
use crate::error::{Result, SmtpError};
use crate::response::{Reply, parse_reply};

const INITIAL_BUFFER: usize = 4096;

/// Read-buffer ceiling; a reply larger than this is a protocol violation.
const MAX_BUFFER: usize = 512 * 1024;

/// An SMTP client connection.
#[derive(Debug)]
pub struct SmtpClient {
    connection: Option<Connection>,
    host: String,
    accept_invalid_certs: bool,
    timeout: Duration,
    buffer: Vec<u8>,
    filled: usize,
    /// The most recent EHLO reply; capability checks consult it.
    capabilities: Option<Reply>,
}

impl SmtpClient {
    /// Connects over plaintext TCP (`none` and `tls` encryption modes; the
    /// latter upgrades later via [`Self::starttls`]).
    ///
    /// # Errors
    ///
    /// Returns [`SmtpError::Transport`] when the connection cannot be
    /// opened, or [`SmtpError::Timeout`] when it takes too long.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let connection = tokio::time::timeout(timeout, Connection::open_plain(host, port))
            .await
            .map_err(|_| SmtpError::Timeout(timeout))??;
        Ok(Self::from_connection(connection, host, timeout))
    }

    /// Connects with TLS from the first byte (`ssl` encryption mode).
    ///
    /// # Errors
    ///
    /// Returns [`SmtpError::Transport`] or [`SmtpError::Tls`] when the
    /// connection or handshake fails.
    pub async fn connect_tls(
        host: &str,
        port: u16,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let connection = tokio::time::timeout(
            timeout,
            Connection::open_tls(host, port, accept_invalid_certs),
        )
        .await
        .map_err(|_| SmtpError::Timeout(timeout))??;

        let mut client = Self::from_connection(connection, host, timeout);
        client.accept_invalid_certs = accept_invalid_certs;
        Ok(client)
    }

    fn from_connection(connection: Connection, host: &str, timeout: Duration) -> Self {
        Self {
            connection: Some(connection),
            host: host.to_string(),
            accept_invalid_certs: false,
            timeout,
            buffer: vec![0; INITIAL_BUFFER],
            filled: 0,
            capabilities: None,
        }
    }

    /// Accept self-signed certificates on STARTTLS upgrade. Test rigs only.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Whether the socket is still open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Reads the server greeting, expecting 220.
    pub async fn greeting(&mut self) -> Result<Reply> {
        let reply = self.read_reply().await?;
        self.expect(reply, 220)
    }

    /// Sends EHLO and records the advertised capabilities.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Reply> {
        let reply = self.command(&format!("EHLO {domain}"), 250).await?;
        self.capabilities = Some(reply.clone());
        Ok(reply)
    }

    /// Whether the last EHLO advertised STARTTLS.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.capabilities
            .as_ref()
            .is_some_and(|reply| reply.advertises("STARTTLS"))
    }

    /// AUTH mechanisms from the last EHLO, uppercased.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.capabilities
            .as_ref()
            .and_then(|reply| reply.capability_args("AUTH"))
            .unwrap_or_default()
            .into_iter()
            .map(|mechanism| mechanism.to_ascii_uppercase())
            .collect()
    }

    /// Issues STARTTLS and upgrades the socket (RFC 3207). The caller must
    /// re-EHLO afterwards; the pre-upgrade capabilities are discarded here.
    pub async fn starttls(&mut self) -> Result<()> {
        self.command("STARTTLS", 220).await?;
        self.capabilities = None;
        self.filled = 0;

        let Some(connection) = self.connection.take() else {
            return Err(SmtpError::ConnectionClosed);
        };
        match connection
            .upgrade(&self.host, self.accept_invalid_certs)
            .await
        {
            Ok(upgraded) => {
                self.connection = Some(upgraded);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Authenticates with CRAM-MD5 when advertised, AUTH LOGIN otherwise.
    pub async fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        if self.auth_mechanisms().iter().any(|m| m == "CRAM-MD5") {
            self.auth_cram_md5(credentials).await
        } else {
            self.auth_login(credentials).await
        }
    }

    /// AUTH LOGIN: base64 username then base64 password, 334/334/235.
    pub async fn auth_login(&mut self, credentials: &Credentials) -> Result<()> {
        let (user, pass) = login_tokens(credentials);
        self.auth_step("AUTH LOGIN", false, 334).await?;
        self.auth_step(&user, true, 334).await?;
        self.auth_step(&pass, true, 235).await?;
        Ok(())
    }

    /// AUTH CRAM-MD5: challenge in the 334 reply, keyed digest back, 235.
    pub async fn auth_cram_md5(&mut self, credentials: &Credentials) -> Result<()> {
        let challenge = self.auth_step("AUTH CRAM-MD5", false, 334).await?;
        let response = cram_md5_response(credentials, &challenge.text())?;
        self.auth_step(&response, true, 235).await?;
        Ok(())
    }

    /// Sends `MAIL FROM`, expecting 250.
    pub async fn mail_from(&mut self, address: &str) -> Result<Reply> {
        self.command(&format!("MAIL FROM:<{address}>"), 250).await
    }

    /// Sends `RCPT TO`, expecting 250.
    pub async fn rcpt_to(&mut self, address: &str) -> Result<Reply> {
        self.command(&format!("RCPT TO:<{address}>"), 250).await
    }

    /// Sends `DATA`, expecting 354.
    pub async fn data(&mut self) -> Result<Reply> {
        self.command("DATA", 354).await
    }

    /// Sends the message payload, dot-stuffed, terminated by a lone `.`,
    /// expecting 250.
    pub async fn send_payload(&mut self, payload: &str) -> Result<Reply> {
        let mut framed = String::with_capacity(payload.len() + 8);
        for line in payload.split_inclusive('\n') {
            // RFC 5321 4.5.2 transparency
            if line.starts_with('.') {
                framed.push('.');
            }
            framed.push_str(line);
        }
        if !framed.is_empty() && !framed.ends_with('\n') {
            framed.push_str("\r\n");
        }
        framed.push_str(".\r\n");

        self.write(framed.as_bytes()).await?;
        tracing::trace!(bytes = framed.len(), "payload transmitted");
        let reply = self.read_reply().await?;
        self.expect(reply, 250)
    }

    /// Sends QUIT and closes the socket. The server's goodbye is read on a
    /// best-effort basis; the message was already accepted.
    pub async fn quit(&mut self) {
        if self.connection.is_some() {
            if let Err(e) = self.write(b"QUIT\r\n").await {
                tracing::debug!(error = %e, "QUIT write failed");
            } else if let Err(e) = self.read_reply().await {
                tracing::debug!(error = %e, "QUIT reply not read");
            }
        }
        self.close();
    }

    /// Drops the socket immediately.
    pub fn close(&mut self) {
        self.connection = None;
        self.capabilities = None;
        self.filled = 0;
    }

    /// Sends one command line and enforces the expected reply code.
    async fn command(&mut self, line: &str, expected: u16) -> Result<Reply> {
        tracing::trace!(command = line, "sending");
        self.write_line(line).await?;
        let reply = self.read_reply().await?;
        self.expect(reply, expected)
    }

    /// Like [`Self::command`], but a wrong code means failed
    /// authentication, and sensitive lines stay out of the logs.
    async fn auth_step(&mut self, line: &str, sensitive: bool, expected: u16) -> Result<Reply> {
        if sensitive {
            tracing::trace!(command = "<credentials elided>", "sending");
        } else {
            tracing::trace!(command = line, "sending");
        }
        self.write_line(line).await?;
        let reply = self.read_reply().await?;
        if reply.code == expected {
            Ok(reply)
        } else {
            self.close();
            Err(SmtpError::AuthFailed(format!(
                "{} {}",
                reply.code,
                reply.text()
            )))
        }
    }

    fn expect(&mut self, reply: Reply, expected: u16) -> Result<Reply> {
        if reply.code == expected {
            Ok(reply)
        } else {
            self.close();
            Err(SmtpError::Protocol {
                expected,
                got: reply.code,
                reply: reply.text(),
            })
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.write(format!("{line}\r\n").as_bytes()).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(SmtpError::ConnectionClosed);
        };
        if let Err(e) = connection.write_all(data).await {
            self.close();
            return Err(e);
        }
        Ok(())
    }

    /// Reads until one complete reply is buffered. The configured timeout
    /// bounds the whole wait for this reply.
    async fn read_reply(&mut self) -> Result<Reply> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            match parse_reply(&self.buffer[..self.filled]) {
                Ok(Some((reply, consumed))) => {
                    self.buffer.copy_within(consumed..self.filled, 0);
                    self.filled -= consumed;
                    tracing::trace!(code = reply.code, "reply received");
                    return Ok(reply);
                }
                Ok(None) => {}
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }

            if self.filled >= self.buffer.len() {
                if self.buffer.len() >= MAX_BUFFER {
                    self.close();
                    return Err(SmtpError::Malformed(format!(
                        "reply exceeds {MAX_BUFFER} bytes"
                    )));
                }
                let doubled = (self.buffer.len() * 2).min(MAX_BUFFER);
                self.buffer.resize(doubled, 0);
            }

            let Some(connection) = self.connection.as_mut() else {
                return Err(SmtpError::ConnectionClosed);
            };
            let read = tokio::time::timeout_at(deadline, connection.read(&mut self.buffer[self.filled..]))
                .await
                .map_err(|_| SmtpError::Timeout(self.timeout));
            match read {
                Ok(Ok(n)) => self.filled += n,
                Ok(Err(e)) => {
                    self.close();
                    return Err(e);
                }
                Err(timeout) => {
                    self.close();
                    return Err(timeout);
                }
            }
        }
    }
}
