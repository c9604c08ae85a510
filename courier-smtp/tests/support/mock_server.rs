//! Scripted SMTP server for exercising the client.
//!
//! The server speaks just enough of the protocol to drive the client
//! through a full dialogue, with the reply to each command configurable so
//! tests can inject refusals, credential rejections, dropped connections,
//! and slow replies. Every received command line (and the DATA payload) is
//! recorded for assertion.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct Script {
    greeting: (u16, String),
    /// EHLO reply lines after the hostname line.
    capabilities: Vec<String>,
    mail_code: (u16, String),
    rcpt_code: (u16, String),
    data_code: (u16, String),
    data_end_code: (u16, String),
    auth_code: (u16, String),
    cram_challenge_b64: String,
    /// Close the socket without replying once this many commands arrived.
    drop_after_commands: Option<usize>,
    response_delay: Option<Duration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: (220, "mock ESMTP ready".to_string()),
            capabilities: vec!["AUTH LOGIN".to_string()],
            mail_code: (250, "OK".to_string()),
            rcpt_code: (250, "OK".to_string()),
            data_code: (354, "End data with <CR><LF>.<CR><LF>".to_string()),
            data_end_code: (250, "OK queued".to_string()),
            auth_code: (235, "Authentication succeeded".to_string()),
            cram_challenge_b64: String::new(),
            drop_after_commands: None,
            response_delay: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn capabilities(mut self, capabilities: &[&str]) -> Self {
        self.script.capabilities = capabilities.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn cram_challenge(mut self, challenge_b64: impl Into<String>) -> Self {
        self.script.cram_challenge_b64 = challenge_b64.into();
        self
    }

    #[must_use]
    pub fn mail_from_reply(mut self, code: u16, text: &str) -> Self {
        self.script.mail_code = (code, text.to_string());
        self
    }

    #[must_use]
    pub fn rcpt_to_reply(mut self, code: u16, text: &str) -> Self {
        self.script.rcpt_code = (code, text.to_string());
        self
    }

    #[must_use]
    pub fn auth_reply(mut self, code: u16, text: &str) -> Self {
        self.script.auth_code = (code, text.to_string());
        self
    }

    #[must_use]
    pub fn drop_after_commands(mut self, count: usize) -> Self {
        self.script.drop_after_commands = Some(count);
        self
    }

    #[must_use]
    pub fn response_delay(mut self, delay: Duration) -> Self {
        self.script.response_delay = Some(delay);
        self
    }

    pub async fn start(self) -> MockSmtpServer {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let commands = Arc::new(RwLock::new(Vec::new()));
        let payloads = Arc::new(RwLock::new(Vec::new()));

        let script = self.script;
        let handler_commands = Arc::clone(&commands);
        let handler_payloads = Arc::clone(&payloads);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = script.clone();
                let commands = Arc::clone(&handler_commands);
                let payloads = Arc::clone(&handler_payloads);
                tokio::spawn(async move {
                    let _ = handle_session(stream, script, commands, payloads).await;
                });
            }
        });

        MockSmtpServer {
            addr,
            commands,
            payloads,
            handle,
        }
    }
}

#[derive(Debug)]
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<String>>>,
    payloads: Arc<RwLock<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::default()
    }

    pub async fn start_default() -> Self {
        Self::builder().start().await
    }

    #[must_use]
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every command line the server received, in order.
    pub async fn commands(&self) -> Vec<String> {
        self.commands.read().await.clone()
    }

    /// The raw DATA payloads received, one entry per DATA block.
    pub async fn payloads(&self) -> Vec<String> {
        self.payloads.read().await.clone()
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

enum AuthState {
    None,
    LoginUser,
    LoginPass,
    Cram,
}

async fn handle_session(
    stream: TcpStream,
    script: Script,
    commands: Arc<RwLock<Vec<String>>>,
    payloads: Arc<RwLock<Vec<String>>>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    reply(&mut write_half, &script, script.greeting.0, &script.greeting.1).await?;

    let mut auth_state = AuthState::None;
    let mut seen = 0_usize;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end().to_string();
        commands.write().await.push(command.clone());
        seen += 1;

        if let Some(limit) = script.drop_after_commands
            && seen >= limit
        {
            // Close without replying; the client sees a dropped connection.
            return Ok(());
        }

        let upper = command.to_ascii_uppercase();
        match auth_state {
            AuthState::LoginUser => {
                auth_state = AuthState::LoginPass;
                reply(&mut write_half, &script, 334, "UGFzc3dvcmQ6").await?;
                continue;
            }
            AuthState::LoginPass | AuthState::Cram => {
                auth_state = AuthState::None;
                reply(&mut write_half, &script, script.auth_code.0, &script.auth_code.1).await?;
                continue;
            }
            AuthState::None => {}
        }

        if upper.starts_with("EHLO") || upper.starts_with("HELO") {
            ehlo_reply(&mut write_half, &script).await?;
        } else if upper == "AUTH LOGIN" {
            auth_state = AuthState::LoginUser;
            reply(&mut write_half, &script, 334, "VXNlcm5hbWU6").await?;
        } else if upper == "AUTH CRAM-MD5" {
            auth_state = AuthState::Cram;
            reply(&mut write_half, &script, 334, &script.cram_challenge_b64).await?;
        } else if upper.starts_with("MAIL FROM") {
            reply(&mut write_half, &script, script.mail_code.0, &script.mail_code.1).await?;
        } else if upper.starts_with("RCPT TO") {
            reply(&mut write_half, &script, script.rcpt_code.0, &script.rcpt_code.1).await?;
        } else if upper == "DATA" {
            reply(&mut write_half, &script, script.data_code.0, &script.data_code.1).await?;
            let payload = read_data(&mut reader).await?;
            payloads.write().await.push(payload);
            reply(
                &mut write_half,
                &script,
                script.data_end_code.0,
                &script.data_end_code.1,
            )
            .await?;
        } else if upper == "QUIT" {
            reply(&mut write_half, &script, 221, "bye").await?;
            return Ok(());
        } else {
            reply(&mut write_half, &script, 500, "unrecognised").await?;
        }
    }
}

async fn read_data<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> std::io::Result<String> {
    let mut payload = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(payload);
        }
        if line == ".\r\n" || line == ".\n" {
            return Ok(payload);
        }
        payload.push_str(&line);
    }
}

async fn ehlo_reply(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    script: &Script,
) -> std::io::Result<()> {
    if let Some(delay) = script.response_delay {
        tokio::time::sleep(delay).await;
    }
    let mut lines = vec!["mock.example.com".to_string()];
    lines.extend(script.capabilities.iter().cloned());

    let mut out = String::new();
    for (i, text) in lines.iter().enumerate() {
        if i + 1 == lines.len() {
            out.push_str(&format!("250 {text}\r\n"));
        } else {
            out.push_str(&format!("250-{text}\r\n"));
        }
    }
    writer.write_all(out.as_bytes()).await
}

async fn reply(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    script: &Script,
    code: u16,
    text: &str,
) -> std::io::Result<()> {
    if let Some(delay) = script.response_delay {
        tokio::time::sleep(delay).await;
    }
    writer
        .write_all(format!("{code} {text}\r\n").as_bytes())
        .await
}
