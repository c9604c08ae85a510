//! Delivery through a local sendmail-compatible binary.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use courier_common::ConfigError;
use courier_common::config::SendmailConfig;
use courier_message::Message;

use crate::{Transport, TransportError};

#[derive(Debug)]
pub struct SendmailPipe {
    config: SendmailConfig,
}

impl SendmailPipe {
    #[must_use]
    pub const fn new(config: SendmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for SendmailPipe {
    fn name(&self) -> &'static str {
        "sendmail"
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let mut message = message.clone();
        if message.from_header().is_none() {
            let from = self.config.from.header_value();
            if from.is_empty() {
                return Err(ConfigError::Missing("sendmail.from.address").into());
            }
            message.set_from(from);
        }

        let serialized = message.to_rfc5322()?;
        for warning in &serialized.warnings {
            tracing::warn!(
                path = %warning.path.display(),
                reason = %warning.reason,
                "dropping unreadable attachment"
            );
        }

        // -t reads recipients from the headers, -i keeps a lone dot from
        // terminating the input early.
        let mut child = Command::new(&self.config.path)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Sendmail {
                status: -1,
                stderr: format!("failed to spawn {}: {e}", self.config.path),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(serialized.data.as_bytes())
                .await
                .map_err(|e| TransportError::Sendmail {
                    status: -1,
                    stderr: format!("failed to write message to stdin: {e}"),
                })?;
            // Dropping the handle closes the pipe; sendmail sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TransportError::Sendmail {
                status: -1,
                stderr: format!("failed to await {}: {e}", self.config.path),
            })?;

        if output.status.success() {
            tracing::debug!(
                recipient = %message.to_address(),
                path = %self.config.path,
                "message handed to sendmail"
            );
            Ok(())
        } else {
            Err(TransportError::Sendmail {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
