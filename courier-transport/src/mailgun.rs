//! Delivery through the Mailgun HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;

use courier_common::ConfigError;
use courier_common::address;
use courier_common::config::{MailgunConfig, Region};
use courier_message::{ContentKind, Message};

use crate::{Transport, TransportError};

const MAX_TAGS: usize = 3;

#[derive(Debug)]
pub struct MailgunClient {
    config: MailgunConfig,
    http: reqwest::Client,
    endpoint: String,
}

impl MailgunClient {
    /// Validates the configuration and builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Config`] when the API key, domain,
    /// timeouts, or `from` address are unusable.
    pub fn new(config: MailgunConfig) -> Result<Self, TransportError> {
        if config.api_key.is_empty() {
            return Err(ConfigError::Missing("mailgun.api_key").into());
        }
        if config.domain.is_empty() {
            return Err(ConfigError::Missing("mailgun.domain").into());
        }
        if config.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "mailgun.timeout_secs",
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if config.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "mailgun.connect_timeout_secs",
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if address::validate_mailbox(&config.from.address).is_err() {
            return Err(ConfigError::Invalid {
                field: "mailgun.from.address",
                reason: format!("'{}' is not a valid mailbox", config.from.address),
            }
            .into());
        }

        let api_host = match config.region {
            Region::Us => "api.mailgun.net",
            Region::Eu => "api.eu.mailgun.net",
        };
        let endpoint = format!("https://{api_host}/v3/{}/messages", config.domain);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self {
            config,
            http,
            endpoint,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The scalar form fields for one message.
    fn form_fields(&self, message: &Message) -> Result<Vec<(String, String)>, TransportError> {
        let from = match message.from_header() {
            Some(from) => from.to_string(),
            None => {
                let configured = self.config.from.header_value();
                if configured.is_empty() {
                    return Err(ConfigError::Missing("mailgun.from.address").into());
                }
                configured
            }
        };

        let mut fields = vec![
            ("from".to_string(), from),
            ("to".to_string(), message.to_address().to_string()),
            ("subject".to_string(), message.subject().to_string()),
        ];

        let content_field = match message.kind() {
            ContentKind::Text => "text",
            _ => "html",
        };
        fields.push((content_field.to_string(), message.content().to_string()));

        if let Some(signature) = message.dkim_signature() {
            let value = signature
                .strip_prefix("DKIM-Signature:")
                .unwrap_or(signature)
                .trim();
            fields.push(("h:DKIM-Signature".to_string(), value.to_string()));
        }

        if self.config.tracking.clicks {
            fields.push(("o:tracking-clicks".to_string(), "yes".to_string()));
        }
        if self.config.tracking.opens {
            fields.push(("o:tracking-opens".to_string(), "yes".to_string()));
        }
        if let Some(delivery_time) = &self.config.delivery_time {
            fields.push(("o:deliverytime".to_string(), delivery_time.clone()));
        }

        if self.config.tags.len() > MAX_TAGS {
            tracing::warn!(
                configured = self.config.tags.len(),
                "more than {MAX_TAGS} tags configured, extras dropped"
            );
        }
        for tag in self.config.tags.iter().take(MAX_TAGS) {
            fields.push(("o:tag".to_string(), tag.clone()));
        }

        for (key, value) in &self.config.variables {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            fields.push((format!("v:{key}"), rendered));
        }

        Ok(fields)
    }
}

#[async_trait]
impl Transport for MailgunClient {
    fn name(&self) -> &'static str {
        "mailgun"
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let fields = self.form_fields(message)?;

        // Attachments that vanished since enqueue are logged and dropped;
        // the message itself still goes out.
        let mut attachments = Vec::new();
        for attachment in message.attachments() {
            let resolved = attachment.resolve();
            match resolved.read() {
                Ok(bytes) => attachments.push((resolved, bytes)),
                Err(warning) => {
                    tracing::warn!(
                        path = %warning.path.display(),
                        reason = %warning.reason,
                        "dropping unreadable attachment"
                    );
                }
            }
        }

        let request = self
            .http
            .post(&self.endpoint)
            .basic_auth("api", Some(&self.config.api_key));

        let request = if attachments.is_empty() {
            request.form(&fields)
        } else {
            let mut form = multipart::Form::new();
            for (name, value) in fields {
                form = form.text(name, value);
            }
            for (resolved, bytes) in attachments {
                let part = multipart::Part::bytes(bytes)
                    .file_name(resolved.filename.clone())
                    .mime_str(&resolved.mime_type)
                    .map_err(|e| TransportError::Http(e.to_string()))?;
                form = form.part("attachment", part);
            }
            request.multipart(form)
        };

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        classify_response(status, &body)?;

        tracing::debug!(
            recipient = %message.to_address(),
            endpoint = %self.endpoint,
            "message accepted by Mailgun"
        );
        Ok(())
    }
}

/// Maps an HTTP response to the transport error taxonomy. `Ok(())` means
/// the message was accepted and the body was well-formed JSON.
fn classify_response(status: u16, body: &str) -> Result<(), TransportError> {
    let reason = || {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| body.trim().to_string())
    };

    match status {
        200..=299 => {
            if serde_json::from_str::<serde_json::Value>(body).is_err() {
                return Err(TransportError::Upstream(format!(
                    "non-JSON response body: {}",
                    body.trim()
                )));
            }
            Ok(())
        }
        400 => Err(TransportError::InvalidRequest(reason())),
        401 => Err(TransportError::AuthFailed(reason())),
        402 | 429 => Err(TransportError::Rejected {
            status,
            reason: reason(),
        }),
        404 => Err(TransportError::DomainMissing(reason())),
        413 => Err(TransportError::MessageTooLarge(reason())),
        500..=599 => Err(TransportError::UpstreamUnavailable(format!(
            "status {status}: {}",
            reason()
        ))),
        other => Err(TransportError::Upstream(format!(
            "unexpected status {other}: {}",
            reason()
        ))),
    }
}
