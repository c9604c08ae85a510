//! The mailer: orchestrates message construction, rate admission, DKIM
//! signing, and transport dispatch.
//!
//! Everything the mailer needs arrives through its constructor; there is
//! no global registry. The active transport can be swapped at runtime via
//! [`Mailer::set_driver`], which publishes the replacement atomically: an
//! in-flight send holds either the old transport or the fully-built new
//! one, never a half-initialised value.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use courier_common::config::{Config, DriverKind, Drivers};
use courier_common::{Clock, ConfigError, EventBus, MailEvent};
use courier_dkim::{DkimSigner, should_sign};
use courier_message::{Attachment, ContentKind, Message};
use courier_queue::Queue;
use courier_ratelimit::RateLimiter;
use courier_transport::{Transport, build_transport};

use crate::error::MailerError;

#[derive(Debug)]
pub struct Mailer {
    driver: RwLock<DriverKind>,
    drivers: RwLock<Drivers>,
    transport: RwLock<Arc<dyn Transport>>,
    queue: Arc<Queue>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl Mailer {
    /// Builds a mailer with the transport selected by the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MailerError::Transport`] when the configured driver fails
    /// construction-time validation.
    pub fn new(
        config: &Config,
        queue: Arc<Queue>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Result<Self, MailerError> {
        let transport = build_transport(config.driver, &config.drivers)?;
        Ok(Self::assemble(
            config.driver,
            config.drivers.clone(),
            transport,
            queue,
            limiter,
            clock,
            events,
        ))
    }

    /// Builds a mailer around a caller-supplied transport. Hosts with
    /// bespoke delivery mechanisms (and tests) use this instead of the
    /// configuration-driven constructor.
    pub fn with_transport(
        driver: DriverKind,
        drivers: Drivers,
        transport: Arc<dyn Transport>,
        queue: Arc<Queue>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self::assemble(driver, drivers, transport, queue, limiter, clock, events)
    }

    fn assemble(
        driver: DriverKind,
        drivers: Drivers,
        transport: Arc<dyn Transport>,
        queue: Arc<Queue>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            driver: RwLock::new(driver),
            drivers: RwLock::new(drivers),
            transport: RwLock::new(transport),
            queue,
            limiter,
            clock,
            events,
        }
    }

    /// The name of the currently installed transport.
    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        self.transport.read().name()
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Sends a message synchronously: rate check, build, sign, dispatch.
    ///
    /// # Errors
    ///
    /// Surfaces every failure to the caller, from [`MailerError::RateLimited`]
    /// through transport errors.
    pub async fn send(
        &self,
        to: &str,
        subject: &str,
        content: &str,
        kind: ContentKind,
        attachments: Vec<Attachment>,
    ) -> Result<(), MailerError> {
        let message = self.build_message(to, subject, content, kind, attachments)?;
        self.deliver(&message).await
    }

    /// Dispatches an already-built message through the rate limiter and
    /// the active transport. The worker calls this for dequeued jobs, which
    /// is where deferred sends meet the rate limit.
    ///
    /// # Errors
    ///
    /// Returns [`MailerError::RateLimited`] on refusal, or the transport's
    /// error.
    pub async fn deliver(&self, message: &Message) -> Result<(), MailerError> {
        if !self.limiter.allow() {
            return Err(MailerError::RateLimited {
                retry_after_secs: self.limiter.reset_time(),
            });
        }

        let transport = Arc::clone(&*self.transport.read());
        let started = Instant::now();
        transport.send(message).await?;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            recipient = %message.to_address(),
            transport = transport.name(),
            elapsed_ms,
            "message sent"
        );
        self.events.emit(MailEvent::MessageSent {
            recipient: message.to_address().to_string(),
            elapsed_ms,
        });
        Ok(())
    }

    /// Builds and signs the message, then pushes it onto the queue for a
    /// worker to deliver. No rate check happens here; admission is applied
    /// when the worker dispatches the job.
    ///
    /// # Errors
    ///
    /// Returns build/signing failures, or [`MailerError::Queue`] when the
    /// store is unreachable.
    pub async fn enqueue(
        &self,
        to: &str,
        subject: &str,
        content: &str,
        kind: ContentKind,
        attachments: Vec<Attachment>,
        queue_name: Option<&str>,
    ) -> Result<String, MailerError> {
        let message = self.build_message(to, subject, content, kind, attachments)?;
        let payload = serde_json::to_string(&message).map_err(courier_queue::QueueError::from)?;
        let job_id = self.queue.push("mail", payload, queue_name).await?;
        tracing::info!(
            recipient = %message.to_address(),
            job_id = %job_id,
            "message enqueued for deferred delivery"
        );
        Ok(job_id)
    }

    /// Switches the active driver, optionally merging overrides into its
    /// configuration section first.
    ///
    /// # Errors
    ///
    /// Returns the new driver's construction failure; the previous
    /// transport stays installed in that case.
    pub fn set_driver(
        &self,
        driver: DriverKind,
        overrides: Option<serde_json::Value>,
    ) -> Result<(), MailerError> {
        let mut drivers = self.drivers.write();
        if let Some(overrides) = overrides {
            apply_overrides(&mut drivers, driver, overrides)?;
        }
        let transport = build_transport(driver, &drivers)?;

        *self.driver.write() = driver;
        *self.transport.write() = transport;
        tracing::info!(driver = %driver, "mail driver switched");
        Ok(())
    }

    /// Constructs, addresses, and signs a message per the current driver
    /// configuration.
    fn build_message(
        &self,
        to: &str,
        subject: &str,
        content: &str,
        kind: ContentKind,
        attachments: Vec<Attachment>,
    ) -> Result<Message, MailerError> {
        let mut message = Message::new(to, subject, content, kind)?;
        for attachment in attachments {
            message.attach(attachment);
        }

        let driver = *self.driver.read();
        let drivers = self.drivers.read();

        let from = drivers.from_for(driver).header_value();
        if from.is_empty() {
            return Err(ConfigError::Missing("from.address").into());
        }
        message.set_from(from);

        let dkim = drivers.dkim_for(driver);
        if should_sign(driver, &dkim) {
            let signer = DkimSigner::from_config(
                &dkim.dkim_private_key,
                &dkim.dkim_selector,
                &dkim.dkim_domain,
            )?;
            let line = signer.sign(&message.headers(), message.content())?;
            message.set_dkim_signature(line);
        }

        Ok(message)
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Deep-merges `overrides` into the chosen driver's configuration section.
fn apply_overrides(
    drivers: &mut Drivers,
    driver: DriverKind,
    overrides: serde_json::Value,
) -> Result<(), MailerError> {
    match driver {
        DriverKind::Smtp => merge_section(&mut drivers.smtp, overrides),
        DriverKind::Sendmail => merge_section(&mut drivers.sendmail, overrides),
        DriverKind::Mailgun => merge_section(&mut drivers.mailgun, overrides),
        DriverKind::Null => merge_section(&mut drivers.null, overrides),
    }
}

fn merge_section<T>(section: &mut T, overrides: serde_json::Value) -> Result<(), MailerError>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let invalid = |reason: String| {
        MailerError::Config(ConfigError::Invalid {
            field: "driver overrides",
            reason,
        })
    };

    let mut value = serde_json::to_value(&*section).map_err(|e| invalid(e.to_string()))?;
    merge_json(&mut value, overrides);
    *section = serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

fn merge_json(base: &mut serde_json::Value, overrides: serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(slot) if slot.is_object() && value.is_object() => {
                        merge_json(slot, value);
                    }
                    _ => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
