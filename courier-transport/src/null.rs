//! The discard transport.
//!
//! Accepts every message and drops it, logging what would have gone out.
//! Useful for tests and for environments where outbound mail is disabled.

use async_trait::async_trait;

use courier_message::Message;

use crate::{Transport, TransportError};

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl Transport for NullSink {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        tracing::info!(
            recipient = %message.to_address(),
            subject = %message.subject(),
            message_id = %message.message_id(),
            "message discarded by null transport"
        );
        Ok(())
    }
}
