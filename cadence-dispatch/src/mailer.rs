//! The delivery capability used by workers

use std::fmt::Debug;

use async_trait::async_trait;
use cadence_common::outgoing;
use serde::Deserialize;
use ulid::Ulid;

use crate::error::MailerError;

/// A message ready to hand to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutgoingMessage<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub subject: &'a str,
    /// HTML body
    pub body: &'a str,
}

/// Acknowledgement from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Transport-assigned message identifier
    pub delivery_id: String,
}

/// Sends a single message
///
/// Implementations must be safe to call from many workers at once.
#[async_trait]
pub trait Mailer: Send + Sync + Debug {
    /// # Errors
    /// Any failure to hand the message off. The error text is recorded as
    /// the unit's failure reason.
    async fn deliver(&self, message: OutgoingMessage<'_>) -> Result<DeliveryReceipt, MailerError>;
}

/// A mailer that records each message in the log instead of sending it
///
/// ```ron
/// mailer: (
///     from: Some("campaigns@example.com"),
/// ),
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogMailer {
    /// Replaces the sender address on every message when set
    #[serde(default)]
    pub from: Option<String>,
}

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, message: OutgoingMessage<'_>) -> Result<DeliveryReceipt, MailerError> {
        let delivery_id = Ulid::new().to_string();
        let from = self.from.as_deref().unwrap_or(message.from);

        outgoing!(
            level = INFO,
            delivery_id = %delivery_id,
            from,
            to = message.to,
            subject = message.subject,
            body_len = message.body.len(),
            "Message delivered"
        );

        Ok(DeliveryReceipt { delivery_id })
    }
}
