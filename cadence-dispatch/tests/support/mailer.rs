//! A mailer whose failures are scripted per recipient

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use cadence_dispatch::{DeliveryReceipt, Mailer, MailerError, OutgoingMessage};
use parking_lot::Mutex;
use tokio::time::Instant;

/// A message the mailer accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub at: Instant,
}

#[derive(Debug, Default)]
pub struct ScriptedMailer {
    failures_left: Mutex<HashMap<String, u32>>,
    always_fail: HashSet<String>,
    crash: HashSet<String>,
    delivered: Mutex<Vec<Delivered>>,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the first `times` attempts to `recipient`
    #[must_use]
    pub fn fail_times(self, recipient: &str, times: u32) -> Self {
        self.failures_left.lock().insert(recipient.to_string(), times);
        self
    }

    /// Reject every attempt to `recipient`
    #[must_use]
    pub fn always_fail(mut self, recipient: &str) -> Self {
        self.always_fail.insert(recipient.to_string());
        self
    }

    /// Panic on every attempt to `recipient`
    #[must_use]
    pub fn crash_on(mut self, recipient: &str) -> Self {
        self.crash.insert(recipient.to_string());
        self
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().clone()
    }

    /// Every recipient an attempt was made for, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Mailer for ScriptedMailer {
    async fn deliver(&self, message: OutgoingMessage<'_>) -> Result<DeliveryReceipt, MailerError> {
        self.attempts.lock().push(message.to.to_string());

        assert!(!self.crash.contains(message.to), "mailer crashed");

        if self.always_fail.contains(message.to) {
            return Err(MailerError::Rejected("550 mailbox unavailable".to_string()));
        }

        {
            let mut failures = self.failures_left.lock();
            if let Some(left) = failures.get_mut(message.to)
                && *left > 0
            {
                *left -= 1;
                return Err(MailerError::Connection("connection reset".to_string()));
            }
        }

        let mut delivered = self.delivered.lock();
        delivered.push(Delivered {
            from: message.from.to_string(),
            to: message.to.to_string(),
            subject: message.subject.to_string(),
            body: message.body.to_string(),
            at: Instant::now(),
        });

        Ok(DeliveryReceipt {
            delivery_id: format!("scripted-{}", delivered.len()),
        })
    }
}
