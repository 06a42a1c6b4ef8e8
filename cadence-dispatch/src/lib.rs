//! Dispatch pipeline for campaign sends
//!
//! This crate provides functionality to:
//! - Expand a campaign request into individually scheduled dispatch units
//! - Hold units in a delay and priority ordered work queue
//! - Enforce a per-sender hourly send limit
//! - Deliver due units with bounded concurrency, retrying failures with
//!   exponential backoff

mod error;
mod events;
mod mailer;
pub mod policy;
mod processor;
pub mod queue;
mod rate_limiter;
mod scheduler;
mod service;

pub use error::{MailerError, ProcessorError, ScheduleError, ServiceError, ValidationError};
pub use events::{DispatchEvent, log_events};
pub use mailer::{DeliveryReceipt, LogMailer, Mailer, OutgoingMessage};
pub use policy::RetryPolicy;
pub use processor::DispatchProcessor;
pub use queue::{DispatchPayload, Job, QueuedJob, WorkQueue};
pub use rate_limiter::{Admission, RateLimitConfig, RateLimitStats, RateLimiter, hour_bucket};
pub use scheduler::{CampaignHandle, PlannedSend, ScheduleRequest, Scheduler, plan};
pub use service::{DispatchService, Dispatcher, ScheduledUnit};
