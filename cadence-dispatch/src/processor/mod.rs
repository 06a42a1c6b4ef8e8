//! Worker pool orchestration

mod execute;

use std::{sync::Arc, time::Duration};

use cadence_common::{Signal, internal, tracing};
use cadence_store::CampaignStore;
use chrono::Utc;
use serde::Deserialize;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore, broadcast},
    task::JoinSet,
    time::Instant,
};

use crate::{
    error::ProcessorError,
    events::DispatchEvent,
    mailer::Mailer,
    policy::RetryPolicy,
    queue::{Job, WorkQueue},
    rate_limiter::{RateLimitConfig, RateLimiter},
};

use self::execute::Worker;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

const fn default_concurrency() -> usize {
    5
}

const fn default_prune_interval() -> u64 {
    300
}

const fn default_shutdown_timeout() -> u64 {
    30
}

fn default_events() -> broadcast::Sender<DispatchEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

/// Drains due units from the work queue and delivers them
///
/// Configuration is read from the `dispatch` section; the store and mailer
/// are attached with [`Self::init`] before [`Self::serve`] is called.
///
/// ```ron
/// dispatch: (
///     concurrency: 5,
///     min_dispatch_interval_ms: 1000,
///     retry: (max_attempts: 3, base_retry_delay_ms: 1000),
///     rate_limit: (defer_buffer_secs: 10),
/// ),
/// ```
#[derive(Debug, Deserialize)]
pub struct DispatchProcessor {
    /// Maximum units being delivered at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Minimum gap between releases from the queue (in milliseconds)
    ///
    /// Applies across all workers. Zero disables the throttle.
    #[serde(default)]
    pub min_dispatch_interval_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// How often expired hourly counters are pruned (in seconds)
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,

    /// How long shutdown waits for in-flight deliveries (in seconds)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    #[serde(skip)]
    pub(crate) store: Option<Arc<dyn CampaignStore>>,

    #[serde(skip)]
    pub(crate) mailer: Option<Arc<dyn Mailer>>,

    #[serde(skip)]
    pub(crate) rate_limiter: Option<Arc<RateLimiter>>,

    #[serde(skip)]
    pub(crate) queue: WorkQueue,

    #[serde(skip, default = "default_events")]
    events: broadcast::Sender<DispatchEvent>,
}

impl Default for DispatchProcessor {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            min_dispatch_interval_ms: 0,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            prune_interval_secs: default_prune_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            store: None,
            mailer: None,
            rate_limiter: None,
            queue: WorkQueue::new(),
            events: default_events(),
        }
    }
}

impl DispatchProcessor {
    /// Attach the store units are read from and the mailer they are sent with
    pub fn init(&mut self, store: Arc<dyn CampaignStore>, mailer: Arc<dyn Mailer>) {
        internal!("Initialising Dispatch Processor ...");

        self.store = Some(store);
        self.mailer = Some(mailer);
        self.rate_limiter = Some(Arc::new(RateLimiter::new(self.rate_limit.clone())));

        internal!(
            "Dispatch processor initialised with concurrency={}, max_attempts={}, base_retry_delay={}ms",
            self.concurrency.max(1),
            self.retry.max_attempts,
            self.retry.base_retry_delay_ms
        );
    }

    /// The queue new units should be placed on
    pub const fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Per-sender hourly counters, available after [`Self::init`]
    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    /// Receive an event for every unit a worker finishes with
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    fn worker(&self) -> Result<Arc<Worker>, ProcessorError> {
        let (Some(store), Some(mailer), Some(rate_limiter)) =
            (&self.store, &self.mailer, &self.rate_limiter)
        else {
            return Err(ProcessorError::NotInitialized(
                "Dispatch processor not initialized. Call init() first.".to_string(),
            ));
        };

        Ok(Arc::new(Worker {
            store: Arc::clone(store),
            mailer: Arc::clone(mailer),
            rate_limiter: Arc::clone(rate_limiter),
            queue: self.queue.clone(),
            retry: self.retry.clone(),
            events: self.events.clone(),
        }))
    }

    /// Wait for a free worker slot, honour the release throttle, then take
    /// the next due job
    async fn next_job(
        &self,
        slots: &Arc<Semaphore>,
        last_release: &mut Option<Instant>,
    ) -> Option<(OwnedSemaphorePermit, Job)> {
        let permit = Arc::clone(slots).acquire_owned().await.ok()?;

        if self.min_dispatch_interval_ms > 0
            && let Some(last) = *last_release
        {
            tokio::time::sleep_until(last + Duration::from_millis(self.min_dispatch_interval_ms))
                .await;
        }

        let job = self.queue.dequeue().await?;
        *last_release = Some(Instant::now());
        Some((permit, job))
    }

    /// Run the worker pool
    ///
    /// Runs until a shutdown signal is received or the queue is closed.
    ///
    /// ## Graceful Shutdown
    ///
    /// 1. Stop taking jobs from the queue
    /// 2. Wait for in-flight deliveries, up to `shutdown_timeout_secs`
    /// 3. Abort whatever is still running
    ///
    /// # Errors
    ///
    /// Returns an error if [`Self::init`] has not been called
    pub async fn serve(
        &self,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), ProcessorError> {
        internal!("Dispatch processor starting");

        let worker = self.worker()?;
        let slots = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut in_flight = JoinSet::new();
        let mut last_release = None;

        let mut prune_timer =
            tokio::time::interval(Duration::from_secs(self.prune_interval_secs.max(1)));
        prune_timer.tick().await;

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Dispatch processor received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!("Dispatch processor shutdown channel error: {e}");
                        }
                    }
                    break;
                }
                _ = prune_timer.tick() => {
                    worker.rate_limiter.prune(Utc::now());
                }
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Dispatch task panicked");
                    }
                }
                next = self.next_job(&slots, &mut last_release) => {
                    let Some((permit, job)) = next else {
                        internal!("Work queue closed");
                        break;
                    };

                    let worker = Arc::clone(&worker);
                    in_flight.spawn(async move {
                        let event = worker.dispatch(job).await;
                        drop(permit);
                        worker.publish(event);
                    });
                }
            }
        }

        self.queue.close();
        self.drain(&mut in_flight).await;

        internal!("Dispatch processor shutdown complete");
        Ok(())
    }

    async fn drain(&self, in_flight: &mut JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }

        internal!("Waiting for {} in-flight deliveries", in_flight.len());

        let timeout = Duration::from_secs(self.shutdown_timeout_secs);
        let finished = tokio::time::timeout(timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if finished.is_err() {
            tracing::warn!(
                remaining = in_flight.len(),
                "Shutdown timeout exceeded, aborting in-flight deliveries"
            );
            in_flight.abort_all();
        } else {
            internal!("All in-flight deliveries completed");
        }
    }
}
