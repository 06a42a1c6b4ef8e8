//! Delay and priority ordered work queue
//!
//! Jobs wait in a delayed set until their release time, then move to a ready
//! heap ordered by priority weight, release time and insertion order. A unit
//! id is present at most once across the waiting and in-flight sets, so the
//! same unit is never handed to two workers at once.

pub mod retry;

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BinaryHeap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use cadence_common::Priority;
use cadence_store::{CampaignId, DispatchUnit, UnitId};
use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};

/// Delays past this are clamped rather than overflowing the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Everything a worker needs to send a unit, captured at scheduling time
///
/// The body is carried for reference only; workers always re-read it from
/// the store so edits made after scheduling are honoured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPayload {
    pub unit_id: UnitId,
    pub campaign_id: Option<CampaignId>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub sender: String,
    /// Sends per hour allowed for `sender`; zero is unlimited
    pub hourly_limit: u32,
}

impl DispatchPayload {
    pub fn from_unit(unit: &DispatchUnit, hourly_limit: u32) -> Self {
        Self {
            unit_id: unit.id,
            campaign_id: unit.campaign_id,
            recipient: unit.recipient.clone(),
            subject: unit.subject.clone(),
            body: unit.body.clone(),
            sender: unit.sender.clone(),
            hourly_limit,
        }
    }
}

/// A queued unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub payload: DispatchPayload,
    pub priority: Priority,
    /// Failed delivery attempts so far
    pub attempts_made: u32,
}

impl Job {
    pub const fn id(&self) -> UnitId {
        self.payload.unit_id
    }
}

/// A read-only view of a waiting job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: UnitId,
    pub priority: Priority,
    pub attempts_made: u32,
    /// Time until the job is released; zero when it is already due
    pub ready_in: Duration,
}

#[derive(Debug, PartialEq, Eq)]
struct ReadyEntry {
    weight: u8,
    due: Instant,
    seq: u64,
    id: UnitId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .cmp(&other.weight)
            .then_with(|| other.due.cmp(&self.due))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    delayed: BTreeMap<(Instant, u64), UnitId>,
    ready: BinaryHeap<ReadyEntry>,
    waiting: HashMap<UnitId, Job>,
    in_flight: HashSet<UnitId>,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    fn insert(&mut self, job: Job, due: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let id = job.id();
        self.delayed.insert((due, seq), id);
        self.waiting.insert(id, job);
    }

    /// Move every delayed job that is due by `now` onto the ready heap
    fn promote(&mut self, now: Instant) {
        while let Some(entry) = self.delayed.first_entry() {
            let (due, seq) = *entry.key();
            if due > now {
                break;
            }

            let id = entry.remove();
            if let Some(job) = self.waiting.get(&id) {
                self.ready.push(ReadyEntry {
                    weight: job.priority.weight(),
                    due,
                    seq,
                    id,
                });
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.first_key_value().map(|((due, _), _)| *due)
    }

    fn contains(&self, id: &UnitId) -> bool {
        self.waiting.contains_key(id) || self.in_flight.contains(id)
    }
}

fn deadline(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay.min(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Shared handle to the work queue
///
/// Cloning is cheap; all clones observe the same queue.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new job released after `delay`
    ///
    /// Returns `false` without changing anything if a job with the same unit
    /// id is already waiting or being processed, or the queue is closed.
    pub fn enqueue(&self, payload: DispatchPayload, priority: Priority, delay: Duration) -> bool {
        let job = Job {
            payload,
            priority,
            attempts_made: 0,
        };

        let mut state = self.inner.state.lock();
        if state.closed || state.contains(&job.id()) {
            return false;
        }
        state.insert(job, deadline(delay));
        drop(state);

        self.inner.notify.notify_one();
        true
    }

    /// Wait for the next released job and mark it in flight
    ///
    /// Returns `None` once the queue is closed. Cancelling the returned
    /// future never loses a job.
    pub async fn dequeue(&self) -> Option<Job> {
        loop {
            let next_due = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return None;
                }

                state.promote(Instant::now());
                if let Some(entry) = state.ready.pop() {
                    if let Some(job) = state.waiting.remove(&entry.id) {
                        state.in_flight.insert(entry.id);
                        return Some(job);
                    }
                    continue;
                }

                state.next_due()
            };

            match next_due {
                Some(due) => {
                    tokio::select! {
                        () = self.inner.notify.notified() => {}
                        () = tokio::time::sleep_until(due) => {}
                    }
                }
                None => self.inner.notify.notified().await,
            }
        }
    }

    /// Put an in-flight job back, released after `delay`, without counting
    /// an attempt
    pub fn reschedule(&self, job: Job, delay: Duration) {
        let mut state = self.inner.state.lock();
        state.in_flight.remove(&job.id());
        state.insert(job, deadline(delay));
        drop(state);

        self.inner.notify.notify_one();
    }

    /// Put an in-flight job back after a failed attempt
    pub fn retry(&self, mut job: Job, delay: Duration) {
        job.attempts_made = job.attempts_made.saturating_add(1);
        self.reschedule(job, delay);
    }

    /// Release an in-flight job for good
    pub fn complete(&self, id: &UnitId) {
        self.inner.state.lock().in_flight.remove(id);
    }

    /// Stop handing out jobs; pending and future `dequeue` calls return `None`
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Whether the unit is waiting or in flight
    pub fn contains(&self, id: &UnitId) -> bool {
        self.inner.state.lock().contains(id)
    }

    /// Number of jobs waiting to be released or picked up
    pub fn len(&self) -> usize {
        self.inner.state.lock().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of jobs currently held by workers
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Waiting jobs, soonest first
    pub fn snapshot(&self) -> Vec<QueuedJob> {
        let now = Instant::now();
        let state = self.inner.state.lock();

        let delayed = state.delayed.iter().map(|(&(due, seq), &id)| (due, seq, id));
        let ready = state.ready.iter().map(|entry| (entry.due, entry.seq, entry.id));

        let mut entries: Vec<_> = delayed
            .chain(ready)
            .filter_map(|(due, seq, id)| {
                state.waiting.get(&id).map(|job| {
                    (
                        seq,
                        QueuedJob {
                            id,
                            priority: job.priority,
                            attempts_made: job.attempts_made,
                            ready_in: due.saturating_duration_since(now),
                        },
                    )
                })
            })
            .collect();
        drop(state);

        entries.sort_by(|(a_seq, a), (b_seq, b)| a.ready_in.cmp(&b.ready_in).then(a_seq.cmp(b_seq)));
        entries.into_iter().map(|(_, job)| job).collect()
    }
}
