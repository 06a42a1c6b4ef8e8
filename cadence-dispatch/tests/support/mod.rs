//! Shared harness for dispatch pipeline tests
#![allow(dead_code, reason = "Not every helper is used by every test binary")]
#![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests")]

pub mod mailer;

use std::{sync::Arc, time::Duration};

use cadence_common::{Priority, Signal};
use cadence_dispatch::{DispatchEvent, DispatchProcessor, Dispatcher, ScheduleRequest};
use cadence_store::{CampaignStore, MemoryCampaignStore};
use chrono::{DateTime, Utc};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
};

use self::mailer::ScriptedMailer;

pub struct Harness {
    pub store: Arc<MemoryCampaignStore>,
    pub mailer: Arc<ScriptedMailer>,
    pub dispatcher: Dispatcher,
    pub events: broadcast::Receiver<DispatchEvent>,
    shutdown: broadcast::Sender<Signal>,
    handle: JoinHandle<Result<(), cadence_dispatch::ProcessorError>>,
}

impl Harness {
    pub fn start(store: MemoryCampaignStore, mailer: ScriptedMailer) -> Self {
        Self::start_with(store, mailer, DispatchProcessor::default())
    }

    pub fn start_with(
        store: MemoryCampaignStore,
        mailer: ScriptedMailer,
        mut processor: DispatchProcessor,
    ) -> Self {
        let store = Arc::new(store);
        let mailer = Arc::new(mailer);

        processor.init(
            Arc::clone(&store) as Arc<dyn CampaignStore>,
            Arc::clone(&mailer) as Arc<dyn cadence_dispatch::Mailer>,
        );

        let events = processor.subscribe();
        let dispatcher = Dispatcher::new(
            Arc::clone(&store) as Arc<dyn CampaignStore>,
            processor.queue().clone(),
        );

        let (shutdown, rx) = broadcast::channel(1);
        let processor = Arc::new(processor);
        let handle = tokio::spawn(async move { processor.serve(rx).await });

        Self {
            store,
            mailer,
            dispatcher,
            events,
            shutdown,
            handle,
        }
    }

    /// Collect events until `terminal` units have finished
    pub async fn wait_for_terminal(&mut self, terminal: usize) -> Vec<DispatchEvent> {
        let mut seen = Vec::new();
        let mut finished = 0;

        tokio::time::timeout(Duration::from_secs(24 * 60 * 60), async {
            while finished < terminal {
                let event = self.events.recv().await.expect("event channel closed");
                if event.is_terminal() {
                    finished += 1;
                }
                seen.push(event);
            }
        })
        .await
        .expect("timed out waiting for dispatch events");

        seen
    }

    /// Collect exactly `count` events
    pub async fn next_events(&mut self, count: usize) -> Vec<DispatchEvent> {
        let mut seen = Vec::with_capacity(count);
        for _ in 0..count {
            let event = tokio::time::timeout(Duration::from_secs(60 * 60), self.events.recv())
                .await
                .expect("timed out waiting for dispatch event")
                .expect("event channel closed");
            seen.push(event);
        }
        seen
    }

    pub async fn shutdown(self) {
        self.shutdown.send(Signal::Shutdown).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

pub fn request(recipients: &[&str], priority: Priority, start_time: DateTime<Utc>) -> ScheduleRequest {
    ScheduleRequest {
        recipients: recipients.iter().map(ToString::to_string).collect(),
        subject: "Launch".to_string(),
        body: "<p>Original</p>".to_string(),
        start_time,
        delay_seconds: 10,
        hourly_limit: 0,
        sender: "owner@example.com".to_string(),
        priority,
    }
}
