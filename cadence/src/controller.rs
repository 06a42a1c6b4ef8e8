use std::{net::SocketAddr, sync::Arc, sync::LazyLock};

use cadence_common::{Signal, internal, logging, tracing};
use cadence_dispatch::{
    DispatchProcessor, DispatchService, Dispatcher, LogMailer, Mailer, log_events,
};
use cadence_server::{ApiConfig, ApiServer};
use cadence_store::StoreConfig;
use serde::Deserialize;
use tokio::{sync::broadcast, task::JoinHandle};

/// Root of the configuration file and owner of every running component
///
/// ```ron
/// Cadence (
///     store: Memory(capacity: None),
///     dispatch: (concurrency: 5),
///     api: (listen_address: "[::]:5000"),
///     mailer: (),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Cadence {
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    dispatch: DispatchProcessor,
    #[serde(default)]
    api: ApiConfig,
    #[serde(default)]
    mailer: LogMailer,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for SIGINT or SIGTERM, then tell every component to stop
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

/// Handle to a started controller
#[derive(Debug)]
pub struct Running {
    address: SocketAddr,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    /// Address the API server is listening on
    pub const fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Wait for every component to stop
    ///
    /// # Errors
    ///
    /// Returns the first error reported by a component, or a join error if a
    /// component panicked.
    pub async fn wait(self) -> anyhow::Result<()> {
        self.handle.await?
    }
}

impl Cadence {
    /// Build the store, attach the worker pool and bind the API, then run
    /// them in the background until `shutdown` carries a signal
    ///
    /// # Errors
    ///
    /// This function will return an error if the store cannot be opened or
    /// the API cannot bind its address.
    pub async fn start(self, shutdown: &broadcast::Sender<Signal>) -> anyhow::Result<Running> {
        let store = self.store.into_store().await?;
        let mailer: Arc<dyn Mailer> = Arc::new(self.mailer);

        let mut processor = self.dispatch;
        processor.init(Arc::clone(&store), mailer);

        let service: Arc<dyn DispatchService> =
            Arc::new(Dispatcher::new(store, processor.queue().clone()));

        let server = ApiServer::new(&self.api, service).await?;
        let address = server.local_addr()?;

        let events = log_events(processor.subscribe(), shutdown.subscribe());
        let dispatch_shutdown = shutdown.subscribe();
        let api_shutdown = shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let (dispatch, api, ()) = tokio::join!(
                processor.serve(dispatch_shutdown),
                server.serve(api_shutdown),
                events,
            );

            dispatch?;
            api?;
            Ok(())
        });

        Ok(Running { address, handle })
    }

    /// Run this controller, and everything it controls
    ///
    /// # Errors
    ///
    /// This function will return an error if any component fails to
    /// initialise or stops with an error.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let running = self.start(&SHUTDOWN_BROADCAST).await?;
        internal!(level = INFO, address = %running.local_addr(), "Controller running");

        let mut wait = std::pin::pin!(running.wait());

        tokio::select! {
            r = &mut wait => {
                return r;
            }
            r = shutdown() => {
                r?;
            }
        }

        internal!("Shutting down...");

        tokio::select! {
            r = wait => r,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Forced shutdown, in-flight deliveries abandoned");
                Ok(())
            }
        }
    }
}
