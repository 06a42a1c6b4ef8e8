//! HTTP API server

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    routing::{get, post, put},
};
use cadence_common::Signal;
use cadence_dispatch::DispatchService;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{
    ApiConfig, ServerError,
    routes::{self, AppState},
};

/// Build the API router
///
/// Exposed separately from [`ApiServer`] so the routes can be exercised
/// without binding a socket. Every route except `POST /api/schedule` is
/// bounded by `request_timeout_secs`.
pub fn router(config: &ApiConfig, service: Arc<dyn DispatchService>) -> Router {
    let state = AppState {
        service,
        default_sender: Arc::from(config.default_sender.as_str()),
    };

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/scheduled-units", get(routes::scheduled_units))
        .route("/api/scheduled-units/{id}", put(routes::edit_unit))
        .route("/api/sent-units", get(routes::sent_units))
        .route("/api/failed-units", get(routes::failed_units))
        .route("/api/delete-units", post(routes::delete_units))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        // Added after the timeout so the response always reports what was
        // actually scheduled
        .route("/api/schedule", post(routes::schedule))
        .with_state(state)
}

/// Campaign scheduling HTTP server
#[derive(Debug)]
pub struct ApiServer {
    listener: TcpListener,
    router: Router,
}

impl ApiServer {
    /// Bind the listener and build the router
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn new(
        config: &ApiConfig,
        service: Arc<dyn DispatchService>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| ServerError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(
            address = %config.listen_address,
            "API server bound successfully"
        );

        Ok(Self {
            listener,
            router: router(config, service),
        })
    }

    /// The bound address, useful when listening on port 0
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::ServerError(e.to_string()))
    }

    /// Run the API server until shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ServerError> {
        tracing::info!("API server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("API server received shutdown signal");
            })
            .await
            .map_err(|e| ServerError::ServerError(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests")]
mod tests {
    use cadence_dispatch::{Dispatcher, WorkQueue};
    use cadence_store::MemoryCampaignStore;

    use super::*;

    fn service() -> Arc<dyn DispatchService> {
        Arc::new(Dispatcher::new(
            Arc::new(MemoryCampaignStore::new()),
            WorkQueue::new(),
        ))
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let config = ApiConfig {
            listen_address: "not an address".to_string(),
            ..ApiConfig::default()
        };

        assert!(matches!(
            ApiServer::new(&config, service()).await,
            Err(ServerError::BindError { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let config = ApiConfig {
            listen_address: "127.0.0.1:0".to_string(),
            ..ApiConfig::default()
        };

        let server = ApiServer::new(&config, service()).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let (tx, rx) = tokio::sync::broadcast::channel(1);
        let handle = tokio::spawn(server.serve(rx));
        tx.send(Signal::Shutdown).unwrap();

        assert!(handle.await.unwrap().is_ok());
    }
}
