//! HTTP API for the cadence campaign scheduler
//!
//! # Endpoints
//!
//! - **`POST /api/schedule`** - Accept a campaign and schedule a send per recipient
//! - **`GET /api/scheduled-units`** - Pending units with their campaigns, earliest first
//! - **`PUT /api/scheduled-units/{id}`** - Replace the body of a pending unit
//! - **`GET /api/sent-units`** - Sent units, most recent first
//! - **`GET /api/failed-units?limit=N`** - Most recently failed units
//! - **`POST /api/delete-units`** - Delete units by identifier
//! - **`GET /health`** - Liveness
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cadence_dispatch::{Dispatcher, WorkQueue};
//! use cadence_server::{ApiConfig, ApiServer};
//! use cadence_store::MemoryCampaignStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = Arc::new(Dispatcher::new(
//!     Arc::new(MemoryCampaignStore::new()),
//!     WorkQueue::new(),
//! ));
//! let server = ApiServer::new(&ApiConfig::default(), service).await?;
//!
//! // server.serve(shutdown_receiver).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod routes;
mod server;

pub use config::ApiConfig;
pub use error::{ApiError, ServerError};
pub use routes::{AppState, ScheduleBody};
pub use server::{ApiServer, router};
