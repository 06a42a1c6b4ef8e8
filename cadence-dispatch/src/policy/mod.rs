//! Policy abstractions for dispatch operations.
//!
//! - [`RetryPolicy`]: Determines how many attempts a unit gets and how long
//!   to wait between them

pub mod retry;

pub use retry::RetryPolicy;
