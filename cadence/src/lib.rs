pub mod controller;

pub use controller::{Cadence, Running, SHUTDOWN_BROADCAST};
