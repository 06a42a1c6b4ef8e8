//! Types shared by every cadence crate: unit lifecycle status, priority
//! classes, the shutdown signal, and logging setup.

pub mod logging;
pub mod status;

pub use status::{ParseError, Priority, UnitStatus};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
