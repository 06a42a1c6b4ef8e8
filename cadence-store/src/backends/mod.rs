//! Campaign store implementations
//!
//! - `memory`: in-process storage for tests and development
//! - `file`: one file per record under a directory

pub mod file;
pub mod memory;

pub use file::FileCampaignStore;
pub use memory::MemoryCampaignStore;
