//! Durable Sessions
//!
//! Snapshot persistence and replay.
//!
//! - [`manager`]: session identity and directory layout
//! - [`repository`]: snapshot and final-output storage
//! - [`replay`]: resuming a run partway through

pub mod manager;
pub mod replay;
pub mod repository;

pub use manager::SessionManager;
pub use replay::{plan_replay, ReplayTarget};
pub use repository::{FileStateRepository, StateRepository};
