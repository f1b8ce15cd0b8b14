//! Tracker: the singleton coordinator peers register with.

pub mod janitor;
pub mod persistence;
pub mod registry;
pub mod service;

pub use registry::{OwnedFileEntry, PeerRecord, Registry, StorageRef};
pub use service::TrackerService;
