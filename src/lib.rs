//! `meshd`: a peer-to-peer compute-and-storage fabric library crate shared
//! by the `trackerd` and `peerd` binaries.
//!
//! Module layout: `wire` (framing and message vocabulary), `memory_store`
//! (per-peer key/value store), `storage` (local and owned-file blob
//! stores), `os` (process table, resource arbiter, allocator, IPC),
//! `cache`/`history` (result cache and execution history), `quota`
//! (submission and storage ceilings), `scheduler` (dispatch disciplines),
//! `peer_server`/`server`/`dispatch_client` (peer request handling and
//! outbound calls), `tracker` (coordinator), `identity`/`heartbeat`
//! (stable peer identity and liveness reporting), `ownership`
//! (upload/download lifecycle).

pub mod cache;
pub mod dispatch_client;
pub mod error;
pub mod heartbeat;
pub mod history;
pub mod identity;
pub mod memory_store;
pub mod os;
pub mod ownership;
pub mod peer_server;
pub mod quota;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod tracker;
pub mod types;
pub mod wire;

pub use error::{ErrorCategory, MeshError, MeshResult};
pub use peer_server::{PeerConfig, PeerServer};
pub use scheduler::Scheduler;
pub use tracker::TrackerService;
pub use types::{Address, PeerId, SchedulerDiscipline, Task, TaskRole, TaskStatus};
