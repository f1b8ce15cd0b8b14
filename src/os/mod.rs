//! OS-simulation substrate: processes, resources, memory blocks, IPC.

pub mod allocator;
pub mod ipc;
pub mod process;
pub mod resources;

pub use allocator::{AllocStrategy, BlockAllocator, FragmentationReport};
pub use ipc::{IpcRegistry, IpcStats, MessageQueue, QueueMessage, Semaphore};
pub use process::{Process, ProcessState, ProcessTable};
pub use resources::{ResourceArbiter, ResourceSnapshot};
