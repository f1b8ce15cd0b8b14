//! Ownership lifecycle for files stored on another peer's behalf.

pub mod chunked_fetch;
pub mod crypto;

pub use chunked_fetch::{assemble, assemble_parallel, DEFAULT_CHUNK_BYTES};
