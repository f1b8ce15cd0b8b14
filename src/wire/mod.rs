//! Wire framing and message vocabulary.

pub mod codec;
pub mod message;

pub use codec::{read_frame, write_frame, CodecError, DEFAULT_MAX_FRAME_BYTES};
pub use message::{CpuResult, CpuTaskSpec, Request, Response};
