//! File storage subsystems: plain local files and ciphertext stored
//! on behalf of a remote owner.

pub mod local;
pub mod owned;

pub use local::LocalFileStore;
pub use owned::OwnedFileStore;
