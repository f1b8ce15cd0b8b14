//! Persistent peer identity: generated once, reused across restarts.
//!
//! Generated once per peer and written as a plain UUID string; loaded
//! verbatim on every subsequent start so the identity survives address
//! changes and restarts.

use crate::types::PeerId;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("identity file does not contain a valid UUID")]
    Malformed,
}

/// Load the identity at `path`, generating and persisting a fresh one if
/// the file does not exist yet.
pub fn load_or_generate(path: impl AsRef<Path>) -> Result<PeerId, IdentityError> {
    let path: &Path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(contents) => PeerId::parse(&contents).ok_or(IdentityError::Malformed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let id = PeerId::generate();
            persist(path, &id)?;
            Ok(id)
        }
        Err(e) => Err(IdentityError::Io(e)),
    }
}

fn persist(path: &Path, id: &PeerId) -> Result<(), IdentityError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, id.to_string())?;
    Ok(())
}

pub fn default_identity_path(data_dir: impl Into<PathBuf>) -> PathBuf {
    let mut p: PathBuf = data_dir.into();
    p.push("identity");
    p
}
