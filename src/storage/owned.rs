//! Blob store for files held on behalf of another peer.
//!
//! Storage peers key each owner's files by a subdirectory named from the
//! owner's upload-time address plus a short prefix of their stable
//! identity, so two owners never collide even if they briefly share an
//! address. Lookup, though, is always by `owner_id` alone: identity is the
//! stable key an owner authenticates with, not whatever address it had
//! when it first uploaded. A sidecar metadata
//! file in each subdirectory records the owner so the index can be rebuilt
//! on restart without reconstructing it from the directory name, which
//! only carries a truncated identity prefix.

use crate::types::{Address, PeerId};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(serde::Serialize, serde::Deserialize)]
struct OwnerMeta {
    owner_id: PeerId,
    owner_address: Address,
}

struct OwnerEntry {
    subdir: String,
    files: std::collections::HashSet<String>,
}

pub struct OwnedFileStore {
    root: PathBuf,
    /// `owner_id -> (subdir, files)`, mirrors disk state.
    index: Mutex<std::collections::HashMap<PeerId, OwnerEntry>>,
}

fn owner_subdir(owner_address: &Address, owner_id: &PeerId) -> String {
    format!(
        "{}_{}_{}",
        owner_address.host.replace(':', "-"),
        owner_address.port,
        owner_id.short_prefix(8)
    )
}

impl OwnedFileStore {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let mut index = std::collections::HashMap::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let subdir = entry.file_name().to_string_lossy().to_string();
            let meta_path = entry.path().join(".owner.json");
            let Ok(meta_bytes) = fs::read(&meta_path) else { continue };
            let Ok(meta) = serde_json::from_slice::<OwnerMeta>(&meta_bytes) else { continue };
            let mut files = std::collections::HashSet::new();
            for inner in fs::read_dir(entry.path())? {
                let inner = inner?;
                if inner.file_type()?.is_file() {
                    let name = inner.file_name().to_string_lossy().to_string();
                    if name != ".owner.json" {
                        files.insert(name);
                    }
                }
            }
            index.insert(meta.owner_id, OwnerEntry { subdir, files });
        }
        Ok(Self { root, index: Mutex::new(index) })
    }

    pub fn put(
        &self,
        owner_address: &Address,
        owner_id: &PeerId,
        filename: &str,
        ciphertext: &[u8],
    ) -> io::Result<()> {
        let mut index = self.index.lock().unwrap();
        let subdir = index
            .get(owner_id)
            .map(|e| e.subdir.clone())
            .unwrap_or_else(|| owner_subdir(owner_address, owner_id));
        let dir = self.root.join(&subdir);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(filename), ciphertext)?;
        let meta = OwnerMeta { owner_id: *owner_id, owner_address: owner_address.clone() };
        fs::write(dir.join(".owner.json"), serde_json::to_vec(&meta)?)?;
        index
            .entry(*owner_id)
            .or_insert_with(|| OwnerEntry { subdir, files: Default::default() })
            .files
            .insert(filename.to_string());
        Ok(())
    }

    pub fn get(&self, owner_id: &PeerId, filename: &str) -> Option<Vec<u8>> {
        let index = self.index.lock().unwrap();
        let entry = index.get(owner_id)?;
        if !entry.files.contains(filename) {
            return None;
        }
        fs::read(self.root.join(&entry.subdir).join(filename)).ok()
    }

    pub fn delete(&self, owner_id: &PeerId, filename: &str) -> bool {
        let mut index = self.index.lock().unwrap();
        let Some(entry) = index.get_mut(owner_id) else { return false };
        if !entry.files.remove(filename) {
            return false;
        }
        let _ = fs::remove_file(self.root.join(&entry.subdir).join(filename));
        true
    }

    pub fn contains(&self, owner_id: &PeerId, filename: &str) -> bool {
        self.index
            .lock()
            .unwrap()
            .get(owner_id)
            .map(|e| e.files.contains(filename))
            .unwrap_or(false)
    }
}
