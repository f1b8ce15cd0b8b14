//! Atomic load/save of the owned-file directory to disk, with migration
//! from the historical schema that tracked ownership by address alone.

use crate::tracker::registry::{OwnedFileEntry, StorageRef};
use crate::types::{Address, PeerId};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

/// Pre-identity schema: a map keyed by filename, recording only addresses.
/// Peers on this schema predate `PeerIdentity`, so owner and storage ids
/// are synthesized as legacy placeholders derived from port on load; a
/// placeholder upgrades to a real identity the next time its owner
/// registers from the same port (`Registry::register`).
#[derive(Deserialize)]
struct LegacyEntry {
    owner_address: (String, u16),
    storage_addresses: Vec<(String, u16)>,
}

pub fn load(path: &Path) -> io::Result<Vec<OwnedFileEntry>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    if let Ok(entries) = serde_json::from_slice::<Vec<OwnedFileEntry>>(&data) {
        return Ok(entries);
    }
    let legacy: HashMap<String, LegacyEntry> = serde_json::from_slice(&data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(legacy
        .into_iter()
        .map(|(filename, entry)| {
            let (host, port) = entry.owner_address;
            let owner_address = Address::new(host, port);
            let owner_id = PeerId::legacy_placeholder(owner_address.port);
            let storage = entry
                .storage_addresses
                .into_iter()
                .map(|(host, port)| {
                    let address = Address::new(host, port);
                    StorageRef { identity: PeerId::legacy_placeholder(address.port), address }
                })
                .collect();
            OwnedFileEntry {
                filename,
                owner_id,
                owner_last_known_address: owner_address.clone(),
                owner_address,
                storage,
            }
        })
        .collect())
}

/// Writes via a temp file in the same directory followed by a rename, so a
/// crash mid-write never leaves a truncated owned-file directory on disk.
pub fn save(path: &Path, entries: &[OwnedFileEntry]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(entries).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    fs::write(&tmp_path, body)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::registry::StorageRef;
    use crate::types::PeerId;

    fn tempfile() -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("meshd-owned-files-test-{}.json", uuid::Uuid::new_v4()));
        p
    }

    #[test]
    fn missing_file_loads_as_empty() {
        assert!(load(&tempfile()).unwrap().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let path = tempfile();
        let entry = OwnedFileEntry {
            filename: "f".to_string(),
            owner_id: PeerId::generate(),
            owner_address: Address::new("h", 1),
            owner_last_known_address: Address::new("h", 1),
            storage: vec![StorageRef { identity: PeerId::generate(), address: Address::new("h", 1) }],
        };
        save(&path, &[entry.clone()]).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].filename, "f");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn a_legacy_address_only_document_loads_with_synthesized_placeholder_ids() {
        let path = tempfile();
        let legacy_json = serde_json::json!({
            "old.bin": {
                "owner_address": ["1.2.3.4", 9000],
                "storage_addresses": [["1.2.3.4", 9100]],
            }
        });
        fs::write(&path, serde_json::to_vec(&legacy_json).unwrap()).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].filename, "old.bin");
        assert_eq!(loaded[0].owner_last_known_address, loaded[0].owner_address);
        assert_eq!(loaded[0].owner_id.legacy_port(), Some(9000));
        assert_eq!(loaded[0].storage[0].identity.legacy_port(), Some(9100));
        let _ = fs::remove_file(&path);
    }
}
