//! Peer directory, file advertisement index, and owned-file directory.

use crate::error::MeshError;
use crate::types::{now, Address, PeerId};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// How long a peer can go without a heartbeat before it's considered
/// stale and excluded from `best_peer`/janitor sweeps.
pub const STALENESS_SECS: u64 = 30;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PeerRecord {
    pub identity: PeerId,
    pub address: Address,
    pub load: f64,
    pub last_heartbeat: u64,
    /// Set once on this identity's first `REGISTER` and never touched
    /// again; `best_peer`'s tie-break key, since `last_heartbeat` updates
    /// on every re-register and can't serve that purpose.
    pub registered_at: u64,
}

impl PeerRecord {
    pub fn is_stale(&self, now: u64, staleness_secs: u64) -> bool {
        now.saturating_sub(self.last_heartbeat) > staleness_secs
    }
}

/// One storage peer holding a copy of an owned file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StorageRef {
    pub identity: PeerId,
    pub address: Address,
}

/// A file this peer directory believes some peer holds a local copy of.
/// Hint-only: no byte-identity guarantee is made between advertisers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OwnedFileEntry {
    pub filename: String,
    pub owner_id: PeerId,
    /// Address the owner had at upload time. Immutable: the ownership
    /// transform's key is derived from this, not from wherever the owner
    /// has since roamed to.
    pub owner_address: Address,
    /// Always the address from the owner's most recent `REGISTER`.
    pub owner_last_known_address: Address,
    /// Non-empty while the entry exists; a filename can be re-advertised
    /// by more than one storage peer, so `REGISTER_OWNED_FILE` unions in.
    pub storage: Vec<StorageRef>,
}

#[derive(Default)]
pub struct Registry {
    peers: Mutex<HashMap<PeerId, PeerRecord>>,
    files: Mutex<HashMap<String, HashSet<PeerId>>>,
    owned_files: Mutex<HashMap<String, OwnedFileEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts `identity`'s PeerRecord. Also refreshes
    /// `owner_last_known_address` on every entry this identity owns, and
    /// upgrades any legacy placeholder owner_id whose synthesized port
    /// matches this registrant's port to the real, stable identity.
    ///
    /// Returns whether any owned-file entry was touched, so the caller
    /// knows whether the on-disk owned-file directory needs re-persisting.
    pub fn register(&self, identity: PeerId, address: Address, load: f64) -> bool {
        let mut peers = self.peers.lock().unwrap();
        let registered_at = peers.get(&identity).map(|p| p.registered_at).unwrap_or_else(now);
        peers.insert(
            identity,
            PeerRecord { identity, address: address.clone(), load, last_heartbeat: now(), registered_at },
        );
        drop(peers);

        let mut owned = self.owned_files.lock().unwrap();
        let mut mutated = false;
        for entry in owned.values_mut() {
            if entry.owner_id == identity {
                entry.owner_last_known_address = address.clone();
                mutated = true;
            } else if entry.owner_id.legacy_port() == Some(address.port) {
                entry.owner_id = identity;
                entry.owner_last_known_address = address.clone();
                mutated = true;
            }
        }
        mutated
    }

    pub fn unregister(&self, identity: PeerId) -> bool {
        self.peers.lock().unwrap().remove(&identity).is_some()
    }

    pub fn update_load(&self, identity: PeerId, load: f64) -> bool {
        let mut peers = self.peers.lock().unwrap();
        match peers.get_mut(&identity) {
            Some(record) => {
                record.load = load;
                record.last_heartbeat = now();
                true
            }
            None => false,
        }
    }

    /// Lowest-load non-stale peer, excluding `exclude` if set. Ties broken
    /// by earliest registration time.
    pub fn best_peer(&self, exclude: Option<PeerId>) -> Option<(PeerId, Address)> {
        let peers = self.peers.lock().unwrap();
        let now = now();
        peers
            .values()
            .filter(|p| !p.is_stale(now, STALENESS_SECS))
            .filter(|p| Some(p.identity) != exclude)
            .min_by(|a, b| {
                a.load
                    .partial_cmp(&b.load)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.registered_at.cmp(&b.registered_at))
            })
            .map(|p| (p.identity, p.address.clone()))
    }

    pub fn register_file(&self, identity: PeerId, filename: &str) {
        self.files.lock().unwrap().entry(filename.to_string()).or_default().insert(identity);
    }

    pub fn unregister_file(&self, identity: PeerId, filename: &str) {
        if let Some(set) = self.files.lock().unwrap().get_mut(filename) {
            set.remove(&identity);
        }
    }

    /// Addresses of non-stale peers advertising `filename`.
    pub fn find_file(&self, filename: &str) -> Vec<Address> {
        let files = self.files.lock().unwrap();
        let peers = self.peers.lock().unwrap();
        let now = now();
        files
            .get(filename)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| peers.get(id))
                    .filter(|p| !p.is_stale(now, STALENESS_SECS))
                    .map(|p| p.address.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Create-or-union: a first registration for `filename` creates the
    /// entry; subsequent registrations from other storage peers add to
    /// `storage` (or refresh the address of a storage peer already in it).
    pub fn register_owned_file(
        &self,
        owner_id: PeerId,
        owner_address: Address,
        storage_identity: PeerId,
        storage_address: Address,
        filename: String,
    ) {
        let mut owned = self.owned_files.lock().unwrap();
        match owned.get_mut(&filename) {
            Some(entry) => match entry.storage.iter_mut().find(|s| s.identity == storage_identity) {
                Some(existing) => existing.address = storage_address,
                None => entry.storage.push(StorageRef { identity: storage_identity, address: storage_address }),
            },
            None => {
                owned.insert(
                    filename.clone(),
                    OwnedFileEntry {
                        filename,
                        owner_id,
                        owner_address: owner_address.clone(),
                        owner_last_known_address: owner_address,
                        storage: vec![StorageRef { identity: storage_identity, address: storage_address }],
                    },
                );
            }
        }
    }

    /// Returns storage addresses only if `requester_id == entry.owner_id`.
    pub fn find_owned_file(&self, filename: &str, requester_id: PeerId) -> Result<OwnedFileEntry, MeshError> {
        let owned = self.owned_files.lock().unwrap();
        match owned.get(filename) {
            Some(entry) if entry.owner_id == requester_id => Ok(entry.clone()),
            Some(_) => Err(MeshError::NotOwner),
            None => Err(MeshError::UnknownFile(filename.to_string())),
        }
    }

    pub fn delete_owned_file(&self, filename: &str, requester_id: PeerId) -> Result<(), MeshError> {
        let mut owned = self.owned_files.lock().unwrap();
        match owned.get(filename) {
            Some(entry) if entry.owner_id == requester_id => {
                owned.remove(filename);
                Ok(())
            }
            Some(_) => Err(MeshError::NotOwner),
            None => Err(MeshError::UnknownFile(filename.to_string())),
        }
    }

    pub fn snapshot_peers(&self) -> Vec<PeerRecord> {
        self.peers.lock().unwrap().values().cloned().collect()
    }

    pub fn all_owned_files(&self) -> Vec<OwnedFileEntry> {
        self.owned_files.lock().unwrap().values().cloned().collect()
    }

    pub fn load_owned_files(&self, entries: Vec<OwnedFileEntry>) {
        let mut owned = self.owned_files.lock().unwrap();
        owned.clear();
        for entry in entries {
            owned.insert(entry.filename.clone(), entry);
        }
    }

    /// Removes peer records whose heartbeat is older than `staleness_secs`
    /// and scrubs them out of file advertisements. Owned-file entries are
    /// never touched here: a peer going stale doesn't erase what it owns.
    pub fn evict_stale(&self, staleness_secs: u64) -> Vec<PeerId> {
        let now = now();
        let mut peers = self.peers.lock().unwrap();
        let stale: Vec<PeerId> = peers
            .values()
            .filter(|p| p.is_stale(now, staleness_secs))
            .map(|p| p.identity)
            .collect();
        for id in &stale {
            peers.remove(id);
        }
        drop(peers);
        if !stale.is_empty() {
            let mut files = self.files.lock().unwrap();
            for set in files.values_mut() {
                for id in &stale {
                    set.remove(id);
                }
            }
        }
        stale
    }
}
