//! Tracker request dispatch: the singleton coordinator's view of the wire
//! protocol. Wraps a [`Registry`] plus the owned-file directory's
//! on-disk persistence.

use crate::error::MeshError;
use crate::tracker::{persistence, Registry};
use crate::wire::{Request, Response};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub struct TrackerService {
    pub registry: Arc<Registry>,
    persist_path: PathBuf,
    persist_lock: Mutex<()>,
}

impl TrackerService {
    pub fn new(persist_path: PathBuf) -> std::io::Result<Self> {
        let registry = Arc::new(Registry::new());
        let entries = persistence::load(&persist_path)?;
        registry.load_owned_files(entries);
        Ok(Self { registry, persist_path, persist_lock: Mutex::new(()) })
    }

    fn persist(&self) {
        let _guard = self.persist_lock.lock().unwrap();
        let entries = self.registry.all_owned_files();
        if let Err(e) = persistence::save(&self.persist_path, &entries) {
            warn!(error = %e, "failed to persist owned file directory");
        }
    }

    pub fn dispatch(&self, request: Request) -> Response {
        match self.handle(request) {
            Ok(response) => response,
            Err(e) => Response::error(&e),
        }
    }

    fn handle(&self, request: Request) -> Result<Response, MeshError> {
        match request {
            Request::Register { identity, address, load } => {
                // Only re-persist when this registration actually touched
                // the owned-file directory (address refresh or legacy-id
                // upgrade); a plain heartbeat-driven re-register for a
                // peer that owns nothing would otherwise flush on every
                // beat for no reason.
                if self.registry.register(identity, address, load) {
                    self.persist();
                }
                Ok(Response::Ok)
            }
            Request::Unregister { identity } => {
                self.registry.unregister(identity);
                Ok(Response::Ok)
            }
            Request::UpdateLoad { identity, load } => {
                self.registry.update_load(identity, load);
                Ok(Response::Ok)
            }
            Request::RequestBestPeer { identity, exclude_self } => {
                let exclude = if exclude_self { Some(identity) } else { None };
                let peer = self.registry.best_peer(exclude);
                Ok(Response::PeerAddress { peer })
            }
            Request::RegisterFile { identity, filename } => {
                self.registry.register_file(identity, &filename);
                Ok(Response::Ok)
            }
            Request::UnregisterFile { identity, filename } => {
                self.registry.unregister_file(identity, &filename);
                Ok(Response::Ok)
            }
            Request::FindFile { filename } => {
                let addresses = self.registry.find_file(&filename);
                Ok(Response::Addresses { addresses })
            }
            Request::RegisterOwnedFile {
                owner_id,
                owner_address,
                storage_identity,
                storage_address,
                filename,
            } => {
                self.registry.register_owned_file(
                    owner_id,
                    owner_address,
                    storage_identity,
                    storage_address,
                    filename,
                );
                self.persist();
                Ok(Response::Ok)
            }
            Request::FindOwnedFile { filename, requester_id } => {
                let entry = self.registry.find_owned_file(&filename, requester_id)?;
                Ok(Response::Tree { tree: serde_json::to_value(&entry)? })
            }
            Request::DeleteOwnedFile { filename, requester_id } => {
                self.registry.delete_owned_file(&filename, requester_id)?;
                self.persist();
                Ok(Response::Ok)
            }
            Request::Status => {
                let peers = self.registry.snapshot_peers();
                let owned = self.registry.all_owned_files();
                Ok(Response::Status {
                    snapshot: serde_json::json!({
                        "peers": peers,
                        "owned_files": owned,
                    }),
                })
            }
            other => Err(MeshError::BadRequest(format!("tracker does not handle {other:?}"))),
        }
    }
}
