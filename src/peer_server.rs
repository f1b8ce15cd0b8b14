//! Peer request dispatch: routes every peer-side wire
//! request to the subsystem that owns it, and runs the scheduler's single
//! dispatch thread that actually executes compute tasks.

use crate::cache::{self, ResultCache};
use crate::dispatch_client;
use crate::error::MeshError;
use crate::history::{History, HistoryEntry};
use crate::os::allocator::AllocStrategy;
use crate::os::ipc::QueueMessage;
use crate::os::{BlockAllocator, IpcRegistry, ProcessTable, ResourceArbiter};
use crate::ownership;
use crate::quota::QuotaLedger;
use crate::scheduler::Scheduler;
use crate::storage::{LocalFileStore, OwnedFileStore};
use crate::tracker;
use crate::types::{now, Address, PeerId, SchedulerDiscipline, Task, TaskRole, TaskStatus};
use crate::wire::{CpuResult, CpuTaskSpec, Request, Response};
use crate::memory_store::MemoryStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub struct PeerConfig {
    pub identity: PeerId,
    pub address: Address,
    pub tracker: Address,
    pub local_files_dir: std::path::PathBuf,
    pub owned_files_dir: std::path::PathBuf,
    pub memory_bytes: u64,
    pub alloc_strategy: AllocStrategy,
    pub scheduler_discipline: SchedulerDiscipline,
    pub quota_policy: crate::quota::QuotaPolicy,
}

#[derive(Clone)]
struct Inflight {
    result_tx: SyncSender<CpuResult>,
    cancel: Arc<AtomicBool>,
}

pub struct PeerServer {
    pub identity: PeerId,
    pub address: Arc<Mutex<Address>>,
    pub tracker: Address,
    pub memory: MemoryStore,
    pub local_files: LocalFileStore,
    pub owned_files: OwnedFileStore,
    pub processes: ProcessTable,
    pub resources: ResourceArbiter,
    pub allocator: BlockAllocator,
    pub alloc_strategy: AllocStrategy,
    pub ipc: IpcRegistry,
    pub cache: ResultCache,
    pub history: History,
    pub quota: QuotaLedger,
    pub scheduler: Arc<Scheduler>,
    inflight: Mutex<HashMap<String, Inflight>>,
    shutdown: Arc<AtomicBool>,
}

impl PeerServer {
    pub fn new(config: PeerConfig) -> std::io::Result<Arc<Self>> {
        let local_files = LocalFileStore::open(&config.local_files_dir)?;
        let owned_files = OwnedFileStore::open(&config.owned_files_dir)?;
        let server = Arc::new(Self {
            identity: config.identity,
            address: Arc::new(Mutex::new(config.address)),
            tracker: config.tracker,
            memory: MemoryStore::new(),
            local_files,
            owned_files,
            processes: ProcessTable::new(),
            resources: ResourceArbiter::new(),
            allocator: BlockAllocator::new(config.memory_bytes),
            alloc_strategy: config.alloc_strategy,
            ipc: IpcRegistry::new(),
            cache: ResultCache::new(cache::DEFAULT_CAPACITY, cache::DEFAULT_TTL),
            history: History::new(crate::history::DEFAULT_CAPACITY),
            quota: QuotaLedger::new(config.quota_policy),
            scheduler: Arc::new(Scheduler::new(config.scheduler_discipline)),
            inflight: Mutex::new(HashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        });
        server.clone().spawn_dispatch_thread();
        Ok(server)
    }

    fn spawn_dispatch_thread(self: Arc<Self>) {
        std::thread::spawn(move || {
            while let Some((task, submitter, waited)) = self.scheduler.pop_blocking() {
                self.run_task(task, submitter, waited);
            }
        });
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.scheduler.shutdown();
    }

    fn run_task(&self, mut task: Task, submitter: String, waited: Duration) {
        let inflight = self.inflight.lock().unwrap().get(&task.task_id).cloned();
        let cancelled = inflight.as_ref().map(|i| i.cancel.load(Ordering::SeqCst)).unwrap_or(false);

        let started = Instant::now();
        let timeout = Duration::from_secs(task.timeout_secs);
        let result = if cancelled {
            Err(MeshError::Cancelled)
        } else {
            run_with_timeout(&task, timeout)
        };
        let execution_ms = started.elapsed().as_millis() as u64;
        let waiting_ms = waited.as_millis() as u64;

        // Confidentiality only gates remote dispatch — a confidential task
        // still consults and updates the cache, same as any other task.
        let fingerprint = cache::fingerprint(&task.program, &task.entry_point, &task.args);
        if let Ok(value) = &result {
            self.cache.put(fingerprint, value.clone(), None);
        }

        let (status, value, error) = match &result {
            Ok(v) => (TaskStatus::Completed, Some(v.clone()), None),
            Err(MeshError::Cancelled) => (TaskStatus::Cancelled, None, Some("cancelled".to_string())),
            Err(MeshError::TimedOut) => (TaskStatus::TimedOut, None, Some("task timed out".to_string())),
            Err(e) => (TaskStatus::Failed, None, Some(e.to_string())),
        };

        self.history.record(HistoryEntry {
            task_id: task.task_id.clone(),
            role: TaskRole::Executor,
            status,
            waiting_ms,
            execution_ms,
            cache_hit: false,
            recorded_at: now(),
        });

        // Failed and timed-out tasks get one more trip through the scheduler
        // per spec.md §4.3(5) as long as retries remain; only the final
        // attempt (success, cancellation, or exhausted retries) replies to
        // the waiting caller.
        let retryable = matches!(status, TaskStatus::Failed | TaskStatus::TimedOut);
        if retryable && task.max_retries > 0 {
            task.max_retries -= 1;
            self.scheduler.enqueue(task, submitter);
            return;
        }

        let cpu_result = CpuResult {
            task_id: task.task_id.clone(),
            status,
            value,
            error,
            cache_hit: false,
            waiting_ms,
            execution_ms,
        };

        if let Some(inflight) = self.inflight.lock().unwrap().remove(&task.task_id) {
            let _ = inflight.result_tx.send(cpu_result);
        }
    }

    fn submit_and_wait(&self, spec: CpuTaskSpec, submitter: String) -> CpuResult {
        if let Err(e) = self.quota.record_submission(&submitter) {
            return failed_result(&spec.task_id, &e);
        }

        // Confidential tasks still consult and update the cache (spec.md
        // §4.3); only the remote-dispatch attempt below is skipped for them,
        // since a confidential task must never leave this peer.
        let fingerprint = cache::fingerprint(&spec.program, &spec.function, &spec.args);
        if let Some(cached) = self.cache.get(&fingerprint) {
            self.history.record(HistoryEntry {
                task_id: spec.task_id.clone(),
                role: TaskRole::Executor,
                status: TaskStatus::Completed,
                waiting_ms: 0,
                execution_ms: 0,
                cache_hit: true,
                recorded_at: now(),
            });
            return CpuResult {
                task_id: spec.task_id,
                status: TaskStatus::Completed,
                value: Some(cached),
                error: None,
                cache_hit: true,
                waiting_ms: 0,
                execution_ms: 0,
            };
        }

        if !spec.confidential {
            if let Some(result) = self.try_remote_dispatch(&spec) {
                return result;
            }
        }

        let task = Task {
            task_id: spec.task_id.clone(),
            program: spec.program,
            entry_point: spec.function,
            args: spec.args,
            priority: spec.priority,
            confidential: spec.confidential,
            max_retries: spec.max_retries,
            timeout_secs: spec.timeout.unwrap_or(Task::DEFAULT_TIMEOUT_SECS),
            estimated_runtime_ms: spec.estimated_runtime_ms.unwrap_or(0),
            submitted_at: now(),
            quantum_ms: spec.quantum_ms.unwrap_or(Task::DEFAULT_QUANTUM_MS),
        };
        // Each retry attempt gets its own `task.timeout_secs` budget inside
        // `run_task`; this outer wait must cover every attempt the task is
        // still entitled to, not just the first.
        let per_attempt_timeout = Duration::from_secs(task.timeout_secs);
        let overall_timeout = per_attempt_timeout * (task.max_retries + 1);
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = sync_channel(1);
        self.inflight
            .lock()
            .unwrap()
            .insert(task.task_id.clone(), Inflight { result_tx: tx, cancel: cancel.clone() });
        self.scheduler.enqueue(task.clone(), submitter);

        match rx.recv_timeout(overall_timeout) {
            Ok(result) => result,
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                self.inflight.lock().unwrap().remove(&task.task_id);
                CpuResult {
                    task_id: task.task_id,
                    status: TaskStatus::TimedOut,
                    value: None,
                    error: Some("task timed out".to_string()),
                    cache_hit: false,
                    waiting_ms: 0,
                    execution_ms: overall_timeout.as_millis() as u64,
                }
            }
        }
    }

    /// Asks the tracker for a peer other than itself and forwards `spec`
    /// to it, retrying against a different peer (if the tracker offers
    /// one) up to `max_retries` times. Returns `None` — meaning "run it
    /// locally instead" — when the tracker has nobody else to offer,
    /// either because this is the only peer registered or because it has
    /// already exhausted every candidate it was handed.
    fn try_remote_dispatch(&self, spec: &CpuTaskSpec) -> Option<CpuResult> {
        let attempts = spec.max_retries.max(1);
        let mut excluded: Vec<PeerId> = Vec::new();
        let mut last_error = None;

        for _ in 0..attempts {
            let peer = match dispatch_client::call(
                &self.tracker,
                &Request::RequestBestPeer { identity: self.identity, exclude_self: true },
            ) {
                Ok(Response::PeerAddress { peer: Some((id, address)) }) if !excluded.contains(&id) => {
                    (id, address)
                }
                _ => return last_error.map(|e| failed_result(&spec.task_id, &e)),
            };
            excluded.push(peer.0);

            match dispatch_client::call(&peer.1, &Request::CpuTask(spec.clone())) {
                Ok(Response::CpuResult(result)) => {
                    self.history.record(HistoryEntry {
                        task_id: spec.task_id.clone(),
                        role: TaskRole::Requester,
                        status: result.status,
                        waiting_ms: result.waiting_ms,
                        execution_ms: result.execution_ms,
                        cache_hit: result.cache_hit,
                        recorded_at: now(),
                    });
                    return Some(result);
                }
                Ok(Response::Error { code, message }) => {
                    last_error = Some(MeshError::BadRequest(format!("{code}: {message}")));
                }
                Ok(_) => last_error = Some(MeshError::Transport("unexpected peer response".to_string())),
                Err(e) => last_error = Some(e),
            }
        }
        last_error.map(|e| failed_result(&spec.task_id, &e))
    }

    fn cancel_task(&self, task_id: &str) -> Result<(), MeshError> {
        let inflight = self.inflight.lock().unwrap();
        match inflight.get(task_id) {
            Some(entry) => {
                entry.cancel.store(true, Ordering::SeqCst);
                Ok(())
            }
            None => Err(MeshError::UnknownKey(task_id.to_string())),
        }
    }

    pub fn dispatch(&self, request: Request, peer_addr: Option<std::net::SocketAddr>) -> Response {
        let submitter = peer_addr.map(|a| a.to_string()).unwrap_or_else(|| "unknown".to_string());
        match self.handle(request, submitter) {
            Ok(response) => response,
            Err(e) => Response::error(&e),
        }
    }

    fn handle(&self, request: Request, submitter: String) -> Result<Response, MeshError> {
        match request {
            Request::SetMem { key, value } => {
                if self.memory.get(&key).is_none() {
                    self.quota.reserve(&submitter, 0)?;
                }
                self.memory.set(key, value);
                Ok(Response::Ok)
            }
            Request::GetMem { key } => Ok(Response::Value { value: self.memory.get(&key) }),
            Request::DelMem { key } => {
                if self.memory.delete(&key) {
                    self.quota.release(&submitter, 0);
                    Ok(Response::Ok)
                } else {
                    Err(MeshError::UnknownKey(key))
                }
            }
            Request::ListMem => Ok(Response::Keys { keys: self.memory.list_keys() }),

            Request::PutFile { filename, data } => {
                if !self.local_files.contains(&filename) {
                    self.quota.reserve(&submitter, data.len() as u64)?;
                }
                self.local_files.put(&filename, &data)?;
                Ok(Response::Ok)
            }
            Request::GetFile { filename } => match self.local_files.get(&filename) {
                Some(data) => Ok(Response::Data { data }),
                None => Err(MeshError::UnknownFile(filename)),
            },
            Request::ListFile => Ok(Response::Files { files: self.local_files.list() }),
            Request::DeleteFile { filename } => {
                let size = self.local_files.get(&filename).map(|d| d.len() as u64);
                if self.local_files.delete(&filename) {
                    self.quota.release(&submitter, size.unwrap_or(0));
                    Ok(Response::Ok)
                } else {
                    Err(MeshError::UnknownFile(filename))
                }
            }
            Request::DownloadFromNetwork { filename } => self.download_from_network(&filename),
            Request::FileSize { filename } => match self.local_files.get(&filename) {
                Some(data) => Ok(Response::Size { size: data.len() as u64 }),
                None => Err(MeshError::UnknownFile(filename)),
            },

            Request::UploadToPeer { filename, ciphertext, owner_id, owner_address } => {
                self.owned_files.put(&owner_address, &owner_id, &filename, &ciphertext)?;
                // A storage peer that just accepted a file registers itself
                // with the tracker so FIND_OWNED_FILE can find it.
                let register = Request::RegisterOwnedFile {
                    owner_id,
                    owner_address,
                    storage_identity: self.identity,
                    storage_address: self.address.lock().unwrap().clone(),
                    filename,
                };
                if let Err(e) = dispatch_client::call_with_retry(&self.tracker, &register, 2) {
                    tracing::warn!(error = %e, "failed to register owned file with tracker");
                }
                Ok(Response::Ok)
            }
            Request::UploadOwnedFile { filename, data } => self.upload_owned_file(filename, data),
            Request::DeleteOwned { filename } => self.delete_owned(&filename),
            Request::GetOwnedFile { filename, owner_id } => {
                self.verify_owner_with_tracker(&filename, owner_id)?;
                match self.owned_files.get(&owner_id, &filename) {
                    Some(data) => Ok(Response::Data { data }),
                    None => Err(MeshError::UnknownFile(filename)),
                }
            }
            Request::DeleteOwnedFileStorage { filename, owner_id } => {
                self.verify_owner_with_tracker(&filename, owner_id)?;
                if self.owned_files.delete(&owner_id, &filename) {
                    Ok(Response::Ok)
                } else {
                    Err(MeshError::UnknownFile(filename))
                }
            }
            Request::GetChunk { filename, offset, length } => {
                // Chunked fetch serves advertised plain-text local files,
                // never the owned-file ciphertext store, which requires
                // owner-id authorization `GET_OWNED_FILE` doesn't carry.
                let data = self.local_files.get(&filename).ok_or_else(|| MeshError::UnknownFile(filename.clone()))?;
                let start = (offset as usize).min(data.len());
                let end = (start + length as usize).min(data.len());
                Ok(Response::Data { data: data[start..end].to_vec() })
            }

            Request::CpuTask(spec) => {
                let result = self.submit_and_wait(spec, submitter);
                Ok(Response::CpuResult(result))
            }
            Request::BatchTask { tasks } => {
                let results: Vec<Response> = tasks
                    .into_iter()
                    .map(|spec| Response::CpuResult(self.submit_and_wait(spec, submitter.clone())))
                    .collect();
                Ok(Response::BatchResult { results })
            }
            Request::CancelTask { task_id } => {
                self.cancel_task(&task_id)?;
                Ok(Response::Ok)
            }

            Request::CreateProcess { parent, group } => {
                let pid = self.processes.create(None, parent, group);
                Ok(Response::Pid { pid })
            }
            Request::TerminateProcess { pid } => {
                if self.processes.terminate(pid) {
                    Ok(Response::Ok)
                } else {
                    Err(MeshError::UnknownPid(pid))
                }
            }
            Request::ProcessTree { pid } => {
                let tree = self.processes.tree(pid);
                Ok(Response::Tree { tree: serde_json::to_value(&tree)? })
            }

            Request::RequestResource { pid, resource, units } => {
                self.resources.request(pid, &resource, units)?;
                Ok(Response::Ok)
            }
            Request::ReleaseResource { pid, resource, units } => {
                self.resources.release(pid, &resource, units)?;
                Ok(Response::Ok)
            }
            Request::CheckDeadlock => Ok(Response::Cycle { pids: self.resources.check_deadlock() }),

            Request::AllocMem { pid, size } => {
                let offset = self.allocator.allocate(pid, size as u64, self.alloc_strategy)?;
                Ok(Response::Offset { offset: offset as usize })
            }
            Request::FreeMem { pid, offset } => {
                self.allocator.free(pid, offset as u64)?;
                Ok(Response::Ok)
            }
            Request::FragInfo => {
                let report = self.allocator.fragmentation();
                let fragmentation_percent = if report.total_bytes == 0 {
                    0.0
                } else {
                    100.0 * (1.0
                        - report.largest_free_block as f64 / report.free_bytes.max(1) as f64)
                };
                Ok(Response::FragStats {
                    fragmentation_percent,
                    largest_free_block: report.largest_free_block as usize,
                    free_bytes: report.free_bytes as usize,
                })
            }

            Request::CreateQueue { name, capacity } => {
                self.ipc.create_queue(&name, capacity);
                Ok(Response::Ok)
            }
            Request::SendMsg { queue, to, body } => {
                let queue = self
                    .ipc
                    .queue(&queue)
                    .ok_or_else(|| MeshError::BadRequest(format!("unknown queue {queue}")))?;
                queue.send(QueueMessage { to, payload: body }, None)?;
                Ok(Response::Ok)
            }
            Request::RecvMsg { queue, pid, timeout_ms } => {
                let queue = self
                    .ipc
                    .queue(&queue)
                    .ok_or_else(|| MeshError::BadRequest(format!("unknown queue {queue}")))?;
                let timeout = timeout_ms.map(Duration::from_millis);
                let message = queue.recv(pid, timeout)?;
                Ok(Response::Message { body: message.payload })
            }
            Request::CreateSem { name, initial } => {
                self.ipc.create_semaphore(&name, initial);
                Ok(Response::Ok)
            }
            Request::WaitSem { name, pid: _ } => {
                let sem = self
                    .ipc
                    .semaphore(&name)
                    .ok_or_else(|| MeshError::BadRequest(format!("unknown semaphore {name}")))?;
                sem.wait(None)?;
                Ok(Response::Ok)
            }
            Request::SignalSem { name } => {
                let sem = self
                    .ipc
                    .semaphore(&name)
                    .ok_or_else(|| MeshError::BadRequest(format!("unknown semaphore {name}")))?;
                sem.signal();
                Ok(Response::Ok)
            }

            Request::Status => {
                // Each field below comes from its own subsystem's
                // lock-guarded snapshot function; none are held
                // simultaneously with another subsystem's lock.
                let snapshot = serde_json::json!({
                    "identity": self.identity,
                    "address": self.address.lock().unwrap().clone(),
                    "processes": self.processes.count(),
                    "scheduler": self.scheduler.stats(),
                    "cache": self.cache.stats(),
                    "history": self.history.stats(),
                    "quota": self.quota.stats(),
                    "resources": self.resources.snapshot(),
                    "allocator": self.allocator.fragmentation(),
                    "ipc": self.ipc.stats(),
                });
                Ok(Response::Status { snapshot })
            }

            other => Err(MeshError::BadRequest(format!("peer does not handle {other:?}"))),
        }
    }

    /// Owner-initiated half of the upload lifecycle (spec.md §4.11): picks a
    /// storage peer via the tracker (excluding itself), encrypts with the
    /// owner's own current address as the key input, and hands the
    /// ciphertext off with `UPLOAD_TO_PEER`. The storage peer registers the
    /// resulting ownership with the tracker itself once it accepts the blob.
    fn upload_owned_file(&self, filename: String, data: Vec<u8>) -> Result<Response, MeshError> {
        let reply = dispatch_client::call(
            &self.tracker,
            &Request::RequestBestPeer { identity: self.identity, exclude_self: true },
        )?;
        let (_, storage_address) = match reply {
            Response::PeerAddress { peer: Some(peer) } => peer,
            Response::PeerAddress { peer: None } => return Err(MeshError::NoPeerAvailable),
            Response::Error { code, message } => return Err(MeshError::BadRequest(format!("{code}: {message}"))),
            _ => return Err(MeshError::Transport("unexpected tracker response".to_string())),
        };

        let owner_address = self.address.lock().unwrap().clone();
        let ciphertext = ownership::crypto::transform(&data, &owner_address, &filename);
        let reply = dispatch_client::call_with_retry(
            &storage_address,
            &Request::UploadToPeer {
                filename,
                ciphertext,
                owner_id: self.identity,
                owner_address,
            },
            2,
        )?;
        match reply {
            Response::Ok => Ok(Response::Ok),
            Response::Error { code, message } => Err(MeshError::BadRequest(format!("{code}: {message}"))),
            _ => Err(MeshError::Transport("unexpected storage response".to_string())),
        }
    }

    /// Owner-initiated delete (spec.md §4.11): confirms ownership and the
    /// current storage set with the tracker, deletes the ciphertext from
    /// every storage peer, and only then asks the tracker to drop its
    /// entry. A storage peer that fails to confirm deletion blocks the
    /// tracker-side removal, so a half-deleted file never loses its
    /// ownership record.
    fn delete_owned(&self, filename: &str) -> Result<Response, MeshError> {
        let reply = dispatch_client::call(
            &self.tracker,
            &Request::FindOwnedFile { filename: filename.to_string(), requester_id: self.identity },
        )?;
        let entry: tracker::OwnedFileEntry = match reply {
            Response::Tree { tree } => serde_json::from_value(tree)?,
            Response::Error { code, message } => {
                return Err(match code.as_str() {
                    "NOT_OWNER" => MeshError::NotOwner,
                    "UNKNOWN_FILE" => MeshError::UnknownFile(filename.to_string()),
                    _ => MeshError::BadRequest(format!("{code}: {message}")),
                })
            }
            _ => return Err(MeshError::Transport("unexpected tracker response".to_string())),
        };

        for storage in &entry.storage {
            let reply = dispatch_client::call_with_retry(
                &storage.address,
                &Request::DeleteOwnedFileStorage { filename: filename.to_string(), owner_id: self.identity },
                2,
            )?;
            match reply {
                Response::Ok => {}
                Response::Error { code, message } => {
                    return Err(MeshError::BadRequest(format!("{code}: {message}")))
                }
                _ => return Err(MeshError::Transport("unexpected storage response".to_string())),
            }
        }

        let reply = dispatch_client::call(
            &self.tracker,
            &Request::DeleteOwnedFile { filename: filename.to_string(), requester_id: self.identity },
        )?;
        match reply {
            Response::Ok => Ok(Response::Ok),
            Response::Error { code, message } => Err(MeshError::BadRequest(format!("{code}: {message}"))),
            _ => Err(MeshError::Transport("unexpected tracker response".to_string())),
        }
    }

    /// Tries the owned-file path first (it alone knows how to reverse the
    /// ownership transform); a peer with no owned-file entry for this
    /// filename falls back to the multi-peer chunked fetch for files
    /// merely advertised via `REGISTER_FILE`.
    fn download_from_network(&self, filename: &str) -> Result<Response, MeshError> {
        match self.download_owned(filename) {
            Err(MeshError::UnknownFile(_)) => self.download_chunked(filename),
            other => other,
        }
    }

    /// Confirms with the tracker that `owner_id` is still the registered
    /// owner of `filename` before this storage peer serves or deletes the
    /// ciphertext. A wrong `owner_id` must come back as `NOT_OWNER`, not
    /// the `UNKNOWN_FILE` a purely local lookup would give it.
    fn verify_owner_with_tracker(&self, filename: &str, owner_id: PeerId) -> Result<(), MeshError> {
        let reply = dispatch_client::call_with_retry(
            &self.tracker,
            &Request::FindOwnedFile { filename: filename.to_string(), requester_id: owner_id },
            1,
        )?;
        match reply {
            Response::Tree { .. } => Ok(()),
            Response::Error { code, message } => Err(match code.as_str() {
                "NOT_OWNER" => MeshError::NotOwner,
                "UNKNOWN_FILE" => MeshError::UnknownFile(filename.to_string()),
                _ => MeshError::BadRequest(format!("{code}: {message}")),
            }),
            _ => Err(MeshError::Transport("unexpected tracker response".to_string())),
        }
    }

    /// Resolves `filename`'s storage peers through the tracker and pulls
    /// the whole blob from the first one that answers, then reverses the
    /// ownership transform. The key is derived from `owner_address`, the
    /// address the owner had at upload time — not wherever it has since
    /// migrated to — which is exactly what makes decryption still work
    /// after the owner rebinds and re-registers under a new address.
    fn download_owned(&self, filename: &str) -> Result<Response, MeshError> {
        let reply = dispatch_client::call(
            &self.tracker,
            &Request::FindOwnedFile { filename: filename.to_string(), requester_id: self.identity },
        )?;
        let entry: tracker::OwnedFileEntry = match reply {
            Response::Tree { tree } => serde_json::from_value(tree)?,
            Response::Error { code, message } => {
                return Err(MeshError::BadRequest(format!("{code}: {message}")))
            }
            _ => return Err(MeshError::Transport("unexpected tracker response".to_string())),
        };

        let mut last_error = None;
        for storage in &entry.storage {
            match dispatch_client::call_with_retry(
                &storage.address,
                &Request::GetOwnedFile { filename: filename.to_string(), owner_id: entry.owner_id },
                2,
            ) {
                Ok(Response::Data { data }) => {
                    let plaintext = ownership::crypto::transform(&data, &entry.owner_address, filename);
                    self.local_files.put(filename, &plaintext)?;
                    return Ok(Response::Data { data: plaintext });
                }
                Ok(Response::Error { code, message }) => {
                    last_error = Some(MeshError::BadRequest(format!("{code}: {message}")));
                }
                Ok(_) => last_error = Some(MeshError::Transport("unexpected storage response".to_string())),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or(MeshError::NoPeerAvailable))
    }

    /// Pulls an advertised, non-owned file from the set of peers that
    /// advertise it: probes each candidate for the file's size (first
    /// answer wins), then fetches every fixed-size chunk (default 1 MiB)
    /// in parallel across the candidate set, failing over to the next
    /// candidate within a chunk's own thread on error.
    fn download_chunked(&self, filename: &str) -> Result<Response, MeshError> {
        let reply =
            dispatch_client::call(&self.tracker, &Request::FindFile { filename: filename.to_string() })?;
        let candidates = match reply {
            Response::Addresses { addresses } => addresses,
            Response::Error { code, message } => {
                return Err(MeshError::BadRequest(format!("{code}: {message}")))
            }
            _ => return Err(MeshError::Transport("unexpected tracker response".to_string())),
        };
        if candidates.is_empty() {
            return Err(MeshError::NoPeerAvailable);
        }

        let mut total_size = None;
        let mut last_error = None;
        for candidate in &candidates {
            match dispatch_client::call_with_retry(
                candidate,
                &Request::FileSize { filename: filename.to_string() },
                1,
            ) {
                Ok(Response::Size { size }) => {
                    total_size = Some(size);
                    break;
                }
                Ok(Response::Error { code, message }) => {
                    last_error = Some(MeshError::BadRequest(format!("{code}: {message}")));
                }
                Ok(_) => last_error = Some(MeshError::Transport("unexpected size response".to_string())),
                Err(e) => last_error = Some(e),
            }
        }
        let total_size = total_size.ok_or_else(|| last_error.unwrap_or(MeshError::NoPeerAvailable))?;

        let chunk_size = ownership::DEFAULT_CHUNK_BYTES;
        let out = ownership::assemble_parallel(&candidates, filename, total_size, chunk_size, |address, filename, offset, length| {
            match dispatch_client::call_with_retry(
                address,
                &Request::GetChunk { filename: filename.to_string(), offset, length },
                1,
            ) {
                Ok(Response::Data { data }) => Ok(data),
                Ok(Response::Error { code, message }) => Err(MeshError::BadRequest(format!("{code}: {message}"))),
                Ok(_) => Err(MeshError::Transport("unexpected chunk response".to_string())),
                Err(e) => Err(e),
            }
        })?;
        self.local_files.put(filename, &out)?;
        Ok(Response::Data { data: out })
    }
}

fn failed_result(task_id: &str, err: &MeshError) -> CpuResult {
    CpuResult {
        task_id: task_id.to_string(),
        status: TaskStatus::Failed,
        value: None,
        error: Some(err.to_string()),
        cache_hit: false,
        waiting_ms: 0,
        execution_ms: 0,
    }
}

/// Runs `task`'s callable on its own thread and waits up to `timeout` for a
/// result. Per spec.md §5, a timeout aborts only the *measurement*: the
/// worker thread is abandoned (not joined, not interrupted) rather than
/// killed, since there is no preemption of an in-flight callable.
fn run_with_timeout(task: &Task, timeout: Duration) -> Result<serde_json::Value, MeshError> {
    let (tx, rx) = sync_channel(1);
    let task = task.clone();
    std::thread::spawn(move || {
        let _ = tx.send(execute_builtin(&task));
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(MeshError::TimedOut),
    }
}

/// Deliberately small, closed set of built-in operations: enough to exercise
/// scheduling, caching, quota, and cancellation without a real bytecode VM.
fn execute_builtin(task: &Task) -> Result<serde_json::Value, MeshError> {
    match task.entry_point.as_str() {
        "echo" => Ok(task.args.first().cloned().unwrap_or(serde_json::Value::Null)),
        "sum" => {
            let total: f64 = task.args.iter().filter_map(|v| v.as_f64()).sum();
            Ok(serde_json::json!(total))
        }
        "sleep" => {
            let ms = task.args.first().and_then(|v| v.as_u64()).unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
            Ok(serde_json::Value::Null)
        }
        "fail" => Err(MeshError::TaskFailed(
            task.args.first().and_then(|v| v.as_str()).unwrap_or("requested failure").to_string(),
        )),
        other => Err(MeshError::BadRequest(format!("unknown entry point: {other}"))),
    }
}
