//! Wire message vocabulary.
//!
//! `Request` covers every `type` a connection can send; `Response` covers
//! everything a handler can send back, including the universal `error`
//! case. Both are tagged enums so the wire form is `{"type": "...", ...}`.

use crate::types::{Address, PeerId, TaskStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuTaskSpec {
    pub task_id: String,
    pub program: Vec<u8>,
    pub function: String,
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub confidential: bool,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub estimated_runtime_ms: Option<u64>,
    /// Round-Robin accounting input only; see `Task::quantum_ms`.
    #[serde(default)]
    pub quantum_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "REGISTER")]
    Register { identity: PeerId, address: Address, load: f64 },
    #[serde(rename = "UNREGISTER")]
    Unregister { identity: PeerId },
    #[serde(rename = "UPDATE_LOAD")]
    UpdateLoad { identity: PeerId, load: f64 },
    #[serde(rename = "REQUEST_BEST_PEER")]
    RequestBestPeer {
        identity: PeerId,
        #[serde(default)]
        exclude_self: bool,
    },
    #[serde(rename = "REGISTER_FILE")]
    RegisterFile { identity: PeerId, filename: String },
    #[serde(rename = "UNREGISTER_FILE")]
    UnregisterFile { identity: PeerId, filename: String },
    #[serde(rename = "FIND_FILE")]
    FindFile { filename: String },
    #[serde(rename = "REGISTER_OWNED_FILE")]
    RegisterOwnedFile {
        owner_id: PeerId,
        owner_address: Address,
        storage_identity: PeerId,
        storage_address: Address,
        filename: String,
    },
    #[serde(rename = "FIND_OWNED_FILE")]
    FindOwnedFile { filename: String, requester_id: PeerId },
    #[serde(rename = "DELETE_OWNED_FILE")]
    DeleteOwnedFile { filename: String, requester_id: PeerId },

    #[serde(rename = "CPU_TASK")]
    CpuTask(CpuTaskSpec),
    #[serde(rename = "BATCH_TASK")]
    BatchTask { tasks: Vec<CpuTaskSpec> },
    #[serde(rename = "CANCEL_TASK")]
    CancelTask { task_id: String },

    #[serde(rename = "SET_MEM")]
    SetMem { key: String, value: serde_json::Value },
    #[serde(rename = "GET_MEM")]
    GetMem { key: String },
    #[serde(rename = "DEL_MEM")]
    DelMem { key: String },
    #[serde(rename = "LIST_MEM")]
    ListMem,

    #[serde(rename = "PUT_FILE")]
    PutFile { filename: String, data: Vec<u8> },
    #[serde(rename = "GET_FILE")]
    GetFile { filename: String },
    #[serde(rename = "LIST_FILE")]
    ListFile,
    #[serde(rename = "DELETE_FILE")]
    DeleteFile { filename: String },
    #[serde(rename = "DOWNLOAD_FROM_NETWORK")]
    DownloadFromNetwork { filename: String },

    #[serde(rename = "UPLOAD_TO_PEER")]
    UploadToPeer {
        filename: String,
        ciphertext: Vec<u8>,
        owner_id: PeerId,
        owner_address: Address,
    },
    #[serde(rename = "UPLOAD_OWNED_FILE")]
    UploadOwnedFile { filename: String, data: Vec<u8> },
    #[serde(rename = "GET_OWNED_FILE")]
    GetOwnedFile { filename: String, owner_id: PeerId },
    #[serde(rename = "DELETE_OWNED_FILE_STORAGE")]
    DeleteOwnedFileStorage { filename: String, owner_id: PeerId },
    #[serde(rename = "DELETE_OWNED")]
    DeleteOwned { filename: String },
    #[serde(rename = "GET_CHUNK")]
    GetChunk { filename: String, offset: u64, length: u32 },
    #[serde(rename = "FILE_SIZE")]
    FileSize { filename: String },

    #[serde(rename = "CREATE_PROCESS")]
    CreateProcess {
        #[serde(default)]
        parent: Option<u64>,
        #[serde(default)]
        group: Option<u64>,
    },
    #[serde(rename = "TERMINATE_PROCESS")]
    TerminateProcess { pid: u64 },
    #[serde(rename = "PROCESS_TREE")]
    ProcessTree {
        #[serde(default)]
        pid: Option<u64>,
    },

    #[serde(rename = "REQUEST_RESOURCE")]
    RequestResource { pid: u64, resource: String, units: u64 },
    #[serde(rename = "RELEASE_RESOURCE")]
    ReleaseResource { pid: u64, resource: String, units: u64 },
    #[serde(rename = "CHECK_DEADLOCK")]
    CheckDeadlock,

    #[serde(rename = "ALLOC_MEM")]
    AllocMem { pid: u64, size: usize },
    #[serde(rename = "FREE_MEM")]
    FreeMem { pid: u64, offset: usize },
    #[serde(rename = "FRAG_INFO")]
    FragInfo,

    #[serde(rename = "CREATE_QUEUE")]
    CreateQueue { name: String, capacity: usize },
    #[serde(rename = "SEND_MSG")]
    SendMsg { queue: String, to: String, body: serde_json::Value },
    #[serde(rename = "RECV_MSG")]
    RecvMsg {
        queue: String,
        pid: u64,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    #[serde(rename = "CREATE_SEM")]
    CreateSem { name: String, initial: i64 },
    #[serde(rename = "WAIT_SEM")]
    WaitSem { name: String, pid: u64 },
    #[serde(rename = "SIGNAL_SEM")]
    SignalSem { name: String },

    #[serde(rename = "STATUS")]
    Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuResult {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cache_hit: bool,
    pub waiting_ms: u64,
    pub execution_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error { code: String, message: String },
    #[serde(rename = "PEER_ADDRESS")]
    PeerAddress { peer: Option<(PeerId, Address)> },
    #[serde(rename = "ADDRESSES")]
    Addresses { addresses: Vec<Address> },
    #[serde(rename = "VALUE")]
    Value { value: Option<serde_json::Value> },
    #[serde(rename = "KEYS")]
    Keys { keys: Vec<String> },
    #[serde(rename = "FILES")]
    Files { files: Vec<String> },
    #[serde(rename = "DATA")]
    Data { data: Vec<u8> },
    #[serde(rename = "CPU_RESULT")]
    CpuResult(CpuResult),
    #[serde(rename = "BATCH_RESULT")]
    BatchResult { results: Vec<Response> },
    #[serde(rename = "PID")]
    Pid { pid: u64 },
    #[serde(rename = "TREE")]
    Tree { tree: serde_json::Value },
    #[serde(rename = "CYCLE")]
    Cycle { pids: Vec<u64> },
    #[serde(rename = "OFFSET")]
    Offset { offset: usize },
    #[serde(rename = "SIZE")]
    Size { size: u64 },
    #[serde(rename = "FRAG_STATS")]
    FragStats { fragmentation_percent: f64, largest_free_block: usize, free_bytes: usize },
    #[serde(rename = "MESSAGE")]
    Message { body: serde_json::Value },
    #[serde(rename = "STATUS")]
    Status { snapshot: serde_json::Value },
}

impl Response {
    pub fn error(err: &crate::error::MeshError) -> Self {
        Response::Error { code: err.code().to_string(), message: err.to_string() }
    }
}
