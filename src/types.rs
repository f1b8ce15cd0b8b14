//! Shared data-model types used across subsystems.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch. Every timestamp in this crate is one of
/// these rather than a wall-clock type, matching how the wire protocol and
/// the persisted registry represent time.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// Stable 128-bit peer identity. Independent of
/// network address; generated once per peer and persisted to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub uuid::Uuid);

impl PeerId {
    pub fn generate() -> Self {
        PeerId(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s.trim()).ok().map(PeerId)
    }

    /// First `n` hex characters, used to name owned-storage subdirectories
    /// ("owner-address plus a short prefix of owner_id").
    pub fn short_prefix(&self, n: usize) -> String {
        let full = self.0.simple().to_string();
        full.chars().take(n).collect()
    }

    const LEGACY_MARKER: [u8; 2] = [0xfe, 0xed];

    /// Synthesizes a placeholder identity for an owned-file entry loaded
    /// from a pre-identity on-disk schema that only recorded addresses.
    /// Tagged with a fixed marker prefix so it's recognizable later and
    /// upgradeable once the real owner re-registers from that port.
    pub fn legacy_placeholder(port: u16) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..2].copy_from_slice(&Self::LEGACY_MARKER);
        bytes[14..16].copy_from_slice(&port.to_be_bytes());
        PeerId(uuid::Uuid::from_bytes(bytes))
    }

    /// The port a legacy placeholder was synthesized from, if this is one.
    pub fn legacy_port(&self) -> Option<u16> {
        let bytes = self.0.as_bytes();
        if bytes[0..2] == Self::LEGACY_MARKER && bytes[2..14].iter().all(|&b| b == 0) {
            Some(u16::from_be_bytes([bytes[14], bytes[15]]))
        } else {
            None
        }
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network address of a peer: host plus port, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Address { host: host.into(), port }
    }

    pub fn to_socket_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A submitted compute task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub program: Vec<u8>,
    pub entry_point: String,
    pub args: Vec<serde_json::Value>,
    pub priority: i64,
    pub confidential: bool,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub estimated_runtime_ms: u64,
    pub submitted_at: u64,
    /// Round-Robin accounting input only: execution is non-preemptive, so
    /// this never gates or slices dispatch. Ignored by every other
    /// discipline.
    pub quantum_ms: u64,
}

impl Task {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
    pub const DEFAULT_QUANTUM_MS: u64 = 100;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

/// Which side of a completed task a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskRole {
    Executor,
    Requester,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SchedulerDiscipline {
    Fcfs,
    Sjf,
    Priority,
    RoundRobin,
}

impl std::str::FromStr for SchedulerDiscipline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fcfs" => Ok(SchedulerDiscipline::Fcfs),
            "sjf" => Ok(SchedulerDiscipline::Sjf),
            "priority" => Ok(SchedulerDiscipline::Priority),
            "rr" | "round_robin" | "round-robin" => Ok(SchedulerDiscipline::RoundRobin),
            other => Err(format!("unknown scheduler discipline: {other}")),
        }
    }
}
