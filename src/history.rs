//! Bounded execution history and on-demand aggregate stats.

use crate::types::{TaskRole, TaskStatus};
use std::collections::VecDeque;
use std::sync::Mutex;

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HistoryEntry {
    pub task_id: String,
    pub role: TaskRole,
    pub status: TaskStatus,
    pub waiting_ms: u64,
    pub execution_ms: u64,
    pub cache_hit: bool,
    pub recorded_at: u64,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct HistoryStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
    pub cache_hits: usize,
    pub avg_waiting_ms: f64,
    pub avg_execution_ms: f64,
}

/// Fixed-capacity ring buffer: once full, the oldest entry is dropped to
/// make room for the newest. Stats are always computed over exactly what's
/// currently retained, never a lifetime total.
pub struct History {
    capacity: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    pub fn record(&self, entry: HistoryEntry) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.lock().unwrap();
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> HistoryStats {
        let entries = self.entries.lock().unwrap();
        let total = entries.len();
        if total == 0 {
            return HistoryStats::default();
        }
        let mut stats = HistoryStats { total, ..Default::default() };
        let mut waiting_sum = 0u64;
        let mut execution_sum = 0u64;
        for entry in entries.iter() {
            match entry.status {
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
                TaskStatus::TimedOut => stats.timed_out += 1,
                TaskStatus::Queued | TaskStatus::Running => {}
            }
            if entry.cache_hit {
                stats.cache_hits += 1;
            }
            waiting_sum += entry.waiting_ms;
            execution_sum += entry.execution_ms;
        }
        stats.avg_waiting_ms = waiting_sum as f64 / total as f64;
        stats.avg_execution_ms = execution_sum as f64 / total as f64;
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
