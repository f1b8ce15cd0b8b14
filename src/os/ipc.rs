//! IPC primitives: bounded message queues and counting semaphores.
//! Both block the calling thread via `Condvar` rather than polling.

use crate::error::MeshError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// `to` is either a pid (as a string) or `"*"` for broadcast.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueueMessage {
    pub to: String,
    pub payload: serde_json::Value,
}

pub const BROADCAST: &str = "*";

struct QueueState {
    capacity: usize,
    messages: VecDeque<QueueMessage>,
}

/// A single bounded FIFO mailbox. `send` blocks while full, `recv` blocks
/// while empty, both up to an optional timeout.
pub struct MessageQueue {
    state: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState { capacity, messages: VecDeque::new() }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn send(&self, message: QueueMessage, timeout: Option<Duration>) -> Result<(), MeshError> {
        let mut state = self.state.lock().unwrap();
        let deadline = timeout.map(|d| Instant::now() + d);
        while state.messages.len() >= state.capacity {
            state = match deadline {
                None => self.not_full.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(MeshError::TimedOut);
                    }
                    let (guard, result) =
                        self.not_full.wait_timeout(state, deadline - now).unwrap();
                    if result.timed_out() && guard.messages.len() >= guard.capacity {
                        return Err(MeshError::TimedOut);
                    }
                    guard
                }
            };
        }
        state.messages.push_back(message);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Returns the oldest message addressed to `pid` or to broadcast,
    /// regardless of its position in the queue — an unrelated message
    /// ahead of it never blocks delivery.
    pub fn recv(&self, pid: u64, timeout: Option<Duration>) -> Result<QueueMessage, MeshError> {
        let mut state = self.state.lock().unwrap();
        let deadline = timeout.map(|d| Instant::now() + d);
        let target = pid.to_string();
        loop {
            if let Some(index) = state.messages.iter().position(|m| m.to == target || m.to == BROADCAST) {
                let message = state.messages.remove(index).unwrap();
                self.not_full.notify_one();
                return Ok(message);
            }
            state = match deadline {
                None => self.not_empty.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(MeshError::TimedOut);
                    }
                    let (guard, _) = self.not_empty.wait_timeout(state, deadline - now).unwrap();
                    guard
                }
            };
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct SemaphoreState {
    permits: i64,
}

/// Counting semaphore. Waiters are released FIFO via a single condvar;
/// there is no priority inheritance.
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(initial: i64) -> Self {
        Self { state: Mutex::new(SemaphoreState { permits: initial }), available: Condvar::new() }
    }

    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), MeshError> {
        let mut state = self.state.lock().unwrap();
        let deadline = timeout.map(|d| Instant::now() + d);
        while state.permits <= 0 {
            state = match deadline {
                None => self.available.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(MeshError::TimedOut);
                    }
                    let (guard, result) =
                        self.available.wait_timeout(state, deadline - now).unwrap();
                    if result.timed_out() && guard.permits <= 0 {
                        return Err(MeshError::TimedOut);
                    }
                    guard
                }
            };
        }
        state.permits -= 1;
        Ok(())
    }

    pub fn signal(&self) {
        let mut state = self.state.lock().unwrap();
        state.permits += 1;
        self.available.notify_one();
    }

    pub fn available_permits(&self) -> i64 {
        self.state.lock().unwrap().permits
    }
}

/// Named registries so a peer server can create queues/semaphores by name
/// on demand and share them across request-handler threads.
#[derive(Default)]
pub struct IpcRegistry {
    queues: Mutex<HashMap<String, std::sync::Arc<MessageQueue>>>,
    semaphores: Mutex<HashMap<String, std::sync::Arc<Semaphore>>>,
}

impl IpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_queue(&self, name: &str, capacity: usize) -> std::sync::Arc<MessageQueue> {
        self.queues
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(MessageQueue::new(capacity)))
            .clone()
    }

    pub fn queue(&self, name: &str) -> Option<std::sync::Arc<MessageQueue>> {
        self.queues.lock().unwrap().get(name).cloned()
    }

    pub fn create_semaphore(&self, name: &str, initial: i64) -> std::sync::Arc<Semaphore> {
        self.semaphores
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(Semaphore::new(initial)))
            .clone()
    }

    pub fn semaphore(&self, name: &str) -> Option<std::sync::Arc<Semaphore>> {
        self.semaphores.lock().unwrap().get(name).cloned()
    }

    pub fn stats(&self) -> IpcStats {
        IpcStats {
            queue_count: self.queues.lock().unwrap().len(),
            semaphore_count: self.semaphores.lock().unwrap().len(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IpcStats {
    pub queue_count: usize,
    pub semaphore_count: usize,
}
