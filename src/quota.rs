//! Per-identity quota enforcement: a sliding-window submission rate limit
//! plus cumulative key/byte ceilings.

use crate::error::MeshError;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct QuotaPolicy {
    pub max_submissions_per_window: usize,
    pub window: Duration,
    pub max_keys: u64,
    pub max_bytes: u64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            max_submissions_per_window: 100,
            window: Duration::from_secs(3600),
            max_keys: 10_000,
            max_bytes: 1024 * 1024 * 1024,
        }
    }
}

#[derive(Default)]
struct QuotaState {
    submission_times: VecDeque<Instant>,
    key_count: u64,
    byte_count: u64,
}

pub struct QuotaLedger {
    policy: QuotaPolicy,
    states: Mutex<HashMap<String, QuotaState>>,
}

impl QuotaLedger {
    pub fn new(policy: QuotaPolicy) -> Self {
        Self { policy, states: Mutex::new(HashMap::new()) }
    }

    fn prune(state: &mut QuotaState, window: Duration) {
        let cutoff = Instant::now().checked_sub(window).unwrap_or_else(Instant::now);
        while matches!(state.submission_times.front(), Some(t) if *t < cutoff) {
            state.submission_times.pop_front();
        }
    }

    /// Records one submission for `identity`, rejecting it if that would
    /// exceed the sliding-window rate limit.
    pub fn record_submission(&self, identity: &str) -> Result<(), MeshError> {
        let mut states = self.states.lock().unwrap();
        let state = states.entry(identity.to_string()).or_default();
        Self::prune(state, self.policy.window);
        if state.submission_times.len() >= self.policy.max_submissions_per_window {
            return Err(MeshError::QuotaExceeded);
        }
        state.submission_times.push_back(Instant::now());
        Ok(())
    }

    /// Reserves `bytes` under one more stored key for `identity`, rejecting
    /// if either cumulative ceiling would be exceeded.
    pub fn reserve(&self, identity: &str, bytes: u64) -> Result<(), MeshError> {
        let mut states = self.states.lock().unwrap();
        let state = states.entry(identity.to_string()).or_default();
        if state.key_count + 1 > self.policy.max_keys || state.byte_count + bytes > self.policy.max_bytes
        {
            return Err(MeshError::QuotaExceeded);
        }
        state.key_count += 1;
        state.byte_count += bytes;
        Ok(())
    }

    pub fn release(&self, identity: &str, bytes: u64) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(identity) {
            state.key_count = state.key_count.saturating_sub(1);
            state.byte_count = state.byte_count.saturating_sub(bytes);
        }
    }

    pub fn usage(&self, identity: &str) -> (u64, u64) {
        let states = self.states.lock().unwrap();
        states.get(identity).map(|s| (s.key_count, s.byte_count)).unwrap_or((0, 0))
    }

    pub fn stats(&self) -> QuotaStats {
        let states = self.states.lock().unwrap();
        QuotaStats {
            tracked_identities: states.len(),
            max_submissions_per_window: self.policy.max_submissions_per_window,
            max_keys: self.policy.max_keys,
            max_bytes: self.policy.max_bytes,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuotaStats {
    pub tracked_identities: usize,
    pub max_submissions_per_window: usize,
    pub max_keys: u64,
    pub max_bytes: u64,
}
