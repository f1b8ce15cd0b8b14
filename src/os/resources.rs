//! Resource arbiter: banker's-algorithm admission plus wait-for-graph
//! deadlock detection.

use crate::error::MeshError;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

struct ResourceRecord {
    #[allow(dead_code)]
    kind: String,
    total: u64,
}

#[derive(Default)]
struct ProcessNeed {
    max_need: HashMap<String, u64>,
    allocated: HashMap<String, u64>,
}

#[derive(Default)]
struct Inner {
    resources: HashMap<String, ResourceRecord>,
    processes: HashMap<u64, ProcessNeed>,
    /// pid -> (resource, units) it was last denied on `EXCEEDS_AVAILABLE`,
    /// forming the wait-for graph's edges until satisfied or released.
    pending: HashMap<u64, (String, u64)>,
}

#[derive(Default)]
pub struct ResourceArbiter {
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResourceSnapshot {
    pub resource_count: usize,
    pub process_count: usize,
    pub pending_count: usize,
}

impl ResourceArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_resource(&self, name: &str, kind: &str, total_units: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .resources
            .insert(name.to_string(), ResourceRecord { kind: kind.to_string(), total: total_units });
    }

    pub fn register_process(&self, pid: u64, max_need: HashMap<String, u64>) {
        let mut inner = self.inner.lock().unwrap();
        inner.processes.insert(pid, ProcessNeed { max_need, allocated: HashMap::new() });
    }

    fn allocated_total(inner: &Inner, resource: &str) -> u64 {
        inner
            .processes
            .values()
            .map(|p| p.allocated.get(resource).copied().unwrap_or(0))
            .sum()
    }

    pub fn request(&self, pid: u64, resource: &str, units: u64) -> Result<(), MeshError> {
        if units == 0 {
            return Ok(());
        }
        let mut inner = self.inner.lock().unwrap();
        let total = inner
            .resources
            .get(resource)
            .map(|r| r.total)
            .ok_or_else(|| MeshError::UnknownResource(resource.to_string()))?;
        if !inner.processes.contains_key(&pid) {
            return Err(MeshError::UnknownPid(pid));
        }

        let allocated_so_far = inner
            .processes
            .get(&pid)
            .unwrap()
            .allocated
            .get(resource)
            .copied()
            .unwrap_or(0);
        let max_need = inner
            .processes
            .get(&pid)
            .unwrap()
            .max_need
            .get(resource)
            .copied()
            .unwrap_or(0);
        if allocated_so_far + units > max_need {
            return Err(MeshError::ExceedsNeed);
        }

        let currently_allocated = Self::allocated_total(&inner, resource);
        let available = total.saturating_sub(currently_allocated);
        if units > available {
            inner.pending.insert(pid, (resource.to_string(), units));
            return Err(MeshError::ExceedsAvailable);
        }

        // Tentatively allocate, then check the resulting state is safe.
        {
            let proc = inner.processes.get_mut(&pid).unwrap();
            *proc.allocated.entry(resource.to_string()).or_insert(0) += units;
        }
        if Self::is_safe(&inner) {
            inner.pending.remove(&pid);
            Ok(())
        } else {
            let proc = inner.processes.get_mut(&pid).unwrap();
            *proc.allocated.get_mut(resource).unwrap() -= units;
            Err(MeshError::Unsafe)
        }
    }

    /// Pure, lock-guarded counters for the status endpoint: no allocation
    /// or deadlock state is computed here, just table sizes.
    pub fn snapshot(&self) -> ResourceSnapshot {
        let inner = self.inner.lock().unwrap();
        ResourceSnapshot {
            resource_count: inner.resources.len(),
            process_count: inner.processes.len(),
            pending_count: inner.pending.len(),
        }
    }

    pub fn release(&self, pid: u64, resource: &str, units: u64) -> Result<(), MeshError> {
        if units == 0 {
            return Ok(());
        }
        let mut inner = self.inner.lock().unwrap();
        if !inner.resources.contains_key(resource) {
            return Err(MeshError::UnknownResource(resource.to_string()));
        }
        let proc = inner.processes.get_mut(&pid).ok_or(MeshError::UnknownPid(pid))?;
        let held = proc.allocated.get(resource).copied().unwrap_or(0);
        let released = held.min(units);
        if released > 0 {
            *proc.allocated.get_mut(resource).unwrap() -= released;
        }
        Ok(())
    }

    /// True if there exists a termination ordering of all registered
    /// processes under which each can acquire its remaining max-need from
    /// the available pool, resource by resource.
    fn is_safe(inner: &Inner) -> bool {
        let resource_names: Vec<&String> = inner.resources.keys().collect();
        let mut available: HashMap<&str, u64> = resource_names
            .iter()
            .map(|name| {
                let total = inner.resources[*name].total;
                let used = Self::allocated_total(inner, name);
                (name.as_str(), total.saturating_sub(used))
            })
            .collect();

        let mut finished: HashSet<u64> = HashSet::new();
        let mut progressed = true;
        while progressed && finished.len() < inner.processes.len() {
            progressed = false;
            for (&pid, need) in &inner.processes {
                if finished.contains(&pid) {
                    continue;
                }
                let can_finish = resource_names.iter().all(|name| {
                    let max_need = need.max_need.get(name.as_str()).copied().unwrap_or(0);
                    let allocated = need.allocated.get(name.as_str()).copied().unwrap_or(0);
                    let remaining_need = max_need.saturating_sub(allocated);
                    remaining_need <= *available.get(name.as_str()).unwrap_or(&0)
                });
                if can_finish {
                    for name in &resource_names {
                        let allocated = need.allocated.get(name.as_str()).copied().unwrap_or(0);
                        *available.get_mut(name.as_str()).unwrap() += allocated;
                    }
                    finished.insert(pid);
                    progressed = true;
                }
            }
        }
        finished.len() == inner.processes.len()
    }

    /// Union of every pid participating in a wait-for cycle.
    pub fn check_deadlock(&self) -> Vec<u64> {
        let inner = self.inner.lock().unwrap();

        // edge pid_a -> pid_b if pid_a is pending on a resource that pid_b
        // currently holds units of.
        let mut edges: HashMap<u64, Vec<u64>> = HashMap::new();
        for (&waiter, (resource, _)) in &inner.pending {
            let holders: Vec<u64> = inner
                .processes
                .iter()
                .filter(|(&pid, need)| {
                    pid != waiter && need.allocated.get(resource).copied().unwrap_or(0) > 0
                })
                .map(|(&pid, _)| pid)
                .collect();
            edges.insert(waiter, holders);
        }

        let mut in_cycle: HashSet<u64> = HashSet::new();
        let mut visited: HashSet<u64> = HashSet::new();
        for &start in edges.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut stack: Vec<u64> = Vec::new();
            Self::dfs_cycles(start, &edges, &mut visited, &mut stack, &mut in_cycle);
        }

        let mut result: Vec<u64> = in_cycle.into_iter().collect();
        result.sort_unstable();
        result
    }

    fn dfs_cycles(
        node: u64,
        edges: &HashMap<u64, Vec<u64>>,
        visited: &mut HashSet<u64>,
        stack: &mut Vec<u64>,
        in_cycle: &mut HashSet<u64>,
    ) {
        if let Some(pos) = stack.iter().position(|&n| n == node) {
            for &n in &stack[pos..] {
                in_cycle.insert(n);
            }
            return;
        }
        if visited.contains(&node) {
            return;
        }
        visited.insert(node);
        stack.push(node);
        if let Some(neighbors) = edges.get(&node) {
            for &next in neighbors {
                Self::dfs_cycles(next, edges, visited, stack, in_cycle);
            }
        }
        stack.pop();
    }
}
