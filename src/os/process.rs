//! Process table.
//!
//! `TERMINATE` recurses into every child before marking the node itself
//! terminated — post-order, so no process is ever marked terminated while
//! one of its descendants is still alive.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProcessState {
    New,
    Ready,
    Running,
    Waiting,
    Terminated,
    Zombie,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Process {
    pub pid: u64,
    pub parent: Option<u64>,
    pub group: Option<u64>,
    pub state: ProcessState,
    pub task_ref: Option<String>,
    pub children: HashSet<u64>,
}

#[derive(Default)]
struct Inner {
    next_pid: u64,
    processes: HashMap<u64, Process>,
}

#[derive(Default)]
pub struct ProcessTable {
    inner: Mutex<Inner>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, task_ref: Option<String>, parent: Option<u64>, group: Option<u64>) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_pid += 1;
        let pid = inner.next_pid;
        let process = Process {
            pid,
            parent,
            group,
            state: ProcessState::New,
            task_ref,
            children: HashSet::new(),
        };
        inner.processes.insert(pid, process);
        if let Some(parent_pid) = parent {
            if let Some(parent_proc) = inner.processes.get_mut(&parent_pid) {
                parent_proc.children.insert(pid);
            }
        }
        pid
    }

    pub fn set_state(&self, pid: u64, state: ProcessState) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.processes.get_mut(&pid) {
            Some(p) => {
                p.state = state;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, pid: u64) -> Option<Process> {
        self.inner.lock().unwrap().processes.get(&pid).cloned()
    }

    pub fn exists(&self, pid: u64) -> bool {
        self.inner.lock().unwrap().processes.contains_key(&pid)
    }

    /// Post-order termination of `pid`'s entire subtree.
    pub fn terminate(&self, pid: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        Self::terminate_subtree(&mut inner.processes, pid)
    }

    fn terminate_subtree(processes: &mut HashMap<u64, Process>, pid: u64) -> bool {
        let children: Vec<u64> = match processes.get(&pid) {
            Some(p) => p.children.iter().copied().collect(),
            None => return false,
        };
        for child in children {
            Self::terminate_subtree(processes, child);
        }
        if let Some(p) = processes.get_mut(&pid) {
            p.state = ProcessState::Terminated;
        }
        true
    }

    /// Terminate every root process (one with no parent, or whose parent is
    /// outside the group) sharing `group_id`.
    pub fn terminate_group(&self, group_id: u64) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let roots: Vec<u64> = inner
            .processes
            .values()
            .filter(|p| p.group == Some(group_id))
            .filter(|p| {
                p.parent
                    .map(|parent_pid| {
                        inner.processes.get(&parent_pid).map(|pp| pp.group) != Some(Some(group_id))
                    })
                    .unwrap_or(true)
            })
            .map(|p| p.pid)
            .collect();
        let mut count = 0;
        for root in roots {
            if Self::terminate_subtree(&mut inner.processes, root) {
                count += 1;
            }
        }
        count
    }

    /// Full tree rooted at `pid`, or every root process if `pid` is `None`.
    pub fn tree(&self, pid: Option<u64>) -> Vec<Process> {
        let inner = self.inner.lock().unwrap();
        match pid {
            Some(root) => {
                let mut out = Vec::new();
                Self::collect_subtree(&inner.processes, root, &mut out);
                out
            }
            None => inner
                .processes
                .values()
                .filter(|p| p.parent.is_none())
                .cloned()
                .collect(),
        }
    }

    fn collect_subtree(processes: &HashMap<u64, Process>, pid: u64, out: &mut Vec<Process>) {
        if let Some(p) = processes.get(&pid) {
            out.push(p.clone());
            for child in p.children.iter().copied().collect::<Vec<_>>() {
                Self::collect_subtree(processes, child, out);
            }
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().processes.len()
    }

    pub fn count_by_state(&self, state: ProcessState) -> usize {
        self.inner
            .lock()
            .unwrap()
            .processes
            .values()
            .filter(|p| p.state == state)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_cascades_to_descendants_post_order() {
        let table = ProcessTable::new();
        let root = table.create(None, None, None);
        let child = table.create(None, Some(root), None);
        let grandchild = table.create(None, Some(child), None);

        assert!(table.terminate(root));

        assert_eq!(table.get(root).unwrap().state, ProcessState::Terminated);
        assert_eq!(table.get(child).unwrap().state, ProcessState::Terminated);
        assert_eq!(table.get(grandchild).unwrap().state, ProcessState::Terminated);
    }

    #[test]
    fn terminate_unknown_pid_is_a_no_op() {
        let table = ProcessTable::new();
        assert!(!table.terminate(999));
    }

    #[test]
    fn terminate_group_only_terminates_roots_of_the_group() {
        let table = ProcessTable::new();
        let root = table.create(None, None, Some(1));
        let child = table.create(None, Some(root), Some(1));
        let other = table.create(None, None, Some(2));

        let terminated = table.terminate_group(1);

        assert_eq!(terminated, 1);
        assert_eq!(table.get(root).unwrap().state, ProcessState::Terminated);
        assert_eq!(table.get(child).unwrap().state, ProcessState::Terminated);
        assert_eq!(table.get(other).unwrap().state, ProcessState::New);
    }
}
