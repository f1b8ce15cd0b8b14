//! Compute task scheduler: FCFS, SJF, Priority, and Round-Robin dispatch
//! disciplines, each non-preemptive with no priority aging. A single
//! dispatch thread drains the ready list and hands tasks to an executor
//! callback.
//!
//! Round-Robin is plain FIFO at the dispatch level: execution is
//! non-preemptive, so there is nothing to slice or interleave between
//! submitters. Each task still carries its own `quantum_ms` (see
//! `Task::quantum_ms`), but that value is accounting input only — it never
//! changes which task is popped next.

use crate::types::{SchedulerDiscipline, Task};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct Submission {
    task: Task,
    submitter: String,
    enqueued_at: Instant,
}

#[derive(Default)]
struct Inner {
    fifo: VecDeque<Submission>,
    avg_wait_ms: f64,
    dispatched: u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulerStats {
    pub discipline: SchedulerDiscipline,
    pub ready: usize,
    pub dispatched: u64,
    pub avg_wait_ms: f64,
}

/// Smoothing factor for the wait-time moving average; weights the most
/// recent dispatch at 20%.
const WAIT_AVG_ALPHA: f64 = 0.2;

pub struct Scheduler {
    discipline: SchedulerDiscipline,
    inner: Mutex<Inner>,
    not_empty: Condvar,
    shutdown: AtomicBool,
}

impl Scheduler {
    pub fn new(discipline: SchedulerDiscipline) -> Self {
        Self {
            discipline,
            inner: Mutex::new(Inner::default()),
            not_empty: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn discipline(&self) -> SchedulerDiscipline {
        self.discipline
    }

    pub fn enqueue(&self, task: Task, submitter: String) {
        let submission = Submission { task, submitter, enqueued_at: Instant::now() };
        let mut inner = self.inner.lock().unwrap();
        inner.fifo.push_back(submission);
        self.not_empty.notify_one();
    }

    fn pop_locked(&self, inner: &mut Inner) -> Option<(Task, String, Duration)> {
        let submission = match self.discipline {
            // Round-Robin is dispatched identically to FCFS: non-preemptive
            // execution leaves nothing for a quantum to slice, so each
            // task's `quantum_ms` is carried through purely for accounting.
            SchedulerDiscipline::Fcfs | SchedulerDiscipline::RoundRobin => inner.fifo.pop_front(),
            SchedulerDiscipline::Sjf => {
                let index = inner
                    .fifo
                    .iter()
                    .enumerate()
                    .min_by_key(|(i, s)| (s.task.estimated_runtime_ms, *i))
                    .map(|(i, _)| i)?;
                inner.fifo.remove(index)
            }
            SchedulerDiscipline::Priority => {
                let index = inner
                    .fifo
                    .iter()
                    .enumerate()
                    .max_by_key(|(i, s)| (s.task.priority, std::cmp::Reverse(*i)))
                    .map(|(i, _)| i)?;
                inner.fifo.remove(index)
            }
        }?;

        let waited = submission.enqueued_at.elapsed();
        let waited_ms = waited.as_secs_f64() * 1000.0;
        inner.avg_wait_ms = if inner.dispatched == 0 {
            waited_ms
        } else {
            inner.avg_wait_ms * (1.0 - WAIT_AVG_ALPHA) + waited_ms * WAIT_AVG_ALPHA
        };
        inner.dispatched += 1;
        Some((submission.task, submission.submitter, waited))
    }

    /// Blocks until a task is ready or the scheduler is shut down.
    pub fn pop_blocking(&self) -> Option<(Task, String, Duration)> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(result) = self.pop_locked(&mut inner) {
                return Some(result);
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            let (guard, _) =
                self.not_empty.wait_timeout(inner, Duration::from_millis(200)).unwrap();
            inner = guard;
        }
    }

    pub fn ready_len(&self) -> usize {
        self.inner.lock().unwrap().fifo.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let inner = self.inner.lock().unwrap();
        SchedulerStats {
            discipline: self.discipline,
            ready: inner.fifo.len(),
            dispatched: inner.dispatched,
            avg_wait_ms: inner.avg_wait_ms,
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.not_empty.notify_all();
    }
}

/// Spawns the single dispatch thread that repeatedly pulls the next ready
/// task and hands it to `executor`. Stops once `scheduler.shutdown()` is
/// called and the ready list has drained.
pub fn spawn_dispatch_thread<F>(scheduler: Arc<Scheduler>, executor: F) -> JoinHandle<()>
where
    F: Fn(Task, String) + Send + 'static,
{
    std::thread::spawn(move || {
        while let Some((task, submitter, _waited)) = scheduler.pop_blocking() {
            executor(task, submitter);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, priority: i64, estimated_runtime_ms: u64) -> Task {
        Task {
            task_id: id.to_string(),
            program: vec![],
            entry_point: "main".to_string(),
            args: vec![],
            priority,
            confidential: false,
            max_retries: 0,
            timeout_secs: 60,
            estimated_runtime_ms,
            submitted_at: 0,
            quantum_ms: Task::DEFAULT_QUANTUM_MS,
        }
    }

    #[test]
    fn fcfs_dispatches_in_arrival_order() {
        let scheduler = Scheduler::new(SchedulerDiscipline::Fcfs);
        scheduler.enqueue(task("a", 0, 0), "p".to_string());
        scheduler.enqueue(task("b", 0, 0), "p".to_string());
        let (first, _, _) = scheduler.pop_blocking().unwrap();
        let (second, _, _) = scheduler.pop_blocking().unwrap();
        assert_eq!(first.task_id, "a");
        assert_eq!(second.task_id, "b");
    }

    #[test]
    fn sjf_dispatches_the_shortest_estimated_runtime_first() {
        let scheduler = Scheduler::new(SchedulerDiscipline::Sjf);
        scheduler.enqueue(task("long", 0, 500), "p".to_string());
        scheduler.enqueue(task("short", 0, 10), "p".to_string());
        let (first, _, _) = scheduler.pop_blocking().unwrap();
        assert_eq!(first.task_id, "short");
    }

    #[test]
    fn priority_dispatches_highest_priority_first_with_no_aging() {
        let scheduler = Scheduler::new(SchedulerDiscipline::Priority);
        for _ in 0..100 {
            scheduler.enqueue(task("low", 0, 0), "p".to_string());
        }
        scheduler.enqueue(task("high", 100, 0), "q".to_string());
        let (first, _, _) = scheduler.pop_blocking().unwrap();
        assert_eq!(first.task_id, "high");
    }

    #[test]
    fn round_robin_is_fifo_regardless_of_submitter() {
        let scheduler = Scheduler::new(SchedulerDiscipline::RoundRobin);
        scheduler.enqueue(task("a1", 0, 0), "alice".to_string());
        scheduler.enqueue(task("b1", 0, 0), "bob".to_string());
        scheduler.enqueue(task("a2", 0, 0), "alice".to_string());

        let (first, _, _) = scheduler.pop_blocking().unwrap();
        let (second, _, _) = scheduler.pop_blocking().unwrap();
        let (third, _, _) = scheduler.pop_blocking().unwrap();
        assert_eq!(first.task_id, "a1");
        assert_eq!(second.task_id, "b1");
        assert_eq!(third.task_id, "a2");
    }

    #[test]
    fn round_robin_quantum_is_carried_but_never_affects_dispatch_order() {
        let scheduler = Scheduler::new(SchedulerDiscipline::RoundRobin);
        let mut short_quantum = task("a1", 0, 0);
        short_quantum.quantum_ms = 10;
        let mut long_quantum = task("b1", 0, 0);
        long_quantum.quantum_ms = 10_000;
        scheduler.enqueue(short_quantum, "alice".to_string());
        scheduler.enqueue(long_quantum, "bob".to_string());

        let (first, _, _) = scheduler.pop_blocking().unwrap();
        assert_eq!(first.task_id, "a1");
    }

    #[test]
    fn shutdown_unblocks_a_waiting_pop() {
        let scheduler = Arc::new(Scheduler::new(SchedulerDiscipline::Fcfs));
        let handle = {
            let scheduler = scheduler.clone();
            std::thread::spawn(move || scheduler.pop_blocking())
        };
        std::thread::sleep(Duration::from_millis(50));
        scheduler.shutdown();
        assert!(handle.join().unwrap().is_none());
    }
}
