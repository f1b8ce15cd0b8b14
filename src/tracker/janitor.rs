//! Background thread that periodically evicts stale peer records.

use crate::tracker::registry::Registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

pub fn spawn(
    registry: Arc<Registry>,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
    staleness_secs: u64,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(interval);
            let evicted = registry.evict_stale(staleness_secs);
            if !evicted.is_empty() {
                info!(count = evicted.len(), "janitor evicted stale peer records");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn sweep_evicts_only_past_the_given_staleness() {
        let registry = Arc::new(Registry::new());
        registry.register(crate::types::PeerId::generate(), Address::new("a", 1), 0.0);
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn(registry.clone(), shutdown.clone(), Duration::from_millis(5), 0);
        std::thread::sleep(Duration::from_millis(40));
        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert!(registry.snapshot_peers().is_empty());
    }
}
