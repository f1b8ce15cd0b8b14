//! Peer-side heartbeat thread: periodically reports load
//! to the tracker, and re-`REGISTER`s (same identity, new address) if this
//! peer's own advertised address has changed since the last beat.

use crate::dispatch_client::call_with_retry;
use crate::types::{Address, PeerId};
use crate::wire::{Request, Response};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

pub fn spawn<F>(
    tracker: Address,
    identity: PeerId,
    current_address: Arc<Mutex<Address>>,
    load: F,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
) -> JoinHandle<()>
where
    F: Fn() -> f64 + Send + 'static,
{
    std::thread::spawn(move || {
        let mut last_sent_address = current_address.lock().unwrap().clone();
        while !shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(interval);
            let address_now = current_address.lock().unwrap().clone();
            let request = if address_now != last_sent_address {
                Request::Register { identity, address: address_now.clone(), load: load() }
            } else {
                Request::UpdateLoad { identity, load: load() }
            };
            match call_with_retry(&tracker, &request, 2) {
                Ok(Response::Ok) => {
                    last_sent_address = address_now;
                    debug!("heartbeat delivered");
                }
                Ok(other) => warn!(?other, "unexpected heartbeat response"),
                Err(e) => warn!(error = %e, "heartbeat failed"),
            }
        }
    })
}
