//! Outbound request client used to forward work to a tracker-selected peer,
//! with exponential backoff between retries.

use crate::error::MeshError;
use crate::types::Address;
use crate::wire::{read_frame, write_frame, Request, Response, DEFAULT_MAX_FRAME_BYTES};
use rand::Rng;
use std::net::TcpStream;
use std::time::Duration;
use tracing::{debug, warn};

const INITIAL_RETRY_DELAY_MS: u64 = 200;
const MAX_RETRY_DELAY_MS: u64 = 5_000;
const RETRY_BACKOFF_FACTOR: u64 = 2;

/// Tracks backoff state across attempts for a single logical send, mirroring
/// the connection layer's own retry bookkeeping.
struct RetryState {
    delay_ms: u64,
}

impl RetryState {
    fn new() -> Self {
        Self { delay_ms: INITIAL_RETRY_DELAY_MS }
    }

    fn record_failure(&mut self) {
        self.delay_ms = (self.delay_ms * RETRY_BACKOFF_FACTOR).min(MAX_RETRY_DELAY_MS);
    }
}

/// Sends one request over a fresh TCP connection and reads one response.
pub fn call(address: &Address, request: &Request) -> Result<Response, MeshError> {
    let mut stream = TcpStream::connect(address.to_socket_string())
        .map_err(|e| MeshError::Transport(e.to_string()))?;
    stream
        .set_nodelay(true)
        .map_err(|e| MeshError::Transport(e.to_string()))?;
    write_frame(&mut stream, request).map_err(|e| MeshError::Transport(e.to_string()))?;
    read_frame(&mut stream, DEFAULT_MAX_FRAME_BYTES).map_err(|e| MeshError::Transport(e.to_string()))
}

/// Calls `address`, retrying transport failures up to `max_retries` times
/// with exponential backoff. Non-transport errors (the peer's own `ERROR`
/// response) are returned immediately without retrying.
pub fn call_with_retry(
    address: &Address,
    request: &Request,
    max_retries: u32,
) -> Result<Response, MeshError> {
    let mut retry = RetryState::new();
    let mut last_err = None;
    for attempt in 0..=max_retries {
        match call(address, request) {
            Ok(response) => return Ok(response),
            Err(MeshError::Transport(msg)) => {
                warn!(attempt, %address, %msg, "dispatch attempt failed");
                last_err = Some(MeshError::Transport(msg));
                if attempt < max_retries {
                    let jittered = rand::thread_rng().gen_range(0..=retry.delay_ms / 2);
                    std::thread::sleep(Duration::from_millis(retry.delay_ms + jittered));
                    retry.record_failure();
                }
            }
            Err(other) => return Err(other),
        }
    }
    debug!(%address, max_retries, "dispatch exhausted retries");
    Err(last_err.unwrap_or(MeshError::NoPeerAvailable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{read_frame, write_frame};
    use std::net::TcpListener;

    #[test]
    fn call_round_trips_a_request_and_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _req: Request = read_frame(&mut stream, DEFAULT_MAX_FRAME_BYTES).unwrap();
            write_frame(&mut stream, &Response::Ok).unwrap();
        });

        let address = Address::new(addr.ip().to_string(), addr.port());
        let response = call(&address, &Request::Status).unwrap();
        assert!(matches!(response, Response::Ok));
        server.join().unwrap();
    }

    #[test]
    fn call_against_a_closed_port_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // nothing listening now
        let address = Address::new(addr.ip().to_string(), addr.port());
        let result = call(&address, &Request::Status);
        assert!(matches!(result, Err(MeshError::Transport(_))));
    }

    #[test]
    fn call_with_retry_gives_up_after_max_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let address = Address::new(addr.ip().to_string(), addr.port());
        let result = call_with_retry(&address, &Request::Status, 1);
        assert!(matches!(result, Err(MeshError::Transport(_))));
    }
}
