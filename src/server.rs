//! Shared TCP accept loop: one thread per connection, bounded by a counting
//! semaphore so a burst of clients can't spawn unbounded threads.
//! Both the tracker and peer binaries use this with their own dispatch
//! function.

use crate::os::ipc::Semaphore;
use crate::types::Address;
use crate::wire::{read_frame, write_frame, Request, Response, DEFAULT_MAX_FRAME_BYTES};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

pub fn serve<D>(
    bind_address: &Address,
    max_connections: usize,
    dispatch: D,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<()>
where
    D: Fn(Request, Option<std::net::SocketAddr>) -> Response + Send + Sync + 'static,
{
    let listener = TcpListener::bind(bind_address.to_socket_string())?;
    listener.set_nonblocking(true)?;
    let dispatch = Arc::new(dispatch);
    let connection_slots = Arc::new(Semaphore::new(max_connections as i64));
    info!(address = %bind_address, max_connections, "listening");

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                let dispatch = dispatch.clone();
                let slots = connection_slots.clone();
                if slots
                    .wait(Some(std::time::Duration::from_millis(50)))
                    .is_err()
                {
                    warn!(%peer_addr, "connection cap reached, dropping");
                    continue;
                }
                std::thread::spawn(move || {
                    handle_connection(stream, peer_addr, &dispatch);
                    slots.signal();
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
        }
    }
    Ok(())
}

fn handle_connection<D>(
    mut stream: TcpStream,
    peer_addr: std::net::SocketAddr,
    dispatch: &D,
) where
    D: Fn(Request, Option<std::net::SocketAddr>) -> Response,
{
    stream.set_nonblocking(false).ok();
    let request: Request = match read_frame(&mut stream, DEFAULT_MAX_FRAME_BYTES) {
        Ok(req) => req,
        Err(e) => {
            debug!(%peer_addr, error = %e, "failed to read request frame");
            return;
        }
    };
    let response = dispatch(request, Some(peer_addr));
    if let Err(e) = write_frame(&mut stream, &response) {
        debug!(%peer_addr, error = %e, "failed to write response frame");
    }
}
