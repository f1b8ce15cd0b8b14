//! Multi-peer chunked fetch: a large file is pulled chunk
//! by chunk, trying the next candidate peer whenever one fails, instead of
//! failing the whole transfer on a single peer's outage.

use crate::error::MeshError;
use crate::types::Address;

pub const DEFAULT_CHUNK_BYTES: u64 = 1024 * 1024;

/// Fetches `total_size` bytes of `filename` in `chunk_size`-byte pieces,
/// trying each address in `candidates` in order for every chunk until one
/// succeeds. Sequential: kept around for callers that want ordered
/// failover without spinning up threads (see [`assemble_parallel`] for the
/// network-facing path).
pub fn assemble<F>(
    candidates: &[Address],
    filename: &str,
    total_size: u64,
    chunk_size: u64,
    mut fetch_chunk: F,
) -> Result<Vec<u8>, MeshError>
where
    F: FnMut(&Address, &str, u64, u32) -> Result<Vec<u8>, MeshError>,
{
    if candidates.is_empty() {
        return Err(MeshError::NoPeerAvailable);
    }
    let mut out = Vec::with_capacity(total_size as usize);
    let mut offset = 0u64;
    while offset < total_size {
        let remaining = total_size - offset;
        let length = remaining.min(chunk_size) as u32;
        let mut last_err = None;
        let mut fetched = None;
        for candidate in candidates {
            match fetch_chunk(candidate, filename, offset, length) {
                Ok(bytes) => {
                    fetched = Some(bytes);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        match fetched {
            Some(bytes) => {
                out.extend_from_slice(&bytes);
                offset += length as u64;
            }
            None => return Err(last_err.unwrap_or(MeshError::NoPeerAvailable)),
        }
    }
    Ok(out)
}

/// Same contract as [`assemble`], but every chunk is requested on its own
/// thread, fetching the whole file in parallel across the candidate peer
/// set the way the rest of this crate models concurrency: one OS thread
/// per in-flight unit of work, joined before the result is used. A chunk
/// whose first candidate fails retries the remaining candidates on that
/// same thread before giving up.
pub fn assemble_parallel<F>(
    candidates: &[Address],
    filename: &str,
    total_size: u64,
    chunk_size: u64,
    fetch_chunk: F,
) -> Result<Vec<u8>, MeshError>
where
    F: Fn(&Address, &str, u64, u32) -> Result<Vec<u8>, MeshError> + Sync,
{
    if candidates.is_empty() {
        return Err(MeshError::NoPeerAvailable);
    }
    if total_size == 0 {
        return Ok(Vec::new());
    }
    let chunk_size = chunk_size.max(1);
    let num_chunks = ((total_size + chunk_size - 1) / chunk_size) as usize;

    let results: Vec<Result<Vec<u8>, MeshError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..num_chunks)
            .map(|i| {
                let offset = i as u64 * chunk_size;
                let length = (total_size - offset).min(chunk_size) as u32;
                let fetch_chunk = &fetch_chunk;
                scope.spawn(move || {
                    let mut last_err = None;
                    for candidate in candidates {
                        match fetch_chunk(candidate, filename, offset, length) {
                            Ok(bytes) => return Ok(bytes),
                            Err(e) => last_err = Some(e),
                        }
                    }
                    Err(last_err.unwrap_or(MeshError::NoPeerAvailable))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("chunk fetch thread panicked")).collect()
    });

    let mut out = Vec::with_capacity(total_size as usize);
    for chunk in results {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}
