//! End-to-end ownership lifecycle tests: a real tracker plus real peers,
//! exercising upload, owner-verified download, and owner migration.
//!
//! Run with: cargo test --test ownership_protocol_test

use meshd::os::allocator::AllocStrategy;
use meshd::peer_server::PeerConfig;
use meshd::quota::QuotaPolicy;
use meshd::tracker::TrackerService;
use meshd::wire::{Request, Response};
use meshd::{dispatch_client, ownership, server, Address, PeerId, PeerServer, SchedulerDiscipline};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn spawn_tracker() -> Address {
    let data_dir = std::env::temp_dir().join(format!("meshd-ownership-tracker-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&data_dir).unwrap();
    let service = Arc::new(TrackerService::new(data_dir.join("owned_files.json")).unwrap());

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let address = Address::new("127.0.0.1", port);

    let shutdown = Arc::new(AtomicBool::new(false));
    let bound = address.clone();
    std::thread::spawn(move || {
        let dispatch = move |request, _peer_addr| service.dispatch(request);
        server::serve(&bound, 16, dispatch, shutdown).unwrap();
    });
    std::thread::sleep(std::time::Duration::from_millis(80));
    address
}

fn spawn_peer(tracker: &Address) -> (Address, PeerId) {
    let identity = PeerId::generate();
    let data_dir = std::env::temp_dir().join(format!("meshd-ownership-peer-{}", uuid::Uuid::new_v4()));
    let config = PeerConfig {
        identity,
        address: Address::new("127.0.0.1", 0),
        tracker: tracker.clone(),
        local_files_dir: data_dir.join("files"),
        owned_files_dir: data_dir.join("owned"),
        memory_bytes: 4096,
        alloc_strategy: AllocStrategy::FirstFit,
        scheduler_discipline: SchedulerDiscipline::Fcfs,
        quota_policy: QuotaPolicy::default(),
    };
    let peer = PeerServer::new(config).unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let address = Address::new("127.0.0.1", port);

    dispatch_client::call(tracker, &Request::Register { identity, address: address.clone(), load: 0.0 }).unwrap();

    let shutdown = Arc::new(AtomicBool::new(false));
    let bound = address.clone();
    std::thread::spawn(move || {
        let dispatch = move |request, peer_addr| peer.dispatch(request, peer_addr);
        server::serve(&bound, 16, dispatch, shutdown).unwrap();
    });
    std::thread::sleep(std::time::Duration::from_millis(80));
    (address, identity)
}

#[test]
fn uploaded_file_is_discoverable_through_the_tracker_and_downloads_cleartext() {
    let tracker = spawn_tracker();
    let (owner_addr, owner_id) = spawn_peer(&tracker);
    let (storage_addr, _storage_id) = spawn_peer(&tracker);

    let plaintext = b"top secret mesh payload".to_vec();
    let ciphertext = ownership::crypto::transform(&plaintext, &owner_addr, "secret.bin");

    let reply = dispatch_client::call(
        &storage_addr,
        &Request::UploadToPeer {
            filename: "secret.bin".to_string(),
            ciphertext,
            owner_id,
            owner_address: owner_addr.clone(),
        },
    )
    .unwrap();
    assert!(matches!(reply, Response::Ok));

    // The storage peer self-registered with the tracker, so the owner can
    // now discover and fetch its own file without knowing who holds it.
    let reply = dispatch_client::call(
        &tracker,
        &Request::FindOwnedFile { filename: "secret.bin".to_string(), requester_id: owner_id },
    )
    .unwrap();
    assert!(matches!(reply, Response::Tree { .. }));

    let reply =
        dispatch_client::call(&storage_addr, &Request::GetOwnedFile { filename: "secret.bin".to_string(), owner_id })
            .unwrap();
    match reply {
        Response::Data { data } => assert_eq!(data, ownership::crypto::transform(&plaintext, &owner_addr, "secret.bin")),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn owner_initiated_upload_then_download_round_trips_through_the_owner_peer() {
    let tracker = spawn_tracker();
    let (owner_addr, owner_id) = spawn_peer(&tracker);
    let (_storage_addr, _storage_id) = spawn_peer(&tracker);

    let plaintext = b"owner-driven upload".to_vec();
    let reply = dispatch_client::call(
        &owner_addr,
        &Request::UploadOwnedFile { filename: "mine.bin".to_string(), data: plaintext.clone() },
    )
    .unwrap();
    assert!(matches!(reply, Response::Ok));

    let reply =
        dispatch_client::call(&owner_addr, &Request::DownloadFromNetwork { filename: "mine.bin".to_string() })
            .unwrap();
    assert!(matches!(reply, Response::Data { data } if data == plaintext));
    let _ = owner_id;
}

#[test]
fn owner_initiated_delete_removes_the_file_from_storage_and_the_tracker() {
    let tracker = spawn_tracker();
    let (owner_addr, owner_id) = spawn_peer(&tracker);
    let (storage_addr, _storage_id) = spawn_peer(&tracker);

    dispatch_client::call(
        &owner_addr,
        &Request::UploadOwnedFile { filename: "bye.bin".to_string(), data: b"gone soon".to_vec() },
    )
    .unwrap();

    let reply = dispatch_client::call(&owner_addr, &Request::DeleteOwned { filename: "bye.bin".to_string() }).unwrap();
    assert!(matches!(reply, Response::Ok));

    let reply = dispatch_client::call(
        &tracker,
        &Request::FindOwnedFile { filename: "bye.bin".to_string(), requester_id: owner_id },
    )
    .unwrap();
    assert!(matches!(reply, Response::Error { code, .. } if code == "UNKNOWN_FILE"));

    let reply =
        dispatch_client::call(&storage_addr, &Request::GetOwnedFile { filename: "bye.bin".to_string(), owner_id })
            .unwrap();
    // The storage peer's own re-verification with the tracker now also
    // comes back UNKNOWN_FILE since the tracker's entry is gone.
    assert!(matches!(reply, Response::Error { code, .. } if code == "UNKNOWN_FILE"));
}

#[test]
fn a_non_owner_requesting_the_ciphertext_is_rejected_with_not_owner() {
    let tracker = spawn_tracker();
    let (owner_addr, owner_id) = spawn_peer(&tracker);
    let (storage_addr, _storage_id) = spawn_peer(&tracker);

    let ciphertext = ownership::crypto::transform(b"classified", &owner_addr, "mine.bin");
    dispatch_client::call(
        &storage_addr,
        &Request::UploadToPeer {
            filename: "mine.bin".to_string(),
            ciphertext,
            owner_id,
            owner_address: owner_addr.clone(),
        },
    )
    .unwrap();

    let stranger = PeerId::generate();
    let reply = dispatch_client::call(
        &storage_addr,
        &Request::GetOwnedFile { filename: "mine.bin".to_string(), owner_id: stranger },
    )
    .unwrap();
    assert!(matches!(reply, Response::Error { code, .. } if code == "NOT_OWNER"));
}
