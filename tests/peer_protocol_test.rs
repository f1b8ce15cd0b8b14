//! End-to-end peer wire protocol tests: a real `PeerServer` behind a real
//! TCP listener, driven only through `dispatch_client`. No tracker is
//! started — only requests that don't need one are exercised here.
//!
//! Run with: cargo test --test peer_protocol_test

use meshd::os::allocator::AllocStrategy;
use meshd::peer_server::PeerConfig;
use meshd::quota::QuotaPolicy;
use meshd::wire::{CpuTaskSpec, Request, Response};
use meshd::{dispatch_client, server, Address, PeerId, PeerServer, SchedulerDiscipline, TaskStatus};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn spawn_peer() -> Address {
    let data_dir = std::env::temp_dir().join(format!("meshd-peer-test-{}", uuid::Uuid::new_v4()));
    let config = PeerConfig {
        identity: PeerId::generate(),
        address: Address::new("127.0.0.1", 0),
        tracker: Address::new("127.0.0.1", 1),
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

    let shutdown = Arc::new(AtomicBool::new(false));
    let bound = address.clone();
    std::thread::spawn(move || {
        let dispatch = move |request, peer_addr| peer.dispatch(request, peer_addr);
        server::serve(&bound, 16, dispatch, shutdown).unwrap();
    });
    std::thread::sleep(std::time::Duration::from_millis(80));
    address
}

fn task(entry_point: &str, args: Vec<serde_json::Value>) -> CpuTaskSpec {
    CpuTaskSpec {
        task_id: uuid::Uuid::new_v4().to_string(),
        program: vec![],
        function: entry_point.to_string(),
        args,
        confidential: false,
        priority: 0,
        max_retries: 0,
        timeout: Some(5),
        estimated_runtime_ms: None,
    }
}

// =============================================================================
// MEMORY
// =============================================================================

#[test]
fn set_get_del_mem_round_trips_over_the_wire() {
    let peer = spawn_peer();
    dispatch_client::call(&peer, &Request::SetMem { key: "k".to_string(), value: serde_json::json!(42) }).unwrap();

    let reply = dispatch_client::call(&peer, &Request::GetMem { key: "k".to_string() }).unwrap();
    assert!(matches!(reply, Response::Value { value: Some(v) } if v == serde_json::json!(42)));

    let reply = dispatch_client::call(&peer, &Request::DelMem { key: "k".to_string() }).unwrap();
    assert!(matches!(reply, Response::Ok));

    let reply = dispatch_client::call(&peer, &Request::GetMem { key: "k".to_string() }).unwrap();
    assert!(matches!(reply, Response::Value { value: None }));
}

// =============================================================================
// FILES
// =============================================================================

#[test]
fn put_list_get_delete_file_round_trips_over_the_wire() {
    let peer = spawn_peer();
    dispatch_client::call(&peer, &Request::PutFile { filename: "a.txt".to_string(), data: b"hello".to_vec() })
        .unwrap();

    let reply = dispatch_client::call(&peer, &Request::ListFile).unwrap();
    assert!(matches!(reply, Response::Files { files } if files == vec!["a.txt".to_string()]));

    let reply = dispatch_client::call(&peer, &Request::GetFile { filename: "a.txt".to_string() }).unwrap();
    assert!(matches!(reply, Response::Data { data } if data == b"hello"));

    let reply = dispatch_client::call(&peer, &Request::DeleteFile { filename: "a.txt".to_string() }).unwrap();
    assert!(matches!(reply, Response::Ok));

    let reply = dispatch_client::call(&peer, &Request::GetFile { filename: "a.txt".to_string() }).unwrap();
    assert!(matches!(reply, Response::Error { code, .. } if code == "UNKNOWN_FILE"));
}

#[test]
fn get_chunk_serves_an_advertised_file_in_pieces() {
    let peer = spawn_peer();
    let body = vec![7u8; 10];
    dispatch_client::call(&peer, &Request::PutFile { filename: "c.bin".to_string(), data: body.clone() }).unwrap();

    let reply = dispatch_client::call(
        &peer,
        &Request::GetChunk { filename: "c.bin".to_string(), offset: 0, length: 4 },
    )
    .unwrap();
    assert!(matches!(reply, Response::Data { data } if data == body[0..4]));

    let reply = dispatch_client::call(
        &peer,
        &Request::GetChunk { filename: "c.bin".to_string(), offset: 8, length: 4 },
    )
    .unwrap();
    assert!(matches!(reply, Response::Data { data } if data == body[8..10]));
}

#[test]
fn file_size_reports_the_length_of_a_stored_file() {
    let peer = spawn_peer();
    dispatch_client::call(&peer, &Request::PutFile { filename: "sized.bin".to_string(), data: vec![1u8; 37] })
        .unwrap();

    let reply = dispatch_client::call(&peer, &Request::FileSize { filename: "sized.bin".to_string() }).unwrap();
    assert!(matches!(reply, Response::Size { size: 37 }));

    let reply = dispatch_client::call(&peer, &Request::FileSize { filename: "missing.bin".to_string() }).unwrap();
    assert!(matches!(reply, Response::Error { code, .. } if code == "UNKNOWN_FILE"));
}

// =============================================================================
// COMPUTE
// =============================================================================

#[test]
fn cpu_task_echo_returns_the_first_argument() {
    let peer = spawn_peer();
    let spec = task("echo", vec![serde_json::json!("hi")]);
    let reply = dispatch_client::call(&peer, &Request::CpuTask(spec)).unwrap();
    match reply {
        Response::CpuResult(result) => {
            assert_eq!(result.status, TaskStatus::Completed);
            assert_eq!(result.value, Some(serde_json::json!("hi")));
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn cpu_task_fail_reports_a_failed_status_with_the_error_message() {
    let peer = spawn_peer();
    let spec = task("fail", vec![serde_json::json!("boom")]);
    let reply = dispatch_client::call(&peer, &Request::CpuTask(spec)).unwrap();
    match reply {
        Response::CpuResult(result) => {
            assert_eq!(result.status, TaskStatus::Failed);
            assert_eq!(result.error.as_deref(), Some("boom"));
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn cpu_task_fail_with_retries_still_reports_failed_after_exhausting_them() {
    let peer = spawn_peer();
    let mut spec = task("fail", vec![serde_json::json!("boom")]);
    spec.max_retries = 2;
    let reply = dispatch_client::call(&peer, &Request::CpuTask(spec)).unwrap();
    match reply {
        Response::CpuResult(result) => {
            assert_eq!(result.status, TaskStatus::Failed);
            assert_eq!(result.error.as_deref(), Some("boom"));
        }
        other => panic!("unexpected response: {other:?}"),
    }

    // Every attempt (the original plus both retries) appends its own
    // history entry.
    let reply = dispatch_client::call(&peer, &Request::Status).unwrap();
    match reply {
        Response::Status { snapshot } => {
            assert_eq!(snapshot["history"]["failed"], serde_json::json!(3));
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn repeated_identical_non_confidential_tasks_are_served_from_cache() {
    let peer = spawn_peer();
    let spec = task("sum", vec![serde_json::json!(1), serde_json::json!(2)]);

    let first = dispatch_client::call(&peer, &Request::CpuTask(spec.clone())).unwrap();
    let second = dispatch_client::call(&peer, &Request::CpuTask(spec)).unwrap();

    match (first, second) {
        (Response::CpuResult(a), Response::CpuResult(b)) => {
            assert!(!a.cache_hit);
            assert!(b.cache_hit);
            assert_eq!(a.value, b.value);
        }
        other => panic!("unexpected responses: {other:?}"),
    }
}

// =============================================================================
// PROCESS TABLE
// =============================================================================

#[test]
fn create_then_terminate_process_round_trips_over_the_wire() {
    let peer = spawn_peer();
    let reply = dispatch_client::call(&peer, &Request::CreateProcess { parent: None, group: None }).unwrap();
    let pid = match reply {
        Response::Pid { pid } => pid,
        other => panic!("unexpected response: {other:?}"),
    };

    let reply = dispatch_client::call(&peer, &Request::TerminateProcess { pid }).unwrap();
    assert!(matches!(reply, Response::Ok));

    let reply = dispatch_client::call(&peer, &Request::TerminateProcess { pid }).unwrap();
    assert!(matches!(reply, Response::Error { code, .. } if code == "UNKNOWN_PID"));
}

// =============================================================================
// BLOCK ALLOCATOR
// =============================================================================

#[test]
fn alloc_then_free_round_trips_over_the_wire() {
    let peer = spawn_peer();
    let reply = dispatch_client::call(&peer, &Request::AllocMem { pid: 1, size: 64 }).unwrap();
    let offset = match reply {
        Response::Offset { offset } => offset,
        other => panic!("unexpected response: {other:?}"),
    };

    let reply = dispatch_client::call(&peer, &Request::FreeMem { pid: 1, offset }).unwrap();
    assert!(matches!(reply, Response::Ok));
}

#[test]
fn freeing_a_block_owned_by_a_different_pid_is_rejected() {
    let peer = spawn_peer();
    let reply = dispatch_client::call(&peer, &Request::AllocMem { pid: 1, size: 64 }).unwrap();
    let offset = match reply {
        Response::Offset { offset } => offset,
        other => panic!("unexpected response: {other:?}"),
    };

    let reply = dispatch_client::call(&peer, &Request::FreeMem { pid: 2, offset }).unwrap();
    assert!(matches!(reply, Response::Error { code, .. } if code == "BAD_REQUEST"));

    let reply = dispatch_client::call(&peer, &Request::FreeMem { pid: 1, offset }).unwrap();
    assert!(matches!(reply, Response::Ok));
}

#[test]
fn frag_info_reports_free_bytes_after_a_partial_allocation() {
    let peer = spawn_peer();
    dispatch_client::call(&peer, &Request::AllocMem { pid: 1, size: 100 }).unwrap();

    let reply = dispatch_client::call(&peer, &Request::FragInfo).unwrap();
    match reply {
        Response::FragStats { free_bytes, .. } => assert_eq!(free_bytes, 4096 - 100),
        other => panic!("unexpected response: {other:?}"),
    }
}

// =============================================================================
// IPC
// =============================================================================

#[test]
fn send_then_recv_msg_round_trips_over_the_wire() {
    let peer = spawn_peer();
    dispatch_client::call(&peer, &Request::CreateQueue { name: "jobs".to_string(), capacity: 4 }).unwrap();
    dispatch_client::call(
        &peer,
        &Request::SendMsg { queue: "jobs".to_string(), to: "1".to_string(), body: serde_json::json!("hi") },
    )
    .unwrap();

    let reply = dispatch_client::call(
        &peer,
        &Request::RecvMsg { queue: "jobs".to_string(), pid: 1, timeout_ms: Some(200) },
    )
    .unwrap();
    assert!(matches!(reply, Response::Message { body } if body == serde_json::json!("hi")));
}

// =============================================================================
// STATUS
// =============================================================================

#[test]
fn status_reports_a_composite_snapshot_of_every_subsystem() {
    let peer = spawn_peer();
    dispatch_client::call(&peer, &Request::AllocMem { pid: 1, size: 16 }).unwrap();
    dispatch_client::call(&peer, &Request::CreateQueue { name: "q".to_string(), capacity: 1 }).unwrap();

    let reply = dispatch_client::call(&peer, &Request::Status).unwrap();
    let snapshot = match reply {
        Response::Status { snapshot } => snapshot,
        other => panic!("unexpected response: {other:?}"),
    };
    for field in ["scheduler", "cache", "history", "quota", "resources", "allocator", "ipc"] {
        assert!(snapshot.get(field).is_some(), "missing status field: {field}");
    }
    assert_eq!(snapshot["ipc"]["queue_count"], serde_json::json!(1));
    assert_eq!(snapshot["allocator"]["allocated_bytes"], serde_json::json!(16));
}
