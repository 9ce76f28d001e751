//! Integration tests for snapshot persistence
//!
//! These tests verify that:
//! - A saved state restores to the same events and entity states
//! - Event ids keep increasing across a restart
//! - A torn or corrupt snapshot never yields partial state
//! - The persistence actor writes a final snapshot on shutdown

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::TimeDelta;
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use zino::{
    actors::PersistenceHandle,
    daemon::DaemonState,
    monitors::{EntityKey, PollOutcome, StateParams, StateValue},
    storage::{FileBackend, SnapshotBackend, StorageError},
};

use crate::helpers::{RETENTION_HOURS, at, daemon_state, interface, success};

fn params() -> StateParams {
    StateParams::default()
}

fn retention() -> TimeDelta {
    TimeDelta::hours(RETENTION_HOURS)
}

/// gw1 down with an open event, gw2 up with one interface
fn populated_state() -> Arc<DaemonState> {
    let state = daemon_state();
    state.apply_poll("gw2", success(vec![interface(1, "ge-0/0/1", true)]), at(0));
    for minute in 0..4 {
        state.apply_poll("gw1", PollOutcome::Failure, at(minute));
    }
    state
}

#[tokio::test]
async fn test_restart_restores_state_and_continues_ids() {
    let dir = tempdir().unwrap();
    let backend = FileBackend::new(dir.path().join("zino-state.json"));

    let state = populated_state();
    backend.save(&state.snapshot(at(5))).await.unwrap();

    let restored = DaemonState::load_or_cold_start(&backend, params(), retention()).await;
    assert_eq!(restored.events.snapshot(), state.events.snapshot());
    assert_eq!(restored.engine.snapshot(), state.engine.snapshot());

    // the restored failure counter carries on: one success closes the event
    let closed = restored.apply_poll("gw1", success(Vec::new()), at(6));
    assert_eq!(closed.len(), 1);
    assert!(!restored.events.get_by_id(closed[0]).unwrap().is_open());

    for minute in 7..11 {
        restored.apply_poll("gw1", PollOutcome::Failure, at(minute));
    }
    let reopened = restored
        .events
        .open_event_for(&EntityKey::reachability("gw1"))
        .unwrap();
    assert!(reopened.id > closed[0]);
}

#[tokio::test]
async fn test_torn_write_leaves_previous_snapshot() {
    let dir = tempdir().unwrap();
    let backend = FileBackend::new(dir.path().join("zino-state.json"));

    let state = populated_state();
    backend.save(&state.snapshot(at(5))).await.unwrap();

    // a crash mid-save leaves only a partial staging file behind
    std::fs::write(backend.staging_path(), b"{\"version\": 1, \"saved_at\": \"20").unwrap();

    let loaded = backend.load().await.unwrap().unwrap();
    assert_eq!(loaded.events, state.events.snapshot());
}

#[tokio::test]
async fn test_corrupt_snapshot_cold_starts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("zino-state.json");
    std::fs::write(&path, b"{\"version\": 1, \"events\": [").unwrap();
    let backend = FileBackend::new(&path);

    assert_matches!(backend.load().await, Err(StorageError::Serialization(_)));

    let state = DaemonState::load_or_cold_start(&backend, params(), retention()).await;
    assert!(state.events.is_empty());
    assert!(state.engine.is_empty());
}

#[tokio::test]
async fn test_unknown_version_cold_starts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("zino-state.json");
    std::fs::write(&path, br#"{"version": 99, "whatever": true}"#).unwrap();
    let backend = FileBackend::new(&path);

    assert_matches!(
        backend.load().await,
        Err(StorageError::UnsupportedVersion { found: 99, .. })
    );
    let state = DaemonState::load_or_cold_start(&backend, params(), retention()).await;
    assert!(state.events.is_empty());
}

#[tokio::test]
async fn test_shutdown_writes_final_snapshot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("zino-state.json");
    let backend = Arc::new(FileBackend::new(&path));

    let state = daemon_state();
    let persistence =
        PersistenceHandle::spawn(state.clone(), backend.clone(), Duration::from_secs(3600));
    for minute in 0..4 {
        state.apply_poll("gw1", PollOutcome::Failure, at(minute));
    }
    persistence.shutdown().await.unwrap();

    let restored = DaemonState::load_or_cold_start(backend.as_ref(), params(), retention()).await;
    assert_eq!(restored.events.len(), 1);
    assert_eq!(
        restored
            .engine
            .get(&EntityKey::reachability("gw1"))
            .unwrap()
            .state,
        StateValue::Down
    );
}
