//! Integration tests for pollfile reloads
//!
//! These tests verify that:
//! - Removing a device keeps its events until the grace period ends
//! - Swept entities get their open events closed, never deleted
//! - A broken pollfile leaves the running registry alone
//! - A device that comes back within the grace period keeps its entities
//! - A device re-added while still unreachable keeps its outage event

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tempfile::tempdir;
use zino::{
    actors::{PollStatus, PollfileHandle},
    events::{EventFilter, EventStatus},
    monitors::EntityKey,
    snmp::mock::ScriptedBackend,
};

use crate::helpers::{exact_settings, spawn_scheduler};

const BOTH: &str = r#"
[defaults]
interval = 5

[[device]]
name = "gw1"
address = "192.0.2.1"

[[device]]
name = "gw2"
address = "192.0.2.2"
"#;

const ONLY_GW2: &str = r#"
[defaults]
interval = 5

[[device]]
name = "gw2"
address = "192.0.2.2"
"#;

fn write(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn test_removed_device_is_swept_and_its_event_closed() {
    let dir = tempdir().unwrap();
    let pollfile = dir.path().join("polldevs.toml");
    write(&pollfile, BOTH);

    let backend = Arc::new(ScriptedBackend::new());
    backend.set_responding("gw1", false);
    let (state, scheduler) = spawn_scheduler(backend.clone(), exact_settings());
    let watcher = PollfileHandle::spawn(pollfile.clone(), Duration::from_secs(3600), scheduler.clone());
    watcher.check_now().await.unwrap();

    for _ in 0..4 {
        scheduler.poll_now("gw1").await.unwrap();
    }
    scheduler.poll_now("gw2").await.unwrap();
    let event = state
        .events
        .open_event_for(&EntityKey::reachability("gw1"))
        .unwrap();

    write(&pollfile, ONLY_GW2);
    assert!(watcher.check_now().await.unwrap());
    assert!(scheduler.poll_now("gw1").await.is_err());

    // within the grace period nothing is dropped
    let entity = state.engine.get(&EntityKey::reachability("gw1")).unwrap();
    assert!(entity.missing_since.is_some());
    assert!(state.sweep(Utc::now()).is_empty());
    assert!(state.events.get_by_id(event.id).unwrap().is_open());

    let removed = state.sweep(Utc::now() + TimeDelta::minutes(11));
    assert_eq!(removed, vec![EntityKey::reachability("gw1")]);

    let closed = state.events.get_by_id(event.id).unwrap();
    assert_eq!(closed.status, EventStatus::Closed);
    assert!(closed.log.last().unwrap().message.contains("no longer monitored"));
    assert_eq!(state.events.get(&EventFilter::for_device("gw1")).len(), 1);

    // gw2 is untouched
    assert!(state.engine.get(&EntityKey::reachability("gw2")).is_some());

    watcher.shutdown().await.unwrap();
    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_broken_pollfile_keeps_polling() {
    let dir = tempdir().unwrap();
    let pollfile = dir.path().join("polldevs.toml");
    write(&pollfile, BOTH);

    let backend = Arc::new(ScriptedBackend::new());
    let (_state, scheduler) = spawn_scheduler(backend, exact_settings());
    let watcher = PollfileHandle::spawn(pollfile.clone(), Duration::from_secs(3600), scheduler.clone());
    watcher.check_now().await.unwrap();

    write(&pollfile, "[[device]]\nname = \"gw1\"\n");
    assert!(watcher.check_now().await.is_err());

    assert_eq!(scheduler.get_stats().await.unwrap().devices, 2);
    assert_eq!(scheduler.poll_now("gw1").await.unwrap(), PollStatus::Success);

    // a fixed file is picked up again
    write(&pollfile, ONLY_GW2);
    assert!(watcher.check_now().await.unwrap());
    assert_eq!(scheduler.get_stats().await.unwrap().devices, 1);

    watcher.shutdown().await.unwrap();
    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_device_back_within_grace_keeps_entities() {
    let dir = tempdir().unwrap();
    let pollfile = dir.path().join("polldevs.toml");
    write(&pollfile, BOTH);

    let backend = Arc::new(ScriptedBackend::new());
    let (state, scheduler) = spawn_scheduler(backend, exact_settings());
    let watcher = PollfileHandle::spawn(pollfile.clone(), Duration::from_secs(3600), scheduler.clone());
    watcher.check_now().await.unwrap();
    scheduler.poll_now("gw1").await.unwrap();

    write(&pollfile, ONLY_GW2);
    watcher.check_now().await.unwrap();
    write(&pollfile, BOTH);
    watcher.check_now().await.unwrap();
    scheduler.poll_now("gw1").await.unwrap();

    let entity = state.engine.get(&EntityKey::reachability("gw1")).unwrap();
    assert!(entity.missing_since.is_none());
    assert!(state.sweep(Utc::now() + TimeDelta::minutes(11)).is_empty());

    watcher.shutdown().await.unwrap();
    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_device_readded_while_unreachable_keeps_outage_event() {
    let dir = tempdir().unwrap();
    let pollfile = dir.path().join("polldevs.toml");
    write(&pollfile, BOTH);

    let backend = Arc::new(ScriptedBackend::new());
    backend.set_responding("gw1", false);
    let (state, scheduler) = spawn_scheduler(backend, exact_settings());
    let watcher = PollfileHandle::spawn(pollfile.clone(), Duration::from_secs(3600), scheduler.clone());
    watcher.check_now().await.unwrap();

    for _ in 0..4 {
        scheduler.poll_now("gw1").await.unwrap();
    }
    let outage = state
        .events
        .open_event_for(&EntityKey::reachability("gw1"))
        .unwrap();

    write(&pollfile, ONLY_GW2);
    watcher.check_now().await.unwrap();
    write(&pollfile, BOTH);
    watcher.check_now().await.unwrap();

    // still down: failures keep coming, no up/down answer ever arrives
    for _ in 0..3 {
        assert_eq!(scheduler.poll_now("gw1").await.unwrap(), PollStatus::Failed);
    }

    let entity = state.engine.get(&EntityKey::reachability("gw1")).unwrap();
    assert!(entity.missing_since.is_none());
    assert!(state.sweep(Utc::now() + TimeDelta::minutes(11)).is_empty());

    let event = state.events.get_by_id(outage.id).unwrap();
    assert!(event.is_open());
    assert!(
        !event
            .log
            .iter()
            .any(|entry| entry.message.contains("no longer monitored"))
    );

    watcher.shutdown().await.unwrap();
    scheduler.shutdown().await.unwrap();
}
