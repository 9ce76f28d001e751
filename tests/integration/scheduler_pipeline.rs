//! Integration tests for the poll scheduler
//!
//! These tests verify that:
//! - Devices with different intervals are each polled on their own cadence
//! - The in-flight cap is honoured and queued work still gets through
//! - A device that never answers keeps being polled at its interval
//! - Poll completions are broadcast with the events they produced

use std::sync::Arc;
use std::time::Duration;

use zino::actors::{PollStatus, SchedulerSettings};
use zino::snmp::mock::ScriptedBackend;

use crate::helpers::{exact_settings, registry, spawn_scheduler, test_device};

#[tokio::test(start_paused = true)]
async fn test_mixed_intervals_are_each_honoured() {
    let backend = Arc::new(ScriptedBackend::new().with_default_latency(Duration::from_secs(1)));
    let settings = SchedulerSettings {
        max_in_flight: 1,
        ..exact_settings()
    };
    let (_state, scheduler) = spawn_scheduler(backend.clone(), settings);

    scheduler
        .update_registry(registry([
            test_device("fast", 1, 100),
            test_device("medium", 5, 100),
            test_device("slow", 60, 100),
        ]))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(61 * 60)).await;

    // a single poll slot shared by all three devices
    let fast = backend.poll_count("fast");
    let medium = backend.poll_count("medium");
    let slow = backend.poll_count("slow");
    assert!((58..=62).contains(&fast), "fast polled {fast} times");
    assert!((12..=13).contains(&medium), "medium polled {medium} times");
    assert_eq!(slow, 2);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_cap_is_respected() {
    let backend = Arc::new(ScriptedBackend::new().with_default_latency(Duration::from_secs(10)));
    let settings = SchedulerSettings {
        max_in_flight: 3,
        ..exact_settings()
    };
    let (_state, scheduler) = spawn_scheduler(backend.clone(), settings);

    let names: Vec<String> = (0..10).map(|i| format!("sw{i}")).collect();
    scheduler
        .update_registry(registry(names.iter().map(|name| test_device(name, 5, 100))))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let stats = scheduler.get_stats().await.unwrap();
    assert_eq!(stats.in_flight, 3);
    assert_eq!(stats.devices, 10);

    // four rounds of ten seconds each drain the backlog
    tokio::time::sleep(Duration::from_secs(40)).await;
    for name in &names {
        assert_eq!(backend.poll_count(name), 1, "{name}");
    }
    let stats = scheduler.get_stats().await.unwrap();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.polls_succeeded, 10);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_device_keeps_its_cadence() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.set_responding("dead", false);
    let (state, scheduler) = spawn_scheduler(backend.clone(), exact_settings());

    scheduler
        .update_registry(registry([test_device("dead", 1, 100)]))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;

    // t = 0, 60, 120, 180, 240, 300
    assert_eq!(backend.poll_count("dead"), 6);
    let stats = scheduler.get_stats().await.unwrap();
    assert_eq!(stats.polls_failed, 6);
    assert_eq!(state.events.open_count(), 1);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_poll_events_carry_event_ids() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.set_responding("gw1", false);
    let (state, scheduler) = spawn_scheduler(backend, exact_settings());
    let mut polls = scheduler.subscribe();

    scheduler
        .update_registry(registry([test_device("gw1", 5, 100)]))
        .await
        .unwrap();

    // the initial poll of a new device, then three more on demand
    let first = tokio::time::timeout(Duration::from_secs(5), polls.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, PollStatus::Failed);
    assert!(first.events.is_empty());

    for _ in 0..3 {
        assert_eq!(scheduler.poll_now("gw1").await.unwrap(), PollStatus::Failed);
    }

    let mut opened = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(5), polls.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.device, "gw1");
        opened.extend(event.events);
    }

    assert_eq!(opened.len(), 1);
    assert!(state.events.get_by_id(opened[0]).unwrap().is_open());

    scheduler.shutdown().await.unwrap();
}
