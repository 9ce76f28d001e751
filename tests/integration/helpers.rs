//! Helper functions for integration tests

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use zino::{
    Timestamp,
    actors::{PollEvent, SchedulerHandle, SchedulerSettings},
    daemon::DaemonState,
    devices::{Device, Registry},
    monitors::{PollOutcome, StateParams},
    snmp::{DevicePoll, DevicePoller, InterfaceSample, mock::ScriptedBackend},
};

/// Closed events stay live this long in tests
pub const RETENTION_HOURS: i64 = 8;

pub fn test_device(name: &str, interval_minutes: u64, priority: u32) -> Device {
    let last_octet = name.bytes().fold(1u8, |acc, b| acc.wrapping_add(b)).max(1);
    Device::new(name, IpAddr::V4(Ipv4Addr::new(192, 0, 2, last_octet)))
        .with_interval(Duration::from_secs(interval_minutes * 60))
        .with_priority(priority)
}

pub fn registry(devices: impl IntoIterator<Item = Device>) -> Registry {
    Registry::from_devices(devices).unwrap()
}

pub fn daemon_state() -> Arc<DaemonState> {
    Arc::new(DaemonState::new(
        StateParams::default(),
        TimeDelta::hours(RETENTION_HOURS),
    ))
}

/// No jitter, so paused-clock tests can count polls exactly
pub fn exact_settings() -> SchedulerSettings {
    SchedulerSettings {
        jitter: 0.0,
        ..SchedulerSettings::default()
    }
}

pub fn spawn_scheduler(
    backend: Arc<ScriptedBackend>,
    settings: SchedulerSettings,
) -> (Arc<DaemonState>, SchedulerHandle) {
    let state = daemon_state();
    let handle = SchedulerHandle::spawn(state.clone(), DevicePoller::new(backend), settings);
    (state, handle)
}

/// Fixed wall-clock origin for direct state tests
pub fn at(minute: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::minutes(minute)
}

pub fn at_seconds(second: i64) -> Timestamp {
    at(0) + TimeDelta::seconds(second)
}

pub fn interface(index: u32, descr: &str, up: bool) -> InterfaceSample {
    InterfaceSample {
        index,
        descr: descr.to_string(),
        oper_up: up,
        in_octets: None,
        out_octets: None,
    }
}

pub fn success(interfaces: Vec<InterfaceSample>) -> PollOutcome {
    PollOutcome::Success(DevicePoll {
        uptime: Some(100),
        interfaces: Some(interfaces),
        bgp_peers: Some(Vec::new()),
    })
}

/// Subscribe now and resolve with the next completed poll
pub fn next_poll(scheduler: &SchedulerHandle) -> tokio::task::JoinHandle<PollEvent> {
    let mut polls = scheduler.subscribe();
    tokio::spawn(async move {
        tokio::time::timeout(Duration::from_secs(5), polls.recv())
            .await
            .unwrap()
            .unwrap()
    })
}
