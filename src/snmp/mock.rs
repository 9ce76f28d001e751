//! In-process SNMP backend driven by per-device scripts
//!
//! Used by the test-suite and for dry runs without network access. Every
//! device answers by default; behaviour is changed at runtime through the
//! `set_*` methods, which take effect on the next request.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::poller::{
    BGP_PEER_STATE, IF_DESCR, IF_HC_IN_OCTETS, IF_HC_OUT_OCTETS, IF_OPER_STATUS, SYS_UPTIME,
};
use super::{Oid, SnmpBackend, SnmpError, Value, VarBind};
use crate::devices::Device;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedInterface {
    pub index: u32,
    pub descr: String,
    pub up: bool,
    pub in_octets: Option<u64>,
    pub out_octets: Option<u64>,
}

impl ScriptedInterface {
    pub fn up(index: u32, descr: &str) -> Self {
        Self {
            index,
            descr: descr.to_string(),
            up: true,
            in_octets: None,
            out_octets: None,
        }
    }

    pub fn down(index: u32, descr: &str) -> Self {
        Self {
            up: false,
            ..Self::up(index, descr)
        }
    }

    pub fn with_counters(mut self, in_octets: u64, out_octets: u64) -> Self {
        self.in_octets = Some(in_octets);
        self.out_octets = Some(out_octets);
        self
    }
}

#[derive(Debug, Clone)]
struct Script {
    responding: bool,
    fail_walks: bool,
    latency: Duration,
    uptime: u32,
    interfaces: Vec<ScriptedInterface>,
    bgp_peers: Vec<(IpAddr, bool)>,
}

impl Script {
    fn new(latency: Duration) -> Self {
        Self {
            responding: true,
            fail_walks: false,
            latency,
            uptime: 0,
            interfaces: Vec::new(),
            bgp_peers: Vec::new(),
        }
    }
}

/// Scripted stand-in for a fleet of SNMP agents
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: DashMap<String, Script>,
    polls: DashMap<String, Vec<Instant>>,
    default_latency: Duration,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latency applied to every request of devices without an explicit setting
    pub fn with_default_latency(mut self, latency: Duration) -> Self {
        self.default_latency = latency;
        self
    }

    fn update(&self, device: &str, f: impl FnOnce(&mut Script)) {
        let mut script = self
            .scripts
            .entry(device.to_string())
            .or_insert_with(|| Script::new(self.default_latency));
        f(&mut script);
    }

    fn script(&self, device: &str) -> Script {
        self.scripts
            .get(device)
            .map(|s| s.clone())
            .unwrap_or_else(|| Script::new(self.default_latency))
    }

    pub fn set_responding(&self, device: &str, responding: bool) {
        self.update(device, |s| s.responding = responding);
    }

    pub fn set_interfaces(&self, device: &str, interfaces: Vec<ScriptedInterface>) {
        self.update(device, |s| s.interfaces = interfaces);
    }

    pub fn set_bgp_peers(&self, device: &str, peers: Vec<(IpAddr, bool)>) {
        self.update(device, |s| s.bgp_peers = peers);
    }

    pub fn fail_walks(&self, device: &str, fail: bool) {
        self.update(device, |s| s.fail_walks = fail);
    }

    pub fn set_latency(&self, device: &str, latency: Duration) {
        self.update(device, |s| s.latency = latency);
    }

    /// Instants at which the reachability check of `device` was answered or refused
    pub fn poll_times(&self, device: &str) -> Vec<Instant> {
        self.polls
            .get(device)
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn poll_count(&self, device: &str) -> usize {
        self.polls.get(device).map(|p| p.len()).unwrap_or(0)
    }

    fn table(script: &Script, root: &Oid) -> Vec<VarBind> {
        let mut rows: Vec<VarBind> = if *root == *IF_DESCR {
            script
                .interfaces
                .iter()
                .map(|i| {
                    VarBind::new(
                        root.child(&[i.index]),
                        Value::OctetString(i.descr.as_bytes().to_vec()),
                    )
                })
                .collect()
        } else if *root == *IF_OPER_STATUS {
            script
                .interfaces
                .iter()
                .map(|i| VarBind::new(root.child(&[i.index]), Value::Integer(if i.up { 1 } else { 2 })))
                .collect()
        } else if *root == *IF_HC_IN_OCTETS {
            script
                .interfaces
                .iter()
                .filter_map(|i| Some(VarBind::new(root.child(&[i.index]), Value::Counter64(i.in_octets?))))
                .collect()
        } else if *root == *IF_HC_OUT_OCTETS {
            script
                .interfaces
                .iter()
                .filter_map(|i| Some(VarBind::new(root.child(&[i.index]), Value::Counter64(i.out_octets?))))
                .collect()
        } else if *root == *BGP_PEER_STATE {
            script
                .bgp_peers
                .iter()
                .filter_map(|(peer, established)| {
                    let IpAddr::V4(v4) = peer else {
                        return None;
                    };
                    let arcs = v4.octets().map(u32::from);
                    let state = if *established { 6 } else { 1 };
                    Some(VarBind::new(root.child(&arcs), Value::Integer(state)))
                })
                .collect()
        } else {
            Vec::new()
        };
        rows.sort_by(|a, b| a.oid.cmp(&b.oid));
        rows
    }
}

#[async_trait]
impl SnmpBackend for ScriptedBackend {
    async fn get(&self, device: &Device, oids: &[Oid]) -> Result<Vec<VarBind>, SnmpError> {
        let script = self.script(&device.name);
        if oids.iter().any(|oid| *oid == *SYS_UPTIME) {
            self.polls
                .entry(device.name.clone())
                .or_default()
                .push(Instant::now());
        }

        if !script.latency.is_zero() {
            tokio::time::sleep(script.latency).await;
        }
        if !script.responding {
            return Err(SnmpError::Timeout(device.name.clone()));
        }

        self.update(&device.name, |s| s.uptime = s.uptime.wrapping_add(100));
        let uptime = self.script(&device.name).uptime;

        Ok(oids
            .iter()
            .map(|oid| {
                let value = if *oid == *SYS_UPTIME {
                    Value::TimeTicks(uptime)
                } else {
                    Value::NoSuchObject
                };
                VarBind::new(oid.clone(), value)
            })
            .collect())
    }

    async fn walk(&self, device: &Device, root: &Oid) -> Result<Vec<VarBind>, SnmpError> {
        let script = self.script(&device.name);
        if !script.responding || script.fail_walks {
            return Err(SnmpError::Timeout(device.name.clone()));
        }
        Ok(Self::table(&script, root))
    }
}
