//! Device Registry
//!
//! Immutable view of the monitored fleet for one polling cycle. A new
//! [`Registry`] is built from every successfully parsed pollfile and
//! compared against the previous one with [`diff`]; the scheduler only
//! ever sees whole registries, never partially applied edits.

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::config::{ConfigError, MAX_MINUTES};

const DEFAULT_COMMUNITY: &str = "public";
const DEFAULT_INTERVAL_MINUTES: u64 = 5;
const DEFAULT_PRIORITY: u32 = 100;
const DEFAULT_SNMP_PORT: u16 = 161;

/// Raw pollfile contents as handed over by the pollfile collaborator
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pollfile {
    #[serde(default)]
    pub defaults: DeviceDefaults,

    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceEntry>,
}

/// Values applied to every device entry that leaves them out
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceDefaults {
    pub community: String,
    pub interval: u64,
    pub priority: u32,
    pub domain: Option<String>,
    pub port: u16,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub bgp: bool,
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            community: DEFAULT_COMMUNITY.to_string(),
            interval: DEFAULT_INTERVAL_MINUTES,
            priority: DEFAULT_PRIORITY,
            domain: None,
            port: DEFAULT_SNMP_PORT,
            include: Vec::new(),
            exclude: Vec::new(),
            bgp: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub address: String,
    pub community: Option<String>,

    /// Polling interval in minutes
    pub interval: Option<u64>,
    pub priority: Option<u32>,
    pub domain: Option<String>,
    pub port: Option<u16>,
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub bgp: Option<bool>,
}

/// A monitored router or switch with its polling parameters
#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    pub community: String,
    pub interval: Duration,
    pub priority: u32,
    pub domain: Option<String>,
    pub include: Vec<Regex>,
    pub exclude: Vec<Regex>,
    pub bgp: bool,
}

impl Device {
    /// Device with pollfile defaults, used by tests and tooling
    pub fn new(name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            name: name.into(),
            address,
            port: DEFAULT_SNMP_PORT,
            community: DEFAULT_COMMUNITY.to_string(),
            interval: Duration::from_secs(DEFAULT_INTERVAL_MINUTES * 60),
            priority: DEFAULT_PRIORITY,
            domain: None,
            include: Vec::new(),
            exclude: Vec::new(),
            bgp: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_bgp(mut self, bgp: bool) -> Self {
        self.bgp = bgp;
        self
    }

    fn from_entry(entry: DeviceEntry, defaults: &DeviceDefaults) -> Result<Self, ConfigError> {
        let address = entry
            .address
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidAddress {
                device: entry.name.clone(),
                address: entry.address.clone(),
            })?;

        let interval = entry.interval.unwrap_or(defaults.interval);
        if interval == 0 {
            return Err(ConfigError::invalid(
                format!("{}.interval", entry.name),
                "must be positive",
            ));
        }
        let interval = interval
            .checked_mul(60)
            .filter(|_| interval <= MAX_MINUTES)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                ConfigError::invalid(
                    format!("{}.interval", entry.name),
                    format!("must be at most {MAX_MINUTES} minutes"),
                )
            })?;

        let priority = entry.priority.unwrap_or(defaults.priority);
        if priority == 0 {
            return Err(ConfigError::invalid(
                format!("{}.priority", entry.name),
                "must be positive",
            ));
        }

        let include = compile_patterns(
            &entry.name,
            "include",
            entry.include.as_ref().unwrap_or(&defaults.include),
        )?;
        let exclude = compile_patterns(
            &entry.name,
            "exclude",
            entry.exclude.as_ref().unwrap_or(&defaults.exclude),
        )?;

        Ok(Self {
            address,
            port: entry.port.unwrap_or(defaults.port),
            community: entry
                .community
                .unwrap_or_else(|| defaults.community.clone()),
            interval,
            priority,
            domain: entry.domain.or_else(|| defaults.domain.clone()),
            include,
            exclude,
            bgp: entry.bgp.unwrap_or(defaults.bgp),
            name: entry.name,
        })
    }

    /// Fully qualified name for log output
    pub fn display_name(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{}.{}", self.name, domain.trim_start_matches('.')),
            None => self.name.clone(),
        }
    }

    /// Whether an interface description passes the include/exclude filters
    ///
    /// Exclusion wins over inclusion; an empty include list admits everything.
    pub fn watches_interface(&self, descr: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(descr)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(descr))
    }

    /// Compare every polling-relevant setting
    pub fn same_settings(&self, other: &Device) -> bool {
        fn patterns(list: &[Regex]) -> Vec<&str> {
            list.iter().map(Regex::as_str).collect()
        }

        self.address == other.address
            && self.port == other.port
            && self.community == other.community
            && self.interval == other.interval
            && self.priority == other.priority
            && self.domain == other.domain
            && self.bgp == other.bgp
            && patterns(&self.include) == patterns(&other.include)
            && patterns(&self.exclude) == patterns(&other.exclude)
    }
}

fn compile_patterns(
    device: &str,
    field: &'static str,
    patterns: &[String],
) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                device: device.to_string(),
                field,
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

fn max_interval() -> Duration {
    Duration::from_secs(MAX_MINUTES * 60)
}

/// Validated set of devices, keyed by unique name
#[derive(Debug, Clone, Default)]
pub struct Registry {
    devices: BTreeMap<String, Arc<Device>>,
}

impl Registry {
    /// Validate a raw pollfile into a registry
    pub fn load(raw: Pollfile) -> Result<Self, ConfigError> {
        let Pollfile { defaults, devices } = raw;
        let devices = devices
            .into_iter()
            .map(|entry| Device::from_entry(entry, &defaults))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_devices(devices)
    }

    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Result<Self, ConfigError> {
        let mut registry = BTreeMap::new();
        for device in devices {
            if device.interval.is_zero() || device.interval > max_interval() {
                return Err(ConfigError::invalid(
                    format!("{}.interval", device.name),
                    format!("must be positive and at most {MAX_MINUTES} minutes"),
                ));
            }
            if registry.contains_key(&device.name) {
                return Err(ConfigError::DuplicateDevice(device.name));
            }
            registry.insert(device.name.clone(), Arc::new(device));
        }
        debug!("registry loaded with {} devices", registry.len());
        Ok(Self { devices: registry })
    }

    /// Parse a TOML pollfile from disk
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let raw: Pollfile = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        trace!("parsed pollfile with {} entries", raw.devices.len());
        Self::load(raw)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Device>> {
        self.devices.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Changes between two registries
#[derive(Debug, Clone, Default)]
pub struct RegistryDiff {
    pub added: Vec<Arc<Device>>,
    pub removed: Vec<String>,
    pub changed: Vec<Arc<Device>>,
}

impl RegistryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub fn diff(old: &Registry, new: &Registry) -> RegistryDiff {
    let mut result = RegistryDiff::default();

    for (name, device) in &new.devices {
        match old.devices.get(name) {
            None => result.added.push(device.clone()),
            Some(previous) if !previous.same_settings(device) => {
                result.changed.push(device.clone())
            }
            Some(_) => {}
        }
    }

    let kept: HashSet<&String> = new.devices.keys().collect();
    result.removed = old
        .devices
        .keys()
        .filter(|name| !kept.contains(name))
        .cloned()
        .collect();

    result
}
