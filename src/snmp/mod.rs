//! SNMP capability consumed by the poll scheduler
//!
//! The core only relies on the [`SnmpBackend`] trait: "fetch these OIDs"
//! and "walk this table" for a device. [`client::AsyncSnmpBackend`] speaks
//! SNMPv2c through `async-snmp`; [`mock::ScriptedBackend`] simulates a
//! fleet in-process.
//! [`poller::DevicePoller`] turns raw varbinds into a [`DevicePoll`].

pub mod client;
pub mod mock;
pub mod poller;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;

use crate::devices::Device;

pub use poller::{BgpPeerSample, DevicePoll, DevicePoller, InterfaceSample};

/// Errors from the SNMP capability
///
/// All of these count as a failed poll for the device; none are fatal.
#[derive(Debug, Error)]
pub enum SnmpError {
    #[error("no response from {0}")]
    Timeout(String),

    #[error("SNMP request failed: {0}")]
    Client(String),

    #[error("invalid OID '{0}'")]
    InvalidOid(String),
}

/// Object identifier, e.g. `1.3.6.1.2.1.1.3.0`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: impl Into<Vec<u32>>) -> Self {
        Self(arcs.into())
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Arcs after `root`, if this OID lives under it
    pub fn suffix(&self, root: &Oid) -> Option<&[u32]> {
        self.0.strip_prefix(root.0.as_slice())
    }

    pub fn child(&self, arcs: &[u32]) -> Oid {
        let mut child = self.0.clone();
        child.extend_from_slice(arcs);
        Oid(child)
    }
}

impl FromStr for Oid {
    type Err = SnmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let arcs = s
            .trim_start_matches('.')
            .split('.')
            .map(|arc| arc.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| SnmpError::InvalidOid(s.to_string()))?;
        if arcs.len() < 2 {
            return Err(SnmpError::InvalidOid(s.to_string()));
        }
        Ok(Oid(arcs))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
            first = false;
        }
        Ok(())
    }
}

/// Decoded SNMP value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(i64::from(*v)),
            Value::Counter64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(u64::from(*v)),
            Value::Counter64(v) => Some(*v),
            Value::Integer(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    /// True for the v2c exception values that carry no data
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        Self { oid, value }
    }
}

/// "Fetch OID / table for device X"
///
/// Implementations are interchangeable; the caller bounds every call with
/// its own timeout and drops the future when it expires.
#[async_trait]
pub trait SnmpBackend: Send + Sync {
    /// Fetch scalar values
    async fn get(&self, device: &Device, oids: &[Oid]) -> Result<Vec<VarBind>, SnmpError>;

    /// Fetch every varbind below `root`, in lexicographic order
    async fn walk(&self, device: &Device, root: &Oid) -> Result<Vec<VarBind>, SnmpError>;
}
