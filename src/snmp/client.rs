//! SNMPv2c through the `async-snmp` client

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_snmp::{Auth, Client, UdpClient};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, instrument, trace};

use super::{Oid, SnmpBackend, SnmpError, Value, VarBind};
use crate::devices::Device;

/// Upper bound on rows fetched by a single walk
const MAX_WALK_ROWS: usize = 10_000;

/// One client per agent address and community
type ClientKey = (SocketAddr, String);

/// Production backend talking SNMPv2c to real devices
///
/// Clients are created on first use and reused by every later poll of the
/// same agent.
pub struct AsyncSnmpBackend {
    request_timeout: Duration,
    clients: DashMap<ClientKey, Arc<UdpClient>>,
}

impl AsyncSnmpBackend {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            clients: DashMap::new(),
        }
    }

    async fn client(&self, device: &Device) -> Result<Arc<UdpClient>, SnmpError> {
        let target = SocketAddr::new(device.address, device.port);
        let key = (target, device.community.clone());
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.value().clone());
        }

        let client = Client::builder(target.to_string(), Auth::v2c(device.community.as_str()))
            .timeout(self.request_timeout)
            .connect()
            .await
            .map_err(|e| client_error(device, e))?;
        debug!("created SNMP client for {} at {target}", device.name);

        Ok(self
            .clients
            .entry(key)
            .or_insert_with(|| Arc::new(client))
            .value()
            .clone())
    }
}

impl Default for AsyncSnmpBackend {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

fn client_error(device: &Device, error: async_snmp::Error) -> SnmpError {
    match error {
        async_snmp::Error::Timeout { .. } => SnmpError::Timeout(device.name.clone()),
        other => SnmpError::Client(other.to_string()),
    }
}

fn to_client_oid(oid: &Oid) -> async_snmp::Oid {
    async_snmp::Oid::from_slice(oid.arcs())
}

fn from_client_value(value: &async_snmp::Value) -> Value {
    use async_snmp::Value as Wire;

    match value {
        Wire::Integer(v) => Value::Integer(i64::from(*v)),
        Wire::OctetString(bytes) => Value::OctetString(bytes.to_vec()),
        Wire::Counter32(v) => Value::Counter32(*v),
        Wire::Gauge32(v) => Value::Gauge32(*v),
        Wire::TimeTicks(v) => Value::TimeTicks(*v),
        Wire::Counter64(v) => Value::Counter64(*v),
        Wire::NoSuchObject => Value::NoSuchObject,
        Wire::NoSuchInstance => Value::NoSuchInstance,
        Wire::EndOfMibView => Value::EndOfMibView,
        // nothing the poller reads
        _ => Value::Null,
    }
}

fn from_client(varbind: &async_snmp::VarBind) -> Result<VarBind, SnmpError> {
    let oid = varbind.oid.to_string().parse::<Oid>()?;
    Ok(VarBind::new(oid, from_client_value(&varbind.value)))
}

#[async_trait]
impl SnmpBackend for AsyncSnmpBackend {
    #[instrument(skip(self, device, oids), fields(device = %device.name))]
    async fn get(&self, device: &Device, oids: &[Oid]) -> Result<Vec<VarBind>, SnmpError> {
        let client = self.client(device).await?;

        let mut varbinds = Vec::with_capacity(oids.len());
        for oid in oids {
            let varbind = client
                .get(&to_client_oid(oid))
                .await
                .map_err(|e| client_error(device, e))?;
            varbinds.push(from_client(&varbind)?);
        }
        Ok(varbinds)
    }

    #[instrument(skip(self, device), fields(device = %device.name, root = %root))]
    async fn walk(&self, device: &Device, root: &Oid) -> Result<Vec<VarBind>, SnmpError> {
        let client = self.client(device).await?;
        let mut rows = Vec::new();
        let mut cursor = root.clone();

        while rows.len() < MAX_WALK_ROWS {
            let response = client
                .get_next(&to_client_oid(&cursor))
                .await
                .map_err(|e| client_error(device, e))?;
            let varbind = from_client(&response)?;
            if varbind.value.is_exception() || !varbind.oid.starts_with(root) {
                break;
            }
            // agents that do not advance would loop forever
            if varbind.oid <= cursor {
                return Err(SnmpError::Client(format!(
                    "agent returned non-increasing OID {}",
                    varbind.oid
                )));
            }
            cursor = varbind.oid.clone();
            rows.push(varbind);
        }

        trace!("walked {} rows", rows.len());
        Ok(rows)
    }
}
