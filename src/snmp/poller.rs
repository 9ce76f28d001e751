//! Turns raw SNMP varbinds into one structured sample per device poll

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, LazyLock};

use tracing::{debug, instrument, trace};

use super::{Oid, SnmpBackend, SnmpError, Value, VarBind};
use crate::devices::Device;

pub static SYS_UPTIME: LazyLock<Oid> = LazyLock::new(|| Oid::new([1, 3, 6, 1, 2, 1, 1, 3, 0]));
pub static IF_DESCR: LazyLock<Oid> =
    LazyLock::new(|| Oid::new([1, 3, 6, 1, 2, 1, 2, 2, 1, 2]));
pub static IF_OPER_STATUS: LazyLock<Oid> =
    LazyLock::new(|| Oid::new([1, 3, 6, 1, 2, 1, 2, 2, 1, 8]));
pub static IF_HC_IN_OCTETS: LazyLock<Oid> =
    LazyLock::new(|| Oid::new([1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 6]));
pub static IF_HC_OUT_OCTETS: LazyLock<Oid> =
    LazyLock::new(|| Oid::new([1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 10]));
pub static BGP_PEER_STATE: LazyLock<Oid> =
    LazyLock::new(|| Oid::new([1, 3, 6, 1, 2, 1, 15, 3, 1, 2]));

/// ifOperStatus value for "up"
const OPER_STATUS_UP: i64 = 1;

/// bgpPeerState value for "established"
const BGP_ESTABLISHED: i64 = 6;

/// One interface row as seen in a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSample {
    pub index: u32,
    pub descr: String,
    pub oper_up: bool,
    pub in_octets: Option<u64>,
    pub out_octets: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgpPeerSample {
    pub peer: IpAddr,
    pub established: bool,
}

/// Result of one successful device poll
///
/// `None` for a table means that sub-walk failed this cycle; the engine
/// leaves entities of that kind untouched rather than treating them as gone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicePoll {
    pub uptime: Option<u32>,
    pub interfaces: Option<Vec<InterfaceSample>>,
    pub bgp_peers: Option<Vec<BgpPeerSample>>,
}

/// Polls a device through any [`SnmpBackend`]
#[derive(Clone)]
pub struct DevicePoller {
    backend: Arc<dyn SnmpBackend>,
}

impl DevicePoller {
    pub fn new(backend: Arc<dyn SnmpBackend>) -> Self {
        Self { backend }
    }

    /// Poll reachability, interfaces and (optionally) BGP peers
    ///
    /// Fails only when the device does not answer the reachability request.
    #[instrument(skip(self, device), fields(device = %device.name))]
    pub async fn poll(&self, device: &Device) -> Result<DevicePoll, SnmpError> {
        let response = self
            .backend
            .get(device, std::slice::from_ref(&*SYS_UPTIME))
            .await?;
        let uptime = response
            .iter()
            .find(|vb| vb.oid == *SYS_UPTIME)
            .and_then(|vb| match vb.value {
                Value::TimeTicks(ticks) => Some(ticks),
                _ => None,
            });
        trace!("sysUpTime = {uptime:?}");

        let interfaces = match self.poll_interfaces(device).await {
            Ok(interfaces) => Some(interfaces),
            Err(e) => {
                debug!("interface walk failed, keeping previous interface state: {e}");
                None
            }
        };

        let bgp_peers = if device.bgp {
            match self.backend.walk(device, &BGP_PEER_STATE).await {
                Ok(rows) => Some(parse_bgp_peers(&rows)),
                Err(e) => {
                    debug!("BGP walk failed, keeping previous peer state: {e}");
                    None
                }
            }
        } else {
            Some(Vec::new())
        };

        Ok(DevicePoll {
            uptime,
            interfaces,
            bgp_peers,
        })
    }

    async fn poll_interfaces(&self, device: &Device) -> Result<Vec<InterfaceSample>, SnmpError> {
        let descr = self.backend.walk(device, &IF_DESCR).await?;
        let oper = self.backend.walk(device, &IF_OPER_STATUS).await?;

        // 64-bit counters are optional; older agents lack ifXTable
        let in_octets = self
            .backend
            .walk(device, &IF_HC_IN_OCTETS)
            .await
            .unwrap_or_default();
        let out_octets = self
            .backend
            .walk(device, &IF_HC_OUT_OCTETS)
            .await
            .unwrap_or_default();

        let descr = index_rows(&descr, &IF_DESCR, Value::as_text);
        let oper = index_rows(&oper, &IF_OPER_STATUS, Value::as_i64);
        let in_octets = index_rows(&in_octets, &IF_HC_IN_OCTETS, Value::as_u64);
        let out_octets = index_rows(&out_octets, &IF_HC_OUT_OCTETS, Value::as_u64);

        Ok(descr
            .into_iter()
            .filter(|(_, descr)| device.watches_interface(descr))
            .filter_map(|(index, descr)| {
                let status = oper.get(&index)?;
                Some(InterfaceSample {
                    index,
                    descr,
                    oper_up: *status == OPER_STATUS_UP,
                    in_octets: in_octets.get(&index).copied(),
                    out_octets: out_octets.get(&index).copied(),
                })
            })
            .collect())
    }
}

/// Map single-arc table indices to converted values
fn index_rows<T>(
    rows: &[VarBind],
    column: &Oid,
    convert: impl Fn(&Value) -> Option<T>,
) -> BTreeMap<u32, T> {
    rows.iter()
        .filter_map(|vb| {
            let index = match vb.oid.suffix(column)? {
                [index] => *index,
                _ => return None,
            };
            Some((index, convert(&vb.value)?))
        })
        .collect()
}

/// bgpPeerState rows are indexed by the peer's IPv4 address
fn parse_bgp_peers(rows: &[VarBind]) -> Vec<BgpPeerSample> {
    rows.iter()
        .filter_map(|vb| {
            let suffix = vb.oid.suffix(&BGP_PEER_STATE)?;
            let [a, b, c, d] = suffix else {
                return None;
            };
            let octets = [*a, *b, *c, *d].map(|arc| u8::try_from(arc).ok());
            let [Some(a), Some(b), Some(c), Some(d)] = octets else {
                return None;
            };
            Some(BgpPeerSample {
                peer: IpAddr::V4(Ipv4Addr::new(a, b, c, d)),
                established: vb.value.as_i64() == Some(BGP_ESTABLISHED),
            })
        })
        .collect()
}
