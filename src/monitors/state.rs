//! Entity state machine
//!
//! ## Transition Rules
//!
//! ```text
//! Failure (no data):
//!   failures <= threshold          → count only, state unchanged
//!   failures >  threshold          → confirmed Down   (reachability only)
//!
//! Up / Down observation:
//!   failures reset to 0
//!   observation differs from last  → flip recorded in the flap window
//!   flips in window > flap limit   → Flapping
//!   state == Flapping              → held until the window empties
//!   otherwise                      → state follows the observation
//! ```
//!
//! Degradation needs the failure counter to cross `threshold`; recovery is
//! taken from a single successful poll.

use std::collections::VecDeque;
use std::fmt;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::Timestamp;
use crate::config::StateConfig;

/// What sort of sub-resource an entity is; doubles as the event kind
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Reachability,
    Interface,
    #[serde(rename = "bgp")]
    BgpPeer,
}

impl EntityKind {
    /// Whether missing data on its own may drive this kind down
    pub fn degrades_on_failure(self) -> bool {
        matches!(self, EntityKind::Reachability)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Reachability => "reachability",
            EntityKind::Interface => "interface",
            EntityKind::BgpPeer => "bgp",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reachability" => Ok(EntityKind::Reachability),
            "interface" => Ok(EntityKind::Interface),
            "bgp" | "bgp_peer" => Ok(EntityKind::BgpPeer),
            other => Err(format!("unknown entity kind '{other}'")),
        }
    }
}

/// (device, entity-kind, entity-key) triple identifying one state machine
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EntityKey {
    pub device: String,
    pub kind: EntityKind,
    pub key: String,
}

impl EntityKey {
    pub fn new(device: impl Into<String>, kind: EntityKind, key: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            kind,
            key: key.into(),
        }
    }

    pub fn reachability(device: impl Into<String>) -> Self {
        Self::new(device, EntityKind::Reachability, "")
    }

    pub fn interface(device: impl Into<String>, if_index: u32) -> Self {
        Self::new(device, EntityKind::Interface, if_index.to_string())
    }

    pub fn bgp_peer(device: impl Into<String>, peer: std::net::IpAddr) -> Self {
        Self::new(device, EntityKind::BgpPeer, peer.to_string())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}/{}", self.device, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.device, self.kind, self.key)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateValue {
    Unknown,
    Up,
    Down,
    Flapping,
}

impl StateValue {
    /// Down and flapping are the states worth an operator's attention
    pub fn is_degraded(self) -> bool {
        matches!(self, StateValue::Down | StateValue::Flapping)
    }

    /// Kind-specific wording used in event logs
    pub fn label(self, kind: EntityKind) -> &'static str {
        match (self, kind) {
            (StateValue::Unknown, _) => "unknown",
            (StateValue::Up, EntityKind::Reachability) => "reachable",
            (StateValue::Up, EntityKind::BgpPeer) => "established",
            (StateValue::Up, _) => "up",
            (StateValue::Down, EntityKind::Reachability) => "unreachable",
            (StateValue::Down, _) => "down",
            (StateValue::Flapping, _) => "flapping",
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StateValue::Unknown => "unknown",
            StateValue::Up => "up",
            StateValue::Down => "down",
            StateValue::Flapping => "flapping",
        })
    }
}

/// A definitive up/down reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    Up,
    Down,
}

impl From<Link> for StateValue {
    fn from(link: Link) -> Self {
        match link {
            Link::Up => StateValue::Up,
            Link::Down => StateValue::Down,
        }
    }
}

/// Input fed to one state machine per poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The poll produced no data (timeout, transport error)
    Failure,
    Up,
    Down,
}

/// Last counter readings and the rate derived from them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterData {
    pub in_octets: u64,
    pub out_octets: u64,
    pub sampled_at: Timestamp,

    /// Bits per second over the last interval; `None` when indeterminate
    pub in_bps: Option<u64>,
    pub out_bps: Option<u64>,
}

/// Kind-specific soft data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityData {
    #[default]
    None,
    Counters(CounterData),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub state: StateValue,
    pub last_change: Timestamp,
    pub consecutive_failures: u32,

    /// Most recent confirmed reading, used to settle out of flapping
    pub observed: Option<Link>,

    /// Up/down flips inside the flap window, oldest first
    pub flips: VecDeque<Timestamp>,

    pub data: EntityData,

    /// Human readable description, e.g. the interface name
    pub description: Option<String>,

    pub last_seen: Option<Timestamp>,

    /// Set while the entity is absent from poll responses or its device was removed
    pub missing_since: Option<Timestamp>,
}

impl EntityState {
    pub fn new(now: Timestamp) -> Self {
        Self {
            state: StateValue::Unknown,
            last_change: now,
            consecutive_failures: 0,
            observed: None,
            flips: VecDeque::new(),
            data: EntityData::None,
            description: None,
            last_seen: None,
            missing_since: None,
        }
    }
}

/// Thresholds shared by every state machine
#[derive(Debug, Clone, Copy)]
pub struct StateParams {
    pub failure_threshold: u32,
    pub flap_window: TimeDelta,
    pub flap_threshold: usize,
    pub disappearance_grace: TimeDelta,
}

impl From<&StateConfig> for StateParams {
    fn from(config: &StateConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            flap_window: seconds(config.flap_window),
            flap_threshold: config.flap_threshold,
            disappearance_grace: seconds(config.disappearance_grace),
        }
    }
}

impl Default for StateParams {
    fn default() -> Self {
        Self::from(&StateConfig::default())
    }
}

fn seconds(secs: u64) -> TimeDelta {
    TimeDelta::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX)).unwrap_or(TimeDelta::MAX)
}

/// A state change produced by [`transition`] or [`age`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: StateValue,
    pub to: StateValue,
}

/// Pure transition function of one entity
pub fn transition(
    current: &EntityState,
    kind: EntityKind,
    observation: Observation,
    now: Timestamp,
    params: &StateParams,
) -> (EntityState, Option<StateChange>) {
    let mut next = current.clone();

    let change = match observation {
        Observation::Failure => {
            next.consecutive_failures = next.consecutive_failures.saturating_add(1);
            if kind.degrades_on_failure() && next.consecutive_failures > params.failure_threshold
            {
                confirm(&mut next, Link::Down, now, params)
            } else {
                None
            }
        }
        Observation::Up | Observation::Down => {
            next.consecutive_failures = 0;
            next.last_seen = Some(now);
            next.missing_since = None;
            let link = if observation == Observation::Up {
                Link::Up
            } else {
                Link::Down
            };
            confirm(&mut next, link, now, params)
        }
    };

    if let Some(change) = change {
        next.state = change.to;
        next.last_change = now;
    }

    (next, change)
}

fn confirm(
    next: &mut EntityState,
    link: Link,
    now: Timestamp,
    params: &StateParams,
) -> Option<StateChange> {
    let flipped = next.observed.is_some_and(|previous| previous != link);
    next.observed = Some(link);
    if flipped {
        next.flips.push_back(now);
    }
    prune_flips(next, now, params);

    let target = if next.state == StateValue::Flapping {
        if next.flips.is_empty() {
            StateValue::from(link)
        } else {
            StateValue::Flapping
        }
    } else if flipped && next.flips.len() > params.flap_threshold {
        StateValue::Flapping
    } else {
        StateValue::from(link)
    };

    (target != next.state).then_some(StateChange {
        from: next.state,
        to: target,
    })
}

fn prune_flips(state: &mut EntityState, now: Timestamp, params: &StateParams) {
    // a window reaching past the representable range keeps every flip
    let Some(horizon) = now.checked_sub_signed(params.flap_window) else {
        return;
    };
    while state.flips.front().is_some_and(|flip| *flip < horizon) {
        state.flips.pop_front();
    }
}

/// Periodic flap aging: drop expired flips and settle quiet flapping entities
pub fn age(
    current: &EntityState,
    now: Timestamp,
    params: &StateParams,
) -> (EntityState, Option<StateChange>) {
    let mut next = current.clone();
    prune_flips(&mut next, now, params);

    let change = match (next.state, next.observed) {
        (StateValue::Flapping, Some(link)) if next.flips.is_empty() => Some(StateChange {
            from: StateValue::Flapping,
            to: StateValue::from(link),
        }),
        _ => None,
    };

    if let Some(change) = change {
        next.state = change.to;
        next.last_change = now;
    }

    (next, change)
}

/// Derive traffic rates from two successive counter readings
///
/// A counter that went backwards (wrap or reset) yields an indeterminate
/// rate rather than a negative one.
pub fn derive_counters(
    previous: Option<&CounterData>,
    in_octets: u64,
    out_octets: u64,
    now: Timestamp,
) -> CounterData {
    let rate = |old: u64, new: u64, since: Timestamp| -> Option<u64> {
        let elapsed = (now - since).num_milliseconds();
        if elapsed <= 0 || new < old {
            return None;
        }
        let bits = u128::from(new - old) * 8 * 1000;
        u64::try_from(bits / elapsed as u128).ok()
    };

    let (in_bps, out_bps) = match previous {
        Some(prev) => (
            rate(prev.in_octets, in_octets, prev.sampled_at),
            rate(prev.out_octets, out_octets, prev.sampled_at),
        ),
        None => (None, None),
    };

    CounterData {
        in_octets,
        out_octets,
        sampled_at: now,
        in_bps,
        out_bps,
    }
}
