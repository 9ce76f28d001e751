pub mod actors;
pub mod api;
pub mod config;
pub mod daemon;
pub mod devices;
pub mod events;
pub mod maintenance;
pub mod monitors;
pub mod snmp;
pub mod storage;
pub mod util;

use chrono::{DateTime, Utc};

/// Wall-clock timestamp used for every state and event record
pub type Timestamp = DateTime<Utc>;
