//! Configuration model for an MD3 outstation port: the TCP channel it is
//! reachable on, the outstation identity and behavioural knobs, and the
//! point map that ties bus indexes to module/channel addresses.

use crate::points::DEFAULT_MAX_PENDING_EVENTS;
use crate::protocol::frame::DEFAULT_TIMESTAMP_WINDOW_SECS;
use serde::{Deserialize, Serialize};

/// Whether the port listens for the master or dials out to it. Most MD3
/// deployments have the outstation listening.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TcpRole {
    #[default]
    Server,
    Client,
}

/// TCP channel settings. Several outstations (multidrop) may share one
/// channel, distinguished by station address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Md3ChannelConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub role: TcpRole,
}

impl Md3ChannelConfig {
    /// Registry key shared by every outstation on the same endpoint.
    pub fn channel_id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-outstation behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Md3OutstationConfig {
    /// Station address carried in every frame, 0..=0x7f.
    pub outstation_addr: u8,
    /// Replace event timestamps that are too far from local time with the
    /// local receive time.
    #[serde(default = "Md3OutstationConfig::default_override_old_timestamps")]
    pub override_old_timestamps: bool,
    /// Tolerated distance, in seconds, between an event timestamp and local
    /// time before the override kicks in.
    #[serde(default = "Md3OutstationConfig::default_timestamp_window_secs")]
    pub timestamp_window_secs: u64,
    /// How long a control request may wait on the bus before the master
    /// gets a reject.
    #[serde(default = "Md3OutstationConfig::default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Bound on the queued time-tagged events; the oldest events are
    /// dropped beyond it when the master never polls them off.
    #[serde(default = "Md3OutstationConfig::default_max_pending_events")]
    pub max_pending_events: usize,
}

impl Md3OutstationConfig {
    fn default_override_old_timestamps() -> bool {
        true
    }

    fn default_timestamp_window_secs() -> u64 {
        DEFAULT_TIMESTAMP_WINDOW_SECS
    }

    fn default_command_timeout_ms() -> u64 {
        5000
    }

    fn default_max_pending_events() -> usize {
        DEFAULT_MAX_PENDING_EVENTS
    }
}

/// Kind of point exposed at a module/channel address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PointKind {
    Binary,
    Analog,
    Counter,
}

/// One configured point: a bus-side index mapped to an MD3 module/channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Md3PointConfig {
    pub kind: PointKind,
    /// Bus-side point index, unique within its kind.
    pub index: usize,
    pub module: u8,
    /// Channel within the module, 0..=15.
    pub channel: u8,
}

/// Complete configuration for one MD3 outstation port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Md3PortConfig {
    pub channel: Md3ChannelConfig,
    pub outstation: Md3OutstationConfig,
    #[serde(default)]
    pub points: Vec<Md3PointConfig>,
}
