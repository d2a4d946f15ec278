//! Construction of outstation ports from configuration.
//!
//! Configuration faults (bad addresses, duplicate points) are fatal here,
//! before any socket is opened or task spawned.

use crate::bus::BusPublisher;
use crate::connection::Md3ConnectionRegistry;
use crate::driver::{Md3OutstationPort, PortHandle};
use crate::error::{OutstationError, OutstationResult};
use crate::points::{PointAddress, PointTable};
use crate::protocol::frame::MAX_CHANNELS_PER_MODULE;
use crate::protocol::session::{Md3Outstation, SystemFlags};
use crate::types::{Md3OutstationConfig, Md3PointConfig, Md3PortConfig, PointKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Validate the point list and build the lookup table.
pub fn build_point_table(points: &[Md3PointConfig]) -> OutstationResult<PointTable> {
    let mut table = PointTable::new();
    for point in points {
        if point.channel >= MAX_CHANNELS_PER_MODULE {
            return Err(OutstationError::Configuration(format!(
                "point index {} channel {} out of range, modules carry {} channels",
                point.index, point.channel, MAX_CHANNELS_PER_MODULE
            )));
        }
        let address = PointAddress::new(point.module, point.channel);
        match point.kind {
            PointKind::Binary => table.insert_binary(address, point.index)?,
            PointKind::Analog => table.insert_analog(address, point.index)?,
            PointKind::Counter => table.insert_counter(address, point.index)?,
        }
    }
    Ok(table)
}

/// Build a protocol session from configuration, with the standard system
/// flag queries.
pub fn build_outstation(
    config: &Md3OutstationConfig,
    points: &[Md3PointConfig],
) -> OutstationResult<Md3Outstation> {
    if config.outstation_addr > 0x7f {
        return Err(OutstationError::Configuration(format!(
            "outstation address {} out of range 0..=127",
            config.outstation_addr
        )));
    }
    let mut table = build_point_table(points)?;
    table.set_event_capacity(config.max_pending_events);
    Ok(Md3Outstation::new(config, table, SystemFlags::defaults()))
}

/// Build the port, attach it to its (possibly shared) TCP channel, and
/// spawn the actor.
pub async fn spawn_port(
    config: &Md3PortConfig,
    registry: &Md3ConnectionRegistry,
    bus: Arc<dyn BusPublisher>,
) -> OutstationResult<PortHandle> {
    let outstation = build_outstation(&config.outstation, &config.points)?;
    let connection = registry.get_or_open(&config.channel).await?;
    let command_timeout = Duration::from_millis(config.outstation.command_timeout_ms);
    let (port, handle) =
        Md3OutstationPort::new(outstation, bus, connection.sender(), command_timeout);
    connection.add_outstation(handle.clone())?;
    tokio::spawn(port.run());
    info!(
        station = handle.station(),
        channel = %connection.channel_id(),
        points = config.points.len(),
        "outstation port spawned"
    );
    Ok(handle)
}
