// MD3 outstation protocol driver library entry.
//
// This crate implements the outstation (slave) side of the MD3 SCADA
// protocol: the scan/response builders, command handlers and point-state
// bookkeeping that sit between a polling master on a TCP link and an
// internal event bus. Transport retry policy, configuration file loading
// and the bus implementation itself are collaborator concerns and stay
// outside this crate.

mod bus;
mod connection;
mod driver;
mod error;
mod factory;
mod points;
mod types;

pub mod protocol;

pub use bus::{
    status_completion, BusCommand, BusEvent, BusPublisher, CommandStatus, ConnectState,
    StatusCompletion, StatusWaiter,
};
pub use connection::{Md3Connection, Md3ConnectionRegistry};
pub use driver::{Md3OutstationPort, PortHandle, PortInput};
pub use error::{OutstationError, OutstationResult};
pub use factory::{build_outstation, build_point_table, spawn_port};
pub use points::{
    md3_now, AnalogKind, AnalogPoint, BinaryPoint, Md3Time, PointAddress, PointTable,
    TimeTaggedEvent, DEFAULT_MAX_PENDING_EVENTS,
};
pub use protocol::session::Md3Outstation;
pub use types::{
    Md3ChannelConfig, Md3OutstationConfig, Md3PointConfig, Md3PortConfig, PointKind, TcpRole,
};
