use async_trait::async_trait;
use md3_outstation::{
    build_outstation, BusCommand, BusPublisher, CommandStatus, ConnectState, Md3Outstation,
    Md3OutstationConfig, Md3PointConfig, PointKind, StatusCompletion,
};
use std::sync::{Mutex, Once};
use tracing::Level;

/// Global one-time tracing initialization guard for the integration tests.
static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// Bus stand-in that records every published command and resolves the
/// completion with a configurable status.
#[derive(Debug)]
pub struct RecordingBus {
    pub status: CommandStatus,
    pub commands: Mutex<Vec<BusCommand>>,
    pub states: Mutex<Vec<ConnectState>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::with_status(CommandStatus::Success)
    }

    pub fn with_status(status: CommandStatus) -> Self {
        Self {
            status,
            commands: Mutex::new(Vec::new()),
            states: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<BusCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl BusPublisher for RecordingBus {
    async fn publish(&self, command: BusCommand, completion: Option<StatusCompletion>) {
        self.commands.lock().unwrap().push(command);
        if let Some(completion) = completion {
            completion.resolve(self.status);
        }
    }

    async fn connection_state(&self, state: ConnectState) {
        self.states.lock().unwrap().push(state);
    }
}

/// Bus stand-in that never resolves completions, for timeout paths.
#[derive(Debug, Default)]
pub struct SilentBus;

#[async_trait]
impl BusPublisher for SilentBus {
    async fn publish(&self, _command: BusCommand, completion: Option<StatusCompletion>) {
        if let Some(completion) = completion {
            drop(completion);
        }
    }

    async fn connection_state(&self, _state: ConnectState) {}
}

pub const TEST_STATION: u8 = 0x20;

pub fn test_outstation_config() -> Md3OutstationConfig {
    Md3OutstationConfig {
        outstation_addr: TEST_STATION,
        override_old_timestamps: true,
        timestamp_window_secs: 1800,
        command_timeout_ms: 100,
        max_pending_events: 500,
    }
}

pub fn point(kind: PointKind, index: usize, module: u8, channel: u8) -> Md3PointConfig {
    Md3PointConfig {
        kind,
        index,
        module,
        channel,
    }
}

/// A contiguous run of points of one kind on one module, indexed from
/// `first_index`.
pub fn module_points(
    kind: PointKind,
    module: u8,
    channels: u8,
    first_index: usize,
) -> Vec<Md3PointConfig> {
    (0..channels)
        .map(|c| point(kind, first_index + c as usize, module, c))
        .collect()
}

pub fn test_outstation(points: &[Md3PointConfig]) -> Md3Outstation {
    build_outstation(&test_outstation_config(), points).unwrap()
}
