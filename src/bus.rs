use crate::points::Md3Time;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::oneshot;

/// Result of handing a command or data event to the bus, mirrored back to
/// the master as control OK / reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    NotSupported,
    Timeout,
    Undefined,
}

/// Link state of the upstream side of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Connected,
    Disconnected,
}

/// Inbound bus data event applied to the point table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Analog { index: usize, value: u16 },
    Counter { index: usize, value: u16 },
    Binary { index: usize, value: u8, timestamp: Md3Time },
    AnalogQuality { index: usize, online: bool },
    CounterQuality { index: usize, online: bool },
    ConnectState(ConnectState),
}

/// Outbound command published by the command handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusCommand {
    PulseOutput { module: u8, channel: u8 },
    DigitalOutput { module: u8, output: u16 },
    AnalogOutput { module: u8, channel: u8, value: u16 },
    FreezeResetCounters { module: u8 },
    SetDateTime { millis: Md3Time },
}

/// Resolver half of a command status exchange. Dropping it unresolved
/// reports `Undefined` to the waiter.
#[derive(Debug)]
pub struct StatusCompletion(oneshot::Sender<CommandStatus>);

impl StatusCompletion {
    pub fn resolve(self, status: CommandStatus) {
        // The waiter may have timed out and gone away; that is not an error.
        let _ = self.0.send(status);
    }
}

/// Waiter half of a command status exchange. The caller awaits the
/// completion with a bound; the actor inbox holds back further protocol
/// messages meanwhile, so per-outstation serialization is preserved.
#[derive(Debug)]
pub struct StatusWaiter(oneshot::Receiver<CommandStatus>);

impl StatusWaiter {
    pub async fn wait(self, timeout: Duration) -> CommandStatus {
        match tokio::time::timeout(timeout, self.0).await {
            Ok(Ok(status)) => status,
            Ok(Err(_)) => CommandStatus::Undefined,
            Err(_) => CommandStatus::Timeout,
        }
    }
}

/// Create a linked completion/waiter pair.
pub fn status_completion() -> (StatusCompletion, StatusWaiter) {
    let (tx, rx) = oneshot::channel();
    (StatusCompletion(tx), StatusWaiter(rx))
}

/// The bus side consumed by the outstation core. Implementations must
/// always resolve a supplied completion eventually; the engine additionally
/// bounds its wait with the configured command timeout.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish one command, optionally requesting a status callback.
    async fn publish(&self, command: BusCommand, completion: Option<StatusCompletion>);

    /// Report the outstation's transport link state onto the bus.
    async fn connection_state(&self, state: ConnectState);
}
