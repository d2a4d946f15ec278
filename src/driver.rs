//! Outstation port actor.
//!
//! All inputs to one outstation (frames from the master, events and
//! completions from the bus, lifecycle changes) are funnelled through a
//! single mpsc inbox and handled one at a time, so the protocol session
//! never needs interior locking.

use crate::bus::{status_completion, BusEvent, BusPublisher, CommandStatus, ConnectState, StatusCompletion};
use crate::points::BinaryPoint;
use crate::protocol::frame::Message;
use crate::protocol::session::Md3Outstation;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PORT_INBOX_CAPACITY: usize = 256;

/// One unit of work for the port actor.
pub enum PortInput {
    /// A decoded request frame from the master.
    Message(Message),
    /// A measurement or state change from the bus, with an optional
    /// completion the caller is waiting on.
    BusEvent {
        event: BusEvent,
        completion: Option<StatusCompletion>,
    },
    /// The transport link toward the master came up or went down.
    LinkState(bool),
    /// Enable or disable request processing without tearing the port down.
    Enable(bool),
    /// Snapshot of the time-tagged binary points, for diagnostics.
    DumpTimeTagged(oneshot::Sender<Vec<BinaryPoint>>),
}

/// The port actor: owns the protocol session and drains the inbox until
/// cancelled.
pub struct Md3OutstationPort {
    outstation: Md3Outstation,
    bus: Arc<dyn BusPublisher>,
    transport: mpsc::Sender<Message>,
    inbox: mpsc::Receiver<PortInput>,
    cancel: CancellationToken,
    enabled: bool,
}

impl Md3OutstationPort {
    /// Build the actor together with its handle. The actor does nothing
    /// until [`run`](Self::run) is driven, typically via `tokio::spawn`.
    pub fn new(
        outstation: Md3Outstation,
        bus: Arc<dyn BusPublisher>,
        transport: mpsc::Sender<Message>,
        command_timeout: Duration,
    ) -> (Self, PortHandle) {
        let (input_tx, inbox) = mpsc::channel(PORT_INBOX_CAPACITY);
        let cancel = CancellationToken::new();
        let station = outstation.station();
        let port = Self {
            outstation,
            bus,
            transport,
            inbox,
            cancel: cancel.clone(),
            enabled: true,
        };
        let handle = PortHandle {
            station,
            input: input_tx,
            cancel,
            command_timeout,
        };
        (port, handle)
    }

    pub async fn run(mut self) {
        info!(station = self.outstation.station(), "outstation port started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    break;
                }
                input = self.inbox.recv() => {
                    match input {
                        Some(input) => self.handle_input(input).await,
                        None => break,
                    }
                }
            }
        }
        info!(station = self.outstation.station(), "outstation port stopped");
    }

    async fn handle_input(&mut self, input: PortInput) {
        match input {
            PortInput::Message(msg) => {
                if !self.enabled {
                    debug!(
                        station = self.outstation.station(),
                        "port disabled, dropping request"
                    );
                    return;
                }
                if let Some(response) = self
                    .outstation
                    .process_message(&msg, self.bus.as_ref())
                    .await
                {
                    if self.transport.send(response).await.is_err() {
                        warn!(
                            station = self.outstation.station(),
                            "transport closed, response dropped"
                        );
                    }
                }
            }
            PortInput::BusEvent { event, completion } => {
                let status = if self.enabled {
                    self.outstation.handle_bus_event(event)
                } else {
                    CommandStatus::Undefined
                };
                if let Some(completion) = completion {
                    completion.resolve(status);
                }
            }
            PortInput::LinkState(up) => {
                let state = if up {
                    ConnectState::Connected
                } else {
                    ConnectState::Disconnected
                };
                self.bus.connection_state(state).await;
            }
            PortInput::Enable(enabled) => {
                info!(station = self.outstation.station(), enabled, "port enable state changed");
                self.enabled = enabled;
            }
            PortInput::DumpTimeTagged(reply) => {
                let _ = reply.send(self.outstation.dump_time_tagged_points());
            }
        }
    }
}

/// Cloneable handle for feeding a running port actor.
#[derive(Clone)]
pub struct PortHandle {
    station: u8,
    input: mpsc::Sender<PortInput>,
    cancel: CancellationToken,
    command_timeout: Duration,
}

impl PortHandle {
    pub fn station(&self) -> u8 {
        self.station
    }

    /// Queue a decoded request frame for processing.
    pub async fn inject_message(&self, msg: Message) {
        if self.input.send(PortInput::Message(msg)).await.is_err() {
            warn!(station = self.station, "port inbox closed, request dropped");
        }
    }

    /// Apply a bus event and wait for the outcome.
    pub async fn handle_bus_event(&self, event: BusEvent) -> CommandStatus {
        let (completion, waiter) = status_completion();
        if self
            .input
            .send(PortInput::BusEvent {
                event,
                completion: Some(completion),
            })
            .await
            .is_err()
        {
            return CommandStatus::Undefined;
        }
        waiter.wait(self.command_timeout).await
    }

    pub async fn notify_link_state(&self, up: bool) {
        let _ = self.input.send(PortInput::LinkState(up)).await;
    }

    pub async fn set_enabled(&self, enabled: bool) {
        let _ = self.input.send(PortInput::Enable(enabled)).await;
    }

    /// Snapshot of the time-tagged binary points, sorted by index.
    pub async fn dump_time_tagged_points(&self) -> Vec<BinaryPoint> {
        let (tx, rx) = oneshot::channel();
        if self.input.send(PortInput::DumpTimeTagged(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
