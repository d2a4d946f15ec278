//! Shared TCP transport.
//!
//! Several outstations (multidrop) can sit on one TCP endpoint; frames are
//! routed to the right port actor by the station address in the header.
//! The connection owns the socket lifecycle and fans link state out to
//! every attached port.

use crate::driver::PortHandle;
use crate::error::{OutstationError, OutstationResult};
use crate::protocol::codec::Md3FrameCodec;
use crate::protocol::frame::{Direction, Message};
use crate::types::{Md3ChannelConfig, TcpRole};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OUTBOUND_QUEUE_CAPACITY: usize = 256;
const CLIENT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

type PortMap = Arc<DashMap<u8, PortHandle>>;

/// One TCP endpoint shared by the outstations attached to it.
pub struct Md3Connection {
    channel_id: String,
    ports: PortMap,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl Md3Connection {
    /// Bind or dial the endpoint and start the transport task.
    pub async fn open(config: &Md3ChannelConfig) -> OutstationResult<Arc<Self>> {
        let channel_id = config.channel_id();
        let ports: PortMap = Arc::new(DashMap::new());
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();

        match config.role {
            TcpRole::Server => {
                let listener = TcpListener::bind(channel_id.as_str()).await.map_err(|e| {
                    OutstationError::Initialization(format!(
                        "failed to bind {channel_id}: {e}"
                    ))
                })?;
                info!(channel = %channel_id, "listening for MD3 master");
                tokio::spawn(run_server(
                    listener,
                    channel_id.clone(),
                    Arc::clone(&ports),
                    outbound_rx,
                    cancel.clone(),
                ));
            }
            TcpRole::Client => {
                tokio::spawn(run_client(
                    channel_id.clone(),
                    Arc::clone(&ports),
                    outbound_rx,
                    cancel.clone(),
                ));
            }
        }

        Ok(Arc::new(Self {
            channel_id,
            ports,
            outbound: outbound_tx,
            cancel,
        }))
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Attach an outstation port under its station address. Duplicate
    /// addresses on one endpoint are a configuration fault.
    pub fn add_outstation(&self, handle: PortHandle) -> OutstationResult<()> {
        let station = handle.station();
        if self.ports.insert(station, handle).is_some() {
            return Err(OutstationError::Configuration(format!(
                "duplicate station address {station} on channel {}",
                self.channel_id
            )));
        }
        Ok(())
    }

    pub fn remove_outstation(&self, station: u8) {
        self.ports.remove(&station);
    }

    /// Response queue shared by every port on this endpoint.
    pub fn sender(&self) -> mpsc::Sender<Message> {
        self.outbound.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Md3Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Open connections keyed by `host:port`, so ports sharing an endpoint
/// share one socket.
#[derive(Default)]
pub struct Md3ConnectionRegistry {
    connections: DashMap<String, Arc<Md3Connection>>,
}

impl Md3ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_open(
        &self,
        config: &Md3ChannelConfig,
    ) -> OutstationResult<Arc<Md3Connection>> {
        let channel_id = config.channel_id();
        if let Some(existing) = self.connections.get(&channel_id) {
            return Ok(Arc::clone(&existing));
        }
        let connection = Md3Connection::open(config).await?;
        self.connections
            .insert(channel_id, Arc::clone(&connection));
        Ok(connection)
    }

    pub fn close(&self, channel_id: &str) {
        if let Some((_, connection)) = self.connections.remove(channel_id) {
            connection.shutdown();
        }
    }
}

async fn run_server(
    listener: TcpListener,
    channel_id: String,
    ports: PortMap,
    mut outbound: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(channel = %channel_id, %peer, "master connected");
                    stream
                }
                Err(e) => {
                    warn!(channel = %channel_id, error = %e, "accept failed");
                    continue;
                }
            },
        };
        run_session(stream, &channel_id, &ports, &mut outbound, &cancel).await;
        if cancel.is_cancelled() {
            break;
        }
    }
}

async fn run_client(
    channel_id: String,
    ports: PortMap,
    mut outbound: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            connected = TcpStream::connect(channel_id.as_str()) => match connected {
                Ok(stream) => {
                    info!(channel = %channel_id, "connected to master");
                    stream
                }
                Err(e) => {
                    warn!(channel = %channel_id, error = %e, "connect failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(CLIENT_RECONNECT_DELAY) => continue,
                    }
                }
            },
        };
        run_session(stream, &channel_id, &ports, &mut outbound, &cancel).await;
        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(CLIENT_RECONNECT_DELAY) => {}
        }
    }
}

/// Drive one socket until it drops: decode inbound frames and route them
/// by station, drain the shared response queue outbound.
async fn run_session(
    stream: TcpStream,
    channel_id: &str,
    ports: &PortMap,
    outbound: &mut mpsc::Receiver<Message>,
    cancel: &CancellationToken,
) {
    let mut framed = Framed::new(stream, Md3FrameCodec::default());
    notify_link_state(ports, true).await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            inbound = framed.next() => match inbound {
                Some(Ok(msg)) => route_message(channel_id, ports, msg).await,
                Some(Err(e)) => {
                    warn!(channel = %channel_id, error = %e, "transport error");
                    break;
                }
                None => {
                    info!(channel = %channel_id, "master disconnected");
                    break;
                }
            },
            response = outbound.recv() => match response {
                Some(msg) => {
                    if let Err(e) = framed.send(msg).await {
                        warn!(channel = %channel_id, error = %e, "send failed");
                        break;
                    }
                }
                None => break,
            },
        }
    }
    notify_link_state(ports, false).await;
}

async fn route_message(channel_id: &str, ports: &PortMap, msg: Message) {
    if msg.header.direction != Direction::MasterToStation {
        debug!(channel = %channel_id, "ignoring frame not addressed to an outstation");
        return;
    }
    let handle = ports
        .get(&msg.header.station)
        .map(|entry| entry.value().clone());
    match handle {
        Some(handle) => handle.inject_message(msg).await,
        None => debug!(
            channel = %channel_id,
            station = msg.header.station,
            "no outstation for station address, frame dropped"
        ),
    }
}

async fn notify_link_state(ports: &PortMap, up: bool) {
    for entry in ports.iter() {
        entry.value().notify_link_state(up).await;
    }
}
