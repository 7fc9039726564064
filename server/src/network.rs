//! Server network layer: TCP sockets feeding the single-threaded session loop

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::session::{Disconnect, Session, SessionEvent};
use crate::transport::{SendStatus, Transport};
use log::{debug, error, info, warn};
use shared::{
    encode_frame, read_frame, write_frame, ClientId, ClientPacket, CodecError, CommandTable,
    ErrorCode, ServerPacket, World,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Frames a writer task may hold before the session sees `WouldBlock`.
const WRITER_BACKLOG: usize = 256;

/// How long shutdown waits for writers to deliver their last frames.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Accepted {
        stream: TcpStream,
        addr: SocketAddr,
    },
    PacketReceived {
        client_id: ClientId,
        packet: ClientPacket,
    },
    /// The client sent bytes that do not decode as a packet.
    Malformed {
        client_id: ClientId,
    },
    ConnectionClosed {
        client_id: ClientId,
    },
    Shutdown,
}

/// Asks a running server to notify its clients and stop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

struct PeerLink {
    frames: mpsc::Sender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// `Transport` over per-connection writer tasks.
#[derive(Default)]
pub struct TcpTransport {
    links: HashMap<ClientId, PeerLink>,
    closing: Vec<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `stream` and spawns its reader and writer tasks.
    pub fn attach(
        &mut self,
        client_id: ClientId,
        stream: TcpStream,
        server_tx: mpsc::UnboundedSender<ServerMessage>,
    ) {
        let (read_half, write_half) = stream.into_split();
        let (frames, frame_rx) = mpsc::channel(WRITER_BACKLOG);

        let reader = tokio::spawn(read_loop(client_id, read_half, server_tx));
        let writer = tokio::spawn(write_loop(client_id, write_half, frame_rx));
        self.links.insert(
            client_id,
            PeerLink {
                frames,
                reader,
                writer,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Waits for closed connections to flush what they were given.
    pub async fn drain(&mut self) {
        for writer in self.closing.drain(..) {
            if tokio::time::timeout(DRAIN_TIMEOUT, writer).await.is_err() {
                warn!("Writer did not finish within {:?}", DRAIN_TIMEOUT);
            }
        }
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, client_id: ClientId, packet: &ServerPacket) -> SendStatus {
        let Some(link) = self.links.get(&client_id) else {
            return SendStatus::Closed;
        };
        let frame = match encode_frame(packet) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Cannot encode packet for {}: {}", client_id, e);
                return SendStatus::Closed;
            }
        };

        match link.frames.try_send(frame) {
            Ok(()) => SendStatus::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendStatus::WouldBlock,
            Err(mpsc::error::TrySendError::Closed(_)) => SendStatus::Closed,
        }
    }

    fn close(&mut self, client_id: ClientId) {
        if let Some(link) = self.links.remove(&client_id) {
            link.reader.abort();
            // Dropping the sender lets the writer finish and shut the socket.
            drop(link.frames);
            self.closing.push(link.writer);
        }
        self.closing.retain(|writer| !writer.is_finished());
    }
}

/// Spawns task that decodes frames from one client
async fn read_loop(
    client_id: ClientId,
    mut reader: OwnedReadHalf,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        let message = match read_frame::<_, ClientPacket>(&mut reader).await {
            Ok(Some(packet)) => ServerMessage::PacketReceived { client_id, packet },
            Ok(None) => {
                debug!("Client {} closed its connection", client_id);
                ServerMessage::ConnectionClosed { client_id }
            }
            Err(CodecError::Io(e)) => {
                debug!("Read from client {} failed: {}", client_id, e);
                ServerMessage::ConnectionClosed { client_id }
            }
            Err(e) => {
                warn!("Malformed data from client {}: {}", client_id, e);
                ServerMessage::Malformed { client_id }
            }
        };

        let done = !matches!(message, ServerMessage::PacketReceived { .. });
        if server_tx.send(message).is_err() || done {
            break;
        }
    }
}

/// Writes queued frames to one client, then shuts the socket down
async fn write_loop(
    client_id: ClientId,
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            debug!("Write to client {} failed: {}", client_id, e);
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown of client {} socket failed: {}", client_id, e);
    }
}

/// Tells a client there is no room and hangs up
async fn reject_full(mut stream: TcpStream, addr: SocketAddr) {
    let packet = ServerPacket::Error {
        code: ErrorCode::ServerFull,
    };
    if let Err(e) = write_frame(&mut stream, &packet).await {
        debug!("Could not tell {} the server is full: {}", addr, e);
    }
    if let Err(e) = stream.shutdown().await {
        debug!("Shutdown of rejected {} failed: {}", addr, e);
    }
}

/// Main server coordinating sockets and the lockstep session
pub struct Server<W: World> {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    session: Session<W>,
    transport: TcpTransport,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl<W: World> Server<W> {
    pub async fn bind(
        config: ServerConfig,
        world: W,
        table: CommandTable,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_address()).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let tick_duration = Duration::from_secs_f64(1.0 / f64::from(config.tick_rate));
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            session: Session::new(config, world, table),
            transport: TcpTransport::new(),
            tick_duration,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Spawns task that accepts incoming connections
    fn spawn_acceptor(&mut self) -> Option<JoinHandle<()>> {
        let listener = self.listener.take()?;
        let server_tx = self.server_tx.clone();

        Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if server_tx
                            .send(ServerMessage::Accepted { stream, addr })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }))
    }

    fn on_accepted(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }
        match self.session.accept() {
            Some(client_id) => {
                info!("Client {} connected from {}", client_id, addr);
                self.transport
                    .attach(client_id, stream, self.server_tx.clone());
            }
            None => {
                warn!("Rejecting {}: server full", addr);
                tokio::spawn(reject_full(stream, addr));
            }
        }
    }

    fn log_events(&mut self) {
        for event in self.session.drain_events() {
            match event {
                SessionEvent::ClientJoined { client_id, name } => {
                    info!("{} is now known as {:?}", client_id, name)
                }
                SessionEvent::ClientActivated { client_id } => {
                    info!("{} joined the game", client_id)
                }
                SessionEvent::ClientLeft {
                    client_id,
                    code: Some(code),
                } => info!("{} left: {}", client_id, code),
                SessionEvent::ClientLeft { client_id, .. } => info!("{} left", client_id),
                SessionEvent::Desync { client_id, tick } => {
                    warn!("{} reports desync at tick {}", client_id, tick)
                }
                SessionEvent::Chat {
                    from,
                    destination,
                    text,
                } => info!("[chat {:?}] {}: {}", destination, from, text),
            }
        }
    }

    /// Main server loop
    pub async fn run(mut self) -> Result<(), ServerError> {
        let acceptor = self.spawn_acceptor();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Accepted { stream, addr }) => {
                            self.on_accepted(stream, addr);
                        }
                        Some(ServerMessage::PacketReceived { client_id, packet }) => {
                            self.session.handle_packet(client_id, packet);
                        }
                        Some(ServerMessage::Malformed { client_id }) => {
                            self.session.disconnect(client_id, Disconnect::Error(ErrorCode::NotExpected));
                        }
                        Some(ServerMessage::ConnectionClosed { client_id }) => {
                            self.session.disconnect(client_id, Disconnect::ConnectionLost);
                        }
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    self.session.run_tick(&mut self.transport);
                    self.log_events();
                },
            }
        }

        if let Some(acceptor) = acceptor {
            acceptor.abort();
        }
        self.session.shutdown(&mut self.transport);
        self.log_events();
        self.transport.drain().await;
        Ok(())
    }
}
