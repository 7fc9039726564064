use crate::peer::{ClientError, ClientEvent, Peer, PeerConfig, Phase};
use log::{debug, error, info, warn};
use shared::{read_frame, write_frame, CodecError, CommandRequest, ServerPacket, World};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Drives a [`Peer`] over a TCP connection to the server.
pub struct Client<W: World> {
    peer: Peer<W>,
    writer: OwnedWriteHalf,
    inbound: mpsc::UnboundedReceiver<Result<ServerPacket, CodecError>>,
    reader: JoinHandle<()>,
    events: Vec<ClientEvent>,
}

impl<W: World> Client<W> {
    pub async fn connect(server_addr: &str, config: PeerConfig) -> Result<Self, ClientError> {
        info!("Connecting to {} as {:?}", server_addr, config.name);
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, writer) = stream.into_split();

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(read_half, inbound_tx));

        Ok(Client {
            peer: Peer::new(config),
            writer,
            inbound,
            reader,
            events: Vec::new(),
        })
    }

    pub fn peer(&self) -> &Peer<W> {
        &self.peer
    }

    /// Every event seen so far.
    pub fn events(&self) -> &[ClientEvent] {
        &self.events
    }

    async fn flush(&mut self) -> Result<(), ClientError> {
        for packet in self.peer.take_outbox() {
            write_frame(&mut self.writer, &packet).await?;
        }
        Ok(())
    }

    fn record_events(&mut self) {
        for event in self.peer.drain_events() {
            match &event {
                ClientEvent::Activated => info!("Now active"),
                ClientEvent::Waiting { queue_position } => {
                    info!("Waiting for the map, position {}", queue_position)
                }
                ClientEvent::Desync { tick } => warn!("Desync at tick {}", tick),
                ClientEvent::PeerLeft { client_id, code } => {
                    info!("{} left ({:?})", client_id, code)
                }
                ClientEvent::Chat { from, text, .. } => info!("<{}> {}", from, text),
                other => debug!("{:?}", other),
            }
            self.events.push(event);
        }
    }

    /// Handles one inbound packet. `Ok(false)` means the connection is over.
    async fn pump(&mut self, packet: Option<Result<ServerPacket, CodecError>>) -> Result<bool, ClientError> {
        let packet = match packet {
            Some(packet) => packet?,
            None => {
                info!("Server closed the connection");
                return Ok(false);
            }
        };

        let handled = self.peer.handle(packet);
        self.record_events();
        handled?;
        self.flush().await?;
        Ok(self.peer.phase() != Phase::Closed)
    }

    /// Joins and plays for `duration`, asking `act` for a command every
    /// `action_every` once active.
    pub async fn run<F>(
        &mut self,
        duration: Duration,
        action_every: Duration,
        mut act: F,
    ) -> Result<(), ClientError>
    where
        F: FnMut(&Peer<W>) -> Option<CommandRequest>,
    {
        self.peer.start();
        self.flush().await?;

        let deadline = sleep(duration);
        tokio::pin!(deadline);
        let mut actions = interval(action_every);
        actions.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                packet = self.inbound.recv() => {
                    if !self.pump(packet).await? {
                        break;
                    }
                },

                _ = actions.tick() => {
                    if !self.peer.is_active() {
                        continue;
                    }
                    if let Some(request) = act(&self.peer) {
                        self.peer.issue(request)?;
                        self.flush().await?;
                    }
                },

                _ = &mut deadline => {
                    info!("Leaving after {:?}", duration);
                    self.peer.quit("done");
                    self.flush().await?;
                    break;
                },
            }
        }
        Ok(())
    }

    /// Waits until `ready` holds for the peer, handling packets meanwhile.
    pub async fn wait_until(
        &mut self,
        limit: Duration,
        mut ready: impl FnMut(&Peer<W>) -> bool,
    ) -> Result<bool, ClientError> {
        let deadline = sleep(limit);
        tokio::pin!(deadline);

        while !ready(&self.peer) {
            tokio::select! {
                packet = self.inbound.recv() => {
                    if !self.pump(packet).await? {
                        return Ok(ready(&self.peer));
                    }
                },
                _ = &mut deadline => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Sends `Join` without waiting for anything.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        self.peer.start();
        self.flush().await
    }

    pub async fn issue(&mut self, request: CommandRequest) -> Result<(), ClientError> {
        self.peer.issue(request)?;
        self.flush().await
    }
}

impl<W: World> Drop for Client<W> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Spawns task that decodes server frames
async fn read_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<Result<ServerPacket, CodecError>>,
) {
    loop {
        match read_frame::<_, ServerPacket>(&mut reader).await {
            Ok(Some(packet)) => {
                if inbound.send(Ok(packet)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Error reading from server: {}", e);
                let _ = inbound.send(Err(e));
                break;
            }
        }
    }
}
