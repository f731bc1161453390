//! Session: two UDP endpoints, stream registry, and outbound bundling
//!
//! A session owns the control socket on its configured port and the data
//! socket on `port + 1`. All stream state is mutated by a single actor task;
//! the [`Session`] handle talks to it over a command channel.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use super::clock::SessionClock;
use super::config::{IpFamily, SessionConfig};
use super::events::{SessionEvent, StreamInfo};
use super::stream::{Stream, StreamAction, StreamContext};
use crate::discovery::Discovery;
use crate::error::{Result, RtpMidiError};
use crate::protocol::constants::PAYLOAD_TYPE_MIDI;
use crate::protocol::control::ControlPacket;
use crate::protocol::midi::{MidiCommand, MidiPayload};
use crate::protocol::rtp::RtpHeader;

/// Maximum UDP packet size accepted on either socket
const MAX_PACKET_SIZE: usize = 2048;

/// Largest delta-time expressible in a four-byte varint
const MAX_DELTA_TICKS: u64 = 0x0FFF_FFFF;

/// Commands from the public handle to the actor task
enum SessionCommand {
    SendMessage {
        comex_time: Option<u64>,
        data: Vec<u8>,
    },
    Connect(SocketAddr),
    Streams(oneshot::Sender<Vec<StreamInfo>>),
    End(oneshot::Sender<()>),
}

/// An RTP-MIDI session
///
/// Create with [`Session::new`], subscribe to events with
/// [`Session::take_events`], then [`Session::start`] to bind the sockets.
pub struct Session {
    config: SessionConfig,
    clock: SessionClock,
    cmd_tx: Option<mpsc::UnboundedSender<SessionCommand>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    discovery: Option<Arc<Discovery>>,
    actor: Option<tokio::task::JoinHandle<()>>,
}

impl Session {
    /// Create an unstarted session
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            clock: SessionClock::new(),
            cmd_tx: None,
            event_tx,
            event_rx: Some(event_rx),
            discovery: None,
            actor: None,
        }
    }

    /// The session's SSRC
    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.config.ssrc
    }

    /// The control port (the data socket binds `port + 1`)
    #[must_use]
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// The session clock, for translating external timestamps
    #[must_use]
    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    /// Take the event receiver; returns `None` after the first call
    ///
    /// Subscribe before [`Session::start`]: events emitted with no
    /// subscriber are discarded.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Inject the mDNS collaborator used when the config asks for
    /// advertisement
    pub fn set_discovery(&mut self, discovery: Arc<Discovery>) {
        self.discovery = Some(discovery);
    }

    /// Bind both sockets, start the actor, and advertise if configured
    ///
    /// # Errors
    ///
    /// Returns `RtpMidiError::InvalidState` for an odd control port or a
    /// session that is already running, and `RtpMidiError::Bind` when either
    /// socket cannot be bound. Bind failures are fatal.
    pub async fn start(&mut self) -> Result<()> {
        if self.cmd_tx.is_some() {
            return Err(RtpMidiError::InvalidState {
                message: "session already started".to_string(),
            });
        }
        if self.config.port % 2 != 0 {
            return Err(RtpMidiError::InvalidState {
                message: format!("control port {} must be even", self.config.port),
            });
        }

        // Events emitted with no subscriber fail to send and are discarded.
        drop(self.event_rx.take());

        let ip: IpAddr = match self.config.ip_family {
            IpFamily::V4 => Ipv4Addr::UNSPECIFIED.into(),
            IpFamily::V6 => Ipv6Addr::UNSPECIFIED.into(),
        };
        let control_addr = SocketAddr::new(ip, self.config.port);
        let data_addr = SocketAddr::new(ip, self.config.port.wrapping_add(1));

        let control_sock = UdpSocket::bind(control_addr)
            .await
            .map_err(|source| RtpMidiError::Bind {
                addr: control_addr,
                source,
            })?;
        let data_sock = UdpSocket::bind(data_addr)
            .await
            .map_err(|source| RtpMidiError::Bind {
                addr: data_addr,
                source,
            })?;

        info!(
            name = %self.config.local_name,
            port = self.config.port,
            ssrc = format_args!("{:08x}", self.config.ssrc),
            "session listening"
        );

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let actor = SessionActor {
            ssrc: self.config.ssrc,
            name: Arc::from(self.config.local_name.as_str()),
            bundle: self.config.bundle,
            clock: self.clock.clone(),
            control_sock: Arc::new(control_sock),
            data_sock: Arc::new(data_sock),
            streams: Vec::new(),
            queue: Vec::new(),
            flush_deadline: None,
            event_tx: self.event_tx.clone(),
            cmd_rx,
        };
        self.actor = Some(tokio::spawn(actor.run()));
        self.cmd_tx = Some(cmd_tx);

        if self.config.published {
            if let Some(discovery) = &self.discovery {
                // Discovery trouble is not fatal; only bind failures are.
                if let Err(err) = discovery.publish(&self.config.bonjour_name, self.config.port) {
                    warn!(%err, "failed to advertise session");
                    let _ = self.event_tx.send(SessionEvent::Error {
                        message: err.to_string(),
                    });
                }
            }
        }

        let _ = self.event_tx.send(SessionEvent::Ready);
        Ok(())
    }

    /// Enqueue a MIDI command for every connected stream
    ///
    /// # Errors
    ///
    /// Returns `RtpMidiError::SessionClosed` if the session is not running.
    pub fn send_message(&self, data: Vec<u8>) -> Result<()> {
        self.command(SessionCommand::SendMessage {
            comex_time: None,
            data,
        })
    }

    /// Enqueue a MIDI command with an explicit time in session ticks
    ///
    /// Use [`SessionClock::wall_to_ticks`] via [`Session::clock`] to
    /// translate wall-clock timestamps.
    ///
    /// # Errors
    ///
    /// Returns `RtpMidiError::SessionClosed` if the session is not running.
    pub fn send_message_at(&self, ticks: u64, data: Vec<u8>) -> Result<()> {
        self.command(SessionCommand::SendMessage {
            comex_time: Some(ticks),
            data,
        })
    }

    /// Invite a remote peer; progress arrives as session events
    ///
    /// # Errors
    ///
    /// Returns `RtpMidiError::SessionClosed` if the session is not running.
    pub fn connect(&self, addr: SocketAddr) -> Result<()> {
        self.command(SessionCommand::Connect(addr))
    }

    /// Snapshot of the session's streams
    ///
    /// # Errors
    ///
    /// Returns `RtpMidiError::SessionClosed` if the session is not running.
    pub async fn streams(&self) -> Result<Vec<StreamInfo>> {
        let (tx, rx) = oneshot::channel();
        self.command(SessionCommand::Streams(tx))?;
        rx.await.map_err(|_| RtpMidiError::SessionClosed)
    }

    /// Orderly shutdown: notify peers, close sockets, withdraw the
    /// advertisement
    pub async fn end(&mut self) {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let (tx, rx) = oneshot::channel();
            if cmd_tx.send(SessionCommand::End(tx)).is_ok() {
                let _ = rx.await;
            }
        }
        if let Some(actor) = self.actor.take() {
            let _ = actor.await;
        }
        if self.config.published {
            if let Some(discovery) = &self.discovery {
                if let Err(err) = discovery.unpublish(&self.config.bonjour_name) {
                    debug!(%err, "failed to withdraw advertisement");
                }
            }
        }
    }

    fn command(&self, command: SessionCommand) -> Result<()> {
        self.cmd_tx
            .as_ref()
            .ok_or(RtpMidiError::SessionClosed)?
            .send(command)
            .map_err(|_| RtpMidiError::SessionClosed)
    }
}

/// A queued outbound command awaiting the next flush
struct QueuedCommand {
    comex_time: u64,
    data: Vec<u8>,
}

/// The single task that owns all session and stream state
struct SessionActor {
    ssrc: u32,
    name: Arc<str>,
    bundle: bool,
    clock: SessionClock,
    control_sock: Arc<UdpSocket>,
    data_sock: Arc<UdpSocket>,
    streams: Vec<Stream>,
    queue: Vec<QueuedCommand>,
    flush_deadline: Option<Instant>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
}

impl SessionActor {
    async fn run(mut self) {
        let control_sock = Arc::clone(&self.control_sock);
        let data_sock = Arc::clone(&self.data_sock);
        let mut control_buf = [0u8; MAX_PACKET_SIZE];
        let mut data_buf = [0u8; MAX_PACKET_SIZE];

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                received = control_sock.recv_from(&mut control_buf) => {
                    match received {
                        Ok((len, from)) => self.handle_datagram(&control_buf[..len], from).await,
                        Err(err) => self.report_error(&err),
                    }
                }
                received = data_sock.recv_from(&mut data_buf) => {
                    match received {
                        Ok((len, from)) => self.handle_datagram(&data_buf[..len], from).await,
                        Err(err) => self.report_error(&err),
                    }
                }
                command = self.cmd_rx.recv() => {
                    match command {
                        Some(command) => {
                            if self.handle_command(command).await {
                                return;
                            }
                        }
                        None => return,
                    }
                }
                () = async {
                    match deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.poll_timers().await;
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.streams
            .iter()
            .filter_map(Stream::next_deadline)
            .chain(self.flush_deadline)
            .min()
    }

    fn context(&self) -> StreamContext {
        StreamContext::capture(self.ssrc, &self.name, &self.clock)
    }

    /// Demultiplex one inbound datagram: control by magic, RTP-MIDI
    /// otherwise. Invalid datagrams are dropped silently.
    async fn handle_datagram(&mut self, buf: &[u8], from: SocketAddr) {
        if ControlPacket::is_control(buf) {
            match ControlPacket::decode(buf) {
                Ok(packet) => self.handle_control(packet, from).await,
                Err(err) => trace!(%from, %err, "dropping invalid control packet"),
            }
            return;
        }

        let (header, consumed) = match RtpHeader::decode(buf) {
            Ok(decoded) => decoded,
            Err(err) => {
                trace!(%from, %err, "dropping non-RTP datagram");
                return;
            }
        };
        if header.payload_type != PAYLOAD_TYPE_MIDI {
            trace!(%from, payload_type = header.payload_type, "dropping non-MIDI RTP packet");
            return;
        }
        let payload = match MidiPayload::decode(&buf[consumed..]) {
            Ok(payload) => payload,
            Err(err) => {
                trace!(%from, %err, "dropping malformed RTP-MIDI payload");
                return;
            }
        };

        let ctx = self.context();
        let Some(index) = self.streams.iter().position(|s| s.matches_ssrc(header.ssrc)) else {
            trace!(%from, ssrc = format_args!("{:08x}", header.ssrc), "MIDI from unknown stream");
            return;
        };
        let actions = self.streams[index].handle_midi(&header, &payload, &ctx);
        self.execute(index, actions).await;
    }

    async fn handle_control(&mut self, packet: ControlPacket, from: SocketAddr) {
        let ctx = self.context();
        let index = self
            .streams
            .iter()
            .position(|s| s.matches(packet.ssrc(), packet.token()));

        let index = match index {
            Some(index) => index,
            None => {
                if matches!(packet, ControlPacket::Invitation(_)) {
                    self.streams.push(Stream::acceptor());
                    self.streams.len() - 1
                } else {
                    trace!(%from, "control packet for unknown stream");
                    return;
                }
            }
        };

        let actions = self.streams[index].handle_control(&packet, from, &ctx);
        self.execute(index, actions).await;
    }

    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::SendMessage { comex_time, data } => {
                let comex_time = comex_time.unwrap_or_else(|| self.clock.now64());
                self.queue.push(QueuedCommand { comex_time, data });
                if self.bundle {
                    // Deferred to the next scheduler turn; one flush
                    // collapses every command queued in between.
                    if self.flush_deadline.is_none() {
                        self.flush_deadline = Some(Instant::now());
                    }
                } else {
                    self.flush().await;
                }
                false
            }
            SessionCommand::Connect(addr) => {
                let ctx = self.context();
                let (stream, actions) = Stream::initiator(addr, &ctx);
                self.streams.push(stream);
                let index = self.streams.len() - 1;
                self.execute(index, actions).await;
                false
            }
            SessionCommand::Streams(reply) => {
                let _ = reply.send(self.streams.iter().map(Stream::info).collect());
                false
            }
            SessionCommand::End(reply) => {
                let ctx = self.context();
                for index in (0..self.streams.len()).rev() {
                    let actions = self.streams[index].end(&ctx);
                    self.execute(index, actions).await;
                    let stream = self.streams.remove(index);
                    let _ = self.event_tx.send(SessionEvent::StreamRemoved {
                        stream: stream.info(),
                    });
                }
                debug!(name = %self.name, "session ended");
                let _ = reply.send(());
                true
            }
        }
    }

    async fn poll_timers(&mut self) {
        for index in (0..self.streams.len()).rev() {
            let ctx = self.context();
            let actions = self.streams[index].poll(&ctx);
            self.execute(index, actions).await;
        }

        if self
            .flush_deadline
            .is_some_and(|deadline| deadline <= Instant::now())
        {
            self.flush().await;
        }
    }

    /// Bundle the pending queue into one packet per connected stream
    async fn flush(&mut self) {
        self.flush_deadline = None;
        let mut queued = std::mem::take(&mut self.queue);
        if queued.is_empty() {
            return;
        }
        queued.sort_by_key(|command| command.comex_time);

        let now64 = self.clock.now64();
        let base = queued[0].comex_time.min(now64);

        // Strictly-relative deltas: first from base, then command to command.
        let mut previous = base;
        let commands: Vec<MidiCommand> = queued
            .into_iter()
            .map(|command| {
                #[allow(clippy::cast_possible_truncation)]
                let delta = command
                    .comex_time
                    .saturating_sub(previous)
                    .min(MAX_DELTA_TICKS) as u32;
                previous = command.comex_time;
                MidiCommand::new(delta, command.data)
            })
            .collect();

        let timestamp = self.clock.now();
        for index in 0..self.streams.len() {
            let ctx = self.context();
            if let Some(action) = self.streams[index].send_midi(&commands, timestamp, &ctx) {
                self.execute(index, vec![action]).await;
            }
        }
    }

    /// Execute a handler's actions for the stream at `index`
    async fn execute(&mut self, index: usize, actions: Vec<StreamAction>) {
        for action in actions {
            match action {
                StreamAction::Send { buf, to } => self.send_to(&buf, to).await,
                StreamAction::Emit(event) => {
                    let _ = self.event_tx.send(event);
                }
                StreamAction::Remove => {
                    let stream = self.streams.remove(index);
                    let _ = self.event_tx.send(SessionEvent::StreamRemoved {
                        stream: stream.info(),
                    });
                    return;
                }
            }
        }
    }

    /// Send a datagram on the socket matching the destination's channel:
    /// even ports are control, odd ports are data
    async fn send_to(&self, buf: &[u8], to: SocketAddr) {
        let socket = if to.port() % 2 == 0 {
            &self.control_sock
        } else {
            &self.data_sock
        };
        if let Err(err) = socket.send_to(buf, to).await {
            warn!(%to, %err, "socket send failed, dropping packet");
            self.report_error(&err);
        }
    }

    fn report_error(&self, err: &std::io::Error) {
        let _ = self.event_tx.send(SessionEvent::Error {
            message: err.to_string(),
        });
    }
}
