//! Per-peer stream state machine
//!
//! A stream tracks one remote peer through the invitation handshake on both
//! channels, the three-timestamp clock exchange, sequence-number accounting,
//! and receiver feedback. Streams perform no I/O themselves: every handler
//! returns a list of [`StreamAction`]s the owning session executes, and
//! timers are deadlines the session polls.
//!
//! Clock arithmetic note: `latency` stores the full round-trip `ts3 - ts1`
//! rather than the RFC 6295 halved value, and `time_difference` is
//! `ts3 - ts2 - latency`. Widely deployed AppleMIDI stacks use the same
//! arithmetic, so keeping it preserves interop.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::Rng;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::clock::SessionClock;
use super::events::{SessionEvent, StreamInfo};
use crate::protocol::control::{ControlPacket, EndpointInfo, SyncData};
use crate::protocol::midi::{MidiCommand, MidiPayload};
use crate::protocol::rtp::{RtpHeader, RtpPacket};

/// Cadence of invitation retries
pub(crate) const INVITE_INTERVAL: Duration = Duration::from_millis(1500);
/// Invitation attempts before the stream is discarded
pub(crate) const MAX_INVITE_ATTEMPTS: u32 = 40;
/// Sync cadence until convergence
const SYNC_INTERVAL_FAST: Duration = Duration::from_millis(1500);
/// Sync cadence once converged
const SYNC_INTERVAL_STEADY: Duration = Duration::from_secs(10);
/// Samples after which the sync cadence drops to steady state
const SYNC_CONVERGED_SAMPLES: u32 = 10;
/// Delay before receiver feedback is sent for received packets
const FEEDBACK_DELAY: Duration = Duration::from_secs(1);

/// Stream lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    /// Created as acceptor, no invitation seen yet
    Idle,
    /// Initiator: inviting on the control channel
    InvitingControl,
    /// Initiator: control accepted, inviting on the data channel
    InvitingData,
    /// Handshake complete on both channels
    Connected,
    /// Torn down
    Closed,
}

/// Side effects requested by a stream handler, executed by the session
#[derive(Debug)]
pub(crate) enum StreamAction {
    /// Send a datagram; the session picks the socket by port parity
    Send { buf: Vec<u8>, to: SocketAddr },
    /// Emit an application event
    Emit(SessionEvent),
    /// Remove this stream from the session (emits `StreamRemoved`)
    Remove,
}

/// Per-dispatch context handed to stream handlers by the session
#[derive(Debug, Clone)]
pub(crate) struct StreamContext {
    /// Local session SSRC
    pub ssrc: u32,
    /// Local display name
    pub name: Arc<str>,
    /// Monotonic instant of this dispatch
    pub now: Instant,
    /// Session tick of this dispatch
    pub now_ticks: u64,
}

impl StreamContext {
    pub(crate) fn capture(ssrc: u32, name: &Arc<str>, clock: &SessionClock) -> Self {
        let now = Instant::now();
        Self {
            ssrc,
            name: Arc::clone(name),
            now,
            now_ticks: clock.ticks_at(now),
        }
    }
}

/// State for one remote peer
#[derive(Debug)]
pub(crate) struct Stream {
    state: StreamState,
    /// Invitation token: locally generated as initiator, recorded from the
    /// peer's invitation as acceptor
    token: u32,
    peer_ssrc: Option<u32>,
    peer_name: Option<String>,
    /// Peer control-channel address (rinfo1)
    control_addr: Option<SocketAddr>,
    /// Peer data-channel address (rinfo2)
    data_addr: Option<SocketAddr>,
    is_initiator: bool,

    last_sent_sequence: u16,
    first_received_sequence: Option<u16>,
    last_received_sequence: Option<u16>,
    lost_sequence_numbers: Vec<u16>,

    /// Round-trip `ts3 - ts1` in ticks; `None` until one exchange completed
    latency: Option<i64>,
    /// Peer-to-local clock offset in ticks
    time_difference: Option<i64>,
    sync_samples: u32,

    invite_attempts: u32,
    invite_deadline: Option<Instant>,
    sync_deadline: Option<Instant>,
    feedback_deadline: Option<Instant>,
}

impl Stream {
    /// Create an initiator stream and produce its first invitation
    pub(crate) fn initiator(
        addr: SocketAddr,
        ctx: &StreamContext,
    ) -> (Self, Vec<StreamAction>) {
        let mut stream = Self::with_token(rand::thread_rng().gen(), true);
        stream.state = StreamState::InvitingControl;
        stream.control_addr = Some(addr);
        stream.invite_attempts = 1;
        stream.invite_deadline = Some(ctx.now + INVITE_INTERVAL);

        debug!(%addr, token = stream.token, "inviting peer");
        let actions = vec![stream.send_invitation(addr, ctx)];
        (stream, actions)
    }

    /// Create an acceptor stream for an unmatched inbound invitation
    pub(crate) fn acceptor() -> Self {
        Self::with_token(0, false)
    }

    fn with_token(token: u32, is_initiator: bool) -> Self {
        Self {
            state: StreamState::Idle,
            token,
            peer_ssrc: None,
            peer_name: None,
            control_addr: None,
            data_addr: None,
            is_initiator,
            last_sent_sequence: rand::thread_rng().gen(),
            first_received_sequence: None,
            last_received_sequence: None,
            lost_sequence_numbers: Vec::new(),
            latency: None,
            time_difference: None,
            sync_samples: 0,
            invite_attempts: 0,
            invite_deadline: None,
            sync_deadline: None,
            feedback_deadline: None,
        }
    }

    /// Whether this stream matches a control packet by token or SSRC
    pub(crate) fn matches(&self, ssrc: u32, token: Option<u32>) -> bool {
        self.peer_ssrc == Some(ssrc) || token.is_some_and(|t| t == self.token)
    }

    pub(crate) fn matches_ssrc(&self, ssrc: u32) -> bool {
        self.peer_ssrc == Some(ssrc)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == StreamState::Connected
    }

    /// Snapshot for application events and `Session::streams`
    pub(crate) fn info(&self) -> StreamInfo {
        StreamInfo {
            name: self.peer_name.clone(),
            ssrc: self.peer_ssrc,
            control_addr: self.control_addr,
            data_addr: self.data_addr,
            latency: self.latency,
            connected: self.is_connected(),
            initiator: self.is_initiator,
        }
    }

    /// Earliest pending deadline, for the session's timer arm
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        [
            self.invite_deadline,
            self.sync_deadline,
            self.feedback_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Handle a control packet addressed to this stream
    pub(crate) fn handle_control(
        &mut self,
        packet: &ControlPacket,
        from: SocketAddr,
        ctx: &StreamContext,
    ) -> Vec<StreamAction> {
        match packet {
            ControlPacket::Invitation(info) => self.handle_invitation(info, from, ctx),
            ControlPacket::InvitationAccepted(info) => self.handle_accepted(info, ctx),
            ControlPacket::InvitationRejected(_) => {
                debug!(token = self.token, "invitation rejected by peer");
                self.cancel_timers();
                self.state = StreamState::Closed;
                vec![StreamAction::Remove]
            }
            ControlPacket::End(_) => {
                debug!(peer = ?self.peer_name, "peer ended stream");
                self.cancel_timers();
                self.state = StreamState::Closed;
                vec![StreamAction::Remove]
            }
            ControlPacket::Synchronization(sync) => self.handle_synchronization(*sync, from, ctx),
            ControlPacket::ReceiverFeedback { .. } | ControlPacket::BitrateReceiveLimit { .. } => {
                vec![StreamAction::Emit(SessionEvent::ControlMessage(
                    packet.clone(),
                ))]
            }
        }
    }

    /// Acceptor side: record the peer channel by channel and reciprocate
    fn handle_invitation(
        &mut self,
        info: &EndpointInfo,
        from: SocketAddr,
        ctx: &StreamContext,
    ) -> Vec<StreamAction> {
        self.token = info.token;
        self.peer_ssrc = Some(info.ssrc);
        self.peer_name = Some(info.name.clone());

        let accept = ControlPacket::InvitationAccepted(EndpointInfo::new(
            info.token,
            ctx.ssrc,
            ctx.name.as_ref(),
        ));

        if self.control_addr.is_none() {
            self.control_addr = Some(from);
            debug!(%from, name = %info.name, "invitation on control channel");
            vec![StreamAction::Send {
                buf: accept.encode(),
                to: from,
            }]
        } else if self.data_addr.is_none() {
            self.data_addr = Some(from);
            self.state = StreamState::Connected;
            debug!(%from, name = %info.name, "invitation on data channel, stream connected");
            vec![
                StreamAction::Send {
                    buf: accept.encode(),
                    to: from,
                },
                StreamAction::Emit(SessionEvent::StreamAdded {
                    stream: self.info(),
                }),
            ]
        } else {
            // Duplicate invitation: reply again, the earlier accept was lost.
            trace!(%from, "duplicate invitation");
            vec![StreamAction::Send {
                buf: accept.encode(),
                to: from,
            }]
        }
    }

    /// Initiator side: advance to the data channel, then to connected
    fn handle_accepted(&mut self, info: &EndpointInfo, ctx: &StreamContext) -> Vec<StreamAction> {
        match self.state {
            StreamState::InvitingControl => {
                self.peer_ssrc = Some(info.ssrc);
                self.peer_name = Some(info.name.clone());

                let Some(control) = self.control_addr else {
                    return Vec::new();
                };
                let data = SocketAddr::new(control.ip(), control.port().wrapping_add(1));
                self.data_addr = Some(data);
                self.state = StreamState::InvitingData;
                self.invite_attempts = 1;
                self.invite_deadline = Some(ctx.now + INVITE_INTERVAL);

                debug!(peer = %info.name, "control channel accepted, inviting data channel");
                vec![self.send_invitation(data, ctx)]
            }
            StreamState::InvitingData => {
                self.state = StreamState::Connected;
                self.invite_deadline = None;
                self.sync_deadline = Some(ctx.now + self.sync_interval());

                debug!(peer = ?self.peer_name, "data channel accepted, stream connected");
                let mut actions = vec![StreamAction::Emit(SessionEvent::StreamAdded {
                    stream: self.info(),
                })];
                actions.extend(self.send_sync_initiation(ctx));
                actions
            }
            _ => {
                trace!(state = ?self.state, "ignoring stray invitation_accepted");
                Vec::new()
            }
        }
    }

    /// One step of the three-timestamp exchange
    fn handle_synchronization(
        &mut self,
        sync: SyncData,
        from: SocketAddr,
        ctx: &StreamContext,
    ) -> Vec<StreamAction> {
        let [ts1, ts2, ts3] = sync.timestamps;
        match sync.count {
            0 => {
                // Responder: echo ts1, stamp ts2.
                let reply = ControlPacket::Synchronization(SyncData {
                    ssrc: ctx.ssrc,
                    count: 1,
                    timestamps: [ts1, ctx.now_ticks, 0],
                });
                vec![StreamAction::Send {
                    buf: reply.encode(),
                    to: from,
                }]
            }
            1 => {
                // Initiator: stamp ts3, measure, reply with the full triple.
                let ts3 = ctx.now_ticks;
                self.apply_sync_measurement(ts1, ts2, ts3);
                self.sync_deadline = Some(ctx.now + self.sync_interval());

                let reply = ControlPacket::Synchronization(SyncData {
                    ssrc: ctx.ssrc,
                    count: 2,
                    timestamps: [ts1, ts2, ts3],
                });
                vec![StreamAction::Send {
                    buf: reply.encode(),
                    to: from,
                }]
            }
            2 => {
                // Responder: adopt the initiator's measurements symmetrically.
                self.apply_sync_measurement(ts1, ts2, ts3);
                Vec::new()
            }
            other => {
                trace!(count = other, "ignoring synchronization step");
                Vec::new()
            }
        }
    }

    /// Store latency and clock offset from a completed exchange
    ///
    /// `latency` keeps the full round trip; see the module docs for why it
    /// is not halved.
    #[allow(clippy::cast_possible_wrap)]
    fn apply_sync_measurement(&mut self, ts1: u64, ts2: u64, ts3: u64) {
        let latency = (ts3 as i64).wrapping_sub(ts1 as i64);
        let time_difference = (ts3 as i64).wrapping_sub(ts2 as i64) - latency;
        self.latency = Some(latency);
        self.time_difference = Some(time_difference);
        self.sync_samples = self.sync_samples.saturating_add(1);
        trace!(latency, time_difference, samples = self.sync_samples, "clock sync updated");
    }

    fn sync_interval(&self) -> Duration {
        if self.sync_samples < SYNC_CONVERGED_SAMPLES {
            SYNC_INTERVAL_FAST
        } else {
            SYNC_INTERVAL_STEADY
        }
    }

    /// Handle a received RTP-MIDI packet: track sequence numbers, arm the
    /// feedback timer, and emit per-command events
    pub(crate) fn handle_midi(
        &mut self,
        header: &RtpHeader,
        payload: &MidiPayload,
        ctx: &StreamContext,
    ) -> Vec<StreamAction> {
        let sequence = header.sequence;
        match self.last_received_sequence {
            None => self.first_received_sequence = Some(sequence),
            Some(last) => {
                let mut missing = last.wrapping_add(1);
                while missing != sequence {
                    self.lost_sequence_numbers.push(missing);
                    missing = missing.wrapping_add(1);
                }
            }
        }
        self.last_received_sequence = Some(sequence);
        self.feedback_deadline = Some(ctx.now + FEEDBACK_DELAY);

        // Map the peer's RTP timestamp onto the local clock.
        let base = self.time_difference.unwrap_or(0) - self.latency.unwrap_or(0)
            + i64::from(header.timestamp);

        let mut actions = Vec::with_capacity(payload.commands.len());
        let mut offset: i64 = 0;
        for command in &payload.commands {
            offset += i64::from(command.delta_time);
            let timestamp = u64::try_from(base + offset).unwrap_or(0);
            actions.push(StreamAction::Emit(SessionEvent::Message {
                delta_seconds: SessionClock::ticks_to_seconds(u64::from(command.delta_time)),
                data: command.data.clone(),
                timestamp,
            }));
        }
        actions
    }

    /// Build and address one outbound RTP-MIDI packet
    ///
    /// Returns `None` (dropping the commands) while the stream is not
    /// connected or clock sync has not produced values yet; live MIDI is
    /// lossy by design.
    pub(crate) fn send_midi(
        &mut self,
        commands: &[MidiCommand],
        timestamp: u32,
        ctx: &StreamContext,
    ) -> Option<StreamAction> {
        if !self.is_connected() {
            debug!(peer = ?self.peer_name, "dropping MIDI, stream not connected");
            return None;
        }
        if self.latency.is_none() || self.time_difference.is_none() {
            debug!(peer = ?self.peer_name, "dropping MIDI, clock sync incomplete");
            return None;
        }
        let to = self.data_addr?;

        let payload = match MidiPayload::from_commands(commands.to_vec()).encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, "failed to encode MIDI payload");
                return None;
            }
        };

        self.last_sent_sequence = self.last_sent_sequence.wrapping_add(1);
        let packet = RtpPacket::new(
            RtpHeader::new_midi(self.last_sent_sequence, timestamp, ctx.ssrc),
            payload,
        );
        Some(StreamAction::Send {
            buf: packet.encode(),
            to,
        })
    }

    /// Fire any due deadlines
    pub(crate) fn poll(&mut self, ctx: &StreamContext) -> Vec<StreamAction> {
        let mut actions = Vec::new();

        if self.invite_deadline.is_some_and(|d| d <= ctx.now) {
            if self.invite_attempts >= MAX_INVITE_ATTEMPTS {
                warn!(token = self.token, attempts = self.invite_attempts, "invitation timed out");
                self.cancel_timers();
                self.state = StreamState::Closed;
                actions.push(StreamAction::Remove);
                return actions;
            }
            let target = match self.state {
                StreamState::InvitingControl => self.control_addr,
                StreamState::InvitingData => self.data_addr,
                _ => None,
            };
            if let Some(target) = target {
                self.invite_attempts += 1;
                self.invite_deadline = Some(ctx.now + INVITE_INTERVAL);
                actions.push(self.send_invitation(target, ctx));
            } else {
                self.invite_deadline = None;
            }
        }

        if self.sync_deadline.is_some_and(|d| d <= ctx.now) {
            self.sync_deadline = Some(ctx.now + self.sync_interval());
            actions.extend(self.send_sync_initiation(ctx));
        }

        if self.feedback_deadline.is_some_and(|d| d <= ctx.now) {
            self.feedback_deadline = None;
            if let (Some(sequence), Some(to)) = (self.last_received_sequence, self.control_addr) {
                self.lost_sequence_numbers.clear();
                let feedback = ControlPacket::ReceiverFeedback {
                    ssrc: ctx.ssrc,
                    sequence,
                };
                actions.push(StreamAction::Send {
                    buf: feedback.encode(),
                    to,
                });
            }
        }

        actions
    }

    /// Orderly teardown: cancel timers and notify a connected peer
    pub(crate) fn end(&mut self, ctx: &StreamContext) -> Vec<StreamAction> {
        self.cancel_timers();
        let was_connected = self.is_connected();
        self.state = StreamState::Closed;

        if was_connected {
            if let Some(to) = self.control_addr {
                let bye = ControlPacket::End(EndpointInfo::new(
                    self.token,
                    ctx.ssrc,
                    ctx.name.as_ref(),
                ));
                return vec![StreamAction::Send {
                    buf: bye.encode(),
                    to,
                }];
            }
        }
        Vec::new()
    }

    fn cancel_timers(&mut self) {
        self.invite_deadline = None;
        self.sync_deadline = None;
        self.feedback_deadline = None;
    }

    fn send_invitation(&self, to: SocketAddr, ctx: &StreamContext) -> StreamAction {
        let invitation = ControlPacket::Invitation(EndpointInfo::new(
            self.token,
            ctx.ssrc,
            ctx.name.as_ref(),
        ));
        StreamAction::Send {
            buf: invitation.encode(),
            to,
        }
    }

    /// Start a sync exchange; CK packets travel on the data channel
    fn send_sync_initiation(&self, ctx: &StreamContext) -> Option<StreamAction> {
        let to = self.data_addr?;
        let sync = ControlPacket::Synchronization(SyncData {
            ssrc: ctx.ssrc,
            count: 0,
            timestamps: [ctx.now_ticks, 0, 0],
        });
        Some(StreamAction::Send {
            buf: sync.encode(),
            to,
        })
    }

    #[cfg(test)]
    pub(crate) fn latency(&self) -> Option<i64> {
        self.latency
    }

    #[cfg(test)]
    pub(crate) fn time_difference(&self) -> Option<i64> {
        self.time_difference
    }

    #[cfg(test)]
    pub(crate) fn lost_sequence_numbers(&self) -> &[u16] {
        &self.lost_sequence_numbers
    }

    #[cfg(test)]
    pub(crate) fn first_received_sequence(&self) -> Option<u16> {
        self.first_received_sequence
    }

    #[cfg(test)]
    pub(crate) fn feedback_armed(&self) -> bool {
        self.feedback_deadline.is_some()
    }

    #[cfg(test)]
    pub(crate) fn retry_armed(&self) -> bool {
        self.invite_deadline.is_some()
    }

    #[cfg(test)]
    pub(crate) fn last_sent_sequence(&self) -> u16 {
        self.last_sent_sequence
    }
}
