//! Session events for application integration

use std::net::SocketAddr;

use crate::protocol::control::ControlPacket;

/// A connected (or connecting) peer, as reported to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Peer display name, once learned from the handshake
    pub name: Option<String>,
    /// Peer SSRC, once learned from the handshake
    pub ssrc: Option<u32>,
    /// Peer control-channel address
    pub control_addr: Option<SocketAddr>,
    /// Peer data-channel address
    pub data_addr: Option<SocketAddr>,
    /// Measured round-trip latency in session ticks, once clock sync ran
    pub latency: Option<i64>,
    /// Whether the handshake completed on both channels
    pub connected: bool,
    /// Whether the local session initiated this stream
    pub initiator: bool,
}

/// Events emitted by a session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Both sockets are bound and listening
    Ready,

    /// A stream completed its handshake
    StreamAdded {
        /// The connected peer
        stream: StreamInfo,
    },

    /// A stream ended, was rejected, or timed out
    StreamRemoved {
        /// The removed peer
        stream: StreamInfo,
    },

    /// One MIDI command received from a peer
    Message {
        /// Command delta-time in seconds (ticks / session rate)
        delta_seconds: f64,
        /// Raw MIDI bytes, running status re-expanded
        data: Vec<u8>,
        /// Event time in local session ticks
        timestamp: u64,
    },

    /// A control packet of interest to the application (receiver feedback,
    /// bitrate limits)
    ControlMessage(ControlPacket),

    /// A non-fatal transport error; the datagram was dropped
    Error {
        /// Description of the failure
        message: String,
    },
}
