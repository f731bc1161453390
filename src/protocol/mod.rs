//! Wire-format codecs for RTP headers, `AppleMIDI` control frames, and
//! RTP-MIDI payloads

#![allow(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(missing_docs)]

pub mod control;
pub mod midi;
pub mod rtp;

#[cfg(test)]
mod control_tests;
#[cfg(test)]
mod rtp_tests;

pub use control::{ControlDecodeError, ControlPacket, EndpointInfo, SyncData};
pub use rtp::{RtpDecodeError, RtpHeader, RtpPacket};

/// Protocol constants for `AppleMIDI`
pub mod constants {
    /// Magic prefix of every `AppleMIDI` control packet
    pub const CONTROL_MAGIC: [u8; 2] = [0xFF, 0xFF];

    /// `AppleMIDI` protocol version carried in the invitation family
    pub const PROTOCOL_VERSION: u32 = 2;

    /// RTP payload type for RTP-MIDI command sections
    pub const PAYLOAD_TYPE_MIDI: u8 = 0x61;

    /// Default control port; the data port is always `control + 1`
    pub const DEFAULT_PORT: u16 = 5004;

    /// Session clock rate in ticks per second (100 µs resolution)
    pub const SESSION_RATE: u32 = 10_000;
}
