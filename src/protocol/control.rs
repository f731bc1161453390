//! `AppleMIDI` session control packets
//!
//! Every control packet starts with the magic prefix `0xFFFF` followed by a
//! two-byte ASCII command code. The invitation family shares one trailing
//! layout; synchronization and feedback packets have their own.

use bytes::{Buf, BufMut};
use thiserror::Error;

use super::constants::{CONTROL_MAGIC, PROTOCOL_VERSION};

const CMD_INVITATION: u16 = 0x494E; // "IN"
const CMD_INVITATION_ACCEPTED: u16 = 0x4F4B; // "OK"
const CMD_INVITATION_REJECTED: u16 = 0x4E4F; // "NO"
const CMD_END: u16 = 0x4259; // "BY"
const CMD_SYNCHRONIZATION: u16 = 0x434B; // "CK"
const CMD_RECEIVER_FEEDBACK: u16 = 0x5253; // "RS"
const CMD_BITRATE_RECEIVE_LIMIT: u16 = 0x524C; // "RL"

/// Trailing fields shared by the invitation family and `End`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Protocol version, 2 on the wire
    pub version: u32,
    /// Initiator-chosen token correlating an invitation with its reply
    pub token: u32,
    /// Sender's SSRC
    pub ssrc: u32,
    /// Sender's display name
    pub name: String,
}

impl EndpointInfo {
    /// Create an `EndpointInfo` with the current protocol version
    #[must_use]
    pub fn new(token: u32, ssrc: u32, name: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            token,
            ssrc,
            name: name.into(),
        }
    }
}

/// Clock synchronization exchange fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncData {
    /// Sender's SSRC
    pub ssrc: u32,
    /// Exchange step: 0, 1, or 2
    pub count: u8,
    /// ts1, ts2, ts3 in session ticks (1/10 ms)
    pub timestamps: [u64; 3],
}

/// An `AppleMIDI` control packet, one variant per command code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPacket {
    /// "IN": request to open one channel of a stream
    Invitation(EndpointInfo),
    /// "OK": the invitation was accepted
    InvitationAccepted(EndpointInfo),
    /// "NO": the invitation was rejected
    InvitationRejected(EndpointInfo),
    /// "BY": stream teardown
    End(EndpointInfo),
    /// "CK": one step of the three-timestamp clock exchange
    Synchronization(SyncData),
    /// "RS": highest sequence number received so far
    ReceiverFeedback {
        /// Sender's SSRC
        ssrc: u32,
        /// Highest received sequence number
        sequence: u16,
    },
    /// "RL": advisory receive bitrate limit
    BitrateReceiveLimit {
        /// Sender's SSRC
        ssrc: u32,
        /// Limit value
        limit: u32,
    },
}

impl ControlPacket {
    /// Check whether a datagram carries the control magic prefix
    #[must_use]
    pub fn is_control(buf: &[u8]) -> bool {
        buf.len() >= 4 && buf[0..2] == CONTROL_MAGIC
    }

    /// The SSRC field of this packet
    #[must_use]
    pub fn ssrc(&self) -> u32 {
        match self {
            Self::Invitation(info)
            | Self::InvitationAccepted(info)
            | Self::InvitationRejected(info)
            | Self::End(info) => info.ssrc,
            Self::Synchronization(sync) => sync.ssrc,
            Self::ReceiverFeedback { ssrc, .. } | Self::BitrateReceiveLimit { ssrc, .. } => *ssrc,
        }
    }

    /// The token field, for packets of the invitation family
    #[must_use]
    pub fn token(&self) -> Option<u32> {
        match self {
            Self::Invitation(info)
            | Self::InvitationAccepted(info)
            | Self::InvitationRejected(info)
            | Self::End(info) => Some(info.token),
            _ => None,
        }
    }

    /// Decode a control packet
    ///
    /// # Errors
    ///
    /// Returns `ControlDecodeError` on a missing magic prefix, an unknown
    /// command code, or a short buffer. The session drops such datagrams
    /// silently.
    pub fn decode(buf: &[u8]) -> Result<Self, ControlDecodeError> {
        if buf.len() < 4 {
            return Err(ControlDecodeError::BufferTooSmall {
                needed: 4,
                have: buf.len(),
            });
        }
        if buf[0..2] != CONTROL_MAGIC {
            return Err(ControlDecodeError::NotControl);
        }

        let mut cursor = &buf[2..];
        let command = cursor.get_u16();

        match command {
            CMD_INVITATION => Ok(Self::Invitation(decode_endpoint(cursor)?)),
            CMD_INVITATION_ACCEPTED => Ok(Self::InvitationAccepted(decode_endpoint(cursor)?)),
            CMD_INVITATION_REJECTED => Ok(Self::InvitationRejected(decode_endpoint(cursor)?)),
            CMD_END => Ok(Self::End(decode_endpoint(cursor)?)),
            CMD_SYNCHRONIZATION => {
                if cursor.remaining() < 32 {
                    return Err(ControlDecodeError::BufferTooSmall {
                        needed: 36,
                        have: buf.len(),
                    });
                }
                let ssrc = cursor.get_u32();
                let count = cursor.get_u8();
                cursor.advance(3); // padding
                let timestamps = [cursor.get_u64(), cursor.get_u64(), cursor.get_u64()];
                Ok(Self::Synchronization(SyncData {
                    ssrc,
                    count,
                    timestamps,
                }))
            }
            CMD_RECEIVER_FEEDBACK => {
                if cursor.remaining() < 6 {
                    return Err(ControlDecodeError::BufferTooSmall {
                        needed: 10,
                        have: buf.len(),
                    });
                }
                let ssrc = cursor.get_u32();
                let sequence = cursor.get_u16();
                Ok(Self::ReceiverFeedback { ssrc, sequence })
            }
            CMD_BITRATE_RECEIVE_LIMIT => {
                if cursor.remaining() < 8 {
                    return Err(ControlDecodeError::BufferTooSmall {
                        needed: 12,
                        have: buf.len(),
                    });
                }
                let ssrc = cursor.get_u32();
                let limit = cursor.get_u32();
                Ok(Self::BitrateReceiveLimit { ssrc, limit })
            }
            other => Err(ControlDecodeError::UnknownCommand(other)),
        }
    }

    /// Encode this packet to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(40);
        buf.put_slice(&CONTROL_MAGIC);

        match self {
            Self::Invitation(info) => {
                buf.put_u16(CMD_INVITATION);
                encode_endpoint(&mut buf, info);
            }
            Self::InvitationAccepted(info) => {
                buf.put_u16(CMD_INVITATION_ACCEPTED);
                encode_endpoint(&mut buf, info);
            }
            Self::InvitationRejected(info) => {
                buf.put_u16(CMD_INVITATION_REJECTED);
                encode_endpoint(&mut buf, info);
            }
            Self::End(info) => {
                buf.put_u16(CMD_END);
                encode_endpoint(&mut buf, info);
            }
            Self::Synchronization(sync) => {
                buf.put_u16(CMD_SYNCHRONIZATION);
                buf.put_u32(sync.ssrc);
                buf.put_u8(sync.count);
                buf.put_slice(&[0u8; 3]);
                for ts in sync.timestamps {
                    buf.put_u64(ts);
                }
            }
            Self::ReceiverFeedback { ssrc, sequence } => {
                buf.put_u16(CMD_RECEIVER_FEEDBACK);
                buf.put_u32(*ssrc);
                buf.put_u16(*sequence);
                buf.put_u16(0);
            }
            Self::BitrateReceiveLimit { ssrc, limit } => {
                buf.put_u16(CMD_BITRATE_RECEIVE_LIMIT);
                buf.put_u32(*ssrc);
                buf.put_u32(*limit);
            }
        }

        buf
    }
}

fn decode_endpoint(mut cursor: &[u8]) -> Result<EndpointInfo, ControlDecodeError> {
    if cursor.remaining() < 12 {
        return Err(ControlDecodeError::BufferTooSmall {
            needed: 16,
            have: cursor.remaining() + 4,
        });
    }
    let version = cursor.get_u32();
    let token = cursor.get_u32();
    let ssrc = cursor.get_u32();

    // "BY" packets may carry an unterminated name; tolerate that everywhere.
    let name_bytes = match cursor.iter().position(|&b| b == 0) {
        Some(nul) => &cursor[..nul],
        None => cursor,
    };
    let name = String::from_utf8_lossy(name_bytes).into_owned();

    Ok(EndpointInfo {
        version,
        token,
        ssrc,
        name,
    })
}

fn encode_endpoint(buf: &mut Vec<u8>, info: &EndpointInfo) {
    buf.put_u32(info.version);
    buf.put_u32(info.token);
    buf.put_u32(info.ssrc);
    buf.put_slice(info.name.as_bytes());
    buf.put_u8(0);
}

/// Control packet decode errors
#[derive(Debug, Error)]
pub enum ControlDecodeError {
    #[error("missing 0xFFFF control magic")]
    NotControl,

    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    #[error("unknown command code: 0x{0:04x}")]
    UnknownCommand(u16),
}
