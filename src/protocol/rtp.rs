use thiserror::Error;

use super::constants::PAYLOAD_TYPE_MIDI;

/// RTP header extension (id + opaque 32-bit-word payload)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderExtension {
    /// Profile-defined extension id
    pub id: u16,
    /// Extension payload; length is a whole number of 32-bit words
    pub data: Vec<u8>,
}

/// RTP header (12 bytes + optional CSRCs + optional extension)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Version (2 bits, always 2)
    pub version: u8,
    /// Padding flag
    pub padding: bool,
    /// Marker bit
    pub marker: bool,
    /// Payload type (7 bits, `0x61` for RTP-MIDI)
    pub payload_type: u8,
    /// Sequence number (16 bits)
    pub sequence: u16,
    /// Timestamp (32 bits, session ticks)
    pub timestamp: u32,
    /// Synchronization source ID (32 bits)
    pub ssrc: u32,
    /// Contributing sources
    pub csrcs: Vec<u32>,
    /// Header extension, if the X bit is set
    pub extension: Option<HeaderExtension>,
}

impl RtpHeader {
    /// Fixed RTP header size, before CSRCs and extension
    pub const SIZE: usize = 12;

    /// Create a new RTP-MIDI packet header
    #[must_use]
    pub fn new_midi(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: 2,
            padding: false,
            marker: false,
            payload_type: PAYLOAD_TYPE_MIDI,
            sequence,
            timestamp,
            ssrc,
            csrcs: Vec::new(),
            extension: None,
        }
    }

    /// Encode header to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE + self.csrcs.len() * 4);

        // Byte 0: V(2) | P(1) | X(1) | CC(4)
        #[allow(clippy::cast_possible_truncation)]
        let csrc_count = (self.csrcs.len() & 0x0F) as u8;
        buf.push(
            (self.version << 6)
                | (u8::from(self.padding) << 5)
                | (u8::from(self.extension.is_some()) << 4)
                | csrc_count,
        );

        // Byte 1: M(1) | PT(7)
        buf.push((u8::from(self.marker) << 7) | (self.payload_type & 0x7F));

        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());

        for csrc in &self.csrcs {
            buf.extend_from_slice(&csrc.to_be_bytes());
        }

        if let Some(ext) = &self.extension {
            buf.extend_from_slice(&ext.id.to_be_bytes());
            #[allow(clippy::cast_possible_truncation)]
            let words = (ext.data.len() / 4) as u16;
            buf.extend_from_slice(&words.to_be_bytes());
            buf.extend_from_slice(&ext.data);
        }

        buf
    }

    /// Decode header from bytes, returning the header and the number of
    /// bytes consumed (the payload starts at that offset)
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if the buffer is too small or the version
    /// field is not 2.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), RtpDecodeError> {
        if buf.len() < Self::SIZE {
            return Err(RtpDecodeError::BufferTooSmall {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }

        let version = (buf[0] >> 6) & 0x03;
        if version != 2 {
            return Err(RtpDecodeError::InvalidVersion(version));
        }

        let csrc_count = usize::from(buf[0] & 0x0F);
        let has_extension = (buf[0] >> 4) & 0x01 != 0;

        let mut pos = Self::SIZE;

        let needed = pos + csrc_count * 4;
        if buf.len() < needed {
            return Err(RtpDecodeError::BufferTooSmall {
                needed,
                have: buf.len(),
            });
        }
        let mut csrcs = Vec::with_capacity(csrc_count);
        for _ in 0..csrc_count {
            csrcs.push(u32::from_be_bytes([
                buf[pos],
                buf[pos + 1],
                buf[pos + 2],
                buf[pos + 3],
            ]));
            pos += 4;
        }

        let extension = if has_extension {
            let needed = pos + 4;
            if buf.len() < needed {
                return Err(RtpDecodeError::BufferTooSmall {
                    needed,
                    have: buf.len(),
                });
            }
            let id = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
            let words = usize::from(u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]));
            pos += 4;

            let needed = pos + words * 4;
            if buf.len() < needed {
                return Err(RtpDecodeError::BufferTooSmall {
                    needed,
                    have: buf.len(),
                });
            }
            let data = buf[pos..pos + words * 4].to_vec();
            pos += words * 4;
            Some(HeaderExtension { id, data })
        } else {
            None
        };

        Ok((
            Self {
                version,
                padding: (buf[0] >> 5) & 0x01 != 0,
                marker: (buf[1] >> 7) & 0x01 != 0,
                payload_type: buf[1] & 0x7F,
                sequence: u16::from_be_bytes([buf[2], buf[3]]),
                timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
                ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
                csrcs,
                extension,
            },
            pos,
        ))
    }
}

/// RTP decode errors
#[derive(Debug, Error)]
pub enum RtpDecodeError {
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    #[error("invalid RTP version: {0}")]
    InvalidVersion(u8),
}

/// Complete RTP packet with header and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Packet header
    pub header: RtpHeader,
    /// Payload data (an encoded RTP-MIDI command section)
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Create a new RTP packet
    #[must_use]
    pub fn new(header: RtpHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Encode packet to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.header.encode();
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode packet from bytes
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if the buffer is too small or the header is
    /// invalid.
    pub fn decode(buf: &[u8]) -> Result<Self, RtpDecodeError> {
        let (header, consumed) = RtpHeader::decode(buf)?;
        let payload = buf[consumed..].to_vec();
        Ok(Self { header, payload })
    }
}
