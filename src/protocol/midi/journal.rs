//! RTP-MIDI recovery journal structure
//!
//! Only the presence-bit structure is interpreted; chapter payloads are
//! carried as opaque bytes and re-emitted verbatim on encode. Recovery
//! semantics are out of scope.

use super::payload::MidiDecodeError;

/// System journal: chapter-present flags plus opaque chapter bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemJournal {
    /// Chapter-present flags S, D, V, Q, F, X (bits 7..2 of the header)
    pub chapters: u8,
    /// Opaque chapter payload
    pub data: Vec<u8>,
}

/// Per-channel journal: 2-byte bitfield header, chapter TOC, opaque bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelJournal {
    /// S bit
    pub s: bool,
    /// MIDI channel (0–15)
    pub channel: u8,
    /// H bit (enhanced chapter C encoding)
    pub h: bool,
    /// Chapter-presence byte: P, C, M, W, N, E, T, A
    pub chapters: u8,
    /// Opaque chapter payload
    pub data: Vec<u8>,
}

/// Recovery journal section, present when the payload's `J` flag is set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journal {
    /// S: single-packet loss
    pub single_packet_loss: bool,
    /// H: enhanced chapter C encoding used somewhere in the journal
    pub enhanced_encoding: bool,
    /// Checkpoint packet sequence number
    pub checkpoint_sequence: u16,
    /// System journal, present when the Y bit is set
    pub system_journal: Option<SystemJournal>,
    /// Channel journals, present when the A bit is set
    pub channel_journals: Vec<ChannelJournal>,
}

impl Journal {
    /// Decode a journal section starting at `buf[*pos]`, advancing `pos`
    /// past it
    ///
    /// # Errors
    ///
    /// Returns `MidiDecodeError` when a declared length overruns the buffer
    /// or is shorter than its own header.
    pub fn decode(buf: &[u8], pos: &mut usize) -> Result<Self, MidiDecodeError> {
        let header = take(buf, pos, 3)?;
        let flags = header[0];
        let single_packet_loss = flags & 0x80 != 0;
        let has_system = flags & 0x40 != 0;
        let has_channels = flags & 0x20 != 0;
        let enhanced_encoding = flags & 0x10 != 0;
        let total_channels = usize::from(flags & 0x0F) + 1;
        let checkpoint_sequence = u16::from_be_bytes([header[1], header[2]]);

        let system_journal = if has_system {
            let head = take(buf, pos, 2)?;
            let chapters = head[0] >> 2;
            let length = (usize::from(head[0] & 0x03) << 8) | usize::from(head[1]);
            if length < 2 {
                return Err(MidiDecodeError::JournalLength { declared: length });
            }
            let data = take(buf, pos, length - 2)?.to_vec();
            Some(SystemJournal { chapters, data })
        } else {
            None
        };

        let mut channel_journals = Vec::new();
        if has_channels {
            for _ in 0..total_channels {
                let head = take(buf, pos, 3)?;
                let s = head[0] & 0x80 != 0;
                let channel = (head[0] >> 3) & 0x0F;
                let h = head[0] & 0x04 != 0;
                let length = (usize::from(head[0] & 0x03) << 8) | usize::from(head[1]);
                let chapters = head[2];
                if length < 3 {
                    return Err(MidiDecodeError::JournalLength { declared: length });
                }
                let data = take(buf, pos, length - 3)?.to_vec();
                channel_journals.push(ChannelJournal {
                    s,
                    channel,
                    h,
                    chapters,
                    data,
                });
            }
        }

        Ok(Self {
            single_packet_loss,
            enhanced_encoding,
            checkpoint_sequence,
            system_journal,
            channel_journals,
        })
    }

    /// Re-emit the journal on the wire
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();

        let total_channels = self.channel_journals.len().max(1) - 1;
        let mut flags = (total_channels & 0x0F) as u8;
        if self.single_packet_loss {
            flags |= 0x80;
        }
        if self.system_journal.is_some() {
            flags |= 0x40;
        }
        if !self.channel_journals.is_empty() {
            flags |= 0x20;
        }
        if self.enhanced_encoding {
            flags |= 0x10;
        }
        out.push(flags);
        out.extend_from_slice(&self.checkpoint_sequence.to_be_bytes());

        if let Some(system) = &self.system_journal {
            let length = system.data.len() + 2;
            out.push((system.chapters << 2) | ((length >> 8) & 0x03) as u8);
            out.push((length & 0xFF) as u8);
            out.extend_from_slice(&system.data);
        }

        for journal in &self.channel_journals {
            let length = journal.data.len() + 3;
            let mut head = ((journal.channel & 0x0F) << 3) | ((length >> 8) & 0x03) as u8;
            if journal.s {
                head |= 0x80;
            }
            if journal.h {
                head |= 0x04;
            }
            out.push(head);
            out.push((length & 0xFF) as u8);
            out.push(journal.chapters);
            out.extend_from_slice(&journal.data);
        }

        out
    }
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], MidiDecodeError> {
    let end = pos.checked_add(len).ok_or(MidiDecodeError::UnexpectedEnd)?;
    if end > buf.len() {
        return Err(MidiDecodeError::UnexpectedEnd);
    }
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}
