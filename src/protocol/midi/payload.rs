//! RTP-MIDI command-section codec
//!
//! Layout: one flag byte (`B J Z P` + 4-bit length nibble), an optional
//! second length byte when `B` is set, `length` bytes of delta-time-prefixed
//! MIDI commands with running status, then the journal when `J` is set.

use thiserror::Error;

use super::command::{data_length, read_varint, write_varint, MidiCommand};
use super::journal::Journal;

const FLAG_B: u8 = 0x80;
const FLAG_J: u8 = 0x40;
const FLAG_Z: u8 = 0x20;
const FLAG_P: u8 = 0x10;

/// Maximum command-section length expressible in the 12-bit `B` form
const MAX_SECTION_LEN: usize = 0x0FFF;

/// A decoded RTP-MIDI payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPayload {
    /// Commands in on-wire order, running status re-expanded
    pub commands: Vec<MidiCommand>,
    /// Recovery journal, when the `J` flag was set
    pub journal: Option<Journal>,
    /// `P` flag: the first command's status byte is phantom
    pub phantom: bool,
}

impl MidiPayload {
    /// Wrap a command list with no journal
    #[must_use]
    pub fn from_commands(commands: Vec<MidiCommand>) -> Self {
        Self {
            commands,
            journal: None,
            phantom: false,
        }
    }

    /// Decode a command section
    ///
    /// # Errors
    ///
    /// Returns `MidiDecodeError` on truncated buffers, a length field that
    /// overruns the datagram, running status with no prior status byte, or
    /// an unterminated SysEx.
    pub fn decode(buf: &[u8]) -> Result<Self, MidiDecodeError> {
        let flags = *buf.first().ok_or(MidiDecodeError::UnexpectedEnd)?;
        let mut pos = 1;

        let length = if flags & FLAG_B != 0 {
            let low = *buf.get(pos).ok_or(MidiDecodeError::UnexpectedEnd)?;
            pos += 1;
            (usize::from(flags & 0x0F) << 8) | usize::from(low)
        } else {
            usize::from(flags & 0x0F)
        };

        let end = pos + length;
        if end > buf.len() {
            return Err(MidiDecodeError::SectionLength {
                declared: length,
                available: buf.len() - pos,
            });
        }

        let mut commands = Vec::new();
        let mut running_status: Option<u8> = None;
        let mut first = true;

        while pos < end {
            let delta_time = if first && flags & FLAG_Z == 0 {
                0
            } else {
                read_varint(&buf[..end], &mut pos).ok_or(MidiDecodeError::UnexpectedEnd)?
            };
            first = false;

            if pos >= end {
                return Err(MidiDecodeError::UnexpectedEnd);
            }

            let status = if buf[pos] & 0x80 != 0 {
                let status = buf[pos];
                pos += 1;
                running_status = Some(status);
                status
            } else {
                running_status.ok_or(MidiDecodeError::NoRunningStatus)?
            };

            let mut data = vec![status];
            match data_length(status) {
                Some(len) => {
                    if pos + len > end {
                        return Err(MidiDecodeError::UnexpectedEnd);
                    }
                    data.extend_from_slice(&buf[pos..pos + len]);
                    pos += len;
                }
                None => {
                    // SysEx: scan to the first byte with the high bit set.
                    let terminator = buf[pos..end]
                        .iter()
                        .position(|&b| b & 0x80 != 0)
                        .ok_or(MidiDecodeError::UnterminatedSysEx)?;
                    data.extend_from_slice(&buf[pos..pos + terminator]);
                    let sentinel = buf[pos + terminator];
                    if sentinel == 0xF7 {
                        data.push(sentinel);
                        pos += terminator + 1;
                    } else {
                        // A continuation sentinel ends the command list; the
                        // partial command is not emitted.
                        break;
                    }
                }
            }

            commands.push(MidiCommand { delta_time, data });
        }

        let journal = if flags & FLAG_J != 0 {
            let mut journal_pos = end;
            Some(Journal::decode(buf, &mut journal_pos)?)
        } else {
            None
        };

        Ok(Self {
            commands,
            journal,
            phantom: flags & FLAG_P != 0,
        })
    }

    /// Encode the payload
    ///
    /// Running status elides a command's status byte when it equals the
    /// previous command's status. `Z` is set iff the first command carries a
    /// non-zero delta-time; `B` iff the section exceeds 15 bytes.
    ///
    /// # Errors
    ///
    /// Returns `MidiEncodeError` if the command section exceeds the 12-bit
    /// length field, or a command has no status byte.
    pub fn encode(&self) -> Result<Vec<u8>, MidiEncodeError> {
        let mut section = Vec::new();
        let mut running_status: Option<u8> = None;

        for (index, command) in self.commands.iter().enumerate() {
            let status = command.status().ok_or(MidiEncodeError::EmptyCommand)?;

            if index > 0 || command.delta_time != 0 {
                write_varint(command.delta_time, &mut section);
            }

            if running_status == Some(status) {
                section.extend_from_slice(&command.data[1..]);
            } else {
                section.extend_from_slice(&command.data);
                running_status = Some(status);
            }
        }

        if section.len() > MAX_SECTION_LEN {
            return Err(MidiEncodeError::SectionTooLarge {
                length: section.len(),
            });
        }

        let mut flags = 0u8;
        if self
            .commands
            .first()
            .is_some_and(|command| command.delta_time != 0)
        {
            flags |= FLAG_Z;
        }
        if self.journal.is_some() {
            flags |= FLAG_J;
        }
        if self.phantom {
            flags |= FLAG_P;
        }

        let mut out = Vec::with_capacity(section.len() + 2);
        if section.len() > 0x0F {
            flags |= FLAG_B;
            out.push(flags | ((section.len() >> 8) & 0x0F) as u8);
            out.push((section.len() & 0xFF) as u8);
        } else {
            out.push(flags | section.len() as u8);
        }
        out.extend_from_slice(&section);

        if let Some(journal) = &self.journal {
            out.extend_from_slice(&journal.encode());
        }

        Ok(out)
    }
}

/// RTP-MIDI payload decode errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MidiDecodeError {
    #[error("unexpected end of payload")]
    UnexpectedEnd,

    #[error("command section declares {declared} bytes, only {available} available")]
    SectionLength { declared: usize, available: usize },

    #[error("running status with no prior status byte")]
    NoRunningStatus,

    #[error("SysEx without terminator")]
    UnterminatedSysEx,

    #[error("journal length field {declared} shorter than its header")]
    JournalLength { declared: usize },
}

/// RTP-MIDI payload encode errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MidiEncodeError {
    #[error("command section length {length} exceeds the 12-bit length field")]
    SectionTooLarge { length: usize },

    #[error("command with no status byte")]
    EmptyCommand,
}
