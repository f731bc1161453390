//! MIDI commands carried inside an RTP-MIDI command section

/// One MIDI command with its delta-time in session ticks
///
/// `data` always starts with a status byte, even when the command was
/// carried with running status on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiCommand {
    /// Ticks since the previous command in the packet (first command:
    /// ticks since the packet's base time)
    pub delta_time: u32,
    /// Raw MIDI bytes: status followed by data bytes
    pub data: Vec<u8>,
}

impl MidiCommand {
    /// Create a new command
    #[must_use]
    pub fn new(delta_time: u32, data: Vec<u8>) -> Self {
        Self { data, delta_time }
    }

    /// The status byte of this command
    #[must_use]
    pub fn status(&self) -> Option<u8> {
        self.data.first().copied()
    }
}

/// Number of data bytes following a status byte, or `None` for SysEx
/// (`0xF0`), whose length is delimited by a terminator byte instead
///
/// Channel voice messages are keyed by the high nibble, system messages by
/// the full status byte.
#[must_use]
pub fn data_length(status: u8) -> Option<usize> {
    match status {
        0x80..=0xBF | 0xE0..=0xEF => Some(2),
        0xC0..=0xDF => Some(1),
        0xF0 => None,
        0xF1 | 0xF3 => Some(1),
        0xF2 => Some(2),
        _ => Some(0),
    }
}

/// Maximum value representable by a four-byte delta-time varint
pub(crate) const MAX_DELTA_TIME: u32 = 0x0FFF_FFFF;

/// Read a delta-time varint: up to four bytes, 7 data bits each, high bit
/// set on every byte but the last
pub(crate) fn read_varint(buf: &[u8], pos: &mut usize) -> Option<u32> {
    let mut value = 0u32;
    for i in 0..4 {
        let byte = *buf.get(*pos)?;
        *pos += 1;
        value = (value << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 || i == 3 {
            return Some(value);
        }
    }
    unreachable!()
}

/// Append a delta-time varint using the minimum number of 7-bit groups
pub(crate) fn write_varint(value: u32, out: &mut Vec<u8>) {
    let value = value & MAX_DELTA_TIME;
    let mut groups = [0u8; 4];
    let mut count = 0;
    let mut rest = value;
    loop {
        groups[count] = (rest & 0x7F) as u8;
        count += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        out.push(groups[i] | continuation);
    }
}
