use proptest::prelude::*;

use super::command::MidiCommand;
use super::journal::Journal;
use super::payload::{MidiDecodeError, MidiPayload};

#[test]
fn test_two_command_encode() {
    // Note-on then note-off; different statuses, so the second command keeps
    // its status byte.
    let payload = MidiPayload::from_commands(vec![
        MidiCommand::new(0, vec![0x90, 60, 127]),
        MidiCommand::new(240, vec![0x80, 60, 0]),
    ]);

    let encoded = payload.encode().unwrap();
    assert_eq!(
        encoded,
        vec![
            0x08, // no B, no J, no Z, no P, length = 8
            0x90, 60, 127, // first command, delta elided (zero)
            0x81, 0x70, // varint(240)
            0x80, 60, 0, // second command, status kept
        ]
    );
}

#[test]
fn test_running_status_elided_on_equal_status() {
    let payload = MidiPayload::from_commands(vec![
        MidiCommand::new(0, vec![0x90, 60, 127]),
        MidiCommand::new(240, vec![0x90, 62, 127]),
    ]);

    let encoded = payload.encode().unwrap();
    assert_eq!(
        encoded,
        vec![0x07, 0x90, 60, 127, 0x81, 0x70, 62, 127]
    );
}

#[test]
fn test_running_status_decode() {
    // Two commands, the second omitting its status byte.
    let buf = [0x06, 0x90, 0x3C, 0x7F, 0x00, 0x3C, 0x00];

    let payload = MidiPayload::decode(&buf).unwrap();
    assert_eq!(payload.commands.len(), 2);
    assert_eq!(payload.commands[0].data, vec![0x90, 0x3C, 0x7F]);
    assert_eq!(payload.commands[0].delta_time, 0);
    assert_eq!(payload.commands[1].data, vec![0x90, 0x3C, 0x00]);
    assert_eq!(payload.commands[1].delta_time, 0);
}

#[test]
fn test_z_flag_first_delta() {
    let payload = MidiPayload::from_commands(vec![MidiCommand::new(100, vec![0xF8])]);

    let encoded = payload.encode().unwrap();
    // Z set, length = varint(100) + status = 2
    assert_eq!(encoded, vec![0x22, 0x64, 0xF8]);

    let decoded = MidiPayload::decode(&encoded).unwrap();
    assert_eq!(decoded.commands, payload.commands);
}

#[test]
fn test_big_length_flag() {
    // 6 commands with fresh statuses: 6 * (3 + delta) > 15 forces B.
    let commands: Vec<MidiCommand> = (0..6)
        .map(|i| MidiCommand::new(u32::from(i), vec![0x90 | i, 60, 100]))
        .collect();
    let payload = MidiPayload::from_commands(commands.clone());

    let encoded = payload.encode().unwrap();
    assert_eq!(encoded[0] & 0x80, 0x80);
    let declared = (usize::from(encoded[0] & 0x0F) << 8) | usize::from(encoded[1]);
    assert_eq!(declared, encoded.len() - 2);

    let decoded = MidiPayload::decode(&encoded).unwrap();
    assert_eq!(decoded.commands, commands);
}

#[test]
fn test_sysex_roundtrip() {
    let sysex = vec![0xF0, 0x7E, 0x00, 0x09, 0x01, 0xF7];
    let payload = MidiPayload::from_commands(vec![MidiCommand::new(0, sysex.clone())]);

    let encoded = payload.encode().unwrap();
    let decoded = MidiPayload::decode(&encoded).unwrap();
    assert_eq!(decoded.commands[0].data, sysex);
}

#[test]
fn test_sysex_continuation_sentinel_stops_list() {
    // SysEx ended by 0xF0 instead of 0xF7: the partial command is dropped
    // and decoding stops.
    let buf = [0x05, 0xF0, 0x01, 0x02, 0x03, 0xF0];

    let payload = MidiPayload::decode(&buf).unwrap();
    assert!(payload.commands.is_empty());
}

#[test]
fn test_sysex_unterminated_is_error() {
    let buf = [0x04, 0xF0, 0x01, 0x02, 0x03];
    assert_eq!(
        MidiPayload::decode(&buf),
        Err(MidiDecodeError::UnterminatedSysEx)
    );
}

#[test]
fn test_running_status_without_prior_status() {
    let buf = [0x03, 0x3C, 0x7F, 0x00];
    assert_eq!(
        MidiPayload::decode(&buf),
        Err(MidiDecodeError::NoRunningStatus)
    );
}

#[test]
fn test_section_length_overrun() {
    let buf = [0x0F, 0x90, 0x3C];
    assert!(matches!(
        MidiPayload::decode(&buf),
        Err(MidiDecodeError::SectionLength { declared: 15, .. })
    ));
}

#[test]
fn test_empty_payload() {
    let payload = MidiPayload::from_commands(vec![]);
    let encoded = payload.encode().unwrap();
    assert_eq!(encoded, vec![0x00]);

    let decoded = MidiPayload::decode(&encoded).unwrap();
    assert!(decoded.commands.is_empty());
    assert!(decoded.journal.is_none());
}

#[test]
fn test_journal_passthrough() {
    let journal = Journal {
        single_packet_loss: true,
        enhanced_encoding: false,
        checkpoint_sequence: 777,
        system_journal: None,
        channel_journals: vec![],
    };
    let payload = MidiPayload {
        commands: vec![MidiCommand::new(0, vec![0xF8])],
        journal: Some(journal.clone()),
        phantom: false,
    };

    let encoded = payload.encode().unwrap();
    assert_eq!(encoded[0] & 0x40, 0x40); // J flag

    let decoded = MidiPayload::decode(&encoded).unwrap();
    assert_eq!(decoded.journal, Some(journal));
}

fn arb_command() -> impl Strategy<Value = MidiCommand> {
    let channel_voice = (0x80u8..=0xEF, 0u8..=0x7F, 0u8..=0x7F).prop_map(|(status, d1, d2)| {
        let mut data = vec![status, d1];
        if !(0xC0..=0xDF).contains(&status) {
            data.push(d2);
        }
        data
    });
    (0u32..100_000, channel_voice)
        .prop_map(|(delta_time, data)| MidiCommand { delta_time, data })
}

proptest! {
    #[test]
    fn prop_payload_roundtrip(commands in proptest::collection::vec(arb_command(), 0..20)) {
        let payload = MidiPayload::from_commands(commands.clone());
        let encoded = payload.encode().unwrap();
        let decoded = MidiPayload::decode(&encoded).unwrap();
        prop_assert_eq!(decoded.commands, commands);
    }

    #[test]
    fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let _ = MidiPayload::decode(&bytes);
    }
}
