use crate::protocol::constants::PAYLOAD_TYPE_MIDI;
use crate::protocol::rtp::{HeaderExtension, RtpDecodeError, RtpHeader, RtpPacket};

#[test]
fn test_header_encode_decode() {
    let header = RtpHeader::new_midi(100, 50_000, 0x1234_5678);

    let encoded = header.encode();
    let (decoded, consumed) = RtpHeader::decode(&encoded).unwrap();

    assert_eq!(consumed, RtpHeader::SIZE);
    assert_eq!(decoded.version, 2);
    assert_eq!(decoded.payload_type, PAYLOAD_TYPE_MIDI);
    assert_eq!(decoded.sequence, 100);
    assert_eq!(decoded.timestamp, 50_000);
    assert_eq!(decoded.ssrc, 0x1234_5678);
    assert!(!decoded.marker);
}

#[test]
fn test_packet_encode_decode() {
    let payload = vec![0x03, 0x90, 0x3C, 0x7F];
    let header = RtpHeader::new_midi(101, 50_000, 0x1234_5678);
    let packet = RtpPacket::new(header, payload.clone());

    let encoded = packet.encode();
    let decoded = RtpPacket::decode(&encoded).unwrap();

    assert_eq!(decoded.header.sequence, 101);
    assert_eq!(decoded.payload, payload);
}

#[test]
fn test_csrcs_roundtrip() {
    let mut header = RtpHeader::new_midi(7, 1, 2);
    header.csrcs = vec![0xAAAA_0001, 0xAAAA_0002];

    let encoded = header.encode();
    let (decoded, consumed) = RtpHeader::decode(&encoded).unwrap();

    assert_eq!(consumed, RtpHeader::SIZE + 8);
    assert_eq!(decoded.csrcs, header.csrcs);
}

#[test]
fn test_extension_roundtrip() {
    let mut header = RtpHeader::new_midi(7, 1, 2);
    header.extension = Some(HeaderExtension {
        id: 0xBEDE,
        data: vec![1, 2, 3, 4, 5, 6, 7, 8],
    });

    let encoded = header.encode();
    let (decoded, consumed) = RtpHeader::decode(&encoded).unwrap();

    assert_eq!(consumed, RtpHeader::SIZE + 4 + 8);
    assert_eq!(decoded.extension, header.extension);
}

#[test]
fn test_buffer_too_small() {
    let buf = [0u8; 5];
    let result = RtpHeader::decode(&buf);
    assert!(matches!(result, Err(RtpDecodeError::BufferTooSmall { .. })));
}

#[test]
fn test_truncated_csrcs() {
    let mut header = RtpHeader::new_midi(1, 2, 3);
    header.csrcs = vec![42];
    let encoded = header.encode();

    let result = RtpHeader::decode(&encoded[..encoded.len() - 1]);
    assert!(matches!(result, Err(RtpDecodeError::BufferTooSmall { .. })));
}

#[test]
fn test_invalid_version() {
    // Version 1 (bits 6-7 = 01)
    let buf = [
        0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    let result = RtpHeader::decode(&buf);
    assert!(matches!(result, Err(RtpDecodeError::InvalidVersion(1))));
}

#[test]
fn test_header_flags() {
    let mut header = RtpHeader::new_midi(100, 50_000, 0x1234_5678);
    header.padding = true;
    header.marker = true;

    let encoded = header.encode();
    let (decoded, _) = RtpHeader::decode(&encoded).unwrap();

    assert!(decoded.padding);
    assert!(decoded.marker);
    assert_eq!(decoded.version, 2);
}
