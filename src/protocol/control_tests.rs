use crate::protocol::control::{ControlDecodeError, ControlPacket, EndpointInfo, SyncData};

#[test]
fn test_invitation_wire_bytes() {
    // First packet of the handshake scenario: SSRC 0x01020304, name "A",
    // token 0xAABBCCDD.
    let packet = ControlPacket::Invitation(EndpointInfo::new(0xAABB_CCDD, 0x0102_0304, "A"));

    let encoded = packet.encode();
    assert_eq!(
        encoded,
        vec![
            0xFF, 0xFF, 0x49, 0x4E, // magic + "IN"
            0x00, 0x00, 0x00, 0x02, // version
            0xAA, 0xBB, 0xCC, 0xDD, // token
            0x01, 0x02, 0x03, 0x04, // ssrc
            b'A', 0x00,
        ]
    );
}

#[test]
fn test_invitation_accepted_decode() {
    let buf = [
        0xFF, 0xFF, 0x4F, 0x4B, 0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0x05, 0x06, 0x07,
        0x08, b'B', 0x00,
    ];

    let packet = ControlPacket::decode(&buf).unwrap();
    match packet {
        ControlPacket::InvitationAccepted(info) => {
            assert_eq!(info.version, 2);
            assert_eq!(info.token, 0xAABB_CCDD);
            assert_eq!(info.ssrc, 0x0506_0708);
            assert_eq!(info.name, "B");
        }
        other => panic!("expected InvitationAccepted, got {other:?}"),
    }
}

#[test]
fn test_invitation_family_roundtrip() {
    let info = EndpointInfo::new(0x1111_2222, 0x3333_4444, "Test Session");
    let packets = [
        ControlPacket::Invitation(info.clone()),
        ControlPacket::InvitationAccepted(info.clone()),
        ControlPacket::InvitationRejected(info.clone()),
        ControlPacket::End(info),
    ];

    for packet in packets {
        let decoded = ControlPacket::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }
}

#[test]
fn test_end_with_unterminated_name() {
    let mut buf = ControlPacket::End(EndpointInfo::new(1, 2, "bye")).encode();
    buf.pop(); // drop the NUL

    let decoded = ControlPacket::decode(&buf).unwrap();
    match decoded {
        ControlPacket::End(info) => assert_eq!(info.name, "bye"),
        other => panic!("expected End, got {other:?}"),
    }
}

#[test]
fn test_synchronization_roundtrip() {
    let packet = ControlPacket::Synchronization(SyncData {
        ssrc: 0x0102_0304,
        count: 1,
        timestamps: [1000, 5000, 0],
    });

    let encoded = packet.encode();
    assert_eq!(encoded.len(), 36);
    assert_eq!(&encoded[0..4], &[0xFF, 0xFF, 0x43, 0x4B]);
    assert_eq!(encoded[8], 1); // count
    assert_eq!(&encoded[9..12], &[0, 0, 0]); // padding

    let decoded = ControlPacket::decode(&encoded).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn test_receiver_feedback_roundtrip() {
    let packet = ControlPacket::ReceiverFeedback {
        ssrc: 0xDEAD_BEEF,
        sequence: 4242,
    };

    let encoded = packet.encode();
    assert_eq!(encoded.len(), 12);

    let decoded = ControlPacket::decode(&encoded).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn test_bitrate_receive_limit_roundtrip() {
    let packet = ControlPacket::BitrateReceiveLimit {
        ssrc: 7,
        limit: 120_000,
    };

    let decoded = ControlPacket::decode(&packet.encode()).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn test_unknown_command() {
    let buf = [0xFF, 0xFF, 0x5A, 0x5A, 0, 0, 0, 0];
    let result = ControlPacket::decode(&buf);
    assert!(matches!(
        result,
        Err(ControlDecodeError::UnknownCommand(0x5A5A))
    ));
}

#[test]
fn test_not_control() {
    let buf = [0x80, 0x61, 0x00, 0x01];
    assert!(!ControlPacket::is_control(&buf));
    assert!(matches!(
        ControlPacket::decode(&buf),
        Err(ControlDecodeError::NotControl)
    ));
}

#[test]
fn test_short_buffer() {
    let buf = [0xFF, 0xFF, 0x43];
    assert!(matches!(
        ControlPacket::decode(&buf),
        Err(ControlDecodeError::BufferTooSmall { .. })
    ));
}

#[test]
fn test_ssrc_and_token_accessors() {
    let invite = ControlPacket::Invitation(EndpointInfo::new(10, 20, "x"));
    assert_eq!(invite.ssrc(), 20);
    assert_eq!(invite.token(), Some(10));

    let feedback = ControlPacket::ReceiverFeedback {
        ssrc: 30,
        sequence: 1,
    };
    assert_eq!(feedback.ssrc(), 30);
    assert_eq!(feedback.token(), None);
}
