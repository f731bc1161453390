//! End-to-end test of two sessions over loopback UDP: handshake on both
//! channels, clock synchronization, MIDI delivery, and teardown.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use rtpmidi::{Session, SessionConfig, SessionEvent};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bind a session on a free even port, retrying on collisions.
async fn start_session(
    name: &str,
    ssrc: u32,
) -> (Session, UnboundedReceiver<SessionEvent>, u16) {
    for attempt in 0u16..32 {
        let port = 21000 + (ssrc as u16 % 512) * 2 + attempt * 64;
        let config = SessionConfig::builder()
            .local_name(name)
            .ssrc(ssrc)
            .port(port)
            .published(false)
            .build();
        let mut session = Session::new(config);
        let events = session.take_events().expect("fresh session has events");
        match session.start().await {
            Ok(()) => {
                let mut events = events;
                // First event is always Ready.
                match wait_for(&mut events, |e| matches!(e, SessionEvent::Ready)).await {
                    SessionEvent::Ready => {}
                    other => panic!("expected Ready, got {other:?}"),
                }
                return (session, events, port);
            }
            Err(_) => continue,
        }
    }
    panic!("could not find a free port pair");
}

/// Wait for the first event matching `predicate`, discarding others.
async fn wait_for(
    events: &mut UnboundedReceiver<SessionEvent>,
    predicate: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(EVENT_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn handshake_midi_and_teardown() {
    let (mut initiator, mut initiator_events, _) = start_session("initiator", 0x1111_2222).await;
    let (mut acceptor, mut acceptor_events, acceptor_port) =
        start_session("acceptor", 0x3333_4444).await;

    let target: SocketAddr = format!("127.0.0.1:{acceptor_port}").parse().unwrap();
    initiator.connect(target).unwrap();

    // Both sides report the stream once the dual-channel handshake is done.
    let added = wait_for(&mut initiator_events, |e| {
        matches!(e, SessionEvent::StreamAdded { .. })
    })
    .await;
    match added {
        SessionEvent::StreamAdded { stream } => {
            assert_eq!(stream.ssrc, Some(0x3333_4444));
            assert_eq!(stream.name.as_deref(), Some("acceptor"));
            assert!(stream.connected);
        }
        other => panic!("expected StreamAdded, got {other:?}"),
    }
    wait_for(&mut acceptor_events, |e| {
        matches!(e, SessionEvent::StreamAdded { .. })
    })
    .await;

    // Clock sync needs a round trip before MIDI flows; keep nudging until
    // a note arrives (pre-sync sends are dropped by design).
    let note_on = vec![0x90, 60, 127];
    let received = timeout(EVENT_TIMEOUT, async {
        loop {
            initiator.send_message(note_on.clone()).unwrap();
            tokio::select! {
                event = acceptor_events.recv() => {
                    if let Some(SessionEvent::Message { data, .. }) = event {
                        return data;
                    }
                }
                () = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
    })
    .await
    .expect("no MIDI delivered");
    assert_eq!(received, note_on);

    // Initiator sees exactly one connected stream.
    let streams = initiator.streams().await.unwrap();
    assert_eq!(streams.len(), 1);
    assert!(streams[0].connected);
    assert!(streams[0].latency.is_some());

    // Teardown notifies the peer.
    initiator.end().await;
    let removed = wait_for(&mut acceptor_events, |e| {
        matches!(e, SessionEvent::StreamRemoved { .. })
    })
    .await;
    match removed {
        SessionEvent::StreamRemoved { stream } => {
            assert_eq!(stream.ssrc, Some(0x1111_2222));
        }
        other => panic!("expected StreamRemoved, got {other:?}"),
    }

    acceptor.end().await;
}

#[tokio::test]
async fn burst_is_delivered_in_order() {
    let (mut sender, mut sender_events, _) = start_session("sender", 0x5555_0001).await;
    let (mut receiver, mut receiver_events, receiver_port) =
        start_session("receiver", 0x5555_0002).await;

    let target: SocketAddr = format!("127.0.0.1:{receiver_port}").parse().unwrap();
    sender.connect(target).unwrap();
    wait_for(&mut sender_events, |e| {
        matches!(e, SessionEvent::StreamAdded { .. })
    })
    .await;

    // Wait until sync completes so a full burst goes through in one flush.
    let probe = vec![0xF8];
    timeout(EVENT_TIMEOUT, async {
        loop {
            sender.send_message(probe.clone()).unwrap();
            tokio::select! {
                event = receiver_events.recv() => {
                    if matches!(event, Some(SessionEvent::Message { .. })) {
                        return;
                    }
                }
                () = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
    })
    .await
    .expect("sync never completed");

    // A burst in one turn arrives in order.
    sender.send_message(vec![0x90, 60, 100]).unwrap();
    sender.send_message(vec![0x90, 64, 100]).unwrap();
    sender.send_message(vec![0x90, 67, 100]).unwrap();

    let mut notes = Vec::new();
    timeout(EVENT_TIMEOUT, async {
        while notes.len() < 3 {
            if let Some(SessionEvent::Message { data, .. }) = receiver_events.recv().await {
                if data[0] == 0x90 {
                    notes.push(data[1]);
                }
            }
        }
    })
    .await
    .expect("burst not delivered");
    assert_eq!(notes, vec![60, 64, 67]);

    sender.end().await;
    receiver.end().await;
}

#[tokio::test]
async fn odd_port_is_rejected() {
    let config = SessionConfig::builder()
        .local_name("odd")
        .port(5005)
        .published(false)
        .build();
    let mut session = Session::new(config);
    assert!(session.start().await.is_err());
}
