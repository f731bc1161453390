//! # rtpmidi
//!
//! A pure Rust library for RTP-MIDI (`AppleMIDI`) network sessions.
//!
//! ## Features
//!
//! - Session discovery via mDNS (`_apple-midi._udp`)
//! - Invitation handshake over paired control/data UDP ports
//! - Three-step clock synchronization with latency and offset tracking
//! - RTP-MIDI payloads: delta-time varints, running status, SysEx, journal
//! - Packet-loss detection with periodic receiver feedback
//!
//! ## Example
//!
//! ```rust,no_run
//! use rtpmidi::{Session, SessionConfig, SessionEvent};
//!
//! # async fn example() -> rtpmidi::Result<()> {
//! let config = SessionConfig::builder().local_name("Rust Synth").build();
//! let mut session = Session::new(config);
//! let mut events = session.take_events().expect("events already taken");
//!
//! session.start().await?;
//! session.connect("10.0.0.2:5004".parse().unwrap())?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Message { data, .. } = event {
//!         println!("received {data:02x?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Error types
pub mod error;
/// Wire-format codecs
pub mod protocol;
/// Sessions and streams
pub mod session;

pub mod discovery;
pub mod storage;

// Re-exports
pub use error::{Result, RtpMidiError};
pub use protocol::control::ControlPacket;
pub use protocol::midi::{MidiCommand, MidiPayload};
pub use session::{Session, SessionConfig, SessionEvent, StreamInfo};
