//! Session configuration persistence contract
//!
//! Managers hand sessions to a storage backend as plain records; the crate
//! defines only the shape and the trait, not any backend.

use serde::{Deserialize, Serialize};

/// A remembered remote endpoint of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpointRecord {
    /// Peer address (IPv4 or IPv6 textual form)
    pub address: String,
    /// Peer control port
    pub port: u16,
}

/// Persisted configuration of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfigRecord {
    /// Name advertised over mDNS
    pub bonjour_name: String,
    /// Display name sent in invitations
    pub local_name: String,
    /// Session SSRC
    pub ssrc: u32,
    /// Control port
    pub port: u16,
    /// Whether the session is advertised
    pub published: bool,
    /// Whether the session should be started on restore
    pub activated: bool,
    /// Remote endpoints to reconnect on restore
    pub streams: Vec<RemoteEndpointRecord>,
}

/// Storage backend for session configurations
pub trait SessionStorage {
    /// Load all persisted session records
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` when the backend cannot be read.
    fn read(&self) -> std::io::Result<Vec<SessionConfigRecord>>;

    /// Persist the given session records, replacing any previous set
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` when the backend cannot be written.
    fn write(&self, sessions: &[SessionConfigRecord]) -> std::io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip_through_backend() {
        struct MemoryStorage(std::cell::RefCell<Vec<SessionConfigRecord>>);

        impl SessionStorage for MemoryStorage {
            fn read(&self) -> std::io::Result<Vec<SessionConfigRecord>> {
                Ok(self.0.borrow().clone())
            }

            fn write(&self, sessions: &[SessionConfigRecord]) -> std::io::Result<()> {
                *self.0.borrow_mut() = sessions.to_vec();
                Ok(())
            }
        }

        let record = SessionConfigRecord {
            bonjour_name: "Studio".to_string(),
            local_name: "Studio".to_string(),
            ssrc: 0x0102_0304,
            port: 5004,
            published: true,
            activated: false,
            streams: vec![RemoteEndpointRecord {
                address: "10.0.0.2".to_string(),
                port: 5004,
            }],
        };

        let storage = MemoryStorage(std::cell::RefCell::new(Vec::new()));
        storage.write(std::slice::from_ref(&record)).unwrap();
        assert_eq!(storage.read().unwrap(), vec![record]);
    }
}
