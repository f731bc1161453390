//! mDNS discovery of `AppleMIDI` sessions
//!
//! Publishes local sessions as `_apple-midi._udp` services and browses for
//! remote ones. The [`Discovery`] instance is constructed by the caller and
//! injected into sessions; nothing here is process-global.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, RtpMidiError};

/// Service type for `AppleMIDI` sessions
pub const SERVICE_TYPE: &str = "_apple-midi._udp.local.";

/// A remote session seen on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSession {
    /// Advertised session name
    pub name: String,
    /// Hostname of the advertising peer
    pub host: String,
    /// Control port
    pub port: u16,
    /// First advertised IPv4 address, if any
    pub v4_addr: Option<Ipv4Addr>,
    /// First advertised IPv6 address, if any
    pub v6_addr: Option<Ipv6Addr>,
}

/// Discovery events
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A remote session appeared or was updated
    RemoteSessionUp(RemoteSession),
    /// A remote session went away (by advertised name)
    RemoteSessionDown(String),
}

/// mDNS advertiser and browser for `AppleMIDI` sessions
pub struct Discovery {
    daemon: ServiceDaemon,
    registered: Mutex<HashMap<String, String>>,
    remotes: Arc<Mutex<HashMap<String, RemoteSession>>>,
}

impl Discovery {
    /// Start the mDNS daemon
    ///
    /// # Errors
    ///
    /// Returns `RtpMidiError::DiscoveryFailed` if the daemon cannot be
    /// created.
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| RtpMidiError::DiscoveryFailed {
            message: format!("failed to create mDNS daemon: {e}"),
        })?;
        Ok(Self {
            daemon,
            registered: Mutex::new(HashMap::new()),
            remotes: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Advertise a session
    ///
    /// # Errors
    ///
    /// Returns `RtpMidiError::DiscoveryFailed` if registration fails.
    pub fn publish(&self, name: &str, port: u16) -> Result<()> {
        let hostname = format!("{}.local.", name.replace(' ', "-").to_lowercase());
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            name,
            &hostname,
            "", // addresses auto-detected
            port,
            HashMap::<String, String>::new(),
        )
        .map_err(|e| RtpMidiError::DiscoveryFailed {
            message: format!("invalid service info: {e}"),
        })?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        self.daemon
            .register(info)
            .map_err(|e| RtpMidiError::DiscoveryFailed {
                message: format!("failed to register service: {e}"),
            })?;

        info!(%name, port, "session advertised");
        self.registered
            .lock()
            .expect("registered map poisoned")
            .insert(name.to_string(), fullname);
        Ok(())
    }

    /// Withdraw a session advertisement
    ///
    /// # Errors
    ///
    /// Returns `RtpMidiError::DiscoveryFailed` if the session was not
    /// published or unregistration fails.
    pub fn unpublish(&self, name: &str) -> Result<()> {
        let fullname = self
            .registered
            .lock()
            .expect("registered map poisoned")
            .remove(name)
            .ok_or_else(|| RtpMidiError::DiscoveryFailed {
                message: format!("session {name} is not published"),
            })?;

        self.daemon
            .unregister(&fullname)
            .map_err(|e| RtpMidiError::DiscoveryFailed {
                message: format!("failed to unregister service: {e}"),
            })?;
        info!(%name, "advertisement withdrawn");
        Ok(())
    }

    /// Browse for remote sessions; events arrive on the returned channel
    /// and the directory behind [`Discovery::remote_sessions`] is kept
    /// current
    ///
    /// # Errors
    ///
    /// Returns `RtpMidiError::DiscoveryFailed` if browsing cannot start.
    pub fn browse(&self) -> Result<mpsc::UnboundedReceiver<DiscoveryEvent>> {
        let receiver = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| RtpMidiError::DiscoveryFailed {
                message: format!("failed to browse: {e}"),
            })?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let remotes = Arc::clone(&self.remotes);

        tokio::spawn(async move {
            use futures::StreamExt;
            let mut events = receiver.into_stream();
            while let Some(event) = events.next().await {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let session = remote_from_info(&info);
                        debug!(name = %session.name, port = session.port, "remote session up");
                        remotes
                            .lock()
                            .expect("remotes map poisoned")
                            .insert(info.get_fullname().to_string(), session.clone());
                        if event_tx
                            .send(DiscoveryEvent::RemoteSessionUp(session))
                            .is_err()
                        {
                            break;
                        }
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        let removed = remotes
                            .lock()
                            .expect("remotes map poisoned")
                            .remove(&fullname);
                        if let Some(session) = removed {
                            debug!(name = %session.name, "remote session down");
                            if event_tx
                                .send(DiscoveryEvent::RemoteSessionDown(session.name))
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    ServiceEvent::SearchStopped(_) => break,
                    _ => {}
                }
            }
            warn!("mDNS browse task ended");
        });

        Ok(event_rx)
    }

    /// Snapshot of currently known remote sessions
    #[must_use]
    pub fn remote_sessions(&self) -> Vec<RemoteSession> {
        self.remotes
            .lock()
            .expect("remotes map poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Shut down the daemon
    pub fn shutdown(self) {
        if let Err(err) = self.daemon.shutdown() {
            debug!(%err, "mDNS daemon shutdown failed");
        }
    }
}

fn remote_from_info(info: &ServiceInfo) -> RemoteSession {
    let name = info
        .get_fullname()
        .split('.')
        .next()
        .unwrap_or(info.get_fullname())
        .to_string();

    let mut v4_addr = None;
    let mut v6_addr = None;
    for addr in info.get_addresses() {
        match addr {
            std::net::IpAddr::V4(v4) if v4_addr.is_none() => v4_addr = Some(*v4),
            std::net::IpAddr::V6(v6) if v6_addr.is_none() => v6_addr = Some(*v6),
            _ => {}
        }
    }

    RemoteSession {
        name,
        host: info.get_hostname().to_string(),
        port: info.get_port(),
        v4_addr,
        v6_addr,
    }
}
