//! Session configuration

use rand::Rng;

use crate::protocol::constants::DEFAULT_PORT;

/// IP family the session binds on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpFamily {
    /// IPv4 (`0.0.0.0`)
    #[default]
    V4,
    /// IPv6 (`::`)
    V6,
}

/// Configuration for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display name sent in invitations
    pub local_name: String,

    /// Name advertised over mDNS (defaults to `local_name`)
    pub bonjour_name: String,

    /// Control port; must be even. The data socket binds `port + 1`.
    pub port: u16,

    /// SSRC identifying this session (random by default)
    pub ssrc: u32,

    /// Whether to advertise the session over mDNS on `start`
    pub published: bool,

    /// IP family to bind
    pub ip_family: IpFamily,

    /// Bundle outbound commands into one packet per scheduler turn
    /// (disable to flush every `send_message` immediately)
    pub bundle: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let name = "rtpmidi".to_string();
        Self {
            local_name: name.clone(),
            bonjour_name: name,
            port: DEFAULT_PORT,
            ssrc: rand::thread_rng().gen(),
            published: true,
            ip_family: IpFamily::V4,
            bundle: true,
        }
    }
}

impl SessionConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for `SessionConfig`
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
    bonjour_name_set: bool,
}

impl SessionConfigBuilder {
    /// Set the display name sent in invitations
    #[must_use]
    pub fn local_name(mut self, name: impl Into<String>) -> Self {
        self.config.local_name = name.into();
        if !self.bonjour_name_set {
            self.config.bonjour_name = self.config.local_name.clone();
        }
        self
    }

    /// Set the mDNS advertisement name
    #[must_use]
    pub fn bonjour_name(mut self, name: impl Into<String>) -> Self {
        self.config.bonjour_name = name.into();
        self.bonjour_name_set = true;
        self
    }

    /// Set the control port (even; the data socket binds `port + 1`)
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the SSRC explicitly
    #[must_use]
    pub fn ssrc(mut self, ssrc: u32) -> Self {
        self.config.ssrc = ssrc;
        self
    }

    /// Enable or disable mDNS advertisement
    #[must_use]
    pub fn published(mut self, published: bool) -> Self {
        self.config.published = published;
        self
    }

    /// Set the IP family
    #[must_use]
    pub fn ip_family(mut self, family: IpFamily) -> Self {
        self.config.ip_family = family;
        self
    }

    /// Enable or disable outbound bundling
    #[must_use]
    pub fn bundle(mut self, bundle: bool) -> Self {
        self.config.bundle = bundle;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> SessionConfig {
        self.config
    }
}
