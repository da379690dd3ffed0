//! Configuration for framelink
//!
//! Centralized configuration with sensible defaults, shared by
//! [`Client`](crate::Client) and [`Server`](crate::Server).

use std::net::Ipv4Addr;

/// Default cap on a declared inbound body (16 MB)
pub const DEFAULT_MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;

/// Main configuration for a client or server endpoint
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Server Configuration
    // -------------------------------------------------------------------------
    /// IPv4 address the server's acceptor binds to
    pub bind_addr: Ipv4Addr,

    /// Id handed to the first accepted connection; later ones count up
    pub first_connection_id: u32,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Largest body size a peer may declare in a header.
    /// A larger declaration closes the connection.
    pub max_body_size: u32,

    /// Disable Nagle's algorithm on every socket
    pub nodelay: bool,

    // -------------------------------------------------------------------------
    // Reactor Configuration
    // -------------------------------------------------------------------------
    /// Name of the background thread driving the reactor
    pub thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: Ipv4Addr::UNSPECIFIED,
            first_connection_id: 10_000,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            nodelay: true,
            thread_name: "framelink-reactor".to_string(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the address the server binds to
    pub fn bind_addr(mut self, addr: Ipv4Addr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the id given to the first accepted connection
    pub fn first_connection_id(mut self, id: u32) -> Self {
        self.config.first_connection_id = id;
        self
    }

    /// Set the maximum accepted inbound body size (in bytes)
    pub fn max_body_size(mut self, size: u32) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    /// Set the reactor thread name
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
