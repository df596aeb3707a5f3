//! Configuration for dirclient
//!
//! Centralized client configuration with sensible defaults.

use std::time::Duration;

use crate::protocol::MAX_MESSAGE_SIZE;

/// Main configuration for a directory client session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// TCP connect timeout (milliseconds)
    pub connect_timeout_ms: u64,

    /// Disable Nagle's algorithm on TCP transports
    pub tcp_nodelay: bool,

    // -------------------------------------------------------------------------
    // Protocol Configuration
    // -------------------------------------------------------------------------
    /// Protocol version announced in bind requests
    pub protocol_version: u32,

    /// Largest frame accepted from the server (in bytes)
    pub max_message_size: u32,

    // -------------------------------------------------------------------------
    // Operation Configuration
    // -------------------------------------------------------------------------
    /// How long an operation waits for its response (milliseconds)
    pub operation_timeout_ms: u64,

    /// Page size used by paged searches when the caller gives none
    pub default_page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            tcp_nodelay: true,
            protocol_version: 3,
            max_message_size: MAX_MESSAGE_SIZE,
            operation_timeout_ms: 30_000,
            default_page_size: 500,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the TCP connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.config.tcp_nodelay = enabled;
        self
    }

    /// Set the protocol version sent with bind requests
    pub fn protocol_version(mut self, version: u32) -> Self {
        self.config.protocol_version = version;
        self
    }

    /// Set the maximum accepted frame size (in bytes)
    pub fn max_message_size(mut self, size: u32) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the per-operation response timeout (in milliseconds)
    pub fn operation_timeout_ms(mut self, ms: u64) -> Self {
        self.config.operation_timeout_ms = ms;
        self
    }

    /// Set the default page size for paged searches
    pub fn default_page_size(mut self, size: u32) -> Self {
        self.config.default_page_size = size;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
