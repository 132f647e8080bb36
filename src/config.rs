//! Engine configuration module
//!
//! Handles loading and parsing of engine configuration from files and environment variables.

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::protocol::frame::{
    DEFAULT_MAX_MESSAGES_PER_SECOND, DEFAULT_MAX_PAYLOAD_LENGTH, DEFAULT_NETWORK_BUFFER_LENGTH,
};
use crate::queue::DEFAULT_CONNECTIONS_PER_QUEUE;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetframeConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Address every server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP server port
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// UDP server port
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    /// WebSocket server port
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,

    /// Frame protocol settings
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Processing queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// TLS identity for the WebSocket server
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

/// Frame protocol configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Size of each socket read in bytes
    #[serde(default = "default_network_buffer_length")]
    pub network_buffer_length: usize,

    /// Messages a connection may send per second (0 to disable)
    #[serde(default = "default_max_messages_per_second")]
    pub max_received_messages_per_second: u32,

    /// Largest accepted frame payload in bytes
    #[serde(default = "default_max_payload_length")]
    pub max_payload_length: usize,

    /// Reject frames carrying an unexpected version byte
    #[serde(default = "default_true")]
    pub strict_versions: bool,

    /// zlib-compress message fields
    #[serde(default)]
    pub compression: bool,
}

/// Processing queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Server connections sharing one processing queue
    #[serde(default = "default_connections_per_queue")]
    pub connections_per_queue: usize,
}

/// TLS configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PKCS#12 archive holding the certificate and private key
    pub certificate_path: PathBuf,

    /// Password protecting the archive
    #[serde(default)]
    pub certificate_password: String,
}

// Default value functions
fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_tcp_port() -> u16 {
    7000
}

fn default_udp_port() -> u16 {
    7001
}

fn default_websocket_port() -> u16 {
    7002
}

fn default_network_buffer_length() -> usize {
    DEFAULT_NETWORK_BUFFER_LENGTH
}

fn default_max_messages_per_second() -> u32 {
    DEFAULT_MAX_MESSAGES_PER_SECOND
}

fn default_max_payload_length() -> usize {
    DEFAULT_MAX_PAYLOAD_LENGTH
}

fn default_true() -> bool {
    true
}

fn default_connections_per_queue() -> usize {
    DEFAULT_CONNECTIONS_PER_QUEUE
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            network_buffer_length: default_network_buffer_length(),
            max_received_messages_per_second: default_max_messages_per_second(),
            max_payload_length: default_max_payload_length(),
            strict_versions: default_true(),
            compression: false,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            connections_per_queue: default_connections_per_queue(),
        }
    }
}

impl Default for NetframeConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/netframe.toml"),
            bind_address: default_bind_address(),
            tcp_port: default_tcp_port(),
            udp_port: default_udp_port(),
            websocket_port: default_websocket_port(),
            protocol: ProtocolConfig::default(),
            queue: QueueConfig::default(),
            tls: None,
            debug: false,
        }
    }
}

impl NetframeConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        let config_path = env::var("NETFRAME_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/netframe.toml"));

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration document
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("NETFRAME_BIND_ADDRESS") {
            if let Ok(address) = val.parse() {
                self.bind_address = address;
            }
        }
        if let Ok(val) = env::var("NETFRAME_TCP_PORT") {
            if let Ok(port) = val.parse() {
                self.tcp_port = port;
            }
        }
        if let Ok(val) = env::var("NETFRAME_UDP_PORT") {
            if let Ok(port) = val.parse() {
                self.udp_port = port;
            }
        }
        if let Ok(val) = env::var("NETFRAME_WEBSOCKET_PORT") {
            if let Ok(port) = val.parse() {
                self.websocket_port = port;
            }
        }
        if let Ok(val) = env::var("NETFRAME_MAX_MESSAGES_PER_SECOND") {
            if let Ok(max) = val.parse() {
                self.protocol.max_received_messages_per_second = max;
            }
        }
        if let Ok(val) = env::var("NETFRAME_CONNECTIONS_PER_QUEUE") {
            if let Ok(count) = val.parse() {
                self.queue.connections_per_queue = count;
            }
        }
        if let Ok(val) = env::var("NETFRAME_COMPRESSION") {
            self.protocol.compression = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("NETFRAME_DEBUG") {
            self.debug = val.to_lowercase() == "true" || val == "1";
        }

        // TLS identity (from secure environment)
        if let Ok(path) = env::var("NETFRAME_TLS_CERTIFICATE") {
            let password = env::var("NETFRAME_TLS_PASSWORD").unwrap_or_default();
            self.tls = Some(TlsConfig {
                certificate_path: PathBuf::from(path),
                certificate_password: password,
            });
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Ports must be unique, except when left to the OS
        let ports = [self.tcp_port, self.udp_port, self.websocket_port];
        for (i, a) in ports.iter().enumerate() {
            if *a != 0 && ports[i + 1..].contains(a) {
                anyhow::bail!("TCP, UDP and WebSocket ports must be different");
            }
        }

        if self.protocol.network_buffer_length < 64 {
            anyhow::bail!("Network buffer length must be at least 64 bytes");
        }
        if self.protocol.max_payload_length == 0
            || self.protocol.max_payload_length > u32::MAX as usize
        {
            anyhow::bail!("Max payload length must be between 1 and {}", u32::MAX);
        }
        if self.queue.connections_per_queue == 0 {
            anyhow::bail!("Connections per queue must be at least 1");
        }

        if let Some(tls) = &self.tls {
            if tls.certificate_path.as_os_str().is_empty() {
                anyhow::bail!("TLS certificate path must not be empty");
            }
        }

        Ok(())
    }

    pub fn tcp_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.tcp_port)
    }

    pub fn udp_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.udp_port)
    }

    pub fn websocket_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.websocket_port)
    }
}
