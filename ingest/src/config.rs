use crate::decryptor::Decryptor;
use crate::envelope::parse_node_hex;
use crate::keys::KeyError;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Invalid decryption key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("Invalid watched node id: {0}")]
    InvalidNodeId(String),

    #[error("{0} must be greater than 0")]
    ZeroValue(&'static str),
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_decryption_keys() -> Vec<String> {
    vec!["1PG7OiApB1nwvP+rz05pAQ==".into()]
}

fn default_grouping_window_ms() -> u64 {
    10_000
}

fn default_flush_interval_ms() -> u64 {
    crate::scheduler::DEFAULT_FLUSH_INTERVAL.as_millis() as u64
}

fn default_consume_timeout_ms() -> u64 {
    crate::scheduler::DEFAULT_CONSUME_TIMEOUT.as_millis() as u64
}

fn default_dedup_capacity() -> usize {
    crate::dedup_cache::DEFAULT_CAPACITY
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_source_label() -> String {
    "private".into()
}

/// Ingestion pipeline configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Base64 channel keys, tried in order
    #[serde(default = "default_decryption_keys")]
    pub decryption_keys: Vec<String>,
    /// How long a group stays open after its first observation
    #[serde(default = "default_grouping_window_ms")]
    pub grouping_window_ms: u64,
    /// Scheduler tick
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Longest a single group may spend in the consumer before it is aborted
    #[serde(default = "default_consume_timeout_ms")]
    pub consume_timeout_ms: u64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Bound of the channel between the transport bridge and the worker
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Node ids (`!43b6ff0c` or `43b6ff0c`) whose traffic is kept from any topic
    #[serde(default)]
    pub watched_nodes: Vec<String>,
    /// Label attached to every envelope, names the broker the messages came from
    #[serde(default = "default_source_label")]
    pub source_label: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            decryption_keys: default_decryption_keys(),
            grouping_window_ms: default_grouping_window_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            consume_timeout_ms: default_consume_timeout_ms(),
            dedup_capacity: default_dedup_capacity(),
            channel_capacity: default_channel_capacity(),
            watched_nodes: Vec::new(),
            source_label: default_source_label(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.decryptor()?;
        self.watched_nodes()?;

        if self.flush_interval_ms == 0 {
            return Err(ValidationError::ZeroValue("flush_interval_ms"));
        }
        if self.consume_timeout_ms == 0 {
            return Err(ValidationError::ZeroValue("consume_timeout_ms"));
        }
        if self.channel_capacity == 0 {
            return Err(ValidationError::ZeroValue("channel_capacity"));
        }
        if self.dedup_capacity == 0 {
            return Err(ValidationError::ZeroValue("dedup_capacity"));
        }
        Ok(())
    }

    pub fn decryptor(&self) -> Result<Decryptor, ValidationError> {
        Ok(Decryptor::from_base64(&self.decryption_keys)?)
    }

    pub fn watched_nodes(&self) -> Result<HashSet<u32>, ValidationError> {
        self.watched_nodes
            .iter()
            .map(|node| {
                parse_node_hex(node).ok_or_else(|| ValidationError::InvalidNodeId(node.clone()))
            })
            .collect()
    }

    pub fn grouping_window(&self) -> Duration {
        Duration::from_millis(self.grouping_window_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn consume_timeout(&self) -> Duration {
        Duration::from_millis(self.consume_timeout_ms)
    }
}
