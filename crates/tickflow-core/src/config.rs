//! Client configuration with an irreversible use-lock.
//!
//! A [`Config`] is freely mutable until it is used to build a live
//! client. Building locks it permanently; every later mutation attempt
//! fails with [`CoreError::Config`]. Reads are always allowed and return
//! the same values before and after locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

fn default_max_allowed_loops() -> u32 {
    100
}

fn default_sleep_interval_ms() -> u64 {
    100
}

fn default_reconnect_time_secs() -> u64 {
    5
}

fn default_connection_initialization_timeout_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_extra_duration_secs() -> u64 {
    5
}

/// Serializable view of a [`Config`]'s values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Upper bound on internal retry/poll iterations.
    #[serde(default = "default_max_allowed_loops")]
    pub max_allowed_loops: u32,
    /// Delay between poll iterations, in milliseconds.
    #[serde(default = "default_sleep_interval_ms")]
    pub sleep_interval_ms: u64,
    /// Delay before a reconnect attempt, in seconds.
    #[serde(default = "default_reconnect_time_secs")]
    pub reconnect_time_secs: u64,
    /// Ceiling for establishing a usable connection, in seconds.
    #[serde(default = "default_connection_initialization_timeout_secs")]
    pub connection_initialization_timeout_secs: u64,
    /// Default ceiling for request/response waits, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Ordered fallback endpoint list.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Grace period added to result-wait ceilings, in seconds.
    #[serde(default = "default_extra_duration_secs")]
    pub extra_duration_secs: u64,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            max_allowed_loops: default_max_allowed_loops(),
            sleep_interval_ms: default_sleep_interval_ms(),
            reconnect_time_secs: default_reconnect_time_secs(),
            connection_initialization_timeout_secs:
                default_connection_initialization_timeout_secs(),
            timeout_secs: default_timeout_secs(),
            urls: Vec::new(),
            extra_duration_secs: default_extra_duration_secs(),
        }
    }
}

/// Client configuration.
#[derive(Debug, Default)]
pub struct Config {
    values: RwLock<ConfigSnapshot>,
    locked: AtomicBool,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a snapshot (e.g. parsed from JSON). Starts unlocked.
    pub fn from_snapshot(snapshot: ConfigSnapshot) -> Self {
        Self {
            values: RwLock::new(snapshot),
            locked: AtomicBool::new(false),
        }
    }

    pub fn from_json(json: &str) -> CoreResult<Self> {
        let snapshot: ConfigSnapshot =
            serde_json::from_str(json).map_err(|e| CoreError::Config(e.to_string()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Permanently lock the configuration. Called when a live client is
    /// built from it; there is no unlock.
    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn mutate(&self, apply: impl FnOnce(&mut ConfigSnapshot)) -> CoreResult<()> {
        if self.is_locked() {
            return Err(CoreError::Config(
                "configuration is locked and cannot be modified after being used".into(),
            ));
        }
        apply(&mut self.values.write());
        Ok(())
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        self.values.read().clone()
    }

    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(&self.snapshot()).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn max_allowed_loops(&self) -> u32 {
        self.values.read().max_allowed_loops
    }

    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(self.values.read().sleep_interval_ms)
    }

    pub fn reconnect_time(&self) -> Duration {
        Duration::from_secs(self.values.read().reconnect_time_secs)
    }

    pub fn connection_initialization_timeout(&self) -> Duration {
        Duration::from_secs(self.values.read().connection_initialization_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.values.read().timeout_secs)
    }

    pub fn urls(&self) -> Vec<String> {
        self.values.read().urls.clone()
    }

    pub fn extra_duration(&self) -> Duration {
        Duration::from_secs(self.values.read().extra_duration_secs)
    }

    pub fn set_max_allowed_loops(&self, value: u32) -> CoreResult<()> {
        self.mutate(|v| v.max_allowed_loops = value)
    }

    pub fn set_sleep_interval_ms(&self, value: u64) -> CoreResult<()> {
        self.mutate(|v| v.sleep_interval_ms = value)
    }

    pub fn set_reconnect_time_secs(&self, value: u64) -> CoreResult<()> {
        self.mutate(|v| v.reconnect_time_secs = value)
    }

    pub fn set_connection_initialization_timeout_secs(&self, value: u64) -> CoreResult<()> {
        self.mutate(|v| v.connection_initialization_timeout_secs = value)
    }

    pub fn set_timeout_secs(&self, value: u64) -> CoreResult<()> {
        self.mutate(|v| v.timeout_secs = value)
    }

    pub fn set_urls(&self, urls: Vec<String>) -> CoreResult<()> {
        self.mutate(|v| v.urls = urls)
    }

    pub fn set_extra_duration_secs(&self, value: u64) -> CoreResult<()> {
        self.mutate(|v| v.extra_duration_secs = value)
    }
}
