//! Engine configuration types.

use std::path::PathBuf;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::ConflictPolicy;

/// Configuration shared by a pane's task queue, undo history and façade.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Maximum number of undo entries kept (oldest evicted first).
    #[builder(default = "100")]
    #[serde(default = "default_undo_capacity")]
    pub undo_capacity: usize,

    /// Conflict policy used when a request does not override it.
    #[builder(default)]
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// Seconds the worker waits for an interactive conflict decision.
    #[builder(default = "30")]
    #[serde(default = "default_conflict_timeout_secs")]
    pub conflict_timeout_secs: u64,

    /// Buffer size of the event broadcast channel.
    #[builder(default = "256")]
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Directory holding deleted or displaced items for undo.
    #[builder(default)]
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
}

fn default_undo_capacity() -> usize {
    100
}

fn default_conflict_timeout_secs() -> u64 {
    30
}

fn default_event_capacity() -> usize {
    256
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.undo_capacity == Some(0) {
            return Err("Undo capacity must be at least 1".to_string());
        }
        if self.conflict_timeout_secs == Some(0) {
            return Err("Conflict timeout must be at least 1 second".to_string());
        }
        if self.event_capacity == Some(0) {
            return Err("Event capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new engine config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// How long an interactive conflict may stay unanswered.
    pub fn conflict_timeout(&self) -> Duration {
        Duration::from_secs(self.conflict_timeout_secs)
    }

    /// Backup directory, falling back to one under the system temp dir.
    pub fn backup_dir_or_default(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("ferryfile-backup"))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            undo_capacity: default_undo_capacity(),
            conflict_policy: ConflictPolicy::default(),
            conflict_timeout_secs: default_conflict_timeout_secs(),
            event_capacity: default_event_capacity(),
            backup_dir: None,
        }
    }
}
