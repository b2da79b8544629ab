//! Context configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Behavior a graph is built for.
///
/// Operators consult the mode when registering nodes to decide whether to
/// add gradient-producing work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Training,
    #[default]
    Inference,
    Evaluation,
}

impl Mode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Training => "Training",
            Self::Inference => "Inference",
            Self::Evaluation => "Evaluation",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for creating a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Initial mode.
    pub mode: Mode,
    /// Device ordinal the graph is bound to.
    pub device_id: usize,
    /// Node sizes are rounded up to this many bytes inside the arena.
    pub arena_alignment: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Inference,
            device_id: 0,
            arena_alignment: 1,
        }
    }
}

impl ContextConfig {
    #[must_use]
    pub fn new(mode: Mode, device_id: usize) -> Self {
        Self {
            mode,
            device_id,
            ..Self::default()
        }
    }

    /// Parse a config from JSON; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
