//! Settings type definitions.
//!
//! All types use camelCase JSON and `#[serde(default)]`, so a settings file
//! may contain any subset of fields.

use gattbench_core::TestItem;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GattbenchSettings {
    /// Settings schema version.
    pub version: String,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Event loop sizing.
    pub orchestrator: OrchestratorSettings,
    /// In-process simulated stack used by the `gattbench` binary.
    pub simulator: SimulatorSettings,
}

impl Default for GattbenchSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            logging: LoggingSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            simulator: SimulatorSettings::default(),
        }
    }
}

impl GattbenchSettings {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.outcome_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "orchestrator.outcomeBuffer must be > 0".into(),
            ));
        }
        if self.orchestrator.emitter_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "orchestrator.emitterCapacity must be > 0".into(),
            ));
        }
        if self.simulator.drop_before_ready > self.simulator.clients {
            return Err(SettingsError::InvalidValue(format!(
                "simulator.dropBeforeReady ({}) exceeds simulator.clients ({})",
                self.simulator.drop_before_ready, self.simulator.clients
            )));
        }
        let _ = self.simulator.failing_items()?;
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Event loop sizing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Capacity of each session's outcome channel.
    pub outcome_buffer: usize,
    /// Capacity of the diagnostic event broadcast.
    pub emitter_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            outcome_buffer: 16,
            emitter_capacity: 1024,
        }
    }
}

/// Simulated peripheral stack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatorSettings {
    /// Number of simulated clients that connect.
    pub clients: usize,
    /// Latency of every simulated exercise, in milliseconds.
    pub step_latency_ms: u64,
    /// Exercises the simulated clients fail, by key (`reliable_write`).
    pub failing_steps: Vec<String>,
    /// How many of the clients drop the link before reaching Ready.
    pub drop_before_ready: usize,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            clients: 2,
            step_latency_ms: 20,
            failing_steps: Vec::new(),
            drop_before_ready: 0,
        }
    }
}

impl SimulatorSettings {
    /// Resolve `failing_steps` to session exercises.
    pub fn failing_items(&self) -> Result<Vec<TestItem>> {
        self.failing_steps
            .iter()
            .map(|step| {
                TestItem::parse(step)
                    .filter(|item| TestItem::SESSION_SEQUENCE.contains(item))
                    .ok_or_else(|| {
                        SettingsError::InvalidValue(format!(
                            "simulator.failingSteps: unknown session exercise '{step}'"
                        ))
                    })
            })
            .collect()
    }
}
