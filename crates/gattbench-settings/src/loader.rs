//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::GattbenchSettings;

/// Resolve the path to the settings file (`~/.gattbench/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gattbench").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GattbenchSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or values that fail
/// [`GattbenchSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<GattbenchSettings> {
    let defaults = serde_json::to_value(GattbenchSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GattbenchSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `GATTBENCH_*` environment overrides.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut GattbenchSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

fn apply_overrides(settings: &mut GattbenchSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("GATTBENCH_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) =
        read("GATTBENCH_LOG_JSON").and_then(|v| checked("GATTBENCH_LOG_JSON", &v, parse_bool(&v)))
    {
        settings.logging.json = v;
    }
    if let Some(v) = read("GATTBENCH_OUTCOME_BUFFER")
        .and_then(|v| checked("GATTBENCH_OUTCOME_BUFFER", &v, parse_usize_range(&v, 1, 4_096)))
    {
        settings.orchestrator.outcome_buffer = v;
    }
    if let Some(v) = read("GATTBENCH_SIM_CLIENTS")
        .and_then(|v| checked("GATTBENCH_SIM_CLIENTS", &v, parse_usize_range(&v, 0, 64)))
    {
        settings.simulator.clients = v;
    }
    if let Some(v) = read("GATTBENCH_SIM_STEP_LATENCY_MS")
        .and_then(|v| checked("GATTBENCH_SIM_STEP_LATENCY_MS", &v, parse_u64_range(&v, 0, 60_000)))
    {
        settings.simulator.step_latency_ms = v;
    }
    if let Some(v) = read("GATTBENCH_SIM_FAILING_STEPS") {
        settings.simulator.failing_steps = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
    }
}

fn checked<T>(key: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
