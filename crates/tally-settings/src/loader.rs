//! Layered settings loading.
//!
//! Compiled defaults are serialized to JSON, the user's file is merged over
//! them key by key, the result is decoded, and `TALLY_*` environment
//! variables are applied last. Values the runtime cannot use are rejected.

use std::fmt::Display;
use std::io::ErrorKind;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::TallySettings;

/// The client's data directory (`~/.tally`).
pub fn data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join(".tally")
}

/// `~/.tally/settings.json`.
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Load from [`settings_path`].
pub fn load_settings() -> Result<TallySettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path`. A missing file means defaults; unreadable or
/// malformed files are errors.
pub fn load_settings_from_path(path: &Path) -> Result<TallySettings> {
    let mut merged = serde_json::to_value(TallySettings::default())?;

    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!(path = %path.display(), "merging user settings");
            let overrides: Value = serde_json::from_str(&text)?;
            merged = deep_merge(merged, overrides);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(e) => return Err(e.into()),
    }

    let mut settings: TallySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    check(&settings)?;
    Ok(settings)
}

/// Overlay `source` onto `target`.
///
/// Objects merge per key, recursively. Any other `source` value replaces
/// the target outright, except `null`, which leaves the target as is.
pub fn deep_merge(target: Value, source: Value) -> Value {
    let (mut base, overlay) = match (target, source) {
        (Value::Object(base), Value::Object(overlay)) => (base, overlay),
        (_, other) => return other,
    };
    for (key, value) in overlay {
        if value.is_null() {
            continue;
        }
        let next = match base.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None => value,
        };
        let _ = base.insert(key, next);
    }
    Value::Object(base)
}

/// Apply `TALLY_*` overrides. Unparseable or out-of-range values are
/// ignored with a warning.
pub fn apply_env_overrides(settings: &mut TallySettings) {
    let s = settings;
    override_string("TALLY_WEBSOCKET_URL", &mut s.realtime.websocket_url);
    override_parsed("TALLY_OUTBOUND_BUFFER", 1..=65_536, &mut s.realtime.outbound_buffer);
    override_string("TALLY_API_URL", &mut s.api.base_url);
    override_parsed("TALLY_API_TIMEOUT_MS", 100..=600_000, &mut s.api.timeout_ms);
    override_string("TALLY_TOKEN_FILE", &mut s.auth.token_file);
    override_string("TALLY_LOG_LEVEL", &mut s.logging.level);
}

fn check(settings: &TallySettings) -> Result<()> {
    let realtime = &settings.realtime;
    for (name, value) in [
        ("outboundBuffer", realtime.outbound_buffer),
        ("inboundBuffer", realtime.inbound_buffer),
    ] {
        if value == 0 {
            return Err(SettingsError::InvalidValue(format!(
                "realtime.{name} must be at least 1"
            )));
        }
    }
    Ok(())
}

/// Parse `raw` and accept it only inside `range`.
pub fn parse_in_range<T>(raw: &str, range: &RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    raw.trim().parse().ok().filter(|n| range.contains(n))
}

fn override_string(name: &str, slot: &mut String) {
    if let Some(value) = std::env::var(name).ok().filter(|v| !v.is_empty()) {
        debug!(key = name, "settings override from environment");
        *slot = value;
    }
}

fn override_parsed<T>(name: &str, range: RangeInclusive<T>, slot: &mut T)
where
    T: FromStr + PartialOrd + Display,
{
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    match parse_in_range(&raw, &range) {
        Some(value) => *slot = value,
        None => warn!(
            key = name,
            value = %raw,
            "ignoring env override outside {}..={}",
            range.start(),
            range.end()
        ),
    }
}
