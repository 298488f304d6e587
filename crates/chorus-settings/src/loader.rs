//! Reading `ChorusSettings` from disk and the environment.
//!
//! Layers, lowest priority first:
//! 1. [`ChorusSettings::default()`]
//! 2. the JSON settings file, merged key-by-key over the defaults
//! 3. `CHORUS_*` environment variables
//!
//! The merged value is validated last. When merging, nested objects combine
//! per key, a `null` leaves the lower layer untouched, and any other value
//! (arrays included) replaces it wholesale.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{ChorusSettings, EchoPolicy, RelayStrategy};

/// `~/.chorus/settings.json`, falling back to `/tmp` without `HOME`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    home.join(".chorus").join("settings.json")
}

/// [`load_settings_from_path`] on [`settings_path`].
pub fn load_settings() -> Result<ChorusSettings> {
    load_settings_from_path(&settings_path())
}

/// All three layers, validated.
///
/// A missing file is not an error. Unparseable JSON or a failed validation is.
pub fn load_settings_from_path(path: &Path) -> Result<ChorusSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults with the file merged over them. No env, no validation.
pub fn read_settings_file(path: &Path) -> Result<ChorusSettings> {
    let mut merged = serde_json::to_value(ChorusSettings::default())?;

    match std::fs::read_to_string(path) {
        Ok(raw) => {
            debug!(path = %path.display(), "merging settings file");
            let overlay: Value = serde_json::from_str(&raw)?;
            merged = deep_merge(merged, overlay);
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(error) => return Err(error.into()),
    }

    Ok(serde_json::from_value(merged)?)
}

/// Merge `overlay` into `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => Value::Object(merge_maps(base, overlay)),
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

fn merge_maps(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
        let combined = match base.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None => value,
        };
        let _ = base.insert(key, combined);
    }
    base
}

/// Overlay `CHORUS_*` variables from the process environment.
///
/// Unparseable or out-of-range values are skipped with a warning.
pub fn apply_env_overrides(settings: &mut ChorusSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Overlay `CHORUS_*` values obtained through `lookup`.
pub fn apply_overrides_from<F>(settings: &mut ChorusSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvSource { lookup };

    let server = &mut settings.server;
    env.text("CHORUS_HOST", &mut server.host);
    env.bounded("CHORUS_PORT", 0..=u16::MAX, &mut server.port);
    env.bounded("CHORUS_MAX_CONNECTIONS", 1..=1_000_000, &mut server.max_connections);
    env.bounded("CHORUS_HEARTBEAT_INTERVAL_MS", 0..=3_600_000, &mut server.heartbeat_interval_ms);
    env.bounded("CHORUS_HEARTBEAT_TIMEOUT_MS", 0..=3_600_000, &mut server.heartbeat_timeout_ms);

    let relay = &mut settings.relay;
    env.named("CHORUS_STRATEGY", RelayStrategy::parse, &mut relay.strategy);
    env.named("CHORUS_ECHO", EchoPolicy::parse, &mut relay.echo);
    env.text("CHORUS_TOPIC", &mut relay.topic);
    env.bounded("CHORUS_CHANNEL_CAPACITY", 1..=1_048_576, &mut relay.channel_capacity);
    env.bounded("CHORUS_MAX_DROPS", 0..=u64::MAX, &mut relay.max_drops_before_disconnect);
    env.bounded("CHORUS_PUBLISH_TIMEOUT_MS", 1..=60_000, &mut relay.publish_timeout_ms);

    env.text("CHORUS_LOG_LEVEL", &mut settings.logging.level);
    env.text("CHORUS_LOG_FORMAT", &mut settings.logging.format);
}

/// `raw` parsed as `T`, if it lies within `range`.
pub fn parse_bounded<T>(raw: &str, range: &RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    raw.trim().parse().ok().filter(|n| range.contains(n))
}

struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn text(&self, name: &str, slot: &mut String) {
        if let Some(value) = (self.lookup)(name).filter(|v| !v.is_empty()) {
            *slot = value;
        }
    }

    fn bounded<T>(&self, name: &str, range: RangeInclusive<T>, slot: &mut T)
    where
        T: FromStr + PartialOrd + std::fmt::Debug,
    {
        let Some(raw) = (self.lookup)(name) else {
            return;
        };
        match parse_bounded(&raw, &range) {
            Some(value) => *slot = value,
            None => warn!(key = name, value = %raw, ?range, "ignoring out-of-range env var"),
        }
    }

    fn named<T>(&self, name: &str, parse: fn(&str) -> Option<T>, slot: &mut T) {
        let Some(raw) = (self.lookup)(name) else {
            return;
        };
        match parse(&raw) {
            Some(value) => *slot = value,
            None => warn!(key = name, value = %raw, "ignoring unrecognized env var"),
        }
    }
}
