use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration as StdDuration,
};

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

const DEBUG_ENV: &str = "MINERFLEET_DEBUG";

/// Longest span any setting may describe, in days.
const MAX_SPAN_DAYS: i64 = 3_650;

fn max_span() -> Duration {
    Duration::days(MAX_SPAN_DAYS)
}

/// Clamps into `[0, max_span]` so timestamp arithmetic cannot overflow.
fn bounded(span: Option<Duration>) -> Duration {
    span.map_or(max_span(), |span| span.clamp(Duration::zero(), max_span()))
}

fn secs(value: u64) -> Option<Duration> {
    i64::try_from(value).ok().and_then(Duration::try_seconds)
}

/// Runtime knobs for the coordination core.
///
/// Every field has a default, so a partial JSON file (or none at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct FleetConfig {
    pub database_path: PathBuf,
    pub short_tick_secs: u64,
    pub long_tick_secs: u64,
    /// How long captured snapshots stay in the in-memory window.
    pub retention_minutes: i64,
    /// Clients whose last heartbeat is older than this are left out of a pass.
    pub active_window_minutes: i64,
    /// Trailing guard that keeps the tick being written out of reads.
    pub read_guard_secs: i64,
    pub store_timeout_ms: u64,
    /// Sessions silent for longer than this are swept on the long tick.
    pub session_idle_secs: i64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("minerfleet.sqlite3"),
            short_tick_secs: 10,
            long_tick_secs: 120,
            retention_minutes: 20,
            active_window_minutes: 3,
            read_guard_secs: 5,
            store_timeout_ms: 5_000,
            session_idle_secs: 180,
        }
    }
}

impl FleetConfig {
    /// Reads the config at `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read fleet config from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("invalid fleet config in {}", path.display()))?
        } else {
            Self::default()
        };

        config
            .validate()
            .with_context(|| format!("invalid fleet config in {}", path.display()))?;
        Ok(config.with_env_overrides())
    }

    /// Rejects durations that are negative, zero where a pass needs a span,
    /// or longer than ten years.
    pub fn validate(&self) -> Result<()> {
        let spans = [
            ("shortTickSecs", secs(self.short_tick_secs), true),
            ("longTickSecs", secs(self.long_tick_secs), true),
            ("retentionMinutes", Duration::try_minutes(self.retention_minutes), false),
            ("activeWindowMinutes", Duration::try_minutes(self.active_window_minutes), false),
            ("readGuardSecs", Duration::try_seconds(self.read_guard_secs), true),
            ("sessionIdleSecs", Duration::try_seconds(self.session_idle_secs), false),
        ];
        for (name, span, zero_allowed) in spans {
            match span {
                Some(span) if span > max_span() => {
                    bail!("{name} exceeds the {MAX_SPAN_DAYS}-day limit")
                }
                Some(span) if span < Duration::zero() => bail!("{name} must not be negative"),
                Some(span) if span.is_zero() && !zero_allowed => bail!("{name} must be positive"),
                Some(_) => {}
                None => bail!("{name} is out of range"),
            }
        }
        Ok(())
    }

    /// Debug runs tick every second and evict every ten, which makes local
    /// dashboards move without waiting minutes.
    pub fn with_env_overrides(mut self) -> Self {
        let debug_mode = std::env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if debug_mode {
            self.short_tick_secs = 1;
            self.long_tick_secs = 10;
        }
        self
    }

    pub fn short_tick(&self) -> StdDuration {
        StdDuration::from_secs(self.short_tick_secs.max(1))
    }

    pub fn long_tick(&self) -> StdDuration {
        StdDuration::from_secs(self.long_tick_secs.max(1))
    }

    pub fn retention(&self) -> Duration {
        bounded(Duration::try_minutes(self.retention_minutes))
    }

    pub fn active_window(&self) -> Duration {
        bounded(Duration::try_minutes(self.active_window_minutes))
    }

    pub fn read_guard(&self) -> Duration {
        bounded(Duration::try_seconds(self.read_guard_secs))
    }

    pub fn store_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.store_timeout_ms)
    }

    pub fn session_idle(&self) -> Duration {
        bounded(Duration::try_seconds(self.session_idle_secs))
    }

    /// Time span covered by `limit` short ticks.
    pub fn tick_span(&self, limit: u32) -> Duration {
        let secs = i64::try_from(self.short_tick_secs.max(1)).unwrap_or(i64::MAX);
        bounded(Duration::try_seconds(secs.saturating_mul(i64::from(limit))))
    }
}
