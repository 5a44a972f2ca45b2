//! Configuration management for the reader engine

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub timing: TimingConfig,
    pub search: SearchConfig,
    pub locations: LocationConfig,
    pub settings_path: Option<PathBuf>,
}

/// Delays and debounce windows, in milliseconds
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Quiet window collapsing content-drawn/relocated bursts
    pub reflow_debounce_ms: u64,
    /// Pause between clearing markers and redrawing them
    pub redraw_settle_ms: u64,
    /// Delay between a highlight list change and its reconcile pass
    pub highlight_reconcile_ms: u64,
    /// Quiet window batching display option changes
    pub display_debounce_ms: u64,
    /// Wait after an automatic page turn before narrating the new page
    pub narration_settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Content units loaded per chunk
    pub chunk_size: usize,
    /// Maximum number of search-hit markers drawn
    pub max_markers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    /// Characters per generated location
    pub granularity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            timing: TimingConfig {
                reflow_debounce_ms: 100,
                redraw_settle_ms: 50,
                highlight_reconcile_ms: 100,
                display_debounce_ms: 300,
                narration_settle_ms: 500,
            },
            search: SearchConfig {
                chunk_size: 5,
                max_markers: 100,
            },
            locations: LocationConfig { granularity: 1600 },
            settings_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        EngineConfig {
            timing: TimingConfig {
                reflow_debounce_ms: var_or("READER_REFLOW_DEBOUNCE_MS", defaults.timing.reflow_debounce_ms),
                redraw_settle_ms: var_or("READER_REDRAW_SETTLE_MS", defaults.timing.redraw_settle_ms),
                highlight_reconcile_ms: var_or(
                    "READER_HIGHLIGHT_RECONCILE_MS",
                    defaults.timing.highlight_reconcile_ms,
                ),
                display_debounce_ms: var_or("READER_DISPLAY_DEBOUNCE_MS", defaults.timing.display_debounce_ms),
                narration_settle_ms: var_or("READER_NARRATION_SETTLE_MS", defaults.timing.narration_settle_ms),
            },
            search: SearchConfig {
                chunk_size: var_or("READER_SEARCH_CHUNK_SIZE", defaults.search.chunk_size).max(1),
                max_markers: var_or("READER_SEARCH_MAX_MARKERS", defaults.search.max_markers),
            },
            locations: LocationConfig {
                granularity: var_or("READER_LOCATION_GRANULARITY", defaults.locations.granularity).max(1),
            },
            settings_path: env::var("READER_SETTINGS_PATH").ok().map(PathBuf::from),
        }
    }
}

impl TimingConfig {
    pub fn reflow_debounce(&self) -> Duration {
        Duration::from_millis(self.reflow_debounce_ms)
    }

    pub fn redraw_settle(&self) -> Duration {
        Duration::from_millis(self.redraw_settle_ms)
    }

    pub fn highlight_reconcile(&self) -> Duration {
        Duration::from_millis(self.highlight_reconcile_ms)
    }

    pub fn display_debounce(&self) -> Duration {
        Duration::from_millis(self.display_debounce_ms)
    }

    pub fn narration_settle(&self) -> Duration {
        Duration::from_millis(self.narration_settle_ms)
    }
}

fn var_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value {:?} for {}, using {}", raw, key, default);
            default
        }),
        Err(_) => default,
    }
}
