//! Config module.
//! Manages I/O for board_config.json (scan cadence, engine settings,
//! recognition thresholds, template locations) via serde JSON.
//! A missing file yields defaults; a malformed one is an error so a
//! typo does not silently revert every tunable.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "board_config.json";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Milliseconds between scan ticks.
    pub scan_interval_ms: u64,
    /// Explicit engine binary; discovered on PATH when absent.
    pub engine_path: Option<PathBuf>,
    pub engine_depth: u32,
    /// Upper bound on any single engine reply.
    pub engine_timeout_ms: u64,
    /// Ranked candidates requested per move choice.
    pub candidate_count: usize,
    /// Root directory holding per-site template folders.
    pub template_root: PathBuf,
    /// Minimum bounding-box area accepted as a board.
    pub min_board_area: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_interval_ms: 500,
            engine_path: None,
            engine_depth: 12,
            engine_timeout_ms: 10_000,
            candidate_count: crate::select::NUM_CANDIDATES,
            template_root: PathBuf::from("templates"),
            min_board_area: crate::detect::MIN_BOARD_AREA,
        }
    }
}

impl Config {
    /// Loads the config, falling back to defaults when the file does not
    /// exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("no config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| Error::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).map_err(|e| Error::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::write(path, raw).map_err(|e| Error::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Template directory for one site, e.g. `templates/chesscom`.
    pub fn template_dir(&self, site: &str) -> PathBuf {
        self.template_root.join(site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/board_config.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let parsed: Config = serde_json::from_str(r#"{"engine_depth": 18}"#).unwrap();
        assert_eq!(parsed.engine_depth, 18);
        assert_eq!(parsed.scan_interval_ms, Config::default().scan_interval_ms);
    }

    #[test]
    fn round_trips_through_json() {
        let config = Config {
            engine_depth: 16,
            candidate_count: 3,
            ..Config::default()
        };
        let raw = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn site_template_dir() {
        let config = Config::default();
        assert_eq!(
            config.template_dir("chesscom"),
            PathBuf::from("templates/chesscom")
        );
    }
}
