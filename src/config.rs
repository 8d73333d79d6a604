//! Daemon-wide knobs, loaded from an optional `beaker-journald.toml` and
//! overridable by environment/CLI, following the teacher's layered
//! precedence: CLI > env > file > defaults (§6).

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Merged daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub pretty_dump_default: bool,
    /// Reserved: the synchronous open-blocks-until-writer pipe model has no
    /// retry loop yet to apply this to.
    pub pipe_open_retry_ms: u64,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pretty_dump_default: false,
            pipe_open_retry_ms: 250,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    daemon: Option<TomlDaemon>,
    logging: Option<TomlLogging>,
}

#[derive(Debug, Deserialize)]
struct TomlDaemon {
    pretty_dump_default: Option<bool>,
    pipe_open_retry_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlLogging {
    level: Option<String>,
}

/// Load `path` if it exists; a missing file is not an error (§6). An
/// existing-but-unparsable file is.
fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        return Ok(TomlConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Build the daemon config from `path` (file layer), then apply the
/// `BEAKER_JOURNALD_LOG_LEVEL` env override, matching the teacher's
/// `build_config`'s env-over-file layering.
pub fn build_config(path: &Path) -> Result<DaemonConfig> {
    let toml_cfg = load_toml_config(path)?;
    let defaults = DaemonConfig::default();

    let daemon = toml_cfg.daemon.unwrap_or(TomlDaemon {
        pretty_dump_default: None,
        pipe_open_retry_ms: None,
    });
    let logging = toml_cfg.logging.unwrap_or(TomlLogging { level: None });

    let mut cfg = DaemonConfig {
        pretty_dump_default: daemon
            .pretty_dump_default
            .unwrap_or(defaults.pretty_dump_default),
        pipe_open_retry_ms: daemon
            .pipe_open_retry_ms
            .unwrap_or(defaults.pipe_open_retry_ms),
        log_level: logging.level.unwrap_or(defaults.log_level),
    };

    if let Ok(level) = std::env::var("BEAKER_JOURNALD_LOG_LEVEL") {
        cfg.log_level = level;
    }

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = build_config(Path::new("/nonexistent/beaker-journald.toml")).unwrap();
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.pretty_dump_default);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beaker-journald.toml");
        std::fs::write(
            &path,
            "[daemon]\npretty_dump_default = true\n\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();
        let cfg = build_config(&path).unwrap();
        assert!(cfg.pretty_dump_default);
        assert_eq!(cfg.log_level, "debug");
    }
}
