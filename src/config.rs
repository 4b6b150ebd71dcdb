//! Configuration loading and defaults.
//!
//! Resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `FORGECORE_PORT`, `FORGECORE_HOST`,
//!    `FORGECORE_DATA_DIR`.
//! 2. **Config file** — path via `--config <path>`, or `forgecore.toml` in
//!    the current directory.
//! 3. **Compiled defaults** — see each field's default value below.
//!
//! ```toml
//! [server]
//! host = "localhost"
//! port = 0               # 0 = OS-assigned
//! data_dir = "./data"
//!
//! [pool]
//! max_sessions = 5
//! min_sessions = 0
//! idle_timeout_ms = 300000
//! cleanup_interval_ms = 60000
//! default_acquire_timeout_ms = 30000
//!
//! [queue]
//! history_size = 100
//!
//! [rebuild]
//! debounce_ms = 2000
//!
//! [generator]
//! default_model = "default"
//!
//! [generator.phase_overrides.analyze]
//! timeout_ms = 120000
//!
//! [logging]
//! level = "info"
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub rebuild: RebuildConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port. 0 = OS-assigned (the listener reports the bound port once up).
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default)]
    pub min_sessions: usize,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    #[serde(default = "default_acquire_timeout_ms")]
    pub default_acquire_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_history_size")]
    pub history_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RebuildConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub phase_overrides: HashMap<String, PhaseOverride>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhaseOverride {
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub skip_ai: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_max_sessions() -> usize {
    5
}
fn default_idle_timeout_ms() -> u64 {
    300_000
}
fn default_cleanup_interval_ms() -> u64 {
    60_000
}
fn default_acquire_timeout_ms() -> u64 {
    30_000
}
fn default_queue_history_size() -> usize {
    100
}
fn default_debounce_ms() -> u64 {
    2_000
}
fn default_model() -> String {
    "default".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            data_dir: default_data_dir(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            min_sessions: 0,
            idle_timeout_ms: default_idle_timeout_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            default_acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            history_size: default_queue_history_size(),
        }
    }
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            phase_overrides: HashMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure — a bad config
    /// path is an operator error we want surfaced immediately, not limped
    /// through). Otherwise looks for `forgecore.toml` in the current
    /// directory, falling back to compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config: Config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("failed to parse config file {p}: {e}"))
        } else if Path::new("forgecore.toml").exists() {
            let content =
                std::fs::read_to_string("forgecore.toml").expect("failed to read forgecore.toml");
            toml::from_str(&content).expect("failed to parse forgecore.toml")
        } else {
            Config {
                server: ServerConfig::default(),
                pool: PoolConfig::default(),
                queue: QueueConfig::default(),
                rebuild: RebuildConfig::default(),
                generator: GeneratorConfig::default(),
                logging: LoggingConfig::default(),
            }
        };

        if let Ok(host) = std::env::var("FORGECORE_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("FORGECORE_PORT") {
            if let Ok(p) = port.parse() {
                config.server.port = p;
            }
        }
        if let Ok(dir) = std::env::var("FORGECORE_DATA_DIR") {
            config.server.data_dir = dir;
        }

        config
    }

    /// Resolve the effective model/timeout/skip-AI for a pipeline phase,
    /// falling back to the generator defaults when no override is set.
    pub fn phase_model(&self, phase: &str) -> String {
        self.generator
            .phase_overrides
            .get(phase)
            .and_then(|o| o.model.clone())
            .unwrap_or_else(|| self.generator.default_model.clone())
    }

    pub fn phase_skip_ai(&self, phase: &str) -> bool {
        self.generator
            .phase_overrides
            .get(phase)
            .map(|o| o.skip_ai)
            .unwrap_or(false)
    }

    pub fn phase_timeout_ms(&self, phase: &str, default_ms: u64) -> u64 {
        self.generator
            .phase_overrides
            .get(phase)
            .and_then(|o| o.timeout_ms)
            .unwrap_or(default_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = Config {
            server: ServerConfig::default(),
            pool: PoolConfig::default(),
            queue: QueueConfig::default(),
            rebuild: RebuildConfig::default(),
            generator: GeneratorConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert_eq!(config.pool.max_sessions, 5);
        assert_eq!(config.queue.history_size, 100);
        assert_eq!(config.phase_model("analyze"), "default");
    }

    #[test]
    fn phase_override_wins_over_default() {
        let mut config = Config {
            server: ServerConfig::default(),
            pool: PoolConfig::default(),
            queue: QueueConfig::default(),
            rebuild: RebuildConfig::default(),
            generator: GeneratorConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.generator.phase_overrides.insert(
            "analyze".to_string(),
            PhaseOverride {
                model: Some("big-model".to_string()),
                timeout_ms: Some(5_000),
                skip_ai: false,
            },
        );
        assert_eq!(config.phase_model("analyze"), "big-model");
        assert_eq!(config.phase_timeout_ms("analyze", 1_000), 5_000);
        assert_eq!(config.phase_model("write"), "default");
    }
}
