use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::policy::ShieldProfile;
use crate::sandbox::script::ScriptLimits;

/// Default location of the configuration file.
pub const DEFAULT_PATH: &str = "config/capshield.toml";

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub engines: EnginesConfig,
    #[serde(default)]
    pub shield: ShieldConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Wall-clock limit of a live run, from context creation
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_playback_min_delay_ms")]
    pub playback_min_delay_ms: u64,
    #[serde(default = "default_playback_max_delay_ms")]
    pub playback_max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EnginesConfig {
    /// Python interpreter, looked up in PATH. Supports ${ENV_VAR} substitution
    #[serde(default = "default_python")]
    pub python: String,
    /// Sandbox launcher every Python run is confined with
    #[serde(default = "default_python_sandbox")]
    pub python_sandbox: String,
    /// Heap ceiling of one JavaScript context, in MiB
    #[serde(default = "default_script_memory_limit_mb")]
    pub script_memory_limit_mb: usize,
    /// Interpreter stack ceiling of one JavaScript context, in KiB
    #[serde(default = "default_script_stack_size_kb")]
    pub script_stack_size_kb: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ShieldConfig {
    #[serde(default)]
    pub profile: ShieldProfile,
    /// Pause between a navigation and its first simulated event
    #[serde(default = "default_navigation_delay_ms")]
    pub navigation_delay_ms: u64,
    /// Gap between two simulated events of one navigation
    #[serde(default = "default_navigation_stagger_ms")]
    pub navigation_stagger_ms: u64,
    #[serde(default = "default_simulated_events")]
    pub simulated_events_per_navigation: usize,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_playback_min_delay_ms() -> u64 {
    40
}

fn default_playback_max_delay_ms() -> u64 {
    70
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_python_sandbox() -> String {
    "bwrap".to_string()
}

fn default_script_memory_limit_mb() -> usize {
    ScriptLimits::default().memory_limit / (1024 * 1024)
}

fn default_script_stack_size_kb() -> usize {
    ScriptLimits::default().max_stack_size / 1024
}

fn default_navigation_delay_ms() -> u64 {
    800
}

fn default_navigation_stagger_ms() -> u64 {
    320
}

fn default_simulated_events() -> usize {
    4
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            playback_min_delay_ms: default_playback_min_delay_ms(),
            playback_max_delay_ms: default_playback_max_delay_ms(),
        }
    }
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            python_sandbox: default_python_sandbox(),
            script_memory_limit_mb: default_script_memory_limit_mb(),
            script_stack_size_kb: default_script_stack_size_kb(),
        }
    }
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            profile: ShieldProfile::default(),
            navigation_delay_ms: default_navigation_delay_ms(),
            navigation_stagger_ms: default_navigation_stagger_ms(),
            simulated_events_per_navigation: default_simulated_events(),
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn playback_delays(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.playback_min_delay_ms),
            Duration::from_millis(self.playback_max_delay_ms),
        )
    }
}

impl EnginesConfig {
    pub fn script_limits(&self) -> ScriptLimits {
        ScriptLimits {
            memory_limit: self.script_memory_limit_mb * 1024 * 1024,
            max_stack_size: self.script_stack_size_kb * 1024,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables like ${CAPSHIELD_PYTHON}
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise falls back to the built-in
    /// defaults. A file that exists but does not parse is still an error.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Configuration with no artificial delays, for tests and scripted use
    pub fn immediate() -> Self {
        let mut config = Self::default();
        config.runner.playback_min_delay_ms = 0;
        config.runner.playback_max_delay_ms = 0;
        config.shield.navigation_delay_ms = 0;
        config.shield.navigation_stagger_ms = 0;
        config
    }
}
