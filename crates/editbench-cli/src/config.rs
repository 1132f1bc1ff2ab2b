//! Configuration file management for editbench.
//!
//! Provides a TOML config file at `~/.config/editbench/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default. Env vars
//! are read by clap alongside their flags, so by the time [`RunSettings`]
//! resolves, a flag and its env var are one value.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::Args;
use serde::{Deserialize, Serialize};

use editbench_core::config::{AgentDefaults, AgentSpec, DEFAULT_BASE_PORT, DEFAULT_REPLICAS};
use editbench_core::harness::{ClaudeCodeAdapter, ScriptAdapter};
use editbench_core::{DEFAULT_SCORE_CEILING, EvaluationConfig};

pub const CONFIG_ENV: &str = "EDITBENCH_CONFIG";
pub const DEFAULT_RUNS_DIR: &str = "editbench-runs";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Agent specs used when `--agent` is not given.
    pub agents: Vec<String>,
    pub run: RunSection,
    pub claude: ClaudeSection,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub replicas: Option<u32>,
    pub base_port: Option<u16>,
    pub score_ceiling: Option<u32>,
    /// Per-agent timeout for script agents, in seconds.
    pub timeout_secs: Option<u64>,
    pub max_concurrent: Option<usize>,
    pub workspace_root: Option<PathBuf>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeSection {
    pub binary: Option<String>,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
}

impl ConfigFile {
    /// The file `editbench init` writes: every default spelled out.
    pub fn with_defaults() -> Self {
        Self {
            agents: vec![ClaudeCodeAdapter::DEFAULT_NAME.to_string()],
            run: RunSection {
                replicas: Some(DEFAULT_REPLICAS),
                base_port: Some(DEFAULT_BASE_PORT),
                score_ceiling: Some(DEFAULT_SCORE_CEILING),
                timeout_secs: Some(ScriptAdapter::DEFAULT_TIMEOUT.as_secs()),
                max_concurrent: None,
                workspace_root: None,
            },
            claude: ClaudeSection {
                binary: Some(ClaudeCodeAdapter::DEFAULT_BINARY.to_string()),
                model: None,
                max_turns: Some(ClaudeCodeAdapter::DEFAULT_MAX_TURNS),
            },
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the editbench config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/editbench` or
/// `~/.config/editbench`, also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("editbench");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("editbench")
}

/// Path of the config file: `--config` > `EDITBENCH_CONFIG` > XDG default.
pub fn config_path(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_dir().join("config.toml"),
    }
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file. Returns an error if it does not exist.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Load the config for a run. An explicit `--config` must exist; the
/// default location is optional.
pub fn load_for_run(cli_override: Option<&Path>) -> Result<Option<ConfigFile>> {
    let path = config_path(cli_override);
    if cli_override.is_none() && !path.exists() {
        return Ok(None);
    }
    load_config(&path).map(Some)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))
}

/// Execute `editbench init`: write a config file holding the defaults.
pub fn cmd_init(cli_override: Option<&Path>, force: bool) -> Result<()> {
    let path = config_path(cli_override);
    if path.exists() && !force {
        bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    save_config(&path, &ConfigFile::with_defaults())?;

    println!("Config written to {}", path.display());
    println!("  run.replicas = {DEFAULT_REPLICAS}");
    println!("  run.base_port = {DEFAULT_BASE_PORT}");
    println!("  agents = [\"{}\"]", ClaudeCodeAdapter::DEFAULT_NAME);
    println!();
    println!("Next: `editbench run <benchmark-dir> --existing-code <dir>`.");
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Run settings that can come from a flag or its env var.
#[derive(Debug, Default, Clone, Args)]
pub struct RunOverrides {
    /// Agent to evaluate: `claude`, `claude:<model>` or `<name>=<script>`.
    /// Repeat for several agents.
    #[arg(long = "agent", value_name = "SPEC")]
    pub agents: Vec<String>,
    /// Instances per agent
    #[arg(long, env = "EDITBENCH_REPLICAS")]
    pub replicas: Option<u32>,
    /// First port handed to an agent
    #[arg(long, env = "EDITBENCH_BASE_PORT")]
    pub base_port: Option<u16>,
    /// Directory for the baseline, instance copies and report
    #[arg(long, env = "EDITBENCH_WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,
    /// Timeout per script agent, in seconds
    #[arg(long = "timeout", env = "EDITBENCH_TIMEOUT", value_name = "SECS")]
    pub timeout_secs: Option<u64>,
    /// Maximum number of agents running at once
    #[arg(long, env = "EDITBENCH_MAX_CONCURRENT")]
    pub max_concurrent: Option<usize>,
    /// Path to the `claude` executable
    #[arg(long, env = "EDITBENCH_CLAUDE_BINARY")]
    pub claude_binary: Option<String>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct RunSettings {
    pub evaluation: EvaluationConfig,
    pub defaults: AgentDefaults,
}

impl RunSettings {
    /// Resolve with the chain: flag/env > config file > default.
    ///
    /// The default workspace root is `editbench-runs/<started_at>` under the
    /// current directory.
    pub fn resolve(
        overrides: &RunOverrides,
        file: Option<&ConfigFile>,
        started_at: DateTime<Local>,
    ) -> Result<Self> {
        let empty = ConfigFile::default();
        let file = file.unwrap_or(&empty);
        let base = AgentDefaults::default();

        let defaults = AgentDefaults {
            claude_binary: overrides
                .claude_binary
                .clone()
                .or_else(|| file.claude.binary.clone())
                .unwrap_or(base.claude_binary),
            claude_model: file.claude.model.clone(),
            claude_max_turns: file.claude.max_turns.unwrap_or(base.claude_max_turns),
            script_timeout_secs: overrides
                .timeout_secs
                .or(file.run.timeout_secs)
                .unwrap_or(base.script_timeout_secs),
        };

        let specs: Vec<String> = if !overrides.agents.is_empty() {
            overrides.agents.clone()
        } else if !file.agents.is_empty() {
            file.agents.clone()
        } else {
            vec![ClaudeCodeAdapter::DEFAULT_NAME.to_string()]
        };
        let agents = parse_agents(&specs, &defaults)?;

        let workspace_root = overrides
            .workspace_root
            .clone()
            .or_else(|| file.run.workspace_root.clone())
            .unwrap_or_else(|| {
                PathBuf::from(DEFAULT_RUNS_DIR)
                    .join(started_at.format("%Y%m%d-%H%M%S").to_string())
            });

        let evaluation = EvaluationConfig {
            agents,
            replicas: overrides
                .replicas
                .or(file.run.replicas)
                .unwrap_or(DEFAULT_REPLICAS),
            base_port: overrides
                .base_port
                .or(file.run.base_port)
                .unwrap_or(DEFAULT_BASE_PORT),
            score_ceiling: file.run.score_ceiling.unwrap_or(DEFAULT_SCORE_CEILING),
            max_concurrent: overrides.max_concurrent.or(file.run.max_concurrent),
            workspace_root,
        };

        if evaluation.replicas == 0 {
            bail!("replicas must be at least 1");
        }
        if evaluation.max_concurrent == Some(0) {
            bail!("max-concurrent must be at least 1");
        }

        Ok(Self {
            evaluation,
            defaults,
        })
    }
}

fn parse_agents(specs: &[String], defaults: &AgentDefaults) -> Result<Vec<AgentSpec>> {
    let mut seen = HashSet::new();
    let mut agents = Vec::with_capacity(specs.len());
    for raw in specs {
        let spec = AgentSpec::parse(raw, defaults)?;
        if !seen.insert(spec.name.clone()) {
            bail!("agent {:?} given more than once", spec.name);
        }
        agents.push(spec);
    }
    Ok(agents)
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
