//! Evaluation configuration and agent specifications.
//!
//! [`EvaluationConfig`] is the resolved configuration of one run. It is
//! embedded verbatim in the report, so it serialises with camelCase keys.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::diff_stats::DEFAULT_SCORE_CEILING;
use crate::harness::{ClaudeCodeAdapter, ScriptAdapter};

pub const DEFAULT_REPLICAS: u32 = 3;
pub const DEFAULT_BASE_PORT: u16 = 3000;

/// How one agent is run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AgentKind {
    ClaudeCode {
        binary: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        max_turns: u32,
    },
    Script { path: PathBuf, timeout_secs: u64 },
}

/// A named agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: AgentKind,
}

/// Settings applied to agent specs parsed from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDefaults {
    pub claude_binary: String,
    pub claude_model: Option<String>,
    pub claude_max_turns: u32,
    pub script_timeout_secs: u64,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            claude_binary: ClaudeCodeAdapter::DEFAULT_BINARY.to_string(),
            claude_model: None,
            claude_max_turns: ClaudeCodeAdapter::DEFAULT_MAX_TURNS,
            script_timeout_secs: ScriptAdapter::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid agent spec {spec:?}: expected `claude`, `claude:<model>` or `<name>=<script>`")]
pub struct InvalidAgentSpec {
    pub spec: String,
}

impl AgentSpec {
    pub fn claude(name: impl Into<String>, defaults: &AgentDefaults) -> Self {
        Self {
            name: name.into(),
            kind: AgentKind::ClaudeCode {
                binary: defaults.claude_binary.clone(),
                model: defaults.claude_model.clone(),
                max_turns: defaults.claude_max_turns,
            },
        }
    }

    pub fn script(name: impl Into<String>, path: impl Into<PathBuf>, defaults: &AgentDefaults) -> Self {
        Self {
            name: name.into(),
            kind: AgentKind::Script {
                path: path.into(),
                timeout_secs: defaults.script_timeout_secs,
            },
        }
    }

    /// Parse `claude`, `claude:<model>` or `<name>=<script-path>`.
    ///
    /// `claude:<model>` registers as `claude-<model>` so several models can
    /// run side by side.
    pub fn parse(spec: &str, defaults: &AgentDefaults) -> Result<Self, InvalidAgentSpec> {
        let invalid = || InvalidAgentSpec {
            spec: spec.to_string(),
        };
        let spec = spec.trim();

        if let Some((name, path)) = spec.split_once('=') {
            let (name, path) = (name.trim(), path.trim());
            if name.is_empty() || path.is_empty() || !is_valid_name(name) {
                return Err(invalid());
            }
            return Ok(Self::script(name, path, defaults));
        }

        match spec.split_once(':') {
            None if spec == ClaudeCodeAdapter::DEFAULT_NAME => {
                Ok(Self::claude(ClaudeCodeAdapter::DEFAULT_NAME, defaults))
            }
            Some((prefix, model))
                if prefix == ClaudeCodeAdapter::DEFAULT_NAME
                    && !model.is_empty()
                    && is_valid_name(model) =>
            {
                let mut agent = Self::claude(format!("claude-{model}"), defaults);
                if let AgentKind::ClaudeCode { model: slot, .. } = &mut agent.kind {
                    *slot = Some(model.to_string());
                }
                Ok(agent)
            }
            _ => Err(invalid()),
        }
    }
}

impl FromStr for AgentSpec {
    type Err = InvalidAgentSpec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, &AgentDefaults::default())
    }
}

impl fmt::Display for AgentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AgentKind::ClaudeCode { model: Some(m), .. } => write!(f, "{} (claude, model {m})", self.name),
            AgentKind::ClaudeCode { model: None, .. } => write!(f, "{} (claude)", self.name),
            AgentKind::Script { path, .. } => write!(f, "{} ({})", self.name, path.display()),
        }
    }
}

/// Names end up in directory names and instance ids.
fn is_valid_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Resolved settings of one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationConfig {
    /// Agents to evaluate, in report order.
    pub agents: Vec<AgentSpec>,
    /// Instances per agent.
    pub replicas: u32,
    /// First port handed out; later instances count up from here.
    pub base_port: u16,
    pub score_ceiling: u32,
    /// Upper bound on simultaneously running agents. `None` runs all.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    /// Run directory: baseline, instance copies and the report.
    pub workspace_root: PathBuf,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            replicas: DEFAULT_REPLICAS,
            base_port: DEFAULT_BASE_PORT,
            score_ceiling: DEFAULT_SCORE_CEILING,
            max_concurrent: None,
            workspace_root: PathBuf::from("editbench-runs"),
        }
    }
}

impl EvaluationConfig {
    pub fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name.clone()).collect()
    }

    /// Total number of instances a run will create.
    pub fn instance_count(&self) -> usize {
        self.agents.len() * self.replicas as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_claude() {
        let spec: AgentSpec = "claude".parse().unwrap();
        assert_eq!(spec.name, "claude");
        assert_eq!(
            spec.kind,
            AgentKind::ClaudeCode {
                binary: "claude".into(),
                model: None,
                max_turns: 50
            }
        );
    }

    #[test]
    fn parse_claude_with_model() {
        let spec: AgentSpec = "claude:opus".parse().unwrap();
        assert_eq!(spec.name, "claude-opus");
        assert!(matches!(spec.kind, AgentKind::ClaudeCode { model: Some(ref m), .. } if m == "opus"));
    }

    #[test]
    fn parse_script_uses_defaults() {
        let defaults = AgentDefaults {
            script_timeout_secs: 60,
            ..AgentDefaults::default()
        };
        let spec = AgentSpec::parse("codex = ./agents/codex.sh", &defaults).unwrap();
        assert_eq!(spec.name, "codex");
        assert_eq!(
            spec.kind,
            AgentKind::Script {
                path: PathBuf::from("./agents/codex.sh"),
                timeout_secs: 60
            }
        );
    }

    #[test]
    fn rejects_bad_specs() {
        for bad in ["", "gpt", "claude:", "=x.sh", "name=", "a/b=x.sh", "claude:a b", "other:opus"] {
            assert!(bad.parse::<AgentSpec>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EvaluationConfig {
            agents: vec!["claude".parse().unwrap(), "aider=/bin/aider.sh".parse().unwrap()],
            max_concurrent: Some(2),
            ..EvaluationConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["basePort"], 3000);
        assert_eq!(json["scoreCeiling"], 300);
        assert_eq!(json["agents"][0]["kind"], "claudeCode");
        assert_eq!(json["agents"][0]["maxTurns"], 50);
        assert_eq!(json["agents"][1]["kind"], "script");
        assert_eq!(json["agents"][1]["timeoutSecs"], 1800);

        let back: EvaluationConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.instance_count(), 6);
    }
}
