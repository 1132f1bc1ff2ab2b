//! Request, summary and error types shared by every harness.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Everything an adapter needs to run one agent against one workspace.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Instance identifier, e.g. `claude-2`. Used for log correlation.
    pub instance_id: String,
    pub prompt: String,
    /// The isolated workspace the agent edits.
    pub working_dir: PathBuf,
    /// Port the agent's application should listen on.
    pub port: u16,
    /// Cancelling this token terminates the agent.
    pub cancel: CancellationToken,
}

impl InvocationRequest {
    pub fn new(
        instance_id: impl Into<String>,
        prompt: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        port: u16,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            port,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Token counts reported by a streaming agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// What a successful invocation reported back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationSummary {
    /// Final text from the agent, when the runtime reports one.
    pub result_text: Option<String>,
    pub session_id: Option<String>,
    pub usage: Option<TokenUsage>,
    pub num_turns: u32,
}

/// Why an invocation did not complete.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The streaming agent ran out of turns.
    #[error("agent exceeded its turn budget after {num_turns} turns")]
    MaxTurnsExceeded { num_turns: u32 },

    /// The streaming agent reported an error while working.
    #[error("agent reported an error during execution: {message}")]
    ExecutionError { message: String },

    /// The stream ended without a terminal result message.
    #[error("agent stream ended without a result message (exit code {exit_code:?})")]
    UnexpectedTermination { exit_code: Option<i32> },

    /// The agent process exited with a non-zero status.
    #[error("agent process exited with code {code}")]
    NonZeroExit { code: i32 },

    /// The agent process was killed by a signal.
    #[error("agent process was terminated by signal {signal}")]
    Signaled { signal: i32 },

    #[error("agent timed out after {}s", .timeout.as_secs())]
    TimedOut { timeout: Duration },

    #[error("agent invocation was cancelled")]
    Cancelled,

    #[error("failed to spawn agent {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl InvocationError {
    /// Stable snake_case name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MaxTurnsExceeded { .. } => "max_turns_exceeded",
            Self::ExecutionError { .. } => "execution_error",
            Self::UnexpectedTermination { .. } => "unexpected_termination",
            Self::NonZeroExit { .. } => "non_zero_exit",
            Self::Signaled { .. } => "signaled",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Spawn { .. } => "spawn",
            Self::Io { .. } => "io",
        }
    }
}
