//! Claude Code harness adapter.
//!
//! Spawns `claude -p --output-format stream-json --verbose`, writes the
//! prompt to its stdin and reads the JSONL messages it prints on stdout
//! until the first terminal `result` message.

use std::pin::Pin;
use std::process::Stdio;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

use super::process::{TERMINATE_GRACE, Target, terminate};
use super::trait_def::Harness;
use super::types::{InvocationError, InvocationRequest, InvocationSummary, TokenUsage};

// ---------------------------------------------------------------------------
// Stream protocol
// ---------------------------------------------------------------------------

/// One line of Claude Code's `stream-json` output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        #[serde(default)]
        message: AssistantMessage,
        #[serde(default)]
        session_id: Option<String>,
    },
    User {
        #[serde(default)]
        session_id: Option<String>,
    },
    Result(ResultMessage),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        name: String,
    },
    #[serde(other)]
    Other,
}

/// The terminal message of a conversation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultMessage {
    pub subtype: ResultSubtype,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSubtype {
    Success,
    ErrorMaxTurns,
    ErrorDuringExecution,
}

impl StreamMessage {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::System { session_id, .. }
            | Self::Assistant { session_id, .. }
            | Self::User { session_id } => session_id.as_deref(),
            Self::Result(result) => result.session_id.as_deref(),
            Self::Unknown => None,
        }
    }
}

impl ResultMessage {
    fn into_outcome(self, session_id: Option<&str>) -> Result<InvocationSummary, InvocationError> {
        match self.subtype {
            ResultSubtype::Success if !self.is_error => Ok(InvocationSummary {
                result_text: self.result,
                session_id: session_id.map(str::to_string),
                usage: self.usage,
                num_turns: self.num_turns,
            }),
            ResultSubtype::Success | ResultSubtype::ErrorDuringExecution => {
                Err(InvocationError::ExecutionError {
                    message: self
                        .result
                        .unwrap_or_else(|| "no details reported".to_string()),
                })
            }
            ResultSubtype::ErrorMaxTurns => Err(InvocationError::MaxTurnsExceeded {
                num_turns: self.num_turns,
            }),
        }
    }
}

/// Parse one JSONL line. Callers treat `Err` as a warning and keep reading.
pub fn parse_stream_line(line: &str) -> Result<StreamMessage, serde_json::Error> {
    serde_json::from_str(line)
}

/// Drive a message stream to its first terminal message.
///
/// The first session id seen is stored in `session_id` and never replaced.
/// A stream that ends before any `result` yields
/// [`InvocationError::UnexpectedTermination`].
pub async fn consume_stream<S>(
    mut messages: S,
    session_id: &mut Option<String>,
) -> Result<InvocationSummary, InvocationError>
where
    S: Stream<Item = StreamMessage> + Unpin,
{
    while let Some(message) = messages.next().await {
        if let Some(id) = message.session_id() {
            if session_id.is_none() {
                debug!(session_id = id, "captured session id");
                *session_id = Some(id.to_string());
            }
        }

        match message {
            StreamMessage::System { subtype, .. } => {
                debug!(subtype = subtype.as_deref().unwrap_or(""), "system message");
            }
            StreamMessage::Assistant { message, .. } => {
                for block in &message.content {
                    match block {
                        ContentBlock::Text { text } => debug!(chars = text.len(), "assistant text"),
                        ContentBlock::ToolUse { name } => debug!(tool = %name, "assistant tool use"),
                        ContentBlock::Other => {}
                    }
                }
            }
            StreamMessage::User { .. } => debug!("tool result"),
            StreamMessage::Unknown => debug!("ignoring unrecognised stream message"),
            StreamMessage::Result(result) => {
                debug!(subtype = ?result.subtype, turns = result.num_turns, "terminal result");
                return result.into_outcome(session_id.as_deref());
            }
        }
    }
    Err(InvocationError::UnexpectedTermination { exit_code: None })
}

fn message_stream(stdout: ChildStdout) -> Pin<Box<dyn Stream<Item = StreamMessage> + Send>> {
    Box::pin(async_stream::stream! {
        let mut lines = LinesStream::new(BufReader::new(stdout).lines());
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match parse_stream_line(trimmed) {
                        Ok(message) => {
                            yield message;
                        }
                        Err(e) => warn!(line = trimmed, error = %e, "skipping malformed JSONL line"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "error reading agent stdout");
                    break;
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Harness adapter for the Claude Code CLI.
///
/// There is no built-in timeout; the caller's cancellation token is the
/// only way to stop a running conversation early.
#[derive(Debug, Clone)]
pub struct ClaudeCodeAdapter {
    name: String,
    binary: String,
    model: Option<String>,
    max_turns: u32,
    permission_mode: String,
}

impl ClaudeCodeAdapter {
    pub const DEFAULT_NAME: &'static str = "claude";
    pub const DEFAULT_BINARY: &'static str = "claude";
    pub const DEFAULT_MAX_TURNS: u32 = 50;
    pub const DEFAULT_PERMISSION_MODE: &'static str = "bypassPermissions";

    /// Adapter that looks for `claude` on `$PATH`.
    pub fn new() -> Self {
        Self::with_binary(Self::DEFAULT_BINARY)
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
            binary: path.into(),
            model: None,
            max_turns: Self::DEFAULT_MAX_TURNS,
            permission_mode: Self::DEFAULT_PERMISSION_MODE.to_string(),
        }
    }

    /// Register under a different name, e.g. one per model.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_permission_mode(mut self, mode: impl Into<String>) -> Self {
        self.permission_mode = mode.into();
        self
    }

    /// Start a conversation whose later turns resume the first one.
    pub fn session(&self) -> ClaudeSession<'_> {
        ClaudeSession {
            adapter: self,
            session_id: None,
        }
    }

    fn command(&self, request: &InvocationRequest, resume: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .args(["--output-format", "stream-json", "--verbose"])
            .arg("--max-turns")
            .arg(self.max_turns.to_string())
            .arg("--permission-mode")
            .arg(&self.permission_mode);
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(session_id) = resume {
            cmd.arg("--resume").arg(session_id);
        }
        cmd.current_dir(&request.working_dir)
            .env("PORT", request.port.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }

    async fn run(
        &self,
        request: &InvocationRequest,
        session_id: &mut Option<String>,
    ) -> Result<InvocationSummary, InvocationError> {
        let mut child = self
            .command(request, session_id.as_deref())
            .spawn()
            .map_err(|source| InvocationError::Spawn {
                program: self.binary.clone(),
                source,
            })?;
        debug!(
            pid = ?child.id(),
            instance_id = %request.instance_id,
            resume = session_id.is_some(),
            "spawned claude"
        );

        // The CLI reads the whole prompt before it starts, so stdin is
        // closed as soon as the prompt is written.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(request.prompt.as_bytes()).await {
                warn!(error = %e, "failed to write prompt to agent stdin");
            }
        }

        let Some(stdout) = child.stdout.take() else {
            terminate(&mut child, Target::Process).await;
            return Err(InvocationError::Io {
                context: "agent stdout was not captured".to_string(),
                source: std::io::Error::other("stdout missing"),
            });
        };

        let outcome = tokio::select! {
            outcome = consume_stream(message_stream(stdout), session_id) => outcome,
            () = request.cancel.cancelled() => {
                info!(instance_id = %request.instance_id, "cancelling claude");
                terminate(&mut child, Target::Process).await;
                return Err(InvocationError::Cancelled);
            }
        };

        let exit_code = match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                warn!(error = %e, "failed to wait for claude");
                None
            }
            Err(_) => {
                debug!("claude still running after its result, terminating");
                terminate(&mut child, Target::Process).await;
                None
            }
        };

        match outcome {
            Err(InvocationError::UnexpectedTermination { .. }) => {
                Err(InvocationError::UnexpectedTermination { exit_code })
            }
            other => other,
        }
    }
}

impl Default for ClaudeCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Harness for ClaudeCodeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationSummary, InvocationError> {
        self.session().send(request).await
    }
}

/// A multi-turn conversation with one Claude Code session.
///
/// The first session id the agent reports is kept for the lifetime of the
/// session; every later [`send`](Self::send) passes it as `--resume`.
#[derive(Debug)]
pub struct ClaudeSession<'a> {
    adapter: &'a ClaudeCodeAdapter,
    session_id: Option<String>,
}

impl ClaudeSession<'_> {
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub async fn send(
        &mut self,
        request: &InvocationRequest,
    ) -> Result<InvocationSummary, InvocationError> {
        self.adapter.run(request, &mut self.session_id).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
