//! Shell-script harness adapter.
//!
//! Any executable can act as an agent: it is run as
//! `<script> <prompt> <folder> <port>` inside the instance workspace, with
//! the same three values exported as `CODING_PROMPT`, `CODING_FOLDER` and
//! `PORT`. Its output is forwarded to ours, and only its exit status
//! decides the outcome.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::process::{Target, kill_group, terminate};
use super::trait_def::Harness;
use super::types::{InvocationError, InvocationRequest, InvocationSummary};

/// Success detection for the one legacy wrapper that never exits cleanly.
///
/// `opencode.sh` prints a completion banner when its agent finishes and is
/// then torn down with SIGTERM. For that script only, a SIGTERM exit whose
/// last stdout chunk contains the banner counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigtermSuccessQuirk;

impl SigtermSuccessQuirk {
    pub const SCRIPT_FILE_NAME: &'static str = "opencode.sh";
    pub const SUCCESS_MARKER: &'static str = "Task completed successfully";

    /// Whether the quirk applies to the script at `path`.
    pub fn applies_to(path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| name == Self::SCRIPT_FILE_NAME)
    }

    /// Whether a signal exit should be read as success.
    pub fn indicates_success(signal: i32, last_stdout_chunk: &str) -> bool {
        signal == SIGTERM && last_stdout_chunk.contains(Self::SUCCESS_MARKER)
    }
}

#[cfg(unix)]
const SIGTERM: i32 = libc::SIGTERM;
#[cfg(not(unix))]
const SIGTERM: i32 = 15;

/// Harness adapter that runs an executable to completion.
#[derive(Debug, Clone)]
pub struct ScriptAdapter {
    name: String,
    script: PathBuf,
    timeout: Duration,
    sigterm_quirk: bool,
}

/// How long output forwarding may run on after the script has exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

impl ScriptAdapter {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

    pub fn new(name: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        let script = script.into();
        // Relative paths must not be resolved against the workspace.
        let script = std::path::absolute(&script).unwrap_or(script);
        let sigterm_quirk = SigtermSuccessQuirk::applies_to(&script);
        Self {
            name: name.into(),
            script,
            timeout: Self::DEFAULT_TIMEOUT,
            sigterm_quirk,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn classify_exit(&self, status: ExitStatus, last_chunk: &str) -> Result<(), InvocationError> {
        if status.success() {
            return Ok(());
        }
        if let Some(code) = status.code() {
            return Err(InvocationError::NonZeroExit { code });
        }
        let signal = exit_signal(status).unwrap_or_default();
        if self.sigterm_quirk && SigtermSuccessQuirk::indicates_success(signal, last_chunk) {
            info!(script = %self.script.display(), "treating SIGTERM after success marker as success");
            return Ok(());
        }
        Err(InvocationError::Signaled { signal })
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

/// Copy `source` into `sink` chunk by chunk and return the last chunk.
async fn forward_output<R, W>(source: Option<R>, mut sink: W) -> String
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(mut source) = source else {
        return String::new();
    };
    let mut buf = vec![0u8; 8 * 1024];
    let mut last_chunk = String::new();
    loop {
        match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let _ = sink.write_all(&buf[..n]).await;
                let _ = sink.flush().await;
                last_chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
            }
            Err(e) => {
                warn!(error = %e, "error reading agent output");
                break;
            }
        }
    }
    last_chunk
}

/// Wait up to [`OUTPUT_DRAIN_GRACE`] for a forwarder to reach EOF.
async fn drain(mut forwarder: JoinHandle<String>) -> String {
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut forwarder).await {
        Ok(Ok(last_chunk)) => last_chunk,
        Ok(Err(e)) => {
            warn!(error = %e, "agent output forwarder failed");
            String::new()
        }
        Err(_) => {
            forwarder.abort();
            warn!("agent output still open after exit, dropping the rest");
            String::new()
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Interrupted {
    TimedOut,
    Cancelled,
}

#[async_trait]
impl Harness for ScriptAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationSummary, InvocationError> {
        let port = request.port.to_string();
        let mut command = Command::new(&self.script);
        command
            .arg(&request.prompt)
            .arg(&request.working_dir)
            .arg(&port)
            .current_dir(&request.working_dir)
            .env("CODING_PROMPT", &request.prompt)
            .env("CODING_FOLDER", &request.working_dir)
            .env("PORT", &port)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The script leads its own group so teardown reaches its children.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| InvocationError::Spawn {
            program: self.script.display().to_string(),
            source,
        })?;
        let pid = child.id();
        debug!(?pid, instance_id = %request.instance_id, "spawned agent script");

        let stdout = tokio::spawn(forward_output(child.stdout.take(), tokio::io::stdout()));
        let stderr = tokio::spawn(forward_output(child.stderr.take(), tokio::io::stderr()));

        // Only the script's own exit counts. Background children that still
        // hold the pipes open do not keep the invocation alive.
        let waited = tokio::select! {
            status = tokio::time::timeout(self.timeout, child.wait()) => {
                status.map_err(|_| Interrupted::TimedOut)
            }
            () = request.cancel.cancelled() => Err(Interrupted::Cancelled),
        };

        let status = match waited {
            Ok(status) => status,
            Err(interrupted) => {
                match interrupted {
                    Interrupted::TimedOut => warn!(
                        instance_id = %request.instance_id,
                        timeout_secs = self.timeout.as_secs(),
                        "agent script timed out"
                    ),
                    Interrupted::Cancelled => {
                        info!(instance_id = %request.instance_id, "cancelling agent script")
                    }
                }
                terminate(&mut child, Target::Group).await;
                stdout.abort();
                stderr.abort();
                return Err(match interrupted {
                    Interrupted::TimedOut => InvocationError::TimedOut {
                        timeout: self.timeout,
                    },
                    Interrupted::Cancelled => InvocationError::Cancelled,
                });
            }
        };

        if let Some(pid) = pid {
            kill_group(pid);
        }
        let (last_chunk, _) = tokio::join!(drain(stdout), drain(stderr));

        let status = status.map_err(|source| InvocationError::Io {
            context: format!("failed to wait for {}", self.script.display()),
            source,
        })?;
        self.classify_exit(status, &last_chunk)?;

        let last_chunk = last_chunk.trim();
        Ok(InvocationSummary {
            result_text: (!last_chunk.is_empty()).then(|| last_chunk.to_string()),
            ..InvocationSummary::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use editbench_test_utils::write_script;
    use std::time::Instant;

    fn request(dir: &Path) -> InvocationRequest {
        InvocationRequest::new("script-1", "make it blue", dir, 3007)
    }

    #[test]
    fn sigterm_quirk_is_pinned() {
        assert_eq!(SigtermSuccessQuirk::SCRIPT_FILE_NAME, "opencode.sh");
        assert_eq!(SigtermSuccessQuirk::SUCCESS_MARKER, "Task completed successfully");
        assert!(SigtermSuccessQuirk::applies_to(Path::new("/agents/opencode.sh")));
        assert!(!SigtermSuccessQuirk::applies_to(Path::new("/agents/opencode.bash")));
        assert!(SigtermSuccessQuirk::indicates_success(
            SIGTERM,
            "...\nTask completed successfully\n"
        ));
        assert!(!SigtermSuccessQuirk::indicates_success(9, "Task completed successfully"));
        assert!(!SigtermSuccessQuirk::indicates_success(SIGTERM, "still working"));
    }

    #[tokio::test]
    async fn passes_arguments_environment_and_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "agent.sh",
            "printf '%s\\n' \"$1\" \"$2\" \"$3\" \"$CODING_PROMPT\" \"$CODING_FOLDER\" \"$PORT\" > seen.txt\necho finished\n",
        );
        let workspace = tmp.path().join("ws");
        std::fs::create_dir_all(&workspace).unwrap();

        let adapter = ScriptAdapter::new("agent", &script);
        let summary = adapter.invoke(&request(&workspace)).await.unwrap();
        assert_eq!(summary.result_text.as_deref(), Some("finished"));

        let seen = std::fs::read_to_string(workspace.join("seen.txt")).unwrap();
        let folder = workspace.display().to_string();
        let lines: Vec<&str> = seen.lines().collect();
        assert_eq!(
            lines,
            vec!["make it blue", folder.as_str(), "3007", "make it blue", folder.as_str(), "3007"]
        );
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "agent.sh", "echo oops >&2\nexit 1\n");
        let err = ScriptAdapter::new("agent", &script)
            .invoke(&request(tmp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::NonZeroExit { code: 1 }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_after_marker_succeeds_only_for_known_script() {
        let tmp = tempfile::tempdir().unwrap();
        let body = "echo 'Task completed successfully'\nkill -TERM $$\n";

        let quirky = write_script(tmp.path(), SigtermSuccessQuirk::SCRIPT_FILE_NAME, body);
        ScriptAdapter::new("opencode", &quirky)
            .invoke(&request(tmp.path()))
            .await
            .unwrap();

        let other = write_script(tmp.path(), "other.sh", body);
        let err = ScriptAdapter::new("other", &other)
            .invoke(&request(tmp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::Signaled { signal } if signal == SIGTERM));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_without_marker_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let quirky = write_script(
            tmp.path(),
            SigtermSuccessQuirk::SCRIPT_FILE_NAME,
            "echo 'still going'\nkill -TERM $$\n",
        );
        let err = ScriptAdapter::new("opencode", &quirky)
            .invoke(&request(tmp.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "signaled");
    }

    #[tokio::test]
    async fn timeout_terminates_the_script() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "agent.sh", "exec sleep 30\n");
        let adapter = ScriptAdapter::new("agent", &script).with_timeout(Duration::from_millis(300));

        let started = Instant::now();
        let err = adapter.invoke(&request(tmp.path())).await.unwrap_err();
        assert!(matches!(err, InvocationError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn background_children_do_not_outlive_a_finished_script() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "agent.sh",
            "sleep 30 &\n(sleep 1; touch late.txt) &\necho done\nexit 0\n",
        );
        let adapter = ScriptAdapter::new("agent", &script).with_timeout(Duration::from_secs(20));

        let started = Instant::now();
        let summary = adapter.invoke(&request(tmp.path())).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10), "took {:?}", started.elapsed());
        assert_eq!(summary.result_text.as_deref(), Some("done"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!tmp.path().join("late.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_terminates_grandchildren() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "agent.sh",
            "(sleep 2; touch late.txt) &\nsleep 30\n",
        );
        let adapter = ScriptAdapter::new("agent", &script).with_timeout(Duration::from_millis(500));

        let err = adapter.invoke(&request(tmp.path())).await.unwrap_err();
        assert!(matches!(err, InvocationError::TimedOut { .. }));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!tmp.path().join("late.txt").exists());
    }

    #[tokio::test]
    async fn cancellation_terminates_the_script() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "agent.sh", "exec sleep 30\n");
        let req = request(tmp.path());
        let cancel = req.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });

        let err = ScriptAdapter::new("agent", &script).invoke(&req).await.unwrap_err();
        assert!(matches!(err, InvocationError::Cancelled));
    }

    #[test]
    fn default_timeout_is_thirty_minutes() {
        let adapter = ScriptAdapter::new("agent", "/agents/run.sh");
        assert_eq!(adapter.timeout(), Duration::from_secs(1800));
        assert_eq!(adapter.name(), "agent");
    }
}
