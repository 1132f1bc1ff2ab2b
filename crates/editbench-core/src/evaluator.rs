//! The evaluation state machine.
//!
//! ```text
//! baseline ──> fan-out ──> invoke (concurrent) ──> score (sequential) ──> report
//! ```
//!
//! Baseline and fan-out failures abort the run. From the invocation phase
//! on, every instance produces a result no matter how its agent behaved,
//! and the run always ends with a complete report.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::{FutureExt, StreamExt, stream};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::config::EvaluationConfig;
use crate::diff_stats::DiffStats;
use crate::git::{self, GitError};
use crate::harness::{HarnessRegistry, InvocationRequest, InvocationSummary};
use crate::report::{EvaluationReport, InstanceResult, RunMetadata, truncate};
use crate::workspace::{AgentInstance, Baseline, PortAllocator, WorkspaceError, WorkspaceManager};

/// File name of the persisted report, under the run root.
pub const REPORT_FILE_NAME: &str = "evaluation-results.json";

/// Prompts are cut to this many characters in failure logs.
const LOGGED_PROMPT_CHARS: usize = 80;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Where the baseline program comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaselineSource {
    /// Have `agent` write the program from `prompt` in an empty directory.
    Generate { agent: String, prompt: String },
    /// Copy an existing program directory.
    Existing(PathBuf),
}

/// A failure that aborts the whole evaluation.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("baseline generation failed: {message}")]
    GenerationFailed {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("baseline at {} contains no files", .path.display())]
    NoFilesGenerated { path: PathBuf },

    #[error("evaluation failed: {message}")]
    EvaluationFailed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The run finished but its report could not be written. The report is
    /// carried here so it is not lost.
    #[error("report could not be written to {}", .path.display())]
    ReportNotSaved {
        path: PathBuf,
        report: Box<EvaluationReport>,
        #[source]
        source: BoxError,
    },
}

impl EvaluationError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::GenerationFailed { .. } => "GENERATION_FAILED",
            Self::NoFilesGenerated { .. } => "NO_FILES_GENERATED",
            Self::EvaluationFailed { .. } => "EVALUATION_FAILED",
            Self::ReportNotSaved { .. } => "REPORT_NOT_SAVED",
        }
    }

    /// The finished report, when the run got that far.
    pub fn report(&self) -> Option<&EvaluationReport> {
        match self {
            Self::ReportNotSaved { report, .. } => Some(report),
            _ => None,
        }
    }

    fn failed(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::EvaluationFailed {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::EvaluationFailed {
            message: message.into(),
            source: None,
        }
    }

    fn from_baseline(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::EmptyBaseline(path) => Self::NoFilesGenerated { path },
            other => Self::failed("failed to prepare the baseline", other),
        }
    }
}

/// Runs one evaluation: baseline, fan-out, invocation, scoring, report.
#[derive(Debug)]
pub struct Evaluator {
    config: EvaluationConfig,
    registry: HarnessRegistry,
    workspaces: WorkspaceManager,
    cancel: CancellationToken,
    span: Span,
}

impl Evaluator {
    pub fn new(config: EvaluationConfig, registry: HarnessRegistry) -> Self {
        let span = Span::current();
        let workspaces = WorkspaceManager::new(&config.workspace_root).with_span(span.clone());
        Self {
            config,
            registry,
            workspaces,
            cancel: CancellationToken::new(),
            span,
        }
    }

    /// Emit events under `span` instead of the span current at construction.
    pub fn with_span(mut self, span: Span) -> Self {
        self.workspaces = self.workspaces.with_span(span.clone());
        self.span = span;
        self
    }

    /// Cancelling `cancel` stops every running agent.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.workspaces.root()
    }

    pub fn report_path(&self) -> PathBuf {
        self.root().join(REPORT_FILE_NAME)
    }

    /// Run the evaluation and persist its report.
    #[instrument(
        name = "evaluate",
        parent = &self.span,
        skip_all,
        fields(root = %self.root().display())
    )]
    pub async fn evaluate(
        &self,
        source: BaselineSource,
        update_prompt: &str,
    ) -> Result<EvaluationReport, EvaluationError> {
        let run_id = Uuid::new_v4();
        let start_time = Utc::now();
        let clock = Instant::now();
        info!(
            %run_id,
            agents = ?self.config.agent_names(),
            replicas = self.config.replicas,
            "starting evaluation"
        );

        self.check_agents()?;
        let original = match &source {
            BaselineSource::Existing(path) => Some(std::path::absolute(path).unwrap_or_else(|_| path.clone())),
            BaselineSource::Generate { .. } => None,
        };
        let (initial_prompt, baseline) = self.acquire_baseline(source).await?;
        let instances = self.fan_out(&baseline)?;
        let mut updates = self.invoke_all(&instances, update_prompt).await;
        self.score_all(&baseline, &mut updates);

        let metadata = RunMetadata {
            run_id,
            start_time,
            end_time: Utc::now(),
            total_duration: millis(clock.elapsed()),
            agents_used: self.config.agent_names(),
            config: self.config.clone(),
        };
        let report = EvaluationReport::new(
            initial_prompt,
            update_prompt,
            original.unwrap_or(baseline.path),
            updates,
            metadata,
        );
        self.persist(report)
    }

    fn check_agents(&self) -> Result<(), EvaluationError> {
        if self.config.agents.is_empty() {
            return Err(EvaluationError::invalid("no agents configured"));
        }
        if self.config.replicas == 0 {
            return Err(EvaluationError::invalid("replicas must be at least 1"));
        }
        let mut seen = HashSet::new();
        for agent in &self.config.agents {
            if !seen.insert(agent.name.as_str()) {
                return Err(EvaluationError::invalid(format!(
                    "agent {:?} is listed more than once",
                    agent.name
                )));
            }
            if !self.registry.contains(&agent.name) {
                return Err(EvaluationError::invalid(format!(
                    "unknown agent {:?} (registered: {})",
                    agent.name,
                    self.registry.list().join(", ")
                )));
            }
        }
        Ok(())
    }

    async fn acquire_baseline(
        &self,
        source: BaselineSource,
    ) -> Result<(String, Baseline), EvaluationError> {
        match source {
            BaselineSource::Existing(path) => {
                let baseline = self
                    .workspaces
                    .prepare_baseline(&path)
                    .map_err(EvaluationError::from_baseline)?;
                info!(commit = %baseline.commit, files = baseline.file_count, "baseline ready");
                Ok((String::new(), baseline))
            }
            BaselineSource::Generate { agent, prompt } => {
                let harness = self.registry.get(&agent).ok_or_else(|| {
                    EvaluationError::invalid(format!("unknown baseline generator {agent:?}"))
                })?;
                let dir = self
                    .workspaces
                    .create_baseline_dir()
                    .map_err(|e| EvaluationError::failed("failed to create the baseline directory", e))?;

                info!(generator = %agent, dir = %dir.display(), "generating baseline");
                let request = InvocationRequest::new("baseline", prompt.as_str(), &dir, self.config.base_port)
                    .with_cancellation(self.cancel.child_token());
                harness
                    .invoke(&request)
                    .instrument(info_span!("generate", generator = %agent))
                    .await
                    .map_err(|e| EvaluationError::GenerationFailed {
                        message: format!("generator {agent:?} did not complete"),
                        source: Box::new(e),
                    })?;

                let baseline = self
                    .workspaces
                    .ensure_repository(&dir)
                    .map_err(EvaluationError::from_baseline)?;
                info!(commit = %baseline.commit, files = baseline.file_count, "baseline ready");
                Ok((prompt, baseline))
            }
        }
    }

    fn fan_out(&self, baseline: &Baseline) -> Result<Vec<AgentInstance>, EvaluationError> {
        let mut ports = PortAllocator::new(self.config.base_port);
        self.workspaces
            .create_instances(
                baseline,
                &self.config.agent_names(),
                self.config.replicas,
                &mut ports,
            )
            .map_err(|e| EvaluationError::failed("failed to create instance workspaces", e))
    }

    /// Run every instance, at most `max_concurrent` at a time. Results come
    /// back in instance order.
    async fn invoke_all(&self, instances: &[AgentInstance], prompt: &str) -> Vec<InstanceResult> {
        let limit = self
            .config
            .max_concurrent
            .unwrap_or(instances.len())
            .max(1);
        info!(instances = instances.len(), limit, "invoking agents");

        stream::iter(instances.iter().map(|instance| self.invoke_instance(instance, prompt)))
            .buffered(limit)
            .collect()
            .await
    }

    async fn invoke_instance(&self, instance: &AgentInstance, prompt: &str) -> InstanceResult {
        let span = info_span!(
            "instance",
            instance_id = %instance.instance_id,
            agent = %instance.agent_name,
            port = instance.port,
        );
        async {
            let started_at = Utc::now();
            let clock = Instant::now();
            let outcome = self.run_agent(instance, prompt).await;
            let elapsed_ms = millis(clock.elapsed());

            match outcome {
                Ok(summary) => {
                    info!(elapsed_ms, turns = summary.num_turns, "agent completed");
                    InstanceResult::completed_mempty(instance, started_at, elapsed_ms)
                }
                Err(error) => {
                    warn!(
                        instance_id = %instance.instance_id,
                        elapsed_ms,
                        %error,
                        prompt = %truncate(prompt, LOGGED_PROMPT_CHARS),
                        "agent failed"
                    );
                    InstanceResult::failed(instance, started_at, elapsed_ms, error)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Invoke the instance's agent, flattening every way it can fail into
    /// a message.
    async fn run_agent(&self, instance: &AgentInstance, prompt: &str) -> Result<InvocationSummary, String> {
        let Some(harness) = self.registry.get(&instance.agent_name) else {
            return Err(format!("no adapter registered for agent {:?}", instance.agent_name));
        };
        let request = InvocationRequest::new(
            instance.instance_id.as_str(),
            prompt,
            &instance.workspace,
            instance.port,
        )
        .with_cancellation(self.cancel.child_token());

        match AssertUnwindSafe(harness.invoke(&request)).catch_unwind().await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(e)) => {
                debug!(kind = e.kind(), "invocation error");
                Err(e.to_string())
            }
            Err(_) => Err(format!("adapter for agent {:?} panicked", instance.agent_name)),
        }
    }

    /// Measure and commit every completed instance, one at a time.
    fn score_all(&self, baseline: &Baseline, updates: &mut [InstanceResult]) {
        let ceiling = self.config.score_ceiling;
        for update in updates.iter_mut().filter(|u| u.result.is_completed()) {
            let dir = &update.folder_path;
            // Without its own repository, git would walk up and stage into
            // whatever repository encloses the run root.
            if !git::is_repository(dir) {
                warn!(
                    instance_id = %update.instance_id,
                    dir = %dir.display(),
                    "workspace is no longer a git repository, recording an empty diff"
                );
                continue;
            }
            match measure(dir, &baseline.commit) {
                Ok(stats) => {
                    info!(
                        instance_id = %update.instance_id,
                        files = stats.files_changed(),
                        lines = stats.lines_changed(),
                        score = stats.score(ceiling),
                        "scored instance"
                    );
                    update.result.record_measurement(stats, ceiling);
                }
                Err(e) => {
                    warn!(instance_id = %update.instance_id, error = %e, "failed to measure changes, recording an empty diff");
                }
            }

            let message = format!("{}: agent changes", update.instance_id);
            match git::commit(dir, &message) {
                Ok(true) => debug!(instance_id = %update.instance_id, "committed agent changes"),
                Ok(false) => info!(instance_id = %update.instance_id, "nothing to commit"),
                Err(e) => warn!(instance_id = %update.instance_id, error = %e, "failed to commit agent changes"),
            }
        }
    }

    fn persist(&self, report: EvaluationReport) -> Result<EvaluationReport, EvaluationError> {
        for update in &report.updates {
            match update.result.diff_stats() {
                Some(stats) => info!(
                    instance_id = %update.instance_id,
                    score = update.score(),
                    "{}", stats.summary()
                ),
                None => info!(
                    instance_id = %update.instance_id,
                    error = update.result.error().unwrap_or_default(),
                    "failed"
                ),
            }
        }
        info!(
            total_score = report.total_score,
            completed = report.completed_count(),
            failed = report.failed_count(),
            "evaluation finished"
        );

        let path = self.report_path();
        match report.save(&path) {
            Ok(()) => {
                info!(path = %path.display(), "report written");
                Ok(report)
            }
            Err(e) => {
                error!(path = %path.display(), error = %format!("{e:#}"), "failed to write report");
                Err(EvaluationError::ReportNotSaved {
                    path,
                    report: Box::new(report),
                    source: e.into(),
                })
            }
        }
    }
}

/// Stage everything and diff it against the baseline commit.
fn measure(dir: &Path, base: &str) -> Result<DiffStats, GitError> {
    git::stage_all(dir)?;
    Ok(DiffStats::from_diffstat(&git::diffstat(dir, base)?))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
