//! Result and report model.
//!
//! Every instance ends up as exactly one [`InstanceResult`], whichever way
//! its agent finished. The [`EvaluationReport`] collects them in fan-out
//! order and is written once as `evaluation-results.json`.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EvaluationConfig;
use crate::diff_stats::DiffStats;
use crate::workspace::AgentInstance;

/// How one instance's invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InvocationOutcome {
    /// The agent finished. Score and diff stats are filled in by scoring.
    InvocationCompleted { score: u32, diff_stats: DiffStats },
    /// The agent failed; always scores zero.
    InvocationFailed { score: u32, error: String },
}

impl InvocationOutcome {
    /// A completed outcome awaiting its measurement.
    pub fn completed_mempty() -> Self {
        Self::InvocationCompleted {
            score: 0,
            diff_stats: DiffStats::mempty(),
        }
    }

    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self::InvocationFailed {
            score: 0,
            error: error.to_string(),
        }
    }

    pub fn score(&self) -> u32 {
        match self {
            Self::InvocationCompleted { score, .. } | Self::InvocationFailed { score, .. } => *score,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::InvocationCompleted { .. })
    }

    pub fn diff_stats(&self) -> Option<&DiffStats> {
        match self {
            Self::InvocationCompleted { diff_stats, .. } => Some(diff_stats),
            Self::InvocationFailed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::InvocationCompleted { .. } => None,
            Self::InvocationFailed { error, .. } => Some(error),
        }
    }

    /// Record the measured diff of a completed instance. Failed outcomes
    /// are left alone.
    pub fn record_measurement(&mut self, stats: DiffStats, ceiling: u32) {
        if let Self::InvocationCompleted { score, diff_stats } = self {
            *score = stats.score(ceiling);
            *diff_stats = stats;
        }
    }
}

/// The record of one agent instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceResult {
    pub instance_id: String,
    pub folder_path: PathBuf,
    pub agent_name: String,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub result: InvocationOutcome,
}

impl InstanceResult {
    pub fn new(
        instance: &AgentInstance,
        started_at: DateTime<Utc>,
        execution_time_ms: u64,
        result: InvocationOutcome,
    ) -> Self {
        Self {
            instance_id: instance.instance_id.clone(),
            folder_path: instance.workspace.clone(),
            agent_name: instance.agent_name.clone(),
            port: instance.port,
            started_at,
            execution_time_ms,
            result,
        }
    }

    pub fn completed_mempty(
        instance: &AgentInstance,
        started_at: DateTime<Utc>,
        execution_time_ms: u64,
    ) -> Self {
        Self::new(
            instance,
            started_at,
            execution_time_ms,
            InvocationOutcome::completed_mempty(),
        )
    }

    pub fn failed(
        instance: &AgentInstance,
        started_at: DateTime<Utc>,
        execution_time_ms: u64,
        error: impl std::fmt::Display,
    ) -> Self {
        Self::new(
            instance,
            started_at,
            execution_time_ms,
            InvocationOutcome::failed(error),
        )
    }

    pub fn score(&self) -> u32 {
        self.result.score()
    }
}

/// When and how a run happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Milliseconds from start to end.
    pub total_duration: u64,
    pub agents_used: Vec<String>,
    pub config: EvaluationConfig,
}

/// The full outcome of an evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    /// Empty when the baseline was supplied rather than generated.
    pub initial_prompt: String,
    pub update_prompt: String,
    pub original_program_path: PathBuf,
    pub updates: Vec<InstanceResult>,
    pub total_score: u64,
    pub metadata: RunMetadata,
}

impl EvaluationReport {
    pub fn new(
        initial_prompt: impl Into<String>,
        update_prompt: impl Into<String>,
        original_program_path: impl Into<PathBuf>,
        updates: Vec<InstanceResult>,
        metadata: RunMetadata,
    ) -> Self {
        let total_score = updates.iter().map(|u| u64::from(u.score())).sum();
        Self {
            initial_prompt: initial_prompt.into(),
            update_prompt: update_prompt.into(),
            original_program_path: original_program_path.into(),
            updates,
            total_score,
            metadata,
        }
    }

    /// Read a saved report, rejecting one whose scores do not add up.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report {}", path.display()))?;
        let report: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse report {}", path.display()))?;
        report
            .check_scores()
            .with_context(|| format!("inconsistent report {}", path.display()))?;
        Ok(report)
    }

    fn check_scores(&self) -> Result<()> {
        for update in &self.updates {
            if let InvocationOutcome::InvocationFailed { score, .. } = &update.result {
                ensure!(
                    *score == 0,
                    "failed instance {} has score {score}",
                    update.instance_id
                );
            }
        }
        let sum: u64 = self.updates.iter().map(|u| u64::from(u.score())).sum();
        ensure!(
            self.total_score == sum,
            "total score {} is not the sum of instance scores {sum}",
            self.total_score
        );
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write report {}", path.display()))
    }

    pub fn completed_count(&self) -> usize {
        self.updates.iter().filter(|u| u.result.is_completed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.updates.len() - self.completed_count()
    }

    /// Fraction of instances that completed, 0.0 when there were none.
    pub fn success_rate(&self) -> f64 {
        if self.updates.is_empty() {
            return 0.0;
        }
        self.completed_count() as f64 / self.updates.len() as f64
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count() == 0
    }

    /// Condensed machine-readable summary.
    pub fn summary_json(&self) -> serde_json::Value {
        let instances: Vec<serde_json::Value> = self
            .updates
            .iter()
            .map(|u| {
                let status = if u.result.is_completed() { "completed" } else { "failed" };
                let mut entry = serde_json::json!({
                    "instanceId": u.instance_id,
                    "agentName": u.agent_name,
                    "status": status,
                    "score": u.score(),
                    "executionTimeMs": u.execution_time_ms,
                });
                if let Some(stats) = u.result.diff_stats() {
                    entry["filesChanged"] = stats.files_changed().into();
                    entry["linesChanged"] = stats.lines_changed().into();
                }
                if let Some(error) = u.result.error() {
                    entry["error"] = error.into();
                }
                entry
            })
            .collect();

        serde_json::json!({
            "runId": self.metadata.run_id,
            "totalScore": self.total_score,
            "completed": self.completed_count(),
            "failed": self.failed_count(),
            "successRate": self.success_rate(),
            "instances": instances,
        })
    }

    /// Human-readable table of every instance.
    pub fn print_summary<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "Baseline: {}", self.original_program_path.display())?;
        writeln!(w)?;
        writeln!(
            w,
            "{:<24} {:<16} {:<10} {:>6} {:>6} {:>6} {:>10}",
            "INSTANCE", "AGENT", "RESULT", "SCORE", "FILES", "LINES", "TIME"
        )?;
        writeln!(w, "{}", "-".repeat(84))?;

        for u in &self.updates {
            let (status, files, lines) = match u.result.diff_stats() {
                Some(stats) => (
                    "completed",
                    stats.files_changed().to_string(),
                    stats.lines_changed().to_string(),
                ),
                None => ("failed", "-".to_string(), "-".to_string()),
            };
            writeln!(
                w,
                "{:<24} {:<16} {:<10} {:>6} {:>6} {:>6} {:>10}",
                u.instance_id,
                u.agent_name,
                status,
                u.score(),
                files,
                lines,
                format_duration_ms(u.execution_time_ms),
            )?;
            if let Some(error) = u.result.error() {
                writeln!(w, "    error: {}", truncate(error, 76))?;
            }
        }

        writeln!(w)?;
        writeln!(w, "Total score: {}", self.total_score)?;
        writeln!(
            w,
            "Success rate: {}/{} ({:.0}%)",
            self.completed_count(),
            self.updates.len(),
            self.success_rate() * 100.0
        )?;
        Ok(())
    }
}

fn format_duration_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

/// Shorten `s` to at most `max` characters, marking the cut with `...`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff_stats::DEFAULT_SCORE_CEILING;

    fn instance(id: &str, agent: &str, port: u16) -> AgentInstance {
        AgentInstance {
            instance_id: id.to_string(),
            agent_name: agent.to_string(),
            replica: 1,
            workspace: PathBuf::from(format!("/runs/r1/{id}")),
            port,
        }
    }

    fn metadata() -> RunMetadata {
        let now = Utc::now();
        RunMetadata {
            run_id: Uuid::new_v4(),
            start_time: now,
            end_time: now,
            total_duration: 0,
            agents_used: vec!["claude".into(), "aider".into()],
            config: EvaluationConfig::default(),
        }
    }

    fn completed(id: &str, lines: u32) -> InstanceResult {
        let mut result = InstanceResult::completed_mempty(&instance(id, "claude", 3000), Utc::now(), 1_200);
        result.result.record_measurement(
            DiffStats::from_diffstat(&format!("app.js | {lines}")),
            DEFAULT_SCORE_CEILING,
        );
        result
    }

    #[test]
    fn failed_outcome_scores_zero() {
        let outcome = InvocationOutcome::failed("agent process exited with code 1");
        assert_eq!(outcome.score(), 0);
        assert!(!outcome.is_completed());
        assert_eq!(outcome.error(), Some("agent process exited with code 1"));
        assert!(outcome.diff_stats().is_none());
    }

    #[test]
    fn completed_outcome_starts_empty_and_is_backfilled() {
        let mut outcome = InvocationOutcome::completed_mempty();
        assert_eq!(outcome.score(), 0);
        assert_eq!(outcome.diff_stats(), Some(&DiffStats::mempty()));

        outcome.record_measurement(DiffStats::from_diffstat("a.ts | 10"), 300);
        assert_eq!(outcome.score(), 290);
        assert_eq!(outcome.diff_stats().map(DiffStats::lines_changed), Some(10));
    }

    #[test]
    fn measurement_is_ignored_for_failures() {
        let mut outcome = InvocationOutcome::failed("boom");
        outcome.record_measurement(DiffStats::mempty(), 300);
        assert_eq!(outcome.score(), 0);
        assert!(!outcome.is_completed());
    }

    #[test]
    fn outcome_json_shape() {
        let failed = serde_json::to_value(InvocationOutcome::failed("timed out")).unwrap();
        assert_eq!(
            failed,
            serde_json::json!({"type": "invocationFailed", "score": 0, "error": "timed out"})
        );

        let completed = serde_json::to_value(InvocationOutcome::completed_mempty()).unwrap();
        assert_eq!(completed["type"], "invocationCompleted");
        assert_eq!(completed["diffStats"]["linesChanged"], 0);
    }

    #[test]
    fn total_score_is_the_sum_of_instance_scores() {
        let updates = vec![
            completed("claude-1", 3),
            completed("claude-2", 500),
            InstanceResult::failed(&instance("aider-1", "aider", 3002), Utc::now(), 10, "exit 1"),
            completed("claude-3", 0),
        ];
        let expected: u64 = updates.iter().map(|u| u64::from(u.score())).sum();
        let report = EvaluationReport::new("", "make it blue", "/runs/r1/baseline", updates, metadata());

        assert_eq!(report.total_score, expected);
        assert_eq!(report.total_score, 597);
        assert_eq!(report.completed_count(), 3);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.all_succeeded());
        assert!((report.success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_report_has_zero_success_rate() {
        let report = EvaluationReport::new("", "x", "/b", Vec::new(), metadata());
        assert_eq!(report.total_score, 0);
        assert_eq!(report.success_rate(), 0.0);
        assert!(report.all_succeeded());
    }

    #[test]
    fn report_json_uses_documented_keys() {
        let report = EvaluationReport::new("build it", "change it", "/b", vec![completed("claude-1", 2)], metadata());
        let json = serde_json::to_value(&report).unwrap();
        for key in ["initialPrompt", "updatePrompt", "originalProgramPath", "updates", "totalScore", "metadata"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        for key in ["runId", "startTime", "endTime", "totalDuration", "agentsUsed", "config"] {
            assert!(json["metadata"].get(key).is_some(), "missing metadata.{key}");
        }
        let update = &json["updates"][0];
        for key in ["instanceId", "folderPath", "agentName", "port", "executionTimeMs", "result"] {
            assert!(update.get(key).is_some(), "missing updates[0].{key}");
        }
        assert_eq!(update["result"]["score"], 298);
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("evaluation-results.json");
        let report = EvaluationReport::new("", "u", "/b", vec![completed("claude-1", 1)], metadata());

        report.save(&path).unwrap();
        assert_eq!(EvaluationReport::load(&path).unwrap(), report);
        assert!(EvaluationReport::load(&tmp.path().join("missing.json")).is_err());
    }

    #[test]
    fn load_rejects_scores_that_do_not_add_up() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("evaluation-results.json");
        let updates = vec![
            completed("claude-1", 1),
            InstanceResult::failed(&instance("aider-1", "aider", 3001), Utc::now(), 10, "exit 1"),
        ];
        let report = EvaluationReport::new("", "u", "/b", updates, metadata());

        let mut scored_failure = serde_json::to_value(&report).unwrap();
        scored_failure["updates"][1]["result"]["score"] = 250.into();
        scored_failure["totalScore"] = (299 + 250).into();
        std::fs::write(&path, scored_failure.to_string()).unwrap();
        let msg = format!("{:#}", EvaluationReport::load(&path).unwrap_err());
        assert!(msg.contains("failed instance aider-1 has score 250"), "{msg}");

        let mut wrong_total = serde_json::to_value(&report).unwrap();
        wrong_total["totalScore"] = 1000.into();
        std::fs::write(&path, wrong_total.to_string()).unwrap();
        let msg = format!("{:#}", EvaluationReport::load(&path).unwrap_err());
        assert!(msg.contains("total score 1000"), "{msg}");
    }

    #[test]
    fn summary_lists_every_instance() {
        let updates = vec![
            completed("claude-1", 4),
            InstanceResult::failed(&instance("aider-1", "aider", 3001), Utc::now(), 65_000, "agent timed out after 60s"),
        ];
        let report = EvaluationReport::new("", "u", "/runs/r1/baseline", updates, metadata());

        let mut out = Vec::new();
        report.print_summary(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("claude-1"));
        assert!(text.contains("296"));
        assert!(text.contains("error: agent timed out after 60s"));
        assert!(text.contains("1m05s"));
        assert!(text.contains("Total score: 296"));
        assert!(text.contains("Success rate: 1/2 (50%)"));

        let json = report.summary_json();
        assert_eq!(json["completed"], 1);
        assert_eq!(json["instances"][0]["linesChanged"], 4);
        assert_eq!(json["instances"][1]["status"], "failed");
    }

    #[test]
    fn truncate_marks_the_cut() {
        assert_eq!(truncate("short", 80), "short");
        let long = "x".repeat(100);
        let cut = truncate(&long, 80);
        assert_eq!(cut.chars().count(), 80);
        assert!(cut.ends_with("..."));
    }
}
