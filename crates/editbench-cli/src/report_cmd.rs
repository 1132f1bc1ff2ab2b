//! `editbench report` command: show a saved evaluation report.

use std::io::Write;
use std::path::Path;

use anyhow::Result;

use editbench_core::EvaluationReport;
use editbench_core::report::truncate;

/// Run the report command.
pub fn run_report(path: &Path, json: bool) -> Result<()> {
    let report = EvaluationReport::load(path)?;
    let mut out = std::io::stdout().lock();
    write_report(&report, json, &mut out)?;
    Ok(())
}

fn write_report<W: Write>(report: &EvaluationReport, json: bool, out: &mut W) -> Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, &report.summary_json())?;
        writeln!(out)?;
        return Ok(());
    }

    let meta = &report.metadata;
    writeln!(out, "Run: {}", meta.run_id)?;
    writeln!(out, "Started: {}", meta.start_time.format("%Y-%m-%d %H:%M:%S UTC"))?;
    let secs = meta.total_duration / 1_000;
    writeln!(out, "Duration: {}m {}s", secs / 60, secs % 60)?;
    writeln!(out, "Update prompt: {}", truncate(&report.update_prompt, 70))?;
    if !report.initial_prompt.is_empty() {
        writeln!(out, "Initial prompt: {}", truncate(&report.initial_prompt, 70))?;
    }
    writeln!(out)?;
    report.print_summary(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use editbench_core::report::InvocationOutcome;
    use editbench_core::{EvaluationConfig, InstanceResult, RunMetadata};
    use std::path::PathBuf;

    fn sample_report() -> EvaluationReport {
        let started = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap();
        let updates = vec![InstanceResult {
            instance_id: "claude-1".into(),
            folder_path: PathBuf::from("/runs/claude-1"),
            agent_name: "claude".into(),
            port: 3000,
            started_at: started,
            execution_time_ms: 1_500,
            result: InvocationOutcome::failed("agent process exited with code 2"),
        }];
        EvaluationReport::new(
            "",
            "add dark mode",
            "/runs/baseline",
            updates,
            RunMetadata {
                run_id: uuid::Uuid::nil(),
                start_time: started,
                end_time: started,
                total_duration: 125_000,
                agents_used: vec!["claude".into()],
                config: EvaluationConfig::default(),
            },
        )
    }

    #[test]
    fn text_report_has_header_and_table() {
        let mut out = Vec::new();
        write_report(&sample_report(), false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Run: 00000000-0000-0000-0000-000000000000"), "{text}");
        assert!(text.contains("Started: 2026-03-14 09:30:00 UTC"), "{text}");
        assert!(text.contains("Duration: 2m 5s"), "{text}");
        assert!(text.contains("Update prompt: add dark mode"), "{text}");
        assert!(!text.contains("Initial prompt"), "{text}");
        assert!(text.contains("claude-1"), "{text}");
        assert!(text.contains("Success rate: 0/1 (0%)"), "{text}");
    }

    #[test]
    fn json_report_is_the_summary() {
        let mut out = Vec::new();
        write_report(&sample_report(), true, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["totalScore"], 0);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["instances"][0]["status"], "failed");
    }

    #[test]
    fn saved_report_can_be_shown() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("evaluation-results.json");
        sample_report().save(&path).unwrap();
        run_report(&path, false).unwrap();
        assert!(run_report(&tmp.path().join("missing.json"), false).is_err());
    }
}
