//! `editbench run` command: evaluate agents against one benchmark.

use std::error::Error as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{ArgGroup, Args};
use tokio_util::sync::CancellationToken;
use tracing::info;

use editbench_core::harness::{HarnessRegistry, ScriptAdapter};
use editbench_core::report::truncate;
use editbench_core::{BaselineSource, EvaluationError, EvaluationReport, Evaluator};

use crate::config::{self, RunOverrides, RunSettings};

pub const INITIAL_PROMPT_FILE: &str = "initial-prompt.txt";
pub const UPDATE_PROMPT_FILE: &str = "update-prompt.txt";
/// Registry name of the `--generator` script.
pub const GENERATOR_NAME: &str = "baseline-generator";

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("baseline")
        .required(true)
        .args(["generator", "existing_code"])
))]
pub struct RunArgs {
    /// Directory holding `update-prompt.txt` and, with `--generator`,
    /// `initial-prompt.txt`
    pub benchmark_dir: PathBuf,
    /// Script that builds the baseline program from `initial-prompt.txt`
    #[arg(long, value_name = "SCRIPT")]
    pub generator: Option<PathBuf>,
    /// Use an existing program as the baseline
    #[arg(long, value_name = "DIR")]
    pub existing_code: Option<PathBuf>,
    #[command(flatten)]
    pub overrides: RunOverrides,
}

/// Prompts read from a benchmark directory.
#[derive(Debug, PartialEq, Eq)]
pub struct Prompts {
    pub initial: Option<String>,
    pub update: String,
}

/// Read the benchmark prompts. `initial-prompt.txt` is only required when
/// the baseline is generated.
pub fn read_prompts(dir: &Path, need_initial: bool) -> Result<Prompts> {
    let update = read_prompt(&dir.join(UPDATE_PROMPT_FILE))?;
    let initial_path = dir.join(INITIAL_PROMPT_FILE);
    let initial = if need_initial || initial_path.exists() {
        Some(read_prompt(&initial_path)?)
    } else {
        None
    };
    Ok(Prompts { initial, update })
}

fn read_prompt(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read prompt file {}", path.display()))?;
    let text = text.trim();
    if text.is_empty() {
        bail!("prompt file {} is empty", path.display());
    }
    Ok(text.to_string())
}

/// JSON printed to stdout when a run aborts or its report cannot be saved.
pub fn error_json(err: &EvaluationError) -> serde_json::Value {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    serde_json::json!({
        "error": {
            "code": err.code(),
            "message": message,
        }
    })
}

/// Run the evaluation. Returns whether every instance completed.
pub async fn run_evaluation(args: RunArgs, config_override: Option<&Path>) -> Result<bool> {
    let file = config::load_for_run(config_override)?;
    let settings = RunSettings::resolve(&args.overrides, file.as_ref(), Local::now())?;
    let prompts = read_prompts(&args.benchmark_dir, args.generator.is_some())?;

    let mut registry = HarnessRegistry::from_specs(&settings.evaluation.agents);
    let source = match (&args.generator, &args.existing_code) {
        (Some(script), _) => {
            if registry.contains(GENERATOR_NAME) {
                bail!("agent name {GENERATOR_NAME:?} is reserved for the generator");
            }
            let timeout = Duration::from_secs(settings.defaults.script_timeout_secs);
            registry.register(ScriptAdapter::new(GENERATOR_NAME, script).with_timeout(timeout));
            BaselineSource::Generate {
                agent: GENERATOR_NAME.to_string(),
                prompt: prompts.initial.clone().unwrap_or_default(),
            }
        }
        (None, Some(dir)) => BaselineSource::Existing(dir.clone()),
        (None, None) => bail!("one of --generator or --existing-code is required"),
    };

    info!(
        agents = ?settings.evaluation.agent_names(),
        replicas = settings.evaluation.replicas,
        root = %settings.evaluation.workspace_root.display(),
        prompt = %truncate(&prompts.update, 60),
        "starting evaluation"
    );

    // Graceful shutdown: first signal cancels, second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_signal.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nStopping agents (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    let evaluator = Evaluator::new(settings.evaluation, registry).with_cancellation(cancel);
    match evaluator.evaluate(source, &prompts.update).await {
        Ok(report) => {
            let mut out = std::io::stdout().lock();
            print_results(&report, &mut out)?;
            writeln!(out)?;
            writeln!(out, "Report: {}", evaluator.report_path().display())?;
            Ok(report.all_succeeded())
        }
        Err(err) => {
            let mut out = std::io::stdout().lock();
            if let Some(report) = err.report() {
                print_results(report, &mut out)?;
            }
            writeln!(out, "{}", error_json(&err))?;
            Err(anyhow::Error::new(err).context("evaluation aborted"))
        }
    }
}

/// The summary table, then the one-line JSON summary.
fn print_results<W: Write>(report: &EvaluationReport, out: &mut W) -> Result<()> {
    report.print_summary(out)?;
    writeln!(out)?;
    writeln!(out, "{}", report.summary_json())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use editbench_test_utils::write_files;

    #[test]
    fn update_prompt_is_required() {
        let tmp = tempfile::tempdir().unwrap();
        write_files(tmp.path(), &[(INITIAL_PROMPT_FILE, "build it\n")]);
        let msg = format!("{:#}", read_prompts(tmp.path(), false).unwrap_err());
        assert!(msg.contains(UPDATE_PROMPT_FILE), "unexpected error: {msg}");
    }

    #[test]
    fn initial_prompt_only_required_for_generation() {
        let tmp = tempfile::tempdir().unwrap();
        write_files(tmp.path(), &[(UPDATE_PROMPT_FILE, "  add dark mode \n")]);

        let prompts = read_prompts(tmp.path(), false).unwrap();
        assert_eq!(
            prompts,
            Prompts {
                initial: None,
                update: "add dark mode".into()
            }
        );
        assert!(read_prompts(tmp.path(), true).is_err());
    }

    #[test]
    fn both_prompts_are_read_and_trimmed() {
        let tmp = tempfile::tempdir().unwrap();
        write_files(
            tmp.path(),
            &[
                (INITIAL_PROMPT_FILE, "build a todo app\n"),
                (UPDATE_PROMPT_FILE, "add due dates\n"),
            ],
        );
        let prompts = read_prompts(tmp.path(), true).unwrap();
        assert_eq!(prompts.initial.as_deref(), Some("build a todo app"));
        assert_eq!(prompts.update, "add due dates");
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_files(tmp.path(), &[(UPDATE_PROMPT_FILE, "\n\n")]);
        let msg = read_prompts(tmp.path(), false).unwrap_err().to_string();
        assert!(msg.contains("is empty"), "unexpected error: {msg}");
    }

    #[test]
    fn error_json_carries_code_and_message() {
        let err = EvaluationError::NoFilesGenerated {
            path: PathBuf::from("/runs/baseline"),
        };
        let json = error_json(&err);
        assert_eq!(json["error"]["code"], "NO_FILES_GENERATED");
        assert!(json["error"]["message"].as_str().unwrap().contains("/runs/baseline"));
    }
}
