//! Core of the editbench evaluation harness.
//!
//! An evaluation takes a committed baseline program, hands an update prompt
//! to several coding agents (each replica in its own copy of the baseline),
//! and scores every replica by how few lines it had to touch.
//!
//! ```text
//! Evaluator::evaluate
//!     |
//!     +-- WorkspaceManager   baseline repo + one isolated copy per instance
//!     |
//!     +-- HarnessRegistry    name --> &dyn Harness (Claude Code / script)
//!     |        |
//!     |        +-- invoke() x N, concurrently
//!     |
//!     +-- git + DiffStats    staged word diff vs. baseline commit --> score
//!     |
//!     +-- EvaluationReport   evaluation-results.json
//! ```

pub mod config;
pub mod diff_stats;
pub mod evaluator;
pub mod git;
pub mod harness;
pub mod report;
pub mod workspace;

pub use config::{AgentDefaults, AgentKind, AgentSpec, EvaluationConfig};
pub use diff_stats::{DEFAULT_SCORE_CEILING, DiffStats, DiffSummary, FileDiffStat};
pub use evaluator::{BaselineSource, EvaluationError, Evaluator, REPORT_FILE_NAME};
pub use harness::{Harness, HarnessRegistry, InvocationError, InvocationRequest};
pub use report::{EvaluationReport, InstanceResult, InvocationOutcome, RunMetadata};
pub use workspace::{AgentInstance, Baseline, PortAllocator, WorkspaceManager};
