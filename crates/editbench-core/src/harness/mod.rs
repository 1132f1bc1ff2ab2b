//! Adapters that drive coding agents.
//!
//! Two very different agent runtimes sit behind one [`Harness`] trait: the
//! Claude Code CLI, which speaks a JSONL streaming protocol, and arbitrary
//! shell scripts, which are judged only by how their process exits.
//!
//! # Architecture
//!
//! ```text
//! Evaluator
//!     |
//!     v
//! HarnessRegistry --get("claude")--> &dyn Harness
//!                                        |
//!     invoke(InvocationRequest) ---------+
//!         |
//!         +--> Ok(InvocationSummary)
//!         +--> Err(InvocationError)   max turns, non-zero exit, timeout, ...
//! ```

pub mod claude_code;
mod process;
pub mod registry;
pub mod script;
pub mod trait_def;
pub mod types;

pub use claude_code::{ClaudeCodeAdapter, ClaudeSession, StreamMessage};
pub use registry::HarnessRegistry;
pub use script::{ScriptAdapter, SigtermSuccessQuirk};
pub use trait_def::Harness;
pub use types::{InvocationError, InvocationRequest, InvocationSummary, TokenUsage};
