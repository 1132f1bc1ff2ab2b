mod config;
mod logging;
mod report_cmd;
mod run_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "editbench",
    about = "Score coding agents by how little code they change"
)]
struct Cli {
    /// Config file (overrides EDITBENCH_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file holding the defaults
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Evaluate agents on one benchmark
    Run(run_cmd::RunArgs),
    /// Show a saved evaluation report
    Report {
        /// Path to evaluation-results.json
        file: PathBuf,
        /// Print the machine-readable summary instead of the table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init()?;

    match cli.command {
        Commands::Init { force } => {
            config::cmd_init(cli.config.as_deref(), force)?;
        }
        Commands::Run(args) => {
            let all_succeeded = run_cmd::run_evaluation(args, cli.config.as_deref()).await?;
            if !all_succeeded {
                std::process::exit(1);
            }
        }
        Commands::Report { file, json } => {
            report_cmd::run_report(&file, json)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialises tests that touch process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
