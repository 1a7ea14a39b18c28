use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use overseer::config::Config;
use overseer::plan::{self, Plan};
use overseer::storage::{ContextStore, JsonlContextStore, NullContextStore};
use overseer::{dry_run, Result};

/// Overseer - supervised execution of dependent interactive tasks
#[derive(Parser, Debug)]
#[command(name = "overseer")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    OVERSEER_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG=<filter>    Override the log filter"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.overseer/overseer.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Check a plan and print its tasks in dependency order
    Validate {
        /// Path to a plan JSON file
        plan: PathBuf,
    },

    /// Rehearse a plan with in-process collaborators and print the report
    DryRun {
        /// Path to a plan JSON file
        plan: PathBuf,

        /// Concurrent workers (defaults to the configured value)
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Step number or name whose actions always fail (repeatable)
        #[arg(long = "fail", value_name = "STEP")]
        fail: Vec<String>,

        /// Do not append to ~/.overseer/context.jsonl
        #[arg(long)]
        no_context: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Some(path) = overseer::log::init(cli.debug) {
        info!(path = %path.display(), "logging to file");
    }

    let result = match cli.command {
        Command::Validate { plan } => run_validate(&plan),
        Command::DryRun {
            plan,
            max_parallel,
            fail,
            no_context,
        } => run_dry_run(&plan, max_parallel, &fail, no_context),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run_validate(path: &Path) -> Result<()> {
    let plan = Plan::load(path)?;
    let built = plan::build_graph(&plan.steps)?;

    let number_of: std::collections::HashMap<_, _> =
        built.step_ids.iter().map(|(number, id)| (*id, *number)).collect();

    if !plan.goal.is_empty() {
        println!("Goal: {}", plan.goal);
    }
    println!("{} task(s) in dependency order:", built.graph.task_count());
    for task in built.graph.topological_order()? {
        let number = number_of.get(&task.id).copied().unwrap_or_default();
        let mut deps: Vec<u32> = task
            .dependencies
            .iter()
            .filter_map(|id| number_of.get(id).copied())
            .collect();
        deps.sort_unstable();

        if deps.is_empty() {
            println!("  {:>3}. {}", number, task.description);
        } else {
            let deps: Vec<String> = deps.iter().map(u32::to_string).collect();
            println!(
                "  {:>3}. {}  (after {})",
                number,
                task.description,
                deps.join(", ")
            );
        }
    }
    Ok(())
}

fn run_dry_run(
    path: &Path,
    max_parallel: Option<usize>,
    fail: &[String],
    no_context: bool,
) -> Result<()> {
    let plan = Plan::load(path)?;
    let config = Config::load()?;

    let mut supervisor = config.supervisor_config();
    if let Some(n) = max_parallel {
        supervisor = supervisor.with_max_parallel(n);
    }
    supervisor.validate()?;

    let context: Arc<dyn ContextStore> = if no_context {
        Arc::new(NullContextStore)
    } else {
        Config::ensure_dirs()?;
        Arc::new(JsonlContextStore::new(Config::context_log_path()?))
    };

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(dry_run::run(
        &plan,
        fail,
        supervisor,
        &config.cache_config(),
        context,
    ))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.outcome.is_succeeded() {
        Ok(())
    } else {
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_validate() {
        let cli = Cli::parse_from(["overseer", "validate", "plan.json"]);
        assert!(!cli.debug);
        assert_eq!(
            cli.command,
            Command::Validate {
                plan: PathBuf::from("plan.json")
            }
        );
    }

    #[test]
    fn test_parse_dry_run_flags() {
        let cli = Cli::parse_from([
            "overseer",
            "-d",
            "dry-run",
            "plan.json",
            "--max-parallel",
            "2",
            "--fail",
            "2",
            "--fail",
            "submit",
        ]);
        assert!(cli.debug);
        assert_eq!(
            cli.command,
            Command::DryRun {
                plan: PathBuf::from("plan.json"),
                max_parallel: Some(2),
                fail: vec!["2".to_string(), "submit".to_string()],
                no_context: false,
            }
        );
    }
}
