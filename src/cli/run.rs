// src/cli/run.rs — `kaizen run`: drive PDCA cycles over a design

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::progress::terminal_progress;
use crate::core::budget::BudgetGuard;
use crate::core::controller::{CycleController, RunDriver};
use crate::core::design::{flatten_design, AppDesign};
use crate::core::invoker::RetryingInvoker;
use crate::infra::config::Config;
use crate::infra::errors::KaizenError;
use crate::worker::dry_run::DryRunWorker;
use crate::worker::http::HttpWorker;
use crate::worker::UnitOfWork;

/// Asks on stdin whenever the controller needs a decision, unless told to
/// always continue.
pub struct PromptDriver {
    assume_yes: bool,
}

impl PromptDriver {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }

    fn confirm(&self, question: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        eprint!("{} [y/N] ", question);
        let _ = io::stderr().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(_) => parse_yes(&line),
            Err(_) => false,
        }
    }
}

fn parse_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

impl RunDriver for PromptDriver {
    fn continue_without_defects(&mut self, cycle: u32) -> bool {
        self.confirm(&format!(
            "No open defects after cycle {}. Keep refining?",
            cycle
        ))
    }

    fn continue_after_failure(&mut self, cycle: u32, error: &KaizenError) -> bool {
        self.confirm(&format!(
            "Cycle {} failed: {}. Attempt the next cycle?",
            cycle, error
        ))
    }
}

/// Pick the worker: the offline one for dry runs, the HTTP one otherwise.
fn build_worker(config: &Config, dry_run: bool) -> anyhow::Result<Arc<dyn UnitOfWork>> {
    if dry_run {
        return Ok(Arc::new(DryRunWorker::new(config.cycle.clone())));
    }
    let endpoint = config.worker.endpoint.as_deref().ok_or_else(|| {
        anyhow::anyhow!("No [worker].endpoint configured. Set one or pass --dry-run.")
    })?;
    let worker = HttpWorker::new(endpoint, Duration::from_secs(config.worker.timeout_secs))
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    Ok(Arc::new(worker))
}

#[allow(clippy::too_many_arguments)]
pub async fn run_cycles(
    config: &Config,
    design_path: &Path,
    cycles: Option<u32>,
    state_path: &Path,
    dry_run: bool,
    yes: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let design = AppDesign::load(design_path)
        .map_err(|e| anyhow::anyhow!("Cannot load design {}: {}", design_path.display(), e))?;
    let items = flatten_design(&design);
    if items.is_empty() {
        anyhow::bail!("Design {} declares no pages or endpoints", design_path.display());
    }

    let mut cycle_config = config.cycle.clone();
    if let Some(n) = cycles {
        cycle_config.cycles = n;
    }

    let worker = build_worker(config, dry_run)?;
    let guard = Arc::new(BudgetGuard::new(&config.budget));
    let cancel = CancellationToken::new();
    let invoker = RetryingInvoker::new(guard, &config.retry, cancel.clone());

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted, stopping after in-flight work...");
                cancel.cancel();
            }
        });
    }

    tracing::info!(
        items = items.len(),
        cycles = cycle_config.cycles,
        worker = worker.id(),
        "Starting run"
    );

    let mut controller = CycleController::new(items, cycle_config, invoker, worker);
    if !quiet {
        controller = controller.with_progress(terminal_progress());
    }

    let mut driver = PromptDriver::new(yes);
    let reason = controller.run(&mut driver).await;

    let mut state = controller.state();
    state.terminal_reason = Some(reason.to_string());
    state.save(state_path)?;

    print!("{}", controller.ledger().render_report());
    eprintln!("{}", controller.metrics().summary());
    eprintln!("State written to {}", state_path.display());
    Ok(())
}
