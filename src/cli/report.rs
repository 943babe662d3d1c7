// src/cli/report.rs — `kaizen report`: show a saved run

use std::path::Path;

use crate::core::ledger::Ledger;
use crate::core::state::RunState;

/// Render the ledger report, metrics and budget counters of a saved run.
pub fn render_state(state: &RunState) -> String {
    let ledger = Ledger::from_snapshot(state.ledger.clone());
    let mut out = ledger.render_report();
    out.push('\n');
    out.push_str(&state.metrics.analytics_report());
    if let Some(ref budget) = state.budget {
        out.push_str(&format!(
            "\nBudget: {} of {} units used today ({:.1}%), {} limit signal(s), {} delayed admission(s)\n",
            budget.used_today,
            budget.daily_capacity,
            budget.percent_used_daily,
            budget.limit_signals,
            budget.delayed_admissions,
        ));
    }
    if let Some(ref reason) = state.terminal_reason {
        out.push_str(&format!("Stopped: {}\n", reason));
    }
    out
}

pub fn run_report(path: &Path) -> anyhow::Result<()> {
    let state = RunState::load(path)
        .map_err(|e| anyhow::anyhow!("Cannot read run state {}: {}", path.display(), e))?;
    print!("{}", render_state(&state));
    Ok(())
}
