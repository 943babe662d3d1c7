// src/cli/progress.rs — Terminal progress renderer for cycle feedback

use crate::core::types::{PhaseStatus, ProgressEvent};

/// One line per event.
pub fn format_event(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::CycleStart {
            cycle,
            max_cycles,
            remaining_budget,
        } => format!(
            "[cycle {}/{}] starting ({} units left today)",
            cycle, max_cycles, remaining_budget
        ),
        ProgressEvent::PhaseEnd { cycle, result } => {
            let outcome = match &result.status {
                PhaseStatus::Completed => "done".to_string(),
                PhaseStatus::Skipped { reason } => format!("skipped: {}", reason),
                PhaseStatus::Failed { error } => format!("FAILED: {}", error),
            };
            format!(
                "[cycle {}]   {:<22} {} ({} units, {} calls)",
                cycle, result.phase, outcome, result.units_consumed, result.calls
            )
        }
        ProgressEvent::BudgetLow {
            cycle,
            remaining,
            floor,
        } => format!(
            "[cycle {}]   budget low: {} units left, floor {}",
            cycle, remaining, floor
        ),
        ProgressEvent::CycleEnd {
            cycle,
            open_defects,
            units_consumed,
            failed,
        } => format!(
            "[cycle {}] {} open defect(s), {} units{}",
            cycle,
            open_defects,
            units_consumed,
            if *failed { " (failed)" } else { "" }
        ),
        ProgressEvent::Terminal { reason, cycles } => {
            format!("[done] {} after {} cycle(s)", reason, cycles)
        }
    }
}

/// Build a progress callback that writes to stderr, keeping stdout for the report.
pub fn terminal_progress() -> impl Fn(ProgressEvent) + Send + Sync + 'static {
    move |event| eprintln!("{}", format_event(&event))
}
