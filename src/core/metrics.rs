// src/core/metrics.rs — Run metrics and analytics
//
// Passive counters: the controller feeds every finished cycle in, nothing
// here influences scheduling.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::{Cycle, PhaseResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTotals {
    pub units: u64,
    pub calls: u64,
    pub runs: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Aggregates consumption and outcomes across cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub cycles: u32,
    pub failed_cycles: u32,
    pub total_units: u64,
    pub total_calls: u64,
    /// Keyed by phase name (PLAN, DO, ...).
    pub by_phase: BTreeMap<String, PhaseTotals>,
    pub cycle_durations: Vec<Duration>,
    pub defects_found: u64,
    pub defects_resolved: u64,
    pub defects_verified: u64,
    #[serde(default)]
    pub defects_reopened: u64,
    pub improvements_applied: u64,
    pub improvements_proposed: u64,
    pub items_shed: u64,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_phase(&mut self, result: &PhaseResult) {
        self.total_units += result.units_consumed;
        self.total_calls += result.calls as u64;
        let totals = self.by_phase.entry(result.phase.to_string()).or_default();
        totals.units += result.units_consumed;
        totals.calls += result.calls as u64;
        totals.runs += 1;
        if result.is_skipped() {
            totals.skipped += 1;
        }
        if result.is_failed() {
            totals.failed += 1;
        }

        let c = &result.counts;
        self.defects_found += c.defects_found as u64;
        self.defects_resolved += c.defects_resolved as u64;
        self.defects_verified += c.defects_verified as u64;
        self.defects_reopened += c.defects_reopened as u64;
        self.improvements_applied += c.improvements_applied as u64;
        self.improvements_proposed += c.improvements_proposed as u64;
        self.items_shed += c.shed as u64;
    }

    pub fn record_cycle(&mut self, cycle: &Cycle) {
        self.cycles += 1;
        if cycle.is_failed() {
            self.failed_cycles += 1;
        }
        self.cycle_durations.push(cycle.duration);
        for result in &cycle.phase_results {
            self.record_phase(result);
        }
    }

    pub fn avg_cycle_duration(&self) -> Duration {
        if self.cycle_durations.is_empty() {
            return Duration::ZERO;
        }
        self.cycle_durations.iter().sum::<Duration>() / self.cycle_durations.len() as u32
    }

    /// Phases by units consumed, heaviest first.
    pub fn phase_breakdown(&self) -> Vec<(String, PhaseTotals)> {
        let mut phases: Vec<_> = self
            .by_phase
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        phases.sort_by(|a, b| b.1.units.cmp(&a.1.units).then_with(|| a.0.cmp(&b.0)));
        phases
    }

    pub fn summary(&self) -> String {
        format!(
            "{} cycles, {} units, {} calls, {} defects found, {} resolved",
            self.cycles, self.total_units, self.total_calls, self.defects_found, self.defects_resolved
        )
    }

    pub fn analytics_report(&self) -> String {
        let mut report = String::new();
        report.push_str("═══ Run Metrics ═══\n");
        report.push_str(&format!(
            "Cycles: {} ({} failed)\n",
            self.cycles, self.failed_cycles
        ));
        report.push_str(&format!("Total units: {}\n", self.total_units));
        report.push_str(&format!("Total calls: {}\n", self.total_calls));
        report.push_str(&format!(
            "Avg cycle time: {:.1}s\n",
            self.avg_cycle_duration().as_secs_f64()
        ));
        report.push_str(&format!(
            "Defects: {} found, {} resolved, {} verified\n",
            self.defects_found, self.defects_resolved, self.defects_verified
        ));
        if self.defects_reopened > 0 {
            report.push_str(&format!(
                "Fixes rejected by verification: {}\n",
                self.defects_reopened
            ));
        }
        report.push_str(&format!(
            "Improvements: {} proposed, {} applied\n",
            self.improvements_proposed, self.improvements_applied
        ));
        if self.items_shed > 0 {
            report.push_str(&format!("Items shed for budget: {}\n", self.items_shed));
        }

        if !self.by_phase.is_empty() {
            report.push_str("\nBy Phase:\n");
            for (phase, totals) in self.phase_breakdown() {
                let pct = if self.total_units > 0 {
                    totals.units as f64 / self.total_units as f64 * 100.0
                } else {
                    0.0
                };
                report.push_str(&format!(
                    "  {}: {} units ({:.1}%), {} calls, {} skipped\n",
                    phase, totals.units, pct, totals.calls, totals.skipped
                ));
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Phase, PhaseCounts, PhaseStatus};
    use chrono::Utc;

    fn result(phase: Phase, units: u64, calls: u32, status: PhaseStatus) -> PhaseResult {
        PhaseResult {
            phase,
            status,
            units_consumed: units,
            calls,
            counts: PhaseCounts::default(),
            components: vec![],
            duration: Duration::from_millis(10),
        }
    }

    fn cycle(number: u32, secs: u64, results: Vec<PhaseResult>) -> Cycle {
        Cycle {
            number,
            phase_results: results,
            started_at: Utc::now(),
            duration: Duration::from_secs(secs),
            failure: None,
        }
    }

    #[test]
    fn test_empty_metrics() {
        let m = RunMetrics::new();
        assert_eq!(m.avg_cycle_duration(), Duration::ZERO);
        assert!(m.phase_breakdown().is_empty());
        assert!(m.summary().starts_with("0 cycles"));
    }

    #[test]
    fn test_record_cycles() {
        let mut m = RunMetrics::new();
        let mut check = result(Phase::Check, 4_000, 2, PhaseStatus::Completed);
        check.counts.defects_found = 2;
        m.record_cycle(&cycle(
            1,
            10,
            vec![result(Phase::Do, 9_000, 3, PhaseStatus::Completed), check],
        ));
        m.record_cycle(&cycle(
            2,
            20,
            vec![result(
                Phase::Check,
                0,
                0,
                PhaseStatus::Skipped {
                    reason: "nothing changed".into(),
                },
            )],
        ));

        assert_eq!(m.cycles, 2);
        assert_eq!(m.total_units, 13_000);
        assert_eq!(m.total_calls, 5);
        assert_eq!(m.defects_found, 2);
        assert_eq!(m.avg_cycle_duration(), Duration::from_secs(15));
        assert_eq!(m.by_phase["CHECK"].runs, 2);
        assert_eq!(m.by_phase["CHECK"].skipped, 1);

        let breakdown = m.phase_breakdown();
        assert_eq!(breakdown[0].0, "DO");
        let report = m.analytics_report();
        assert!(report.contains("DO: 9000 units"));
        assert!(!report.contains("rejected"));
    }

    #[test]
    fn test_reopened_fixes_reported() {
        let mut m = RunMetrics::new();
        let mut check = result(Phase::Check, 1_000, 1, PhaseStatus::Completed);
        check.counts.defects_reopened = 2;
        m.record_cycle(&cycle(1, 5, vec![check]));
        assert_eq!(m.defects_reopened, 2);
        assert!(m
            .analytics_report()
            .contains("Fixes rejected by verification: 2"));
    }
}
