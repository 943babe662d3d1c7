// src/core/controller.rs — PDCA cycle controller
//
// PLAN -> DO -> CHECK -> [INTEGRATION_VALIDATION] -> ACT -> CONSOLIDATE,
// repeated until the cycle budget, the defect list or the daily budget runs
// out. DO and CHECK fan work out to a small pool of concurrent workers that
// share one budget guard; every other phase is a single sequential step.
// A failed phase ends its cycle. The cycle is still recorded with whatever
// the phases managed before the failure.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;

use super::invoker::RetryingInvoker;
use super::ledger::{DefectId, DefectStatus, Ledger, NewDefect, NewImprovement, Severity};
use super::metrics::RunMetrics;
use super::state::RunState;
use super::types::{
    Component, Cycle, Finding, Phase, PhaseCounts, PhaseResult, PhaseStatus, ProgressEvent,
    WorkItem, WorkOutput, WorkPurpose, WorkRequest,
};
use crate::infra::config::CycleConfig;
use crate::infra::errors::KaizenError;
use crate::worker::UnitOfWork;

/// Decisions the controller defers to whoever drives the run.
pub trait RunDriver {
    /// No open defects remain after `cycle`. Return `true` to keep refining.
    fn continue_without_defects(&mut self, cycle: u32) -> bool;

    /// `cycle` failed with `error`. Return `true` to attempt the next cycle.
    fn continue_after_failure(&mut self, cycle: u32, error: &KaizenError) -> bool;
}

/// Non-interactive driver with fixed answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDriver {
    pub continue_when_clean: bool,
    pub continue_after_failure: bool,
}

impl RunDriver for FixedDriver {
    fn continue_without_defects(&mut self, _cycle: u32) -> bool {
        self.continue_when_clean
    }

    fn continue_after_failure(&mut self, _cycle: u32, _error: &KaizenError) -> bool {
        self.continue_after_failure
    }
}

/// Why `run` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    CyclesExhausted,
    NoOpenDefects,
    BudgetExhausted(String),
    Cancelled,
    Halted(String),
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::CyclesExhausted => write!(f, "cycle limit reached"),
            TerminalReason::NoOpenDefects => write!(f, "no open defects"),
            TerminalReason::BudgetExhausted(e) => write!(f, "budget exhausted: {}", e),
            TerminalReason::Cancelled => write!(f, "cancelled"),
            TerminalReason::Halted(e) => write!(f, "halted after failure: {}", e),
        }
    }
}

// ─── Phase bookkeeping ──────────────────────────────────────────

struct PhaseRun {
    phase: Phase,
    started: Instant,
    units: u64,
    calls: u32,
    counts: PhaseCounts,
    components: Vec<Component>,
}

impl PhaseRun {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            started: Instant::now(),
            units: 0,
            calls: 0,
            counts: PhaseCounts::default(),
            components: Vec::new(),
        }
    }

    fn charge(&mut self, output: &WorkOutput) {
        self.units += output.measured_cost;
        self.calls += 1;
    }

    fn finish(self, status: PhaseStatus) -> PhaseResult {
        PhaseResult {
            phase: self.phase,
            status,
            units_consumed: self.units,
            calls: self.calls,
            counts: self.counts,
            components: self.components,
            duration: self.started.elapsed(),
        }
    }
}

fn skipped(reason: impl Into<String>) -> PhaseStatus {
    PhaseStatus::Skipped {
        reason: reason.into(),
    }
}

/// Per-cycle scratch state handed from phase to phase.
#[derive(Default)]
struct CycleWork {
    targets: Vec<WorkItem>,
    changed: Vec<Component>,
    verified: HashSet<Component>,
    shed: usize,
}

impl CycleWork {
    fn mark_changed(&mut self, component: Component) {
        if !self.changed.contains(&component) {
            self.changed.push(component);
        }
    }

    fn unverified(&self) -> impl Iterator<Item = &Component> {
        self.changed.iter().filter(|c| !self.verified.contains(*c))
    }
}

// ─── Worker pool ────────────────────────────────────────────────

struct Job {
    index: usize,
    component: Component,
    request: WorkRequest,
    estimate: u64,
}

enum JobOutcome {
    Done { worker: usize, output: WorkOutput },
    /// Never started: budget floor, budget exceeded or phase halted.
    Shed,
    Failed(KaizenError),
}

/// Round-robin pool over one shared budget guard. A lane stops taking jobs
/// once the budget drops below its floor, once the budget refuses a job, or
/// once any lane fails. Started jobs always run to completion.
struct Pool<'a> {
    invoker: &'a RetryingInvoker,
    work: &'a dyn UnitOfWork,
    floor_multiplier: Option<f64>,
    min_cost: AtomicU64,
    halt: AtomicBool,
}

impl<'a> Pool<'a> {
    fn new(
        invoker: &'a RetryingInvoker,
        work: &'a dyn UnitOfWork,
        floor_multiplier: Option<f64>,
        min_estimate: u64,
    ) -> Self {
        Self {
            invoker,
            work,
            floor_multiplier,
            min_cost: AtomicU64::new(min_estimate),
            halt: AtomicBool::new(false),
        }
    }

    fn floor(&self) -> u64 {
        match self.floor_multiplier {
            Some(m) => (m * self.min_cost.load(Ordering::SeqCst) as f64).ceil() as u64,
            None => 0,
        }
    }

    async fn run(&self, jobs: Vec<Job>, workers: usize) -> Vec<(Job, JobOutcome)> {
        let workers = workers.max(1);
        let mut lanes: Vec<Vec<Job>> = (0..workers).map(|_| Vec::new()).collect();
        for job in jobs {
            lanes[job.index % workers].push(job);
        }
        let mut outcomes: Vec<(Job, JobOutcome)> = join_all(
            lanes
                .into_iter()
                .enumerate()
                .map(|(worker, lane)| self.run_lane(worker, lane)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();
        outcomes.sort_by_key(|(job, _)| job.index);
        outcomes
    }

    async fn run_lane(&self, worker: usize, lane: Vec<Job>) -> Vec<(Job, JobOutcome)> {
        let mut out = Vec::with_capacity(lane.len());
        let mut stopped = false;
        for job in lane {
            if stopped || self.halt.load(Ordering::SeqCst) {
                out.push((job, JobOutcome::Shed));
                continue;
            }
            if self.floor_multiplier.is_some() {
                let floor = self.floor();
                let remaining = self.invoker.guard().remaining_daily();
                if remaining < floor {
                    tracing::info!(
                        worker = worker + 1,
                        remaining,
                        floor,
                        component = %job.component,
                        "Budget below floor, shedding remaining items"
                    );
                    stopped = true;
                    out.push((job, JobOutcome::Shed));
                    continue;
                }
            }

            let result = self
                .invoker
                .invoke(
                    self.work,
                    &job.request,
                    job.estimate,
                    self.invoker.max_retries(),
                )
                .await;
            match result {
                Ok(output) => {
                    self.min_cost.fetch_min(output.measured_cost, Ordering::SeqCst);
                    out.push((job, JobOutcome::Done { worker, output }));
                }
                Err(e) if e.is_budget_exceeded() => {
                    tracing::warn!(
                        worker = worker + 1,
                        component = %job.component,
                        "Shedding item: {}",
                        e
                    );
                    stopped = true;
                    out.push((job, JobOutcome::Shed));
                }
                Err(e) => {
                    tracing::error!(worker = worker + 1, component = %job.component, "Work failed: {}", e);
                    self.halt.store(true, Ordering::SeqCst);
                    stopped = true;
                    out.push((job, JobOutcome::Failed(e)));
                }
            }
        }
        out
    }
}

// ─── Controller ─────────────────────────────────────────────────

pub struct CycleController {
    config: CycleConfig,
    items: Vec<WorkItem>,
    design_components: HashSet<Component>,
    ledger: Ledger,
    invoker: RetryingInvoker,
    work: Arc<dyn UnitOfWork>,
    cycles: Vec<Cycle>,
    metrics: RunMetrics,
    /// Components changed since the last CHECK that looked at them.
    pending_verification: BTreeSet<Component>,
    generated: HashSet<Component>,
    on_progress: Option<Box<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl CycleController {
    pub fn new(
        items: Vec<WorkItem>,
        config: CycleConfig,
        invoker: RetryingInvoker,
        work: Arc<dyn UnitOfWork>,
    ) -> Self {
        let design_components = items.iter().map(WorkItem::component).collect();
        Self {
            config,
            items,
            design_components,
            ledger: Ledger::new(),
            invoker,
            work,
            cycles: Vec::new(),
            metrics: RunMetrics::new(),
            pending_verification: BTreeSet::new(),
            generated: HashSet::new(),
            on_progress: None,
        }
    }

    /// Start from an existing ledger instead of an empty one.
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Set a callback for real-time progress events.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    pub fn pending_verification(&self) -> &BTreeSet<Component> {
        &self.pending_verification
    }

    /// Snapshot of everything worth persisting.
    pub fn state(&self) -> RunState {
        let mut state = RunState::new(
            self.ledger.snapshot(),
            self.cycles.clone(),
            self.metrics.clone(),
        );
        state.budget = Some(self.invoker.guard().statistics());
        state
    }

    fn remaining(&self) -> u64 {
        self.invoker.guard().remaining_daily()
    }

    async fn invoke(
        &self,
        request: &WorkRequest,
        estimate: u64,
    ) -> Result<WorkOutput, KaizenError> {
        self.invoker
            .invoke(
                self.work.as_ref(),
                request,
                estimate,
                self.invoker.max_retries(),
            )
            .await
    }

    // ─── Run loop ───────────────────────────────────────────────

    /// Run cycles until a terminal condition is reached.
    pub async fn run(&mut self, driver: &mut dyn RunDriver) -> TerminalReason {
        let max_cycles = self.config.cycles;
        let reason = loop {
            let number = self.cycles.len() as u32 + 1;
            if number > max_cycles {
                break TerminalReason::CyclesExhausted;
            }
            match self.run_cycle().await {
                Ok(()) => {
                    if number < max_cycles
                        && self.ledger.open_defects(None).is_empty()
                        && !driver.continue_without_defects(number)
                    {
                        break TerminalReason::NoOpenDefects;
                    }
                }
                Err(KaizenError::Cancelled) => break TerminalReason::Cancelled,
                Err(e) if e.is_budget_exceeded() => {
                    break TerminalReason::BudgetExhausted(e.to_string());
                }
                Err(e) => {
                    if number >= max_cycles || !driver.continue_after_failure(number, &e) {
                        break TerminalReason::Halted(e.to_string());
                    }
                    tracing::warn!(cycle = number, "Continuing after failed cycle: {}", e);
                }
            }
        };

        tracing::info!(cycles = self.cycles.len(), reason = %reason, "Run finished");
        self.emit(ProgressEvent::Terminal {
            reason: reason.to_string(),
            cycles: self.cycles.len() as u32,
        });
        reason
    }

    /// Run one full cycle. The cycle is recorded even when a phase fails;
    /// the failure is returned afterwards.
    pub async fn run_cycle(&mut self) -> Result<(), KaizenError> {
        let number = self.cycles.len() as u32 + 1;
        let started_at = Utc::now();
        let start = Instant::now();
        self.emit(ProgressEvent::CycleStart {
            cycle: number,
            max_cycles: self.config.cycles,
            remaining_budget: self.remaining(),
        });
        tracing::info!(cycle = number, remaining = self.remaining(), "Cycle started");

        let mut cw = CycleWork::default();
        let mut results = Vec::new();
        let outcome = self.run_phases(number, &mut cw, &mut results).await;

        let carried: Vec<Component> = cw.unverified().cloned().collect();
        self.pending_verification.extend(carried);

        let cycle = Cycle {
            number,
            phase_results: results,
            started_at,
            duration: start.elapsed(),
            failure: outcome.as_ref().err().map(|e| e.to_string()),
        };
        self.metrics.record_cycle(&cycle);
        self.emit(ProgressEvent::CycleEnd {
            cycle: number,
            open_defects: self.ledger.open_defects(None).len(),
            units_consumed: cycle.units_consumed(),
            failed: cycle.is_failed(),
        });
        self.cycles.push(cycle);
        outcome
    }

    async fn run_phases(
        &mut self,
        number: u32,
        cw: &mut CycleWork,
        results: &mut Vec<PhaseResult>,
    ) -> Result<(), KaizenError> {
        if self.invoker.cancel_token().is_cancelled() {
            return Err(KaizenError::Cancelled);
        }

        let mut run = PhaseRun::new(Phase::Plan);
        let status = self.plan_phase(number, cw, &mut run).await;
        self.finish_phase(number, run, status, results)?;

        let mut run = PhaseRun::new(Phase::Do);
        let status = self.do_phase(number, cw, &mut run).await;
        self.finish_phase(number, run, status, results)?;

        let mut run = PhaseRun::new(Phase::Check);
        let status = self.check_phase(number, cw, &mut run).await;
        self.finish_phase(number, run, status, results)?;

        if number == 1 {
            let mut run = PhaseRun::new(Phase::IntegrationValidation);
            let status = self.integration_phase(number, &mut run).await;
            self.finish_phase(number, run, status, results)?;
        }

        let mut run = PhaseRun::new(Phase::Act);
        let status = self.act_phase(number, &mut run).await;
        self.finish_phase(number, run, status, results)?;

        if number <= self.config.consolidate_through_cycle {
            let mut run = PhaseRun::new(Phase::Consolidate);
            let status = self.consolidate_phase(number, cw, &mut run).await;
            self.finish_phase(number, run, status, results)?;
        }
        Ok(())
    }

    fn finish_phase(
        &self,
        number: u32,
        run: PhaseRun,
        status: Result<PhaseStatus, KaizenError>,
        results: &mut Vec<PhaseResult>,
    ) -> Result<(), KaizenError> {
        let (result, error) = match status {
            Ok(status) => (run.finish(status), None),
            Err(e) => {
                tracing::error!(cycle = number, phase = %run.phase, "Phase failed: {}", e);
                let error = e.to_string();
                (run.finish(PhaseStatus::Failed { error }), Some(e))
            }
        };
        tracing::info!(
            cycle = number,
            phase = %result.phase,
            units = result.units_consumed,
            calls = result.calls,
            status = ?result.status,
            "Phase finished"
        );
        self.emit(ProgressEvent::PhaseEnd {
            cycle: number,
            result: result.clone(),
        });
        results.push(result);
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ─── PLAN ───────────────────────────────────────────────────

    async fn plan_phase(
        &mut self,
        number: u32,
        cw: &mut CycleWork,
        run: &mut PhaseRun,
    ) -> Result<PhaseStatus, KaizenError> {
        let targets: Vec<WorkItem> = if number == 1 {
            self.items.clone()
        } else {
            let needs = self.ledger.components_needing_refinement();
            self.items
                .iter()
                .filter(|item| needs.contains(&item.component()))
                .cloned()
                .collect()
        };
        run.counts.targets = targets.len();
        run.components = targets.iter().map(WorkItem::component).collect();

        if targets.is_empty() {
            tracing::info!(cycle = number, "No components need work");
            return Ok(PhaseStatus::Completed);
        }

        let stats = self.ledger.statistics();
        let request = WorkRequest::new(WorkPurpose::Plan, number).with_context(json!({
            "targets": run.components.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            "open_defects": stats.open_defects,
            "pending_improvements": stats.pending_improvements,
        }));
        let output = self.invoke(&request, self.config.plan_cost).await?;
        run.charge(&output);
        cw.targets = targets;
        Ok(PhaseStatus::Completed)
    }

    // ─── DO ─────────────────────────────────────────────────────

    async fn do_phase(
        &mut self,
        number: u32,
        cw: &mut CycleWork,
        run: &mut PhaseRun,
    ) -> Result<PhaseStatus, KaizenError> {
        if cw.targets.is_empty() {
            return Ok(skipped("no targets"));
        }

        let mut targets = cw.targets.clone();
        // Highest open severity first, improvement-only targets last, design
        // order within a rank (the sort is stable).
        targets.sort_by_key(|item| {
            let top: Option<Severity> = self
                .ledger
                .open_defects(Some(&item.component()))
                .first()
                .map(|d| d.severity);
            (top.is_none(), top)
        });
        run.counts.targets = targets.len();

        let jobs: Vec<Job> = targets
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let component = item.component();
                let purpose = if self.generated.contains(&component) {
                    WorkPurpose::Refine
                } else {
                    WorkPurpose::Generate
                };
                let defects: Vec<DefectId> = self
                    .ledger
                    .open_defects(Some(&component))
                    .iter()
                    .map(|d| d.id)
                    .collect();
                let improvements: Vec<&str> = self
                    .ledger
                    .pending_improvements()
                    .into_iter()
                    .filter(|i| i.component == component)
                    .map(|i| i.description.as_str())
                    .collect();
                let request = WorkRequest::new(purpose, number)
                    .with_target(component.clone())
                    .with_defects(defects)
                    .with_context(json!({
                        "estimated_cost": item.estimated_cost,
                        "improvements": improvements,
                    }));
                Job {
                    index,
                    component,
                    request,
                    estimate: item.estimated_cost,
                }
            })
            .collect();

        let min_estimate = targets.iter().map(|i| i.estimated_cost).min().unwrap_or(0);
        let (outcomes, floor) = {
            let pool = Pool::new(
                &self.invoker,
                self.work.as_ref(),
                Some(self.config.floor_multiplier),
                min_estimate,
            );
            let outcomes = pool.run(jobs, self.config.workers).await;
            (outcomes, pool.floor())
        };

        let mut first_error = None;
        for (job, outcome) in outcomes {
            match outcome {
                JobOutcome::Done { output, .. } => {
                    run.charge(&output);
                    run.counts.completed += 1;
                    run.counts.improvements_applied +=
                        self.ledger.apply_improvements_for(&job.component);
                    self.generated.insert(job.component.clone());
                    run.components.push(job.component.clone());
                    cw.mark_changed(job.component);
                }
                JobOutcome::Shed => run.counts.shed += 1,
                JobOutcome::Failed(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        cw.shed += run.counts.shed;

        if let Some(e) = first_error {
            return Err(e);
        }
        if run.counts.shed > 0 {
            let remaining = self.remaining();
            tracing::warn!(cycle = number, shed = run.counts.shed, remaining, floor, "DO shed items for budget");
            self.emit(ProgressEvent::BudgetLow {
                cycle: number,
                remaining,
                floor,
            });
        }
        if run.counts.completed == 0 {
            return Err(KaizenError::BudgetExceeded {
                remaining: self.remaining(),
                needed: min_estimate,
            });
        }
        Ok(PhaseStatus::Completed)
    }

    // ─── CHECK ──────────────────────────────────────────────────

    async fn check_phase(
        &mut self,
        number: u32,
        cw: &mut CycleWork,
        run: &mut PhaseRun,
    ) -> Result<PhaseStatus, KaizenError> {
        for component in std::mem::take(&mut self.pending_verification) {
            cw.mark_changed(component);
        }
        if cw.changed.is_empty() {
            self.ledger.record_waste(
                "redundant_verification",
                format!("Cycle {}: no components changed since the last check", number),
                Phase::Check.to_string(),
                Some(format!("{} units", self.config.verify_cost)),
            );
            return Ok(skipped("no components changed"));
        }

        let remaining = self.remaining();
        if remaining < self.config.verification_floor {
            return Err(KaizenError::BudgetExceeded {
                remaining,
                needed: self.config.verification_floor,
            });
        }

        run.counts.targets = cw.changed.len();
        let jobs: Vec<Job> = cw
            .changed
            .iter()
            .enumerate()
            .map(|(index, component)| {
                let resolved: Vec<DefectId> = self
                    .ledger
                    .defects_with_status(DefectStatus::Resolved)
                    .into_iter()
                    .filter(|d| &d.component == component)
                    .map(|d| d.id)
                    .collect();
                Job {
                    index,
                    component: component.clone(),
                    request: WorkRequest::new(WorkPurpose::Verify, number)
                        .with_target(component.clone())
                        .with_defects(resolved),
                    estimate: self.config.verify_cost,
                }
            })
            .collect();

        let outcomes = {
            let pool = Pool::new(&self.invoker, self.work.as_ref(), None, self.config.verify_cost);
            pool.run(jobs, self.config.check_workers).await
        };

        let mut first_error = None;
        for (job, outcome) in outcomes {
            match outcome {
                JobOutcome::Done { worker, output } => {
                    run.charge(&output);
                    run.counts.completed += 1;
                    let reporter = format!("verifier-{}", worker + 1);
                    self.apply_verification(number, &job.component, output, &reporter, run)?;
                    cw.verified.insert(job.component.clone());
                    run.components.push(job.component);
                }
                JobOutcome::Shed => run.counts.shed += 1,
                JobOutcome::Failed(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        cw.shed += run.counts.shed;

        if let Some(e) = first_error {
            return Err(e);
        }
        if run.counts.completed == 0 {
            return Err(KaizenError::BudgetExceeded {
                remaining: self.remaining(),
                needed: self.config.verify_cost,
            });
        }
        Ok(PhaseStatus::Completed)
    }

    /// Turn one verification result into ledger changes: findings become
    /// defects, RESOLVED defects whose category did not come back become
    /// VERIFIED. A verifier that reports `applied == false` rejects those
    /// fixes instead and they go back to OPEN.
    fn apply_verification(
        &mut self,
        number: u32,
        component: &Component,
        output: WorkOutput,
        reporter: &str,
        run: &mut PhaseRun,
    ) -> Result<(), KaizenError> {
        let mut redetected = HashSet::new();
        for finding in output.findings {
            let target = finding.component.clone().unwrap_or_else(|| component.clone());
            if &target == component {
                redetected.insert(finding.category.clone());
            }
            self.record_finding(number, finding, target, reporter);
            run.counts.defects_found += 1;
        }

        let settled: Vec<DefectId> = self
            .ledger
            .defects_with_status(DefectStatus::Resolved)
            .into_iter()
            .filter(|d| &d.component == component && !redetected.contains(&d.category))
            .map(|d| d.id)
            .collect();
        for id in settled {
            if output.applied {
                let note = format!("confirmed by verification in cycle {}", number);
                self.ledger
                    .update_status(id, DefectStatus::Verified, reporter, Some(&note))?;
                run.counts.defects_verified += 1;
            } else {
                let note = format!("fix rejected by verification in cycle {}", number);
                tracing::info!(defect = id.0, component = %component, "Verification rejected fix");
                self.ledger
                    .update_status(id, DefectStatus::Open, reporter, Some(&note))?;
                run.counts.defects_reopened += 1;
            }
        }
        Ok(())
    }

    /// Add a defect for `finding`, linking it to the latest fixed defect of
    /// the same category on the same component when there is one.
    fn record_finding(
        &mut self,
        number: u32,
        finding: Finding,
        component: Component,
        reporter: &str,
    ) -> DefectId {
        let previous = self
            .ledger
            .defects()
            .iter()
            .filter(|d| {
                d.component == component
                    && d.category == finding.category
                    && matches!(d.status, DefectStatus::Resolved | DefectStatus::Verified)
            })
            .map(|d| d.id)
            .max();

        let mut new = NewDefect::new(finding.description, component, finding.severity, reporter)
            .category(finding.category)
            .meta("cycle", json!(number));
        for (k, v) in finding.metadata {
            new.metadata.entry(k).or_insert(v);
        }
        if let Some(prev) = previous {
            tracing::info!(previous = prev.0, "Recurring defect detected");
            new = new.meta("recurrence_of", json!(prev.0));
        }
        self.ledger.add_defect(new)
    }

    // ─── INTEGRATION_VALIDATION ─────────────────────────────────

    async fn integration_phase(
        &mut self,
        number: u32,
        run: &mut PhaseRun,
    ) -> Result<PhaseStatus, KaizenError> {
        let components: Vec<String> = self
            .items
            .iter()
            .map(|i| i.component().to_string())
            .collect();
        run.counts.targets = components.len();
        let request = WorkRequest::new(WorkPurpose::ValidateIntegration, number)
            .with_context(json!({ "components": components }));
        let output = self.invoke(&request, self.config.integration_cost).await?;
        run.charge(&output);

        if output.findings.iter().any(|f| f.component.is_none()) {
            return Err(KaizenError::UnattributedFinding {
                phase: Phase::IntegrationValidation.to_string(),
            });
        }
        for finding in output.findings {
            if let Some(component) = finding.component.clone() {
                self.record_finding(number, finding, component, "integration-validator");
                run.counts.defects_found += 1;
            }
        }
        Ok(PhaseStatus::Completed)
    }

    // ─── ACT ────────────────────────────────────────────────────

    async fn act_phase(&mut self, number: u32, run: &mut PhaseRun) -> Result<PhaseStatus, KaizenError> {
        let open: Vec<(DefectId, Component, Severity, String, String)> = self
            .ledger
            .open_defects(None)
            .into_iter()
            .filter(|d| d.status == DefectStatus::Open)
            .map(|d| {
                (
                    d.id,
                    d.component.clone(),
                    d.severity,
                    d.category.clone(),
                    d.description.clone(),
                )
            })
            .collect();
        if open.is_empty() {
            return Ok(skipped("no open defects"));
        }

        let remaining = self.remaining();
        let affordable = remaining / self.config.resolution_cost.max(1);
        let cap = self
            .config
            .act_slots
            .min(usize::try_from(affordable).unwrap_or(usize::MAX));
        run.counts.targets = cap.min(open.len());
        if cap == 0 {
            tracing::warn!(cycle = number, remaining, "No budget for resolutions");
            return Ok(skipped(format!(
                "budget too low for resolution ({} remaining)",
                remaining
            )));
        }

        let selected = &open[..run.counts.targets];
        for (attempted, (id, component, severity, category, description)) in
            selected.iter().enumerate()
        {
            self.ledger
                .update_status(*id, DefectStatus::InProgress, "act", None)?;
            let request = WorkRequest::new(WorkPurpose::Resolve, number)
                .with_target(component.clone())
                .with_defects(vec![*id])
                .with_context(json!({
                    "description": description,
                    "severity": severity,
                    "category": category,
                }));

            match self.invoke(&request, self.config.resolution_cost).await {
                Ok(output) => {
                    run.charge(&output);
                    if output.applied {
                        let note = format!("resolved in cycle {}", number);
                        self.ledger
                            .update_status(*id, DefectStatus::Resolved, "act", Some(&note))?;
                        run.counts.defects_resolved += 1;
                        run.components.push(component.clone());
                        self.pending_verification.insert(component.clone());
                    } else {
                        self.ledger.update_status(
                            *id,
                            DefectStatus::Open,
                            "act",
                            Some("fix not applied"),
                        )?;
                    }
                }
                Err(e) => {
                    self.ledger.update_status(
                        *id,
                        DefectStatus::Open,
                        "act",
                        Some("claim released after error"),
                    )?;
                    if e.is_budget_exceeded() && attempted > 0 {
                        run.counts.shed = selected.len() - attempted;
                        tracing::warn!(cycle = number, shed = run.counts.shed, "ACT shed resolutions: {}", e);
                        break;
                    }
                    return Err(e);
                }
            }
        }
        Ok(PhaseStatus::Completed)
    }

    // ─── CONSOLIDATE ────────────────────────────────────────────

    async fn consolidate_phase(
        &mut self,
        number: u32,
        cw: &CycleWork,
        run: &mut PhaseRun,
    ) -> Result<PhaseStatus, KaizenError> {
        let unverified: Vec<String> = cw.unverified().map(|c| c.to_string()).collect();
        let open = self.ledger.open_defects(None);
        let blocking: usize = Severity::ALL
            .iter()
            .filter(|s| s.is_blocking())
            .map(|s| self.ledger.open_defects_with_severity(None, *s).len())
            .sum();
        let outside: Vec<String> = open
            .iter()
            .filter(|d| !self.design_components.contains(&d.component))
            .map(|d| d.component.to_string())
            .collect();
        run.counts.inconsistencies = cw.shed + unverified.len() + blocking + outside.len();

        let remaining = self.remaining();
        if remaining < self.config.consolidation_cost {
            return Ok(skipped(format!(
                "budget too low for consolidation ({} remaining)",
                remaining
            )));
        }

        let stats = self.ledger.statistics();
        let request = WorkRequest::new(WorkPurpose::Consolidate, number).with_context(json!({
            "shed_items": cw.shed,
            "unverified_components": unverified,
            "open_blocking_defects": blocking,
            "components_outside_design": outside,
            "open_defects": stats.open_defects,
            "resolution_rate": stats.resolution_rate,
        }));
        let output = self.invoke(&request, self.config.consolidation_cost).await?;
        run.charge(&output);

        if output.findings.iter().any(|f| f.component.is_none()) {
            return Err(KaizenError::UnattributedFinding {
                phase: Phase::Consolidate.to_string(),
            });
        }
        for finding in output.findings {
            if let Some(component) = finding.component {
                run.components.push(component.clone());
                self.ledger.add_improvement(
                    NewImprovement::new(
                        finding.description,
                        component,
                        "consolidator",
                        finding.severity.into(),
                    )
                    .meta("cycle", json!(number))
                    .with_metadata(finding.metadata),
                );
                run.counts.improvements_proposed += 1;
            }
        }
        Ok(PhaseStatus::Completed)
    }
}
