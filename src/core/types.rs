// src/core/types.rs — Core domain types

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ledger::{DefectId, Severity};

/// A unit of the external design that defects, improvements and work items refer to.
///
/// Serialized as `frontend/<id>` or `backend/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Component {
    Frontend(String),
    Backend(String),
}

impl Component {
    pub fn identifier(&self) -> &str {
        match self {
            Component::Frontend(id) | Component::Backend(id) => id,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Frontend(id) => write!(f, "frontend/{}", id),
            Component::Backend(id) => write!(f, "backend/{}", id),
        }
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (side, id) = s
            .split_once('/')
            .ok_or_else(|| format!("component '{}' has no frontend/ or backend/ prefix", s))?;
        if id.is_empty() {
            return Err(format!("component '{}' has an empty identifier", s));
        }
        match side {
            "frontend" => Ok(Component::Frontend(id.to_string())),
            "backend" => Ok(Component::Backend(id.to_string())),
            other => Err(format!("unknown component side '{}'", other)),
        }
    }
}

impl TryFrom<String> for Component {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Component> for String {
    fn from(c: Component) -> Self {
        c.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    Page,
    Endpoint,
}

/// An atomic, independently costed piece of the flattened design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub kind: WorkKind,
    pub identifier: String,
    pub estimated_cost: u64,
}

impl WorkItem {
    pub fn page(identifier: impl Into<String>, estimated_cost: u64) -> Self {
        Self {
            kind: WorkKind::Page,
            identifier: identifier.into(),
            estimated_cost,
        }
    }

    pub fn endpoint(identifier: impl Into<String>, estimated_cost: u64) -> Self {
        Self {
            kind: WorkKind::Endpoint,
            identifier: identifier.into(),
            estimated_cost,
        }
    }

    pub fn component(&self) -> Component {
        match self.kind {
            WorkKind::Page => Component::Frontend(self.identifier.clone()),
            WorkKind::Endpoint => Component::Backend(self.identifier.clone()),
        }
    }
}

/// Why a unit of work is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkPurpose {
    Plan,
    Generate,
    Refine,
    Verify,
    ValidateIntegration,
    Resolve,
    Consolidate,
}

/// The payload handed to a unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRequest {
    pub purpose: WorkPurpose,
    pub cycle: u32,
    /// Component the work is about; `None` for cross-cutting work.
    pub target: Option<Component>,
    /// Open defects relevant to the request, most severe first.
    #[serde(default)]
    pub defects: Vec<DefectId>,
    /// Free-form structured context (design slice, consolidation summary, ...).
    #[serde(default)]
    pub context: serde_json::Value,
}

impl WorkRequest {
    pub fn new(purpose: WorkPurpose, cycle: u32) -> Self {
        Self {
            purpose,
            cycle,
            target: None,
            defects: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn with_target(mut self, target: Component) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_defects(mut self, defects: Vec<DefectId>) -> Self {
        self.defects = defects;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// Something a verification, validation or consolidation call reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub description: String,
    pub severity: Severity,
    #[serde(default = "default_category")]
    pub category: String,
    /// Defaults to the request target when absent.
    #[serde(default)]
    pub component: Option<Component>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_category() -> String {
    "general".into()
}

impl Finding {
    pub fn new(description: impl Into<String>, severity: Severity) -> Self {
        Self {
            description: description.into(),
            severity,
            category: default_category(),
            component: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn on(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }
}

/// Result of one successful unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOutput {
    pub content: String,
    /// Actual cost, used for accounting (the estimate only gates admission).
    pub measured_cost: u64,
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Whether the callee applied the requested change. A resolution that
    /// returns `false` leaves the defect open; a verification that returns
    /// `false` rejects the component's resolved fixes and reopens them.
    #[serde(default = "default_applied")]
    pub applied: bool,
}

fn default_applied() -> bool {
    true
}

impl WorkOutput {
    pub fn new(content: impl Into<String>, measured_cost: u64) -> Self {
        Self {
            content: content.into(),
            measured_cost,
            findings: Vec::new(),
            applied: true,
        }
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn not_applied(mut self) -> Self {
        self.applied = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Plan,
    Do,
    Check,
    IntegrationValidation,
    Act,
    Consolidate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Plan => "PLAN",
            Phase::Do => "DO",
            Phase::Check => "CHECK",
            Phase::IntegrationValidation => "INTEGRATION_VALIDATION",
            Phase::Act => "ACT",
            Phase::Consolidate => "CONSOLIDATE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed,
    Skipped { reason: String },
    Failed { error: String },
}

/// Phase-specific counters. Fields that do not apply to a phase stay zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseCounts {
    pub targets: usize,
    pub completed: usize,
    pub shed: usize,
    pub defects_found: usize,
    pub defects_resolved: usize,
    pub defects_verified: usize,
    #[serde(default)]
    pub defects_reopened: usize,
    pub improvements_applied: usize,
    pub improvements_proposed: usize,
    pub inconsistencies: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    #[serde(flatten)]
    pub status: PhaseStatus,
    pub units_consumed: u64,
    pub calls: u32,
    pub counts: PhaseCounts,
    /// Components the phase acted on, in the order it acted on them.
    #[serde(default)]
    pub components: Vec<Component>,
    pub duration: Duration,
}

impl PhaseResult {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, PhaseStatus::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, PhaseStatus::Skipped { .. })
    }
}

/// One completed (possibly partially) PDCA cycle. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub number: u32,
    pub phase_results: Vec<PhaseResult>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Error that halted the cycle, if any.
    #[serde(default)]
    pub failure: Option<String>,
}

impl Cycle {
    pub fn phase(&self, phase: Phase) -> Option<&PhaseResult> {
        self.phase_results.iter().find(|r| r.phase == phase)
    }

    pub fn units_consumed(&self) -> u64 {
        self.phase_results.iter().map(|r| r.units_consumed).sum()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Real-time events for progress rendering and state files.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    CycleStart {
        cycle: u32,
        max_cycles: u32,
        remaining_budget: u64,
    },
    PhaseEnd {
        cycle: u32,
        result: PhaseResult,
    },
    BudgetLow {
        cycle: u32,
        remaining: u64,
        floor: u64,
    },
    CycleEnd {
        cycle: u32,
        open_defects: usize,
        units_consumed: u64,
        failed: bool,
    },
    Terminal {
        reason: String,
        cycles: u32,
    },
}
