// src/core/ledger.rs — Defect and improvement ledger
//
// Append-only registry of findings. Defects move through
// OPEN -> IN_PROGRESS -> RESOLVED -> VERIFIED; every other mutation is
// rejected. `open_defects()` ordering (severity, then creation order) is the
// only prioritization rule the controller uses.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::Component;
use crate::infra::errors::KaizenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefectId(pub u64);

impl fmt::Display for DefectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImprovementId(pub u64);

impl fmt::Display for ImprovementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declaration order is priority order: `Critical < High < ... < Minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[serde(alias = "critical")]
    Critical,
    #[serde(alias = "high")]
    High,
    #[serde(alias = "medium")]
    Medium,
    #[serde(alias = "low")]
    Low,
    #[serde(alias = "minor")]
    Minor,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Minor,
    ];

    /// CRITICAL and HIGH defects block acceptance of a component.
    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Minor => "MINOR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefectStatus {
    Open,
    InProgress,
    Resolved,
    Verified,
}

impl DefectStatus {
    pub fn can_transition_to(self, next: DefectStatus) -> bool {
        use DefectStatus::*;
        matches!(
            (self, next),
            (Open, InProgress)
                | (InProgress, Resolved)
                | (InProgress, Open)
                | (Resolved, Verified)
                | (Resolved, Open)
                | (Verified, Open)
        )
    }

    /// OPEN and IN_PROGRESS defects still need attention.
    pub fn is_open(self) -> bool {
        matches!(self, DefectStatus::Open | DefectStatus::InProgress)
    }
}

impl fmt::Display for DefectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DefectStatus::Open => "OPEN",
            DefectStatus::InProgress => "IN_PROGRESS",
            DefectStatus::Resolved => "RESOLVED",
            DefectStatus::Verified => "VERIFIED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusNote {
    pub note: String,
    pub actor: String,
    pub status: DefectStatus,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    pub id: DefectId,
    pub description: String,
    pub component: Component,
    pub severity: Severity,
    pub status: DefectStatus,
    pub reporter: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub notes: Vec<StatusNote>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Arguments for [`Ledger::add_defect`].
#[derive(Debug, Clone)]
pub struct NewDefect {
    pub description: String,
    pub component: Component,
    pub severity: Severity,
    pub reporter: String,
    pub category: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NewDefect {
    pub fn new(
        description: impl Into<String>,
        component: Component,
        severity: Severity,
        reporter: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            component,
            severity,
            reporter: reporter.into(),
            category: "general".into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImprovementPriority {
    High,
    Medium,
    Low,
}

impl From<Severity> for ImprovementPriority {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Critical | Severity::High => ImprovementPriority::High,
            Severity::Medium => ImprovementPriority::Medium,
            Severity::Low | Severity::Minor => ImprovementPriority::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImprovementStatus {
    Pending,
    Applied,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub id: ImprovementId,
    pub description: String,
    pub component: Component,
    pub proposed_by: String,
    pub priority: ImprovementPriority,
    pub status: ImprovementStatus,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Arguments for [`Ledger::add_improvement`].
#[derive(Debug, Clone)]
pub struct NewImprovement {
    pub description: String,
    pub component: Component,
    pub proposed_by: String,
    pub priority: ImprovementPriority,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NewImprovement {
    pub fn new(
        description: impl Into<String>,
        component: Component,
        proposed_by: impl Into<String>,
        priority: ImprovementPriority,
    ) -> Self {
        Self {
            description: description.into(),
            component,
            proposed_by: proposed_by.into(),
            priority,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Merge `metadata` in; keys already set win.
    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        for (k, v) in metadata {
            self.metadata.entry(k).or_insert(v);
        }
        self
    }
}

/// Work the controller deliberately avoided doing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasteRecord {
    pub id: u64,
    pub waste_type: String,
    pub description: String,
    pub eliminated_by: String,
    pub savings: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStatistics {
    pub total_defects: usize,
    /// OPEN plus IN_PROGRESS.
    pub open_defects: usize,
    pub in_progress_defects: usize,
    pub resolved_defects: usize,
    pub verified_defects: usize,
    pub resolution_rate: f64,
    pub severity_breakdown: BTreeMap<Severity, usize>,
    pub total_improvements: usize,
    pub pending_improvements: usize,
    pub total_waste_eliminations: usize,
}

/// Serializable image of a ledger, including its id counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub defects: Vec<Defect>,
    pub improvements: Vec<Improvement>,
    #[serde(default)]
    pub waste_eliminations: Vec<WasteRecord>,
    pub next_defect_id: u64,
    pub next_improvement_id: u64,
    #[serde(default)]
    pub next_waste_id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    defects: Vec<Defect>,
    improvements: Vec<Improvement>,
    waste: Vec<WasteRecord>,
    next_defect_id: u64,
    next_improvement_id: u64,
    next_waste_id: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Defects ────────────────────────────────────────────────

    pub fn add_defect(&mut self, new: NewDefect) -> DefectId {
        self.next_defect_id += 1;
        let id = DefectId(self.next_defect_id);
        tracing::debug!(
            id = id.0,
            component = %new.component,
            severity = %new.severity,
            reporter = %new.reporter,
            "Defect recorded"
        );
        self.defects.push(Defect {
            id,
            description: new.description,
            component: new.component,
            severity: new.severity,
            status: DefectStatus::Open,
            reporter: new.reporter,
            category: new.category,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            notes: Vec::new(),
            metadata: new.metadata,
        });
        id
    }

    pub fn defect(&self, id: DefectId) -> Option<&Defect> {
        self.defects.iter().find(|d| d.id == id)
    }

    pub fn defects(&self) -> &[Defect] {
        &self.defects
    }

    /// Move a defect along its lifecycle. Illegal moves are rejected, never coerced.
    pub fn update_status(
        &mut self,
        id: DefectId,
        new_status: DefectStatus,
        actor: &str,
        note: Option<&str>,
    ) -> Result<(), KaizenError> {
        let defect = self
            .defects
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(KaizenError::UnknownDefect(id))?;

        if !defect.status.can_transition_to(new_status) {
            return Err(KaizenError::InvalidTransition {
                id,
                from: defect.status,
                to: new_status,
            });
        }

        let now = Utc::now();
        match new_status {
            DefectStatus::Resolved => {
                defect.resolved_at = Some(now);
                defect.resolved_by = Some(actor.to_string());
            }
            DefectStatus::Open => {
                defect.resolved_at = None;
                defect.resolved_by = None;
            }
            DefectStatus::InProgress | DefectStatus::Verified => {}
        }
        if let Some(note) = note {
            defect.notes.push(StatusNote {
                note: note.to_string(),
                actor: actor.to_string(),
                status: new_status,
                added_at: now,
            });
        }
        tracing::debug!(id = id.0, from = %defect.status, to = %new_status, actor, "Defect status changed");
        defect.status = new_status;
        Ok(())
    }

    /// OPEN and IN_PROGRESS defects, most severe first, then oldest first.
    pub fn open_defects(&self, component: Option<&Component>) -> Vec<&Defect> {
        let mut open: Vec<&Defect> = self
            .defects
            .iter()
            .filter(|d| d.status.is_open())
            .filter(|d| component.map_or(true, |c| &d.component == c))
            .collect();
        open.sort_by_key(|d| (d.severity, d.id));
        open
    }

    /// Like [`Ledger::open_defects`], restricted to one severity.
    pub fn open_defects_with_severity(
        &self,
        component: Option<&Component>,
        severity: Severity,
    ) -> Vec<&Defect> {
        let mut open = self.open_defects(component);
        open.retain(|d| d.severity == severity);
        open
    }

    pub fn defects_with_status(&self, status: DefectStatus) -> Vec<&Defect> {
        self.defects.iter().filter(|d| d.status == status).collect()
    }

    // ─── Improvements ───────────────────────────────────────────

    pub fn add_improvement(&mut self, new: NewImprovement) -> ImprovementId {
        self.next_improvement_id += 1;
        let id = ImprovementId(self.next_improvement_id);
        self.improvements.push(Improvement {
            id,
            description: new.description,
            component: new.component,
            proposed_by: new.proposed_by,
            priority: new.priority,
            status: ImprovementStatus::Pending,
            created_at: Utc::now(),
            applied_at: None,
            metadata: new.metadata,
        });
        id
    }

    pub fn improvements(&self) -> &[Improvement] {
        &self.improvements
    }

    pub fn pending_improvements(&self) -> Vec<&Improvement> {
        let mut pending: Vec<&Improvement> = self
            .improvements
            .iter()
            .filter(|i| i.status == ImprovementStatus::Pending)
            .collect();
        pending.sort_by_key(|i| (i.priority, i.id));
        pending
    }

    pub fn mark_improvement_applied(&mut self, id: ImprovementId) -> Result<(), KaizenError> {
        let imp = self
            .improvements
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(KaizenError::UnknownImprovement(id.0))?;
        if imp.status == ImprovementStatus::Pending {
            imp.status = ImprovementStatus::Applied;
            imp.applied_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Mark every pending improvement on `component` applied; returns how many changed.
    pub fn apply_improvements_for(&mut self, component: &Component) -> usize {
        let now = Utc::now();
        let mut applied = 0;
        for imp in self
            .improvements
            .iter_mut()
            .filter(|i| &i.component == component && i.status == ImprovementStatus::Pending)
        {
            imp.status = ImprovementStatus::Applied;
            imp.applied_at = Some(now);
            applied += 1;
        }
        applied
    }

    // ─── Waste ──────────────────────────────────────────────────

    pub fn record_waste(
        &mut self,
        waste_type: impl Into<String>,
        description: impl Into<String>,
        eliminated_by: impl Into<String>,
        savings: Option<String>,
    ) -> u64 {
        self.next_waste_id += 1;
        self.waste.push(WasteRecord {
            id: self.next_waste_id,
            waste_type: waste_type.into(),
            description: description.into(),
            eliminated_by: eliminated_by.into(),
            savings,
            recorded_at: Utc::now(),
        });
        self.next_waste_id
    }

    pub fn waste_eliminations(&self) -> &[WasteRecord] {
        &self.waste
    }

    // ─── Queries ────────────────────────────────────────────────

    /// Components with open defects or pending improvements.
    pub fn components_needing_refinement(&self) -> BTreeSet<Component> {
        self.open_defects(None)
            .into_iter()
            .map(|d| d.component.clone())
            .chain(
                self.pending_improvements()
                    .into_iter()
                    .map(|i| i.component.clone()),
            )
            .collect()
    }

    pub fn statistics(&self) -> LedgerStatistics {
        let total = self.defects.len();
        let count = |s: DefectStatus| self.defects.iter().filter(|d| d.status == s).count();
        let in_progress = count(DefectStatus::InProgress);
        let open = count(DefectStatus::Open) + in_progress;
        let resolved = count(DefectStatus::Resolved);
        let verified = count(DefectStatus::Verified);

        let mut severity_breakdown: BTreeMap<Severity, usize> =
            Severity::ALL.iter().map(|s| (*s, 0)).collect();
        for d in &self.defects {
            *severity_breakdown.entry(d.severity).or_default() += 1;
        }

        LedgerStatistics {
            total_defects: total,
            open_defects: open,
            in_progress_defects: in_progress,
            resolved_defects: resolved,
            verified_defects: verified,
            resolution_rate: if total > 0 {
                (resolved + verified) as f64 / total as f64
            } else {
                0.0
            },
            severity_breakdown,
            total_improvements: self.improvements.len(),
            pending_improvements: self
                .improvements
                .iter()
                .filter(|i| i.status == ImprovementStatus::Pending)
                .count(),
            total_waste_eliminations: self.waste.len(),
        }
    }

    // ─── Persistence ────────────────────────────────────────────

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            defects: self.defects.clone(),
            improvements: self.improvements.clone(),
            waste_eliminations: self.waste.clone(),
            next_defect_id: self.next_defect_id,
            next_improvement_id: self.next_improvement_id,
            next_waste_id: self.next_waste_id,
        }
    }

    /// Rebuild a ledger. Counters never fall below the highest stored id, so
    /// ids stay unique after a reload.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let max_defect = snapshot.defects.iter().map(|d| d.id.0).max().unwrap_or(0);
        let max_improvement = snapshot
            .improvements
            .iter()
            .map(|i| i.id.0)
            .max()
            .unwrap_or(0);
        let max_waste = snapshot
            .waste_eliminations
            .iter()
            .map(|w| w.id)
            .max()
            .unwrap_or(0);
        Self {
            next_defect_id: snapshot.next_defect_id.max(max_defect),
            next_improvement_id: snapshot.next_improvement_id.max(max_improvement),
            next_waste_id: snapshot.next_waste_id.max(max_waste),
            defects: snapshot.defects,
            improvements: snapshot.improvements,
            waste: snapshot.waste_eliminations,
        }
    }

    /// Human-readable defect report.
    pub fn render_report(&self) -> String {
        let stats = self.statistics();
        let rule = "=".repeat(70);
        let thin = "-".repeat(70);
        let mut out = String::new();

        out.push_str("DEFECT LEDGER REPORT\n");
        out.push_str(&rule);
        out.push('\n');
        out.push_str(&format!("Generated: {}\n\n", Utc::now().to_rfc3339()));
        out.push_str("STATISTICS\n");
        out.push_str(&thin);
        out.push('\n');
        out.push_str(&format!("Total Defects: {}\n", stats.total_defects));
        out.push_str(&format!("Open Defects: {}\n", stats.open_defects));
        out.push_str(&format!("Resolved Defects: {}\n", stats.resolved_defects));
        out.push_str(&format!("Verified Defects: {}\n", stats.verified_defects));
        out.push_str(&format!(
            "Resolution Rate: {:.2}%\n\n",
            stats.resolution_rate * 100.0
        ));
        out.push_str("Severity Breakdown:\n");
        for (severity, count) in &stats.severity_breakdown {
            out.push_str(&format!("  {}: {}\n", severity, count));
        }
        out.push_str(&format!(
            "\nTotal Improvements: {} ({} pending)\n",
            stats.total_improvements, stats.pending_improvements
        ));
        out.push_str(&format!(
            "Total Waste Eliminations: {}\n\n",
            stats.total_waste_eliminations
        ));

        out.push_str("OPEN DEFECTS\n");
        out.push_str(&thin);
        out.push('\n');
        let open = self.open_defects(None);
        if open.is_empty() {
            out.push_str("No open defects.\n");
        }
        for d in open {
            out.push_str(&format!(
                "#{} [{}] {} ({})\n  {}\n  category={} reporter={}\n",
                d.id, d.severity, d.component, d.status, d.description, d.category, d.reporter
            ));
        }
        out
    }
}
