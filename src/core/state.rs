// src/core/state.rs — Persisted run state
//
// `RunState` is everything needed to report on, or resume from, a run: the
// ledger (with id counters), the cycle history and the run metrics.
// Written as pretty JSON with an atomic write (temp file + rename).

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::budget::BudgetStatistics;
use super::ledger::LedgerSnapshot;
use super::metrics::RunMetrics;
use super::types::Cycle;
use crate::infra::errors::KaizenError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub saved_at: DateTime<Utc>,
    pub ledger: LedgerSnapshot,
    pub cycles: Vec<Cycle>,
    pub metrics: RunMetrics,
    /// Budget counters at save time, for reporting only.
    #[serde(default)]
    pub budget: Option<BudgetStatistics>,
    /// Why the run stopped, when it stopped on its own.
    #[serde(default)]
    pub terminal_reason: Option<String>,
}

impl RunState {
    pub fn new(ledger: LedgerSnapshot, cycles: Vec<Cycle>, metrics: RunMetrics) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            saved_at: Utc::now(),
            ledger,
            cycles,
            metrics,
            budget: None,
            terminal_reason: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, KaizenError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Atomically write the state to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), KaizenError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(self)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run-state.json".into());
        let tmp = dir.join(format!(".{}.tmp", file_name));

        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(json.as_bytes())?;
        f.flush()?;
        f.sync_all()?;
        std::fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), "Run state written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::{Ledger, NewDefect, Severity};
    use crate::core::types::Component;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run-state.json");

        let mut ledger = Ledger::new();
        ledger.add_defect(NewDefect::new(
            "missing empty state",
            Component::Frontend("Cart".into()),
            Severity::Medium,
            "verifier-2",
        ));
        let mut state = RunState::new(ledger.snapshot(), vec![], RunMetrics::new());
        state.terminal_reason = Some("cycles exhausted".into());
        state.save(&path).unwrap();

        let loaded = RunState::load(&path).unwrap();
        assert_eq!(loaded, state);
        assert!(!dir.path().join("nested").join(".run-state.json.tmp").exists());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(RunState::load(&path), Err(KaizenError::Json(_))));
    }
}
