// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cycle: CycleConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ceilings enforced by the budget guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub requests_per_minute: u64,
    pub requests_per_hour: u64,
    pub units_per_minute: u64,
    /// Optional hourly unit ceiling; omitted means no hourly unit window.
    pub units_per_hour: Option<u64>,
    pub units_per_day: u64,
    /// Re-poll interval when only other callers' reservations block admission.
    pub reservation_poll_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            requests_per_hour: 1000,
            units_per_minute: 100_000,
            units_per_hour: None,
            units_per_day: 100_000,
            reservation_poll_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per unit of work when the callee keeps rate limiting.
    pub max_retries: u32,
    /// Added on top of the callee's retry-after hint.
    pub jitter_buffer_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            jitter_buffer_secs: 5,
        }
    }
}

/// Scheduling knobs for the PDCA controller. Costs are in budget units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub cycles: u32,
    pub workers: usize,
    pub check_workers: usize,
    pub floor_multiplier: f64,
    pub verification_floor: u64,
    pub plan_cost: u64,
    pub verify_cost: u64,
    pub resolution_cost: u64,
    pub integration_cost: u64,
    pub consolidation_cost: u64,
    pub act_slots: usize,
    /// Last cycle number that runs CONSOLIDATE.
    pub consolidate_through_cycle: u32,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            cycles: 3,
            workers: 3,
            check_workers: 2,
            floor_multiplier: 2.5,
            verification_floor: 10_000,
            plan_cost: 2_000,
            verify_cost: 2_000,
            resolution_cost: 3_000,
            integration_cost: 2_000,
            consolidation_cost: 2_000,
            act_slots: 3,
            consolidate_through_cycle: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// HTTP endpoint receiving work requests. Unset means dry-run only.
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
        }
    }
}

impl Config {
    /// Load config from the default location, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the controller cannot schedule with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.budget.units_per_day == 0 {
            anyhow::bail!("budget.units_per_day must be greater than zero");
        }
        if self.cycle.workers == 0 || self.cycle.check_workers == 0 {
            anyhow::bail!("cycle.workers and cycle.check_workers must be at least 1");
        }
        if self.retry.max_retries == 0 {
            anyhow::bail!("retry.max_retries must be at least 1");
        }
        if self.cycle.floor_multiplier.is_nan() || self.cycle.floor_multiplier < 0.0 {
            anyhow::bail!("cycle.floor_multiplier must be non-negative");
        }
        Ok(())
    }
}
