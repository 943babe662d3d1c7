// src/worker/dry_run.rs — Offline worker for rehearsing a run
//
// Charges the configured estimate for each purpose, reports no findings and
// applies every resolution. Lets `kaizen run --dry-run` exercise the whole
// loop and the budget accounting without an endpoint.

use async_trait::async_trait;

use super::{UnitOfWork, WorkError};
use crate::core::types::{WorkOutput, WorkPurpose, WorkRequest};
use crate::infra::config::CycleConfig;

pub struct DryRunWorker {
    costs: CycleConfig,
}

impl DryRunWorker {
    pub fn new(costs: CycleConfig) -> Self {
        Self { costs }
    }

    fn cost_of(&self, request: &WorkRequest) -> u64 {
        match request.purpose {
            WorkPurpose::Plan => self.costs.plan_cost,
            WorkPurpose::Verify => self.costs.verify_cost,
            WorkPurpose::Resolve => self.costs.resolution_cost,
            WorkPurpose::ValidateIntegration => self.costs.integration_cost,
            WorkPurpose::Consolidate => self.costs.consolidation_cost,
            // Item work carries its own estimate.
            WorkPurpose::Generate | WorkPurpose::Refine => request.context["estimated_cost"]
                .as_u64()
                .unwrap_or(self.costs.plan_cost),
        }
    }
}

#[async_trait]
impl UnitOfWork for DryRunWorker {
    fn id(&self) -> &str {
        "dry-run"
    }

    async fn perform(&self, request: &WorkRequest) -> Result<WorkOutput, WorkError> {
        let target = request
            .target
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "*".into());
        tracing::debug!(purpose = ?request.purpose, cycle = request.cycle, %target, "Dry-run unit of work");
        Ok(WorkOutput::new(
            format!("[dry-run] {:?} {}", request.purpose, target),
            self.cost_of(request),
        ))
    }
}
