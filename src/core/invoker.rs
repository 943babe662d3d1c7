// src/core/invoker.rs — Budget-gated, retrying unit-of-work invocation
//
// Every call to a worker goes through here: reserve budget (waiting out
// minute/hour windows), perform, settle with the measured cost. Only the
// structured rate-limit signal is retried; the reservation is held across
// backoff so a retry never has to re-queue behind other callers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::budget::{Admission, BudgetGuard};
use super::types::{WorkOutput, WorkRequest};
use crate::infra::config::RetryConfig;
use crate::infra::errors::KaizenError;
use crate::worker::{UnitOfWork, WorkError};

pub struct RetryingInvoker {
    guard: Arc<BudgetGuard>,
    jitter_buffer: Duration,
    max_retries: u32,
    cancel: CancellationToken,
}

impl RetryingInvoker {
    pub fn new(guard: Arc<BudgetGuard>, config: &RetryConfig, cancel: CancellationToken) -> Self {
        Self {
            guard,
            jitter_buffer: Duration::from_secs(config.jitter_buffer_secs),
            max_retries: config.max_retries,
            cancel,
        }
    }

    pub fn guard(&self) -> &Arc<BudgetGuard> {
        &self.guard
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sleep unless the run is cancelled first.
    async fn pause(&self, delay: Duration) -> Result<(), KaizenError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(KaizenError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Perform one unit of work under budget admission control.
    ///
    /// `max_retries` is the total number of attempts made while the worker
    /// keeps answering `RateLimited`. `BudgetExceeded` is returned before any
    /// attempt and is never retried.
    pub async fn invoke(
        &self,
        work: &dyn UnitOfWork,
        request: &WorkRequest,
        estimated_cost: u64,
        max_retries: u32,
    ) -> Result<WorkOutput, KaizenError> {
        if self.cancel.is_cancelled() {
            return Err(KaizenError::Cancelled);
        }

        let reservation = loop {
            match self.guard.reserve(estimated_cost)? {
                Admission::Reserved(r) => break r,
                Admission::Wait(delay) => {
                    tracing::debug!(
                        worker = work.id(),
                        purpose = ?request.purpose,
                        delay_ms = delay.as_millis() as u64,
                        "Waiting for budget window"
                    );
                    self.pause(delay).await?;
                }
            }
        };

        let attempts = max_retries.max(1);
        for attempt in 1..=attempts {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(KaizenError::Cancelled),
                r = work.perform(request) => r,
            };

            match result {
                Ok(output) => {
                    reservation.settle(output.measured_cost);
                    return Ok(output);
                }
                Err(WorkError::RateLimited { retry_after }) => {
                    self.guard.record_limit_signal();
                    if attempt == attempts {
                        break;
                    }
                    let delay = retry_after + self.jitter_buffer;
                    tracing::warn!(
                        worker = work.id(),
                        purpose = ?request.purpose,
                        attempt,
                        max_retries = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    self.pause(delay).await?;
                }
                Err(WorkError::Failed { message }) => {
                    return Err(KaizenError::WorkFailure { message });
                }
            }
        }

        tracing::warn!(worker = work.id(), attempts, "Giving up after repeated rate limits");
        Err(KaizenError::RetriesExhausted { attempts })
    }
}
