// src/worker/mod.rs — Unit-of-work layer
//
// The controller never knows what a unit of work does. Generation,
// verification, resolution and consolidation all go through `UnitOfWork`.

pub mod dry_run;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::types::{WorkOutput, WorkRequest};

/// Core trait that every worker implements.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    fn id(&self) -> &str;

    async fn perform(&self, request: &WorkRequest) -> Result<WorkOutput, WorkError>;
}

/// Failure reported by a worker. Only `RateLimited` is ever retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkError {
    #[error("rate limited, retry after {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("{message}")]
    Failed { message: String },
}

impl WorkError {
    pub fn failed(message: impl Into<String>) -> Self {
        WorkError::Failed {
            message: message.into(),
        }
    }
}
