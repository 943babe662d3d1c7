// tests/invoker_test.rs — Integration test: retrying invoker with scripted workers

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use kaizen::core::budget::BudgetGuard;
use kaizen::core::invoker::RetryingInvoker;
use kaizen::core::types::{WorkOutput, WorkPurpose, WorkRequest};
use kaizen::infra::clock::Clock;
use kaizen::infra::config::{BudgetConfig, RetryConfig};
use kaizen::infra::errors::KaizenError;
use kaizen::worker::{UnitOfWork, WorkError};

/// A worker that replays a fixed script of results, then keeps succeeding.
struct ScriptedWorker {
    script: Mutex<VecDeque<Result<WorkOutput, WorkError>>>,
    calls: AtomicU32,
    cancel_on_call: Option<CancellationToken>,
}

impl ScriptedWorker {
    fn new(script: Vec<Result<WorkOutput, WorkError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            cancel_on_call: None,
        }
    }

    fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnitOfWork for ScriptedWorker {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn perform(&self, _request: &WorkRequest) -> Result<WorkOutput, WorkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref token) = self.cancel_on_call {
            token.cancel();
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(WorkOutput::new("ok", 100)))
    }
}

/// A worker that cancels the run and then never finishes its unit of work.
struct HangingWorker {
    cancel: CancellationToken,
    dropped_in_flight: Arc<AtomicU32>,
}

/// Counts how often an in-flight `perform` future was dropped.
struct InFlight(Arc<AtomicU32>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl UnitOfWork for HangingWorker {
    fn id(&self) -> &str {
        "hanging"
    }

    async fn perform(&self, _request: &WorkRequest) -> Result<WorkOutput, WorkError> {
        let _in_flight = InFlight(self.dropped_in_flight.clone());
        self.cancel.cancel();
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(WorkOutput::new("too late", 100))
    }
}

/// Wall clock driven by tokio's (pausable) clock so budget windows move
/// when paused tests auto-advance.
struct TokioClock {
    base: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl TokioClock {
    fn new() -> Self {
        Self {
            base: Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap(),
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::from_std(self.start.elapsed()).unwrap()
    }
}

fn budget(daily: u64) -> BudgetConfig {
    BudgetConfig {
        requests_per_minute: 1_000,
        requests_per_hour: 10_000,
        units_per_minute: 10_000_000,
        units_per_hour: None,
        units_per_day: daily,
        reservation_poll_ms: 10,
    }
}

fn retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        jitter_buffer_secs: 5,
    }
}

fn rate_limited(secs: u64) -> Result<WorkOutput, WorkError> {
    Err(WorkError::RateLimited {
        retry_after: Duration::from_secs(secs),
    })
}

fn request() -> WorkRequest {
    WorkRequest::new(WorkPurpose::Verify, 1)
}

#[tokio::test(start_paused = true)]
async fn test_transient_twice_then_success() {
    let guard = Arc::new(BudgetGuard::new(&budget(10_000)));
    let invoker = RetryingInvoker::new(guard.clone(), &retry(), CancellationToken::new());
    let worker = ScriptedWorker::new(vec![
        rate_limited(1),
        rate_limited(2),
        Ok(WorkOutput::new("done", 750)),
    ]);

    let started = tokio::time::Instant::now();
    let out = invoker.invoke(&worker, &request(), 1_000, 3).await.unwrap();

    assert_eq!(out.content, "done");
    assert_eq!(worker.calls(), 3);
    // (1s + 5s) + (2s + 5s) of backoff.
    assert!(started.elapsed() >= Duration::from_secs(13));

    let stats = guard.statistics();
    assert_eq!(stats.total_requests, 1, "exactly one consumption record");
    assert_eq!(stats.total_units, 750);
    assert_eq!(stats.limit_signals, 2);
    assert_eq!(stats.reserved, 0);
    assert_eq!(guard.remaining_daily(), 9_250);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_releases_reservation() {
    let guard = Arc::new(BudgetGuard::new(&budget(10_000)));
    let invoker = RetryingInvoker::new(guard.clone(), &retry(), CancellationToken::new());
    let worker = ScriptedWorker::new(vec![rate_limited(1), rate_limited(1), rate_limited(1)]);

    let err = invoker.invoke(&worker, &request(), 2_000, 3).await.unwrap_err();

    assert!(matches!(err, KaizenError::RetriesExhausted { attempts: 3 }));
    assert_eq!(worker.calls(), 3);
    assert_eq!(guard.remaining_daily(), 10_000);
    assert_eq!(guard.statistics().limit_signals, 3);
}

#[tokio::test]
async fn test_domain_failure_is_not_retried() {
    let guard = Arc::new(BudgetGuard::new(&budget(10_000)));
    let invoker = RetryingInvoker::new(guard.clone(), &retry(), CancellationToken::new());
    let worker = ScriptedWorker::new(vec![Err(WorkError::failed("rate_limit mentioned in body"))]);

    let err = invoker.invoke(&worker, &request(), 1_000, 3).await.unwrap_err();

    assert!(matches!(err, KaizenError::WorkFailure { ref message } if message.contains("rate_limit")));
    assert_eq!(worker.calls(), 1);
    assert_eq!(guard.statistics().limit_signals, 0);
    assert_eq!(guard.remaining_daily(), 10_000);
}

#[tokio::test]
async fn test_budget_exceeded_before_any_call() {
    let guard = Arc::new(BudgetGuard::new(&budget(1_000)));
    let invoker = RetryingInvoker::new(guard, &retry(), CancellationToken::new());
    let worker = ScriptedWorker::new(vec![]);

    let err = invoker.invoke(&worker, &request(), 2_000, 3).await.unwrap_err();

    assert!(matches!(
        err,
        KaizenError::BudgetExceeded {
            remaining: 1_000,
            needed: 2_000
        }
    ));
    assert_eq!(worker.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff() {
    let cancel = CancellationToken::new();
    let guard = Arc::new(BudgetGuard::new(&budget(10_000)));
    let invoker = RetryingInvoker::new(guard.clone(), &retry(), cancel.clone());
    let worker = ScriptedWorker::new(vec![rate_limited(600)]).cancelling(cancel);

    let err = invoker.invoke(&worker, &request(), 1_000, 3).await.unwrap_err();

    assert!(matches!(err, KaizenError::Cancelled));
    assert_eq!(worker.calls(), 1);
    assert_eq!(guard.remaining_daily(), 10_000);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_work_in_flight() {
    let cancel = CancellationToken::new();
    let guard = Arc::new(BudgetGuard::new(&budget(10_000)));
    let invoker = RetryingInvoker::new(guard.clone(), &retry(), cancel.clone());
    let dropped = Arc::new(AtomicU32::new(0));
    let worker = HangingWorker {
        cancel,
        dropped_in_flight: dropped.clone(),
    };

    let started = tokio::time::Instant::now();
    let err = invoker.invoke(&worker, &request(), 1_000, 3).await.unwrap_err();

    assert!(matches!(err, KaizenError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(3_600));
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    let stats = guard.statistics();
    assert_eq!(stats.total_requests, 0);
    assert_eq!(stats.reserved, 0);
    assert_eq!(guard.remaining_daily(), 10_000);
}

#[tokio::test]
async fn test_cancelled_run_makes_no_call() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let guard = Arc::new(BudgetGuard::new(&budget(10_000)));
    let invoker = RetryingInvoker::new(guard, &retry(), cancel);
    let worker = ScriptedWorker::new(vec![]);

    assert!(matches!(
        invoker.invoke(&worker, &request(), 1, 3).await,
        Err(KaizenError::Cancelled)
    ));
    assert_eq!(worker.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_admission_waits_for_window() {
    let mut cfg = budget(1_000_000);
    cfg.requests_per_minute = 1;
    let guard = Arc::new(BudgetGuard::with_clock(&cfg, Arc::new(TokioClock::new())));
    let invoker = RetryingInvoker::new(guard.clone(), &retry(), CancellationToken::new());
    let worker = ScriptedWorker::new(vec![]);

    let started = tokio::time::Instant::now();
    invoker.invoke(&worker, &request(), 10, 3).await.unwrap();
    invoker.invoke(&worker, &request(), 10, 3).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(60));
    let stats = guard.statistics();
    assert_eq!(stats.total_requests, 2);
    assert!(stats.delayed_admissions >= 1);
}
