// src/core/budget.rs — Multi-window budget guard
//
// Rolling per-minute / per-hour windows plus a daily counter that resets at
// UTC midnight. Concurrent callers go through `reserve()`, which admits and
// holds the estimate in one critical section so two callers can never both be
// admitted against the last item's worth of budget.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::infra::clock::{Clock, SystemClock};
use crate::infra::config::BudgetConfig;
use crate::infra::errors::KaizenError;

/// What a window counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meter {
    /// Every admission counts 1.
    Requests,
    /// Admissions count their budget units.
    Units,
}

impl Meter {
    fn amount(self, units: u64) -> u64 {
        match self {
            Meter::Requests => 1,
            Meter::Units => units,
        }
    }
}

#[derive(Debug)]
struct BudgetWindow {
    label: &'static str,
    meter: Meter,
    capacity: u64,
    duration: TimeDelta,
    events: VecDeque<(DateTime<Utc>, u64)>,
}

impl BudgetWindow {
    fn new(label: &'static str, meter: Meter, capacity: u64, duration: TimeDelta) -> Self {
        Self {
            label,
            meter,
            capacity,
            duration,
            events: VecDeque::new(),
        }
    }

    fn purge(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.duration;
        while let Some((ts, _)) = self.events.front() {
            if *ts <= cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn used(&self) -> u64 {
        self.events.iter().map(|(_, n)| n).sum()
    }

    /// How long until `amount` more fits, given `held` outstanding reservations.
    /// `None` means only reservations block it and the caller should re-poll.
    fn wait_for(&self, amount: u64, held: u64, now: DateTime<Utc>) -> Option<Duration> {
        let used = self.used();
        if used + held + amount <= self.capacity {
            return Some(Duration::ZERO);
        }
        // Oversized estimates can never fit; they go through an empty window.
        if amount > self.capacity {
            if held > 0 {
                return None;
            }
            return Some(match self.events.back() {
                Some((ts, _)) => until(*ts + self.duration, now),
                None => Duration::ZERO,
            });
        }

        let excess = used + held + amount - self.capacity;
        let mut freed = 0;
        for (ts, n) in &self.events {
            freed += n;
            if freed >= excess {
                return Some(until(*ts + self.duration, now));
            }
        }
        None
    }
}

fn until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Outcome of a reservation attempt that did not hit the daily ceiling.
#[derive(Debug)]
pub enum Admission<'a> {
    Reserved(Reservation<'a>),
    /// Try again after this long.
    Wait(Duration),
}

/// Budget held between admission and accounting. Dropping it unsettled
/// releases the held estimate without recording consumption.
#[must_use = "an unsettled reservation is released on drop"]
#[derive(Debug)]
pub struct Reservation<'a> {
    guard: &'a BudgetGuard,
    estimated: u64,
    settled: bool,
}

impl Reservation<'_> {
    /// Release the hold and account the measured cost.
    pub fn settle(mut self, actual: u64) {
        let now = self.guard.clock.now();
        let mut state = self.guard.lock();
        state.release(self.estimated);
        state.consume(actual, now);
        self.settled = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.guard.lock().release(self.estimated);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatistics {
    pub daily_capacity: u64,
    pub used_today: u64,
    pub reserved: u64,
    pub remaining_daily: u64,
    pub percent_used_daily: f64,
    pub requests_this_minute: u64,
    pub requests_this_hour: u64,
    pub units_this_minute: u64,
    pub total_requests: u64,
    pub total_units: u64,
    pub delayed_admissions: u64,
    pub limit_signals: u64,
}

#[derive(Debug)]
struct GuardState {
    windows: Vec<BudgetWindow>,
    daily_capacity: u64,
    used_today: u64,
    day: NaiveDate,
    reserved_units: u64,
    reserved_requests: u64,
    total_requests: u64,
    total_units: u64,
    delayed_admissions: u64,
    limit_signals: u64,
}

impl GuardState {
    fn refresh(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            tracing::info!(previous = %self.day, used = self.used_today, "Daily budget reset");
            self.day = today;
            self.used_today = 0;
        }
        for w in &mut self.windows {
            w.purge(now);
        }
    }

    fn remaining_daily(&self) -> u64 {
        self.daily_capacity
            .saturating_sub(self.used_today)
            .saturating_sub(self.reserved_units)
    }

    fn held(&self, meter: Meter) -> u64 {
        match meter {
            Meter::Requests => self.reserved_requests,
            Meter::Units => self.reserved_units,
        }
    }

    /// Daily check first, then the longest wait any window imposes.
    /// `Ok(None)` means blocked only by outstanding reservations.
    fn evaluate(&self, estimated: u64, now: DateTime<Utc>) -> Result<Option<Duration>, KaizenError> {
        let remaining = self.remaining_daily();
        if remaining < estimated {
            return Err(KaizenError::BudgetExceeded {
                remaining,
                needed: estimated,
            });
        }
        let mut wait = Duration::ZERO;
        for w in &self.windows {
            match w.wait_for(w.meter.amount(estimated), self.held(w.meter), now) {
                Some(d) => wait = wait.max(d),
                None => return Ok(None),
            }
        }
        Ok(Some(wait))
    }

    fn consume(&mut self, actual: u64, now: DateTime<Utc>) {
        for w in &mut self.windows {
            w.events.push_back((now, w.meter.amount(actual)));
        }
        self.used_today += actual;
        self.total_requests += 1;
        self.total_units += actual;
    }

    fn release(&mut self, estimated: u64) {
        self.reserved_units = self.reserved_units.saturating_sub(estimated);
        self.reserved_requests = self.reserved_requests.saturating_sub(1);
    }

    fn window_usage(&self, label: &str) -> u64 {
        self.windows
            .iter()
            .find(|w| w.label == label)
            .map(|w| w.used())
            .unwrap_or(0)
    }
}

/// Shared budget guard. Cheap to share behind an `Arc`; the lock is only
/// held for bookkeeping, never across an await.
pub struct BudgetGuard {
    state: Mutex<GuardState>,
    clock: Arc<dyn Clock>,
    reservation_poll: Duration,
}

impl std::fmt::Debug for BudgetGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetGuard")
            .field("state", &self.state)
            .field("reservation_poll", &self.reservation_poll)
            .finish()
    }
}

impl BudgetGuard {
    pub fn new(config: &BudgetConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &BudgetConfig, clock: Arc<dyn Clock>) -> Self {
        let minute = TimeDelta::minutes(1);
        let hour = TimeDelta::hours(1);
        let mut windows = vec![
            BudgetWindow::new("requests/minute", Meter::Requests, config.requests_per_minute, minute),
            BudgetWindow::new("requests/hour", Meter::Requests, config.requests_per_hour, hour),
            BudgetWindow::new("units/minute", Meter::Units, config.units_per_minute, minute),
        ];
        if let Some(cap) = config.units_per_hour {
            windows.push(BudgetWindow::new("units/hour", Meter::Units, cap, hour));
        }
        let now = clock.now();
        Self {
            state: Mutex::new(GuardState {
                windows,
                daily_capacity: config.units_per_day,
                used_today: 0,
                day: now.date_naive(),
                reserved_units: 0,
                reserved_requests: 0,
                total_requests: 0,
                total_units: 0,
                delayed_admissions: 0,
                limit_signals: 0,
            }),
            clock,
            reservation_poll: Duration::from_millis(config.reservation_poll_ms.max(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Daily capacity minus consumption and outstanding reservations.
    pub fn remaining_daily(&self) -> u64 {
        let now = self.clock.now();
        let mut state = self.lock();
        state.refresh(now);
        state.remaining_daily()
    }

    /// Check admission without holding anything. Returns the wait needed
    /// before `estimated` fits every window (zero when it fits now).
    pub fn admit(&self, estimated: u64) -> Result<Duration, KaizenError> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.refresh(now);
        Ok(state
            .evaluate(estimated, now)?
            .unwrap_or(self.reservation_poll))
    }

    /// Atomically admit and hold `estimated` against the daily counter and
    /// every window.
    pub fn reserve(&self, estimated: u64) -> Result<Admission<'_>, KaizenError> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.refresh(now);
        match state.evaluate(estimated, now)? {
            Some(wait) if wait.is_zero() => {
                state.reserved_units += estimated;
                state.reserved_requests += 1;
                Ok(Admission::Reserved(Reservation {
                    guard: self,
                    estimated,
                    settled: false,
                }))
            }
            Some(wait) => {
                state.delayed_admissions += 1;
                Ok(Admission::Wait(wait))
            }
            None => {
                state.delayed_admissions += 1;
                Ok(Admission::Wait(self.reservation_poll))
            }
        }
    }

    /// Account a call that was not made through a reservation.
    pub fn record_consumption(&self, actual: u64) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.refresh(now);
        state.consume(actual, now);
    }

    /// Count a rate-limit signal from a callee. Observability only.
    pub fn record_limit_signal(&self) {
        self.lock().limit_signals += 1;
    }

    pub fn statistics(&self) -> BudgetStatistics {
        let now = self.clock.now();
        let mut state = self.lock();
        state.refresh(now);
        let remaining = state.remaining_daily();
        BudgetStatistics {
            daily_capacity: state.daily_capacity,
            used_today: state.used_today,
            reserved: state.reserved_units,
            remaining_daily: remaining,
            percent_used_daily: if state.daily_capacity > 0 {
                state.used_today as f64 / state.daily_capacity as f64 * 100.0
            } else {
                0.0
            },
            requests_this_minute: state.window_usage("requests/minute"),
            requests_this_hour: state.window_usage("requests/hour"),
            units_this_minute: state.window_usage("units/minute"),
            total_requests: state.total_requests,
            total_units: state.total_units,
            delayed_admissions: state.delayed_admissions,
            limit_signals: state.limit_signals,
        }
    }
}
