// benches/benchmarks.rs — Performance benchmarks (criterion)
//
// Hot paths of a run:
//   1. Budget admission: reserve + settle under the shared guard lock
//   2. Ledger ordering: open-defect queries over a populated ledger
//   3. Design flattening: page/endpoint dedup for large designs

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use kaizen::core::budget::{Admission, BudgetGuard};
use kaizen::core::design::{flatten_design, AppDesign};
use kaizen::core::ledger::{DefectStatus, Ledger, NewDefect, Severity};
use kaizen::core::types::Component;
use kaizen::infra::config::BudgetConfig;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn roomy_budget() -> BudgetConfig {
    BudgetConfig {
        requests_per_minute: u64::MAX / 4,
        requests_per_hour: u64::MAX / 4,
        units_per_minute: u64::MAX / 4,
        units_per_hour: None,
        units_per_day: u64::MAX / 4,
        reservation_poll_ms: 10,
    }
}

/// A ledger with `n` defects spread over 20 components, a third of them fixed.
fn populate_ledger(n: usize) -> Ledger {
    let mut ledger = Ledger::new();
    for i in 0..n {
        let component = if i % 2 == 0 {
            Component::Frontend(format!("Page{}", i % 20))
        } else {
            Component::Backend(format!("/api/r{}", i % 20))
        };
        let severity = Severity::ALL[i % Severity::ALL.len()];
        let id = ledger.add_defect(NewDefect::new(format!("defect {i}"), component, severity, "bench"));
        if i % 3 == 0 {
            ledger
                .update_status(id, DefectStatus::InProgress, "bench", None)
                .expect("claim");
            ledger
                .update_status(id, DefectStatus::Resolved, "bench", None)
                .expect("resolve");
        }
    }
    ledger
}

fn build_design(pages: usize) -> AppDesign {
    let pages: Vec<serde_json::Value> = (0..pages)
        .map(|i| {
            serde_json::json!({
                "page_name": format!("Page{i}"),
                "backend_endpoints": [
                    { "method": "GET", "path": format!("/api/items/{}", i % 50) },
                    { "method": "POST", "path": "/api/session" }
                ]
            })
        })
        .collect();
    serde_json::from_value(serde_json::json!({
        "frontend": { "pages": pages },
        "backend": { "endpoints": [ { "path": "/api/session" } ] }
    }))
    .expect("design")
}

// ─── Benchmark: Budget admission ────────────────────────────────────────────

fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("budget");

    // Windows keep every event for their duration, so each batch starts fresh.
    group.bench_function("reserve_settle_100", |b| {
        b.iter_batched(
            || BudgetGuard::new(&roomy_budget()),
            |guard| {
                for _ in 0..100 {
                    if let Admission::Reserved(r) = guard.reserve(black_box(1_000)).expect("admit") {
                        r.settle(900);
                    }
                }
                guard
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("statistics", |b| {
        let guard = BudgetGuard::new(&roomy_budget());
        for _ in 0..1_000 {
            if let Ok(Admission::Reserved(r)) = guard.reserve(10) {
                r.settle(10);
            }
        }
        b.iter(|| black_box(guard.statistics()))
    });

    group.finish();
}

// ─── Benchmark: Ledger queries ──────────────────────────────────────────────

fn bench_ledger(c: &mut Criterion) {
    let ledger = populate_ledger(1_000);
    let component = Component::Frontend("Page4".into());

    let mut group = c.benchmark_group("ledger");

    group.bench_function("open_defects_1000", |b| {
        b.iter(|| black_box(ledger.open_defects(None)).len())
    });

    group.bench_function("open_defects_by_component", |b| {
        b.iter(|| black_box(ledger.open_defects(Some(&component))).len())
    });

    group.bench_function("statistics_1000", |b| {
        b.iter(|| black_box(ledger.statistics()))
    });

    group.bench_function("components_needing_refinement", |b| {
        b.iter(|| black_box(ledger.components_needing_refinement()))
    });

    group.finish();
}

// ─── Benchmark: Design flattening ───────────────────────────────────────────

fn bench_flatten(c: &mut Criterion) {
    let design = build_design(500);
    c.bench_function("flatten_design_500_pages", |b| {
        b.iter(|| flatten_design(black_box(&design)))
    });
}

// ─── Main ───────────────────────────────────────────────────────────────────

criterion_group!(benches, bench_admission, bench_ledger, bench_flatten);
criterion_main!(benches);
