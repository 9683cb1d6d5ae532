//! Criterion benchmarks for DCALab hot paths.
//!
//! Benchmarks:
//! 1. Ladder computation for growing safety-order counts
//! 2. Dynamic sizing search (many ladder computations per call)
//! 3. A full deal cycle against the simulated broker

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use dcalab_core::deal::{DealMachine, DealSettings};
use dcalab_core::domain::Bar;
use dcalab_core::ladder::{compute, LadderShape, Parameters, SizingKind, SizingMode};
use dcalab_core::sim::{CostModel, SimBroker};
use dcalab_core::sizing::{search, SizingRequest};

// ── Helpers ──────────────────────────────────────────────────────────

fn shape(levels: u32) -> LadderShape {
    LadderShape {
        target_profit_percent: 1.0,
        safety_orders_max: levels,
        safety_orders_active_max: levels,
        safety_order_volume_scale: 1.2,
        safety_order_step_scale: 1.05,
        safety_order_price_deviation_percent: 0.5,
    }
}

fn make_bars(n: usize) -> Vec<Bar> {
    let base_date = chrono::NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.2).sin() * 8.0;
            Bar {
                timestamp: (base_date + chrono::Duration::days(i as i64))
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                open: close - 0.3,
                high: close + 1.5,
                low: close - 1.5,
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}

// ── 1. Ladder ────────────────────────────────────────────────────────

fn bench_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("ladder_compute");
    for levels in [5u32, 25, 50] {
        let params = Parameters::new(
            shape(levels),
            SizingMode::ByQuoteCurrency {
                base_order_size: 10.0,
                safety_order_size: 10.0,
            },
        )
        .unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(levels), &params, |b, params| {
            b.iter(|| compute(black_box(params), black_box(36_901.57)).unwrap())
        });
    }
    group.finish();
}

// ── 2. Sizing search ─────────────────────────────────────────────────

fn bench_search(c: &mut Criterion) {
    let request = SizingRequest::new(
        shape(20),
        SizingKind::QuoteCurrency,
        10.0,
        36_901.57,
        50_000.0,
    );
    c.bench_function("sizing_search", |b| {
        b.iter(|| search(black_box(&request)).unwrap())
    });
}

// ── 3. Deal cycle ────────────────────────────────────────────────────

fn bench_deal_loop(c: &mut Criterion) {
    let bars = make_bars(1_000);
    let settings = DealSettings::new(
        Parameters::new(
            shape(10),
            SizingMode::ByBaseAsset {
                base_order_size: 1.0,
                safety_order_size: 1.0,
            },
        )
        .unwrap(),
    );
    c.bench_function("deal_loop_1000_bars", |b| {
        b.iter(|| {
            let mut machine = DealMachine::new(settings.clone());
            let mut broker = SimBroker::new(1_000_000.0, CostModel::frictionless());
            for bar in &bars {
                broker.process_bar(bar);
                while let Some(event) = broker.poll_event() {
                    machine.on_event(&event, &mut broker);
                }
                if machine.is_idle() {
                    let _ = machine.start_deal(&mut broker);
                    while let Some(event) = broker.poll_event() {
                        machine.on_event(&event, &mut broker);
                    }
                }
            }
            black_box(broker.fills().len())
        })
    });
}

criterion_group!(benches, bench_compute, bench_search, bench_deal_loop);
criterion_main!(benches);
