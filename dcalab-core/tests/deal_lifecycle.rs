//! End-to-end deal lifecycles: the deal machine trading against the simulated
//! broker over scripted bars.
//!
//! Every test drives the same loop the backtest runner uses: process a bar,
//! drain broker events into the machine, start a new deal when idle.

use dcalab_core::broker::{Broker, Portfolio};
use dcalab_core::deal::{
    DealMachine, DealSettings, DealState, DealSummary, DealUpdate, FailureReason, OrderRole,
    TakeProfitKind,
};
use dcalab_core::domain::{Bar, OrderStatus};
use dcalab_core::ladder::{LadderShape, Parameters, SizingMode};
use dcalab_core::sim::{CostModel, SimBroker};

use chrono::NaiveDate;

// ─── Helpers ──────────────────────────────────────────────────────────

fn bar(day: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp: NaiveDate::from_ymd_opt(2023, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        open,
        high,
        low,
        close,
        volume: 1_000.0,
    }
}

fn unit_settings(levels: u32) -> DealSettings {
    DealSettings::new(
        Parameters::new(
            LadderShape {
                target_profit_percent: 1.0,
                safety_orders_max: levels,
                safety_orders_active_max: levels,
                safety_order_volume_scale: 1.0,
                safety_order_step_scale: 1.0,
                safety_order_price_deviation_percent: 1.0,
            },
            SizingMode::ByBaseAsset {
                base_order_size: 1.0,
                safety_order_size: 1.0,
            },
        )
        .unwrap(),
    )
}

fn drain(machine: &mut DealMachine, broker: &mut SimBroker, updates: &mut Vec<DealUpdate>) {
    while let Some(event) = broker.poll_event() {
        let update = machine.on_event(&event, broker);
        if update != DealUpdate::Ignored && update != DealUpdate::Acknowledged {
            updates.push(update);
        }
    }
}

/// Feed bars; after each bar start a deal if the machine is idle.
/// Stops starting new deals after the first close when `single_deal` is set.
fn drive(
    machine: &mut DealMachine,
    broker: &mut SimBroker,
    bars: &[Bar],
    single_deal: bool,
) -> Vec<DealUpdate> {
    let mut updates = Vec::new();
    let mut started = false;
    for bar in bars {
        broker.process_bar(bar);
        drain(machine, broker, &mut updates);
        if machine.is_idle() && !(single_deal && started) {
            machine.start_deal(broker).unwrap();
            started = true;
            drain(machine, broker, &mut updates);
        }
    }
    updates
}

fn closed(updates: &[DealUpdate]) -> Vec<&DealSummary> {
    updates
        .iter()
        .filter_map(|u| match u {
            DealUpdate::Closed(summary) => Some(summary),
            _ => None,
        })
        .collect()
}

// ─── Lifecycles ───────────────────────────────────────────────────────

#[test]
fn safety_fill_then_take_profit_closes_deal() {
    let mut machine = DealMachine::new(unit_settings(3));
    let mut broker = SimBroker::new(1_000.0, CostModel::frictionless());
    let bars = [
        bar(2, 100.0, 100.0, 100.0, 100.0),
        // Base order fills at the open.
        bar(3, 100.0, 100.5, 99.8, 100.0),
        // First safety order at 99; the 101 take-profit is cancelled by OCO.
        bar(4, 100.0, 100.2, 98.9, 99.0),
        // Replacement take-profit for 2 units at 100.495.
        bar(5, 99.5, 100.6, 99.4, 100.5),
    ];
    let updates = drive(&mut machine, &mut broker, &bars, true);

    assert!(matches!(updates[0], DealUpdate::Opened { levels: 3, .. }));
    assert!(matches!(
        updates[1],
        DealUpdate::SafetyOrderFilled { level_index: 0, .. }
    ));
    match &updates[2] {
        DealUpdate::TakeProfitPlaced {
            price, quantity, ..
        } => {
            assert!((price - 100.495).abs() < 1e-9);
            assert_eq!(*quantity, 2.0);
        }
        other => panic!("unexpected {other:?}"),
    }

    let deals = closed(&updates);
    assert_eq!(deals.len(), 1);
    let deal = deals[0];
    assert!((deal.exit_price - 100.495).abs() < 1e-9);
    assert_eq!(deal.levels_filled, 1);
    assert!((deal.net_profit - 1.99).abs() < 1e-9);

    assert!(machine.is_idle());
    assert_eq!(broker.position(), 0.0);
    assert!((broker.cash() - 1_001.99).abs() < 1e-9);
    // Nothing left working at the broker.
    assert_eq!(broker.book().active_count(), 0);
}

#[test]
fn take_profit_without_safety_fill() {
    let mut machine = DealMachine::new(unit_settings(3));
    let mut broker = SimBroker::new(1_000.0, CostModel::frictionless());
    let bars = [
        bar(2, 100.0, 100.0, 100.0, 100.0),
        bar(3, 100.0, 100.0, 100.0, 100.0),
        // Gaps above the take-profit: fills at the open.
        bar(4, 102.0, 102.5, 101.5, 102.0),
    ];
    let updates = drive(&mut machine, &mut broker, &bars, true);
    let deals = closed(&updates);
    assert_eq!(deals.len(), 1);
    assert_eq!(deals[0].exit_price, 102.0);
    assert_eq!(deals[0].levels_filled, 0);
}

#[test]
fn deals_repeat_after_close() {
    let mut machine = DealMachine::new(unit_settings(2));
    let mut broker = SimBroker::new(1_000.0, CostModel::frictionless());
    let mut bars = vec![bar(2, 100.0, 100.0, 100.0, 100.0)];
    for day in 3..13 {
        // Alternating flat and +2% bars: every deal closes on the spike.
        let spike = day % 2 == 0;
        bars.push(if spike {
            bar(day, 100.0, 102.0, 100.0, 100.0)
        } else {
            bar(day, 100.0, 100.0, 100.0, 100.0)
        });
    }
    let updates = drive(&mut machine, &mut broker, &bars, false);
    assert!(closed(&updates).len() >= 4);
    assert!(broker.cash() > 1_000.0);
}

#[test]
fn ladder_exhaustion_keeps_take_profit_working() {
    let mut machine = DealMachine::new(unit_settings(1));
    let mut broker = SimBroker::new(1_000.0, CostModel::frictionless());
    let bars = [
        bar(2, 100.0, 100.0, 100.0, 100.0),
        bar(3, 100.0, 100.0, 100.0, 100.0),
        bar(4, 99.5, 99.5, 98.0, 98.5),
        bar(5, 97.0, 97.5, 96.0, 96.5),
        bar(6, 96.0, 96.5, 95.0, 95.5),
    ];
    let updates = drive(&mut machine, &mut broker, &bars, true);
    assert!(matches!(
        updates.last(),
        Some(DealUpdate::TakeProfitPlaced {
            safety_order: None,
            ..
        })
    ));
    let deal = machine.deal().unwrap();
    assert!(deal.cursor.is_exhausted());
    let tp = deal.oco.take_profit().unwrap();
    assert_eq!(broker.order(tp).unwrap().status, OrderStatus::Pending);
    assert_eq!(broker.position(), 2.0);
}

#[test]
fn trailing_take_profit_follows_the_high() {
    let mut settings = unit_settings(2);
    settings.take_profit = TakeProfitKind::TrailingStopLimit { trail_percent: 0.2 };
    let mut machine = DealMachine::new(settings);
    let mut broker = SimBroker::new(1_000.0, CostModel::frictionless());
    let bars = [
        bar(2, 100.0, 100.0, 100.0, 100.0),
        bar(3, 100.0, 100.0, 100.0, 100.0),
        // Arms at 101 and records a 101.5 peak.
        bar(4, 100.5, 101.5, 100.4, 101.4),
        // Trades through the 101.297 stop.
        bar(5, 101.4, 101.45, 101.2, 101.25),
    ];
    let updates = drive(&mut machine, &mut broker, &bars, true);
    let deals = closed(&updates);
    assert_eq!(deals.len(), 1);
    assert!((deals[0].exit_price - 101.5 * 0.998).abs() < 1e-9);
}

#[test]
fn margin_call_on_safety_order_fails_then_resets() {
    let mut machine = DealMachine::new(unit_settings(3));
    // Enough for the base order only.
    let mut broker = SimBroker::new(150.0, CostModel::frictionless());
    let bars = [
        bar(2, 100.0, 100.0, 100.0, 100.0),
        bar(3, 100.0, 100.0, 100.0, 100.0),
        bar(4, 99.5, 99.5, 98.5, 99.0),
    ];
    let updates = drive(&mut machine, &mut broker, &bars, true);
    assert!(matches!(
        updates.last(),
        Some(DealUpdate::Failed(FailureReason::MarginCall {
            role: OrderRole::SafetyOrder,
            ..
        }))
    ));
    assert!(matches!(machine.state(), DealState::Failed { .. }));
    assert!(machine.reset().is_some());
    assert!(machine.is_idle());
}

#[test]
fn commissions_reduce_net_profit() {
    let mut machine = DealMachine::new(unit_settings(3));
    let mut broker = SimBroker::new(1_000.0, CostModel::new(0.0, 10.0));
    let bars = [
        bar(2, 100.0, 100.0, 100.0, 100.0),
        bar(3, 100.0, 100.0, 100.0, 100.0),
        bar(4, 100.5, 101.5, 100.5, 101.0),
    ];
    let updates = drive(&mut machine, &mut broker, &bars, true);
    let deal = closed(&updates)[0];
    assert!(deal.commission > 0.0);
    assert!((deal.net_profit - (deal.gross_profit - deal.commission)).abs() < 1e-12);
    assert!(deal.net_profit < deal.gross_profit);
}
