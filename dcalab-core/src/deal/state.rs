//! Deal lifecycle states, the open-deal record, and what the machine reports.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::oco::{OcoPair, OrderRole};
use crate::broker::BrokerError;
use crate::domain::OrderId;
use crate::ladder::{LadderCursor, LadderError};
use crate::sizing::SizingError;

/// Errors returned synchronously from machine calls.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DealError {
    #[error("cannot start a deal while {0}")]
    DealInProgress(&'static str),

    #[error("no market data to size the base order")]
    NoMarketData,

    #[error("base order quantity {0} is not a positive number")]
    InvalidBaseOrder(f64),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Why a deal ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    Rejected {
        order_id: OrderId,
        role: OrderRole,
        reason: String,
    },
    MarginCall {
        order_id: OrderId,
        role: OrderRole,
    },
    /// The base order was cancelled before it filled.
    BaseOrderCanceled { order_id: OrderId },
    /// The ladder could not be built from the realized fill.
    Ladder { message: String },
    /// The dynamic sizing search failed.
    Sizing { message: String },
    /// A broker call failed while the deal was open.
    Broker { message: String },
}

impl From<LadderError> for FailureReason {
    fn from(err: LadderError) -> Self {
        FailureReason::Ladder {
            message: err.to_string(),
        }
    }
}

impl From<SizingError> for FailureReason {
    fn from(err: SizingError) -> Self {
        FailureReason::Sizing {
            message: err.to_string(),
        }
    }
}

impl From<BrokerError> for FailureReason {
    fn from(err: BrokerError) -> Self {
        FailureReason::Broker {
            message: err.to_string(),
        }
    }
}

/// A realized execution as reported by a `Filled` event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
}

/// An open deal: the ladder cursor, the live OCO pair and realized fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub cursor: LadderCursor,
    pub oco: OcoPair,
    pub base_fill: Execution,
    pub safety_fills: Vec<Execution>,
    /// Take-profit fills that sold only part of the position.
    #[serde(default)]
    pub partial_exits: Vec<Execution>,
    /// A take-profit cancel was requested after a safety fill; the
    /// replacement is placed when the `Canceled` event arrives.
    pub awaiting_take_profit: bool,
}

impl Deal {
    pub fn new(cursor: LadderCursor, base_fill: Execution) -> Self {
        Self {
            cursor,
            oco: OcoPair::new(),
            base_fill,
            safety_fills: Vec::new(),
            partial_exits: Vec::new(),
            awaiting_take_profit: false,
        }
    }

    /// Quote spent on the base order and every filled safety order.
    pub fn invested_quote(&self) -> f64 {
        std::iter::once(&self.base_fill)
            .chain(&self.safety_fills)
            .map(|e| e.price * e.quantity)
            .sum()
    }

    pub fn quantity_held(&self) -> f64 {
        let bought: f64 = std::iter::once(&self.base_fill)
            .chain(&self.safety_fills)
            .map(|e| e.quantity)
            .sum();
        bought - self.quantity_exited()
    }

    pub fn quantity_exited(&self) -> f64 {
        self.partial_exits.iter().map(|e| e.quantity).sum()
    }

    /// Commission on every fill so far, partial exits included.
    pub fn commission_paid(&self) -> f64 {
        std::iter::once(&self.base_fill)
            .chain(&self.safety_fills)
            .chain(&self.partial_exits)
            .map(|e| e.commission)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DealState {
    Idle,
    BaseOrderPending { base_order_id: OrderId },
    DealOpen(Box<Deal>),
    Failed { reason: FailureReason },
}

impl DealState {
    pub fn name(&self) -> &'static str {
        match self {
            DealState::Idle => "idle",
            DealState::BaseOrderPending { .. } => "base order pending",
            DealState::DealOpen(_) => "deal open",
            DealState::Failed { .. } => "failed",
        }
    }
}

/// Result of a closed deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealSummary {
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub levels_filled: usize,
    pub levels_total: usize,
    pub invested_quote: f64,
    pub proceeds_quote: f64,
    pub gross_profit: f64,
    pub commission: f64,
    pub net_profit: f64,
    /// Net profit over invested quote, in percent.
    pub roi_percent: f64,
}

impl DealSummary {
    /// Summarize a deal whose last take-profit filled with `exit`. Earlier
    /// partial exits count toward proceeds and quantity; `exit_price` is then
    /// the average over all exits.
    pub fn from_close(deal: &Deal, exit: Execution) -> Self {
        let invested_quote = deal.invested_quote();
        let (proceeds_quote, quantity) = deal
            .partial_exits
            .iter()
            .chain(std::iter::once(&exit))
            .fold((0.0, 0.0), |(quote, qty), e| {
                (quote + e.price * e.quantity, qty + e.quantity)
            });
        let exit_price = if deal.partial_exits.is_empty() || quantity <= 0.0 {
            exit.price
        } else {
            proceeds_quote / quantity
        };
        let gross_profit = proceeds_quote - invested_quote;
        let commission = deal.commission_paid() + exit.commission;
        let net_profit = gross_profit - commission;
        let roi_percent = if invested_quote > 0.0 {
            net_profit / invested_quote * 100.0
        } else {
            0.0
        };
        Self {
            entry_price: deal.base_fill.price,
            exit_price,
            quantity,
            levels_filled: deal.cursor.filled_count(),
            levels_total: deal.cursor.levels().len(),
            invested_quote,
            proceeds_quote,
            gross_profit,
            commission,
            net_profit,
            roi_percent,
        }
    }
}

/// What handling one event (or a start request) did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DealUpdate {
    /// The event does not concern the current deal (stale or foreign order).
    Ignored,
    /// Submitted/Accepted for a deal order.
    Acknowledged,
    Opened {
        entry_price: f64,
        quantity: f64,
        levels: usize,
        take_profit: OrderId,
        safety_order: Option<OrderId>,
    },
    SafetyOrderFilled {
        level_index: usize,
        price: f64,
        quantity: f64,
    },
    TakeProfitPlaced {
        take_profit: OrderId,
        price: f64,
        quantity: f64,
        safety_order: Option<OrderId>,
    },
    SafetyOrderPlaced {
        order_id: OrderId,
        level_index: usize,
    },
    /// A take-profit filled after its cancel was requested, selling only part
    /// of the position. A take-profit for the remainder replaces it.
    PartiallyExited {
        price: f64,
        quantity: f64,
        take_profit: OrderId,
        remaining_quantity: f64,
        safety_order: Option<OrderId>,
    },
    Closed(DealSummary),
    Failed(FailureReason),
}
