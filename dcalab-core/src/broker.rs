//! Broker and portfolio collaborator interfaces.
//!
//! The deal machine talks to an execution venue only through these traits.
//! Order status changes arrive later as `OrderEvent`s delivered by the caller;
//! nothing here completes synchronously except handing out an order id.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Bar, OrderId, OrderRequest};

/// Errors returned synchronously by a broker call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    #[error("order {0} not found")]
    UnknownOrder(OrderId),

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Places and cancels orders.
pub trait Broker {
    /// Submit an order. Acceptance, fills and rejections are reported later
    /// as events for the returned id.
    fn submit(&mut self, request: OrderRequest) -> Result<OrderId, BrokerError>;

    /// Request cancellation. Completion is a later `Canceled` event.
    /// Cancelling an order that already reached a terminal status is a no-op.
    fn cancel(&mut self, order_id: OrderId) -> Result<(), BrokerError>;
}

/// Read-only account and market view.
pub trait Portfolio {
    fn cash(&self) -> f64;

    /// Cash plus open position marked at the last close.
    fn value(&self) -> f64;

    fn last_bar(&self) -> Option<&Bar>;
}

/// Anything the deal machine can trade against.
pub trait Venue: Broker + Portfolio {}

impl<T: Broker + Portfolio> Venue for T {}

/// Order status notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub kind: OrderEventKind,
}

impl OrderEvent {
    pub fn new(order_id: OrderId, kind: OrderEventKind) -> Self {
        Self { order_id, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEventKind {
    Submitted,
    Accepted,
    Filled {
        price: f64,
        quantity: f64,
        commission: f64,
    },
    Canceled,
    Rejected {
        reason: String,
    },
    MarginCall,
}

impl OrderEventKind {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            OrderEventKind::Submitted => "submitted",
            OrderEventKind::Accepted => "accepted",
            OrderEventKind::Filled { .. } => "filled",
            OrderEventKind::Canceled => "canceled",
            OrderEventKind::Rejected { .. } => "rejected",
            OrderEventKind::MarginCall => "margin call",
        }
    }
}
