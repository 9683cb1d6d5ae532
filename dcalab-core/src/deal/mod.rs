//! Deal lifecycle: base order, OCO take-profit/safety-order pairs, close.

pub mod machine;
pub mod oco;
pub mod state;

pub use machine::{DealMachine, DealSettings, TakeProfitKind};
pub use oco::{OcoPair, OrderRole};
pub use state::{
    Deal, DealError, DealState, DealSummary, DealUpdate, Execution, FailureReason,
};
