//! DCALab Core: ladder math, deal state machine, sizing search and a simulated broker.
//!
//! This crate contains the trading logic of a DCA bot:
//! - Ladder calculator (safety-order prices, sizes, averages, take-profit targets)
//! - Deal state machine driving one take-profit and one safety order as an OCO pair
//! - Dynamic sizing search bounded by a cash budget
//! - Broker/portfolio traits and a deterministic bar-driven simulated broker

pub mod broker;
pub mod deal;
pub mod domain;
pub mod ladder;
pub mod sim;
pub mod sizing;
