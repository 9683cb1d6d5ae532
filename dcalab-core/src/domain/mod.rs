//! Domain types shared by the ladder, the deal machine and the simulated broker.

pub mod bar;
pub mod fill;
pub mod ids;
pub mod order;

pub use bar::Bar;
pub use fill::Fill;
pub use ids::{OcoGroupId, OrderId};
pub use order::{
    OcoGroup, Order, OrderAuditEntry, OrderRequest, OrderSide, OrderStatus, OrderType,
};
