//! Orders and their status lifecycle.

mod model;
mod status;

pub use model::{Order, OrderItem};
pub use status::OrderStatus;

use common::ProductId;
use thiserror::Error;

use crate::money::Money;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for product {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: i64 },

    /// Invalid price.
    #[error("Invalid price for product {product_id}: {price}")]
    InvalidPrice { product_id: ProductId, price: String },

    /// Order is not in the expected status.
    #[error("Invalid status transition: cannot move from {from} to {to}")]
    InvalidStateTransition { from: OrderStatus, to: OrderStatus },

    /// A recorded total differs from the sum of its line items.
    #[error("Order total {actual} does not match line items ({expected})")]
    TotalMismatch { expected: Money, actual: Money },

    /// The order total does not fit in the money range.
    #[error("Order total overflows")]
    TotalOverflow,
}
