//! Identifier types shared by every crate in the workspace.

pub mod types;

pub use types::{FactId, OrderId, ParseIdError, PaymentId, ProductId, UserId};
