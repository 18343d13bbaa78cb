//! Reactors: event handlers that issue commands to other aggregates.

pub mod stock;

pub use stock::{Checkout, CheckoutError, ProductInfo, ProductLookup, Reaction, ReactorError, StockReactor};
