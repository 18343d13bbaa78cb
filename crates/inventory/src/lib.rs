//! Inventory domain module (event-sourced).
//!
//! Stock is tracked per (product, variant, location) as a set of received
//! batches. Consumption allocates across batches by the product's valuation
//! method and never drives a batch below zero.

pub mod allocation;
pub mod stock;

pub use allocation::{BatchAllocation, StockBatch, allocate, cost_of};
pub use stock::{
    BatchReceived, ConsumeStock, ConsumptionReason, InventoryCommand, InventoryEvent,
    ReceiveStock, ReorderLevelSet, SetReorderLevel, StockConsumed, StockItem, StockItemId,
    StockItemOpened,
};
