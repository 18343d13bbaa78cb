//! Purchasing domain module (purchase orders, event-sourced).
//!
//! Business rules only: no IO, no HTTP, no storage. Received goods are turned
//! into stock batches by the infrastructure's stock reactor.

pub mod order;

pub use order::{
    AddLine, Approve, Cancel, CreatePurchaseOrder, GoodsReceived, LineItem, PurchaseOrder,
    PurchaseOrderApproved, PurchaseOrderCancelled, PurchaseOrderCommand, PurchaseOrderCreated,
    PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderLineAdded, PurchaseOrderStatus,
    ReceiveGoods,
};
