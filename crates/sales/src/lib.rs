//! Point-of-sale domain module (event-sourced).
//!
//! A sale is opened at a location by a cashier, collects items and payments,
//! and is either completed (stock is then consumed) or voided.

pub mod sale;

pub use sale::{
    AddItem, CompleteSale, ItemAdded, ItemRemoved, OpenSale, Payment, PaymentMethod,
    PaymentRecorded, RecordPayment, RemoveItem, Sale, SaleCommand, SaleCompleted, SaleEvent,
    SaleId, SaleItem, SaleOpened, SaleStatus, SaleVoided, VoidSale,
};
