//! Aggregate type names used as stream discriminators.
//!
//! A stream's aggregate type is fixed by its first event; projections and
//! reactors route envelopes on it.

pub const ORGANIZATION: &str = "organization";
pub const PRODUCT: &str = "catalog.product";
pub const STOCK_ITEM: &str = "inventory.stock";
pub const SALE: &str = "sales.sale";
pub const PURCHASE_ORDER: &str = "purchasing.order";
pub const APPROVAL_WORKFLOW: &str = "expenses.workflow";
pub const EXPENSE: &str = "expenses.expense";
