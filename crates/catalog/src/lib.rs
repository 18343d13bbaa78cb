//! Catalog domain module (event-sourced).
//!
//! Products, their variants, selling prices and the stock valuation method
//! used when their batches are consumed.

pub mod product;

pub use product::{
    ActivateProduct, AddVariant, ArchiveProduct, CreateProduct, PriceUpdated, Product,
    ProductActivated, ProductArchived, ProductCommand, ProductCreated, ProductEvent, ProductId,
    ProductStatus, UpdatePrice, ValuationMethod, Variant, VariantAdded, VariantId,
};
