//! Batch allocation for stock consumption.
//!
//! Pure functions: given the batches of one stock item, decide how much to
//! take from each for a requested quantity.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use shopledger_catalog::ValuationMethod;
use shopledger_core::{Amount, DomainError};

/// A received quantity of one stock item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBatch {
    /// Position of the receipt within the stock item, starting at 1.
    pub receipt_seq: u64,
    pub batch_number: String,
    pub quantity_received: i64,
    pub quantity_remaining: i64,
    pub unit_cost: Amount,
    pub expires_on: Option<NaiveDate>,
}

/// Quantity taken from one batch by a consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocation {
    pub receipt_seq: u64,
    pub batch_number: String,
    pub quantity: i64,
    pub unit_cost: Amount,
}

/// Allocate `quantity` across `batches` in consumption order.
///
/// - FIFO: oldest receipt first.
/// - LIFO: newest receipt first.
/// - FEFO: earliest expiry first; undated batches after dated ones; ties by
///   receipt order.
///
/// Fails without partial allocation when the batches hold less than requested.
pub fn allocate(
    batches: &[StockBatch],
    quantity: i64,
    method: ValuationMethod,
) -> Result<Vec<BatchAllocation>, DomainError> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }

    let mut ordered: Vec<&StockBatch> = batches.iter().filter(|b| b.quantity_remaining > 0).collect();
    match method {
        ValuationMethod::Fifo => ordered.sort_by_key(|b| b.receipt_seq),
        ValuationMethod::Lifo => ordered.sort_by_key(|b| core::cmp::Reverse(b.receipt_seq)),
        ValuationMethod::Fefo => {
            ordered.sort_by_key(|b| (b.expires_on.is_none(), b.expires_on, b.receipt_seq))
        }
    }

    let on_hand = ordered
        .iter()
        .try_fold(0i64, |acc, b| acc.checked_add(b.quantity_remaining))
        .ok_or_else(|| DomainError::validation("on-hand quantity overflows"))?;
    if on_hand < quantity {
        return Err(DomainError::invariant(format!(
            "insufficient stock: requested {quantity}, on hand {on_hand}"
        )));
    }

    let mut outstanding = quantity;
    let mut allocations = Vec::new();
    for batch in ordered {
        if outstanding == 0 {
            break;
        }
        let take = outstanding.min(batch.quantity_remaining);
        allocations.push(BatchAllocation {
            receipt_seq: batch.receipt_seq,
            batch_number: batch.batch_number.clone(),
            quantity: take,
            unit_cost: batch.unit_cost,
        });
        outstanding -= take;
    }

    Ok(allocations)
}

/// Total cost of the allocated quantities.
pub fn cost_of(allocations: &[BatchAllocation]) -> Result<Amount, DomainError> {
    allocations.iter().try_fold(0u64, |acc, a| {
        (a.quantity as u64)
            .checked_mul(a.unit_cost)
            .and_then(|line| acc.checked_add(line))
            .ok_or_else(|| DomainError::validation("cost of goods overflows"))
    })
}
