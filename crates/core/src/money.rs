//! Monetary amounts.
//!
//! Amounts are carried as `u64` in the smallest currency unit (e.g. cents).
//! Currency is an organization-level setting and is not tracked per value.

use crate::error::{DomainError, DomainResult};

/// Amount in minor currency units.
pub type Amount = u64;

/// `quantity * unit_price - discount`, rejecting overflow and discounts larger
/// than the gross line value.
pub fn checked_line_total(quantity: i64, unit_price: Amount, discount: Amount) -> DomainResult<Amount> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    let gross = (quantity as u64)
        .checked_mul(unit_price)
        .ok_or_else(|| DomainError::validation("line total overflows"))?;
    gross
        .checked_sub(discount)
        .ok_or_else(|| DomainError::validation("discount exceeds line total"))
}

/// Sum of `amounts`, rejecting overflow. `what` names the total in the error.
pub fn checked_sum(amounts: impl IntoIterator<Item = Amount>, what: &str) -> DomainResult<Amount> {
    amounts
        .into_iter()
        .try_fold(0u64, |acc, a| acc.checked_add(a))
        .ok_or_else(|| DomainError::validation(format!("{what} overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_total_applies_discount() {
        assert_eq!(checked_line_total(3, 250, 50).unwrap(), 700);
    }

    #[test]
    fn discount_cannot_exceed_gross() {
        assert!(matches!(
            checked_line_total(1, 100, 101),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        assert!(checked_line_total(0, 100, 0).is_err());
    }

    #[test]
    fn sum_rejects_overflow() {
        assert_eq!(checked_sum([1, 2, 3], "total").unwrap(), 6);
        assert_eq!(
            checked_sum([u64::MAX, 1], "total").unwrap_err(),
            DomainError::validation("total overflows")
        );
    }
}
