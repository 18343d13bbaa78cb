use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shopledger_catalog::{ProductId, ValuationMethod, VariantId};
use shopledger_core::{Aggregate, AggregateId, AggregateRoot, Amount, DomainError, OrganizationId};
use shopledger_events::Event;
use shopledger_organization::LocationId;

use crate::allocation::{BatchAllocation, StockBatch, allocate, cost_of};

shopledger_core::aggregate_id_newtype!(
    /// Stock item identifier: one per (product, variant, location).
    StockItemId
);

impl StockItemId {
    /// Deterministic id for the stock of a product (variant) at a location.
    ///
    /// UUIDv5 in the product's namespace, so receipts and consumptions issued
    /// independently land on the same stream.
    pub fn derive(product_id: ProductId, variant_id: Option<VariantId>, location_id: LocationId) -> Self {
        let namespace = *product_id.0.as_uuid();
        let variant = variant_id.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
        let name = format!("{variant}:{location_id}");
        Self(AggregateId::from_uuid(Uuid::new_v5(&namespace, name.as_bytes())))
    }
}

/// Why stock left the shelf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionReason {
    Sale,
    WriteOff,
    Adjustment,
}

/// Aggregate root: StockItem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    id: StockItemId,
    organization_id: Option<OrganizationId>,
    product_id: Option<ProductId>,
    variant_id: Option<VariantId>,
    location_id: Option<LocationId>,
    batches: Vec<StockBatch>,
    reorder_level: i64,
    references: BTreeSet<String>,
    version: u64,
    created: bool,
}

impl StockItem {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: StockItemId) -> Self {
        Self {
            id,
            organization_id: None,
            product_id: None,
            variant_id: None,
            location_id: None,
            batches: Vec::new(),
            reorder_level: 0,
            references: BTreeSet::new(),
            version: 0,
            created: false,
        }
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn batches(&self) -> &[StockBatch] {
        &self.batches
    }

    pub fn on_hand(&self) -> i64 {
        self.batches
            .iter()
            .map(|b| b.quantity_remaining)
            .fold(0, i64::saturating_add)
    }

    pub fn reorder_level(&self) -> i64 {
        self.reorder_level
    }

    /// Whether a receipt or consumption with this reference was already applied.
    pub fn has_applied(&self, reference: &str) -> bool {
        self.references.contains(reference)
    }
}

impl AggregateRoot for StockItem {
    type Id = StockItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ReceiveStock. The first receipt opens the stock item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub organization_id: OrganizationId,
    pub stock_item_id: StockItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub location_id: LocationId,
    pub batch_number: String,
    pub quantity: i64,
    pub unit_cost: Amount,
    pub expires_on: Option<NaiveDate>,
    /// Reorder level recorded when this receipt opens the item.
    pub reorder_level: i64,
    /// Idempotency key, e.g. `"<purchase order>:<line>"`.
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConsumeStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeStock {
    pub organization_id: OrganizationId,
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    pub method: ValuationMethod,
    pub reason: ConsumptionReason,
    /// Idempotency key, e.g. `"<sale>:<line>"`.
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReorderLevel {
    pub organization_id: OrganizationId,
    pub stock_item_id: StockItemId,
    pub level: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    ReceiveStock(ReceiveStock),
    ConsumeStock(ConsumeStock),
    SetReorderLevel(SetReorderLevel),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItemOpened {
    pub organization_id: OrganizationId,
    pub stock_item_id: StockItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub location_id: LocationId,
    pub reorder_level: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceived {
    pub organization_id: OrganizationId,
    pub stock_item_id: StockItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub location_id: LocationId,
    pub receipt_seq: u64,
    pub batch_number: String,
    pub quantity: i64,
    pub unit_cost: Amount,
    pub expires_on: Option<NaiveDate>,
    pub reference: String,
    /// On-hand quantity after the receipt.
    pub on_hand: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockConsumed {
    pub organization_id: OrganizationId,
    pub stock_item_id: StockItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub location_id: LocationId,
    pub quantity: i64,
    pub method: ValuationMethod,
    pub reason: ConsumptionReason,
    pub reference: String,
    pub allocations: Vec<BatchAllocation>,
    pub cost_of_goods: Amount,
    /// On-hand quantity after the consumption.
    pub on_hand: i64,
    pub reorder_level: i64,
    pub occurred_at: DateTime<Utc>,
}

impl StockConsumed {
    pub fn is_low_stock(&self) -> bool {
        self.on_hand <= self.reorder_level
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderLevelSet {
    pub organization_id: OrganizationId,
    pub stock_item_id: StockItemId,
    pub level: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    StockItemOpened(StockItemOpened),
    BatchReceived(BatchReceived),
    StockConsumed(StockConsumed),
    ReorderLevelSet(ReorderLevelSet),
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::StockItemOpened(_) => "inventory.stock.opened",
            InventoryEvent::BatchReceived(_) => "inventory.stock.batch_received",
            InventoryEvent::StockConsumed(_) => "inventory.stock.consumed",
            InventoryEvent::ReorderLevelSet(_) => "inventory.stock.reorder_level_set",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::StockItemOpened(e) => e.occurred_at,
            InventoryEvent::BatchReceived(e) => e.occurred_at,
            InventoryEvent::StockConsumed(e) => e.occurred_at,
            InventoryEvent::ReorderLevelSet(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockItem {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::StockItemOpened(e) => {
                self.id = e.stock_item_id;
                self.organization_id = Some(e.organization_id);
                self.product_id = Some(e.product_id);
                self.variant_id = e.variant_id;
                self.location_id = Some(e.location_id);
                self.reorder_level = e.reorder_level;
                self.batches.clear();
                self.references.clear();
                self.created = true;
            }
            InventoryEvent::BatchReceived(e) => {
                self.batches.push(StockBatch {
                    receipt_seq: e.receipt_seq,
                    batch_number: e.batch_number.clone(),
                    quantity_received: e.quantity,
                    quantity_remaining: e.quantity,
                    unit_cost: e.unit_cost,
                    expires_on: e.expires_on,
                });
                self.references.insert(e.reference.clone());
            }
            InventoryEvent::StockConsumed(e) => {
                for a in &e.allocations {
                    if let Some(b) = self.batches.iter_mut().find(|b| b.receipt_seq == a.receipt_seq) {
                        b.quantity_remaining -= a.quantity;
                    }
                }
                self.references.insert(e.reference.clone());
            }
            InventoryEvent::ReorderLevelSet(e) => {
                self.reorder_level = e.level;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            InventoryCommand::ConsumeStock(cmd) => self.handle_consume(cmd),
            InventoryCommand::SetReorderLevel(cmd) => self.handle_set_reorder_level(cmd),
        }
    }
}

impl StockItem {
    fn ensure_opened(&self, organization_id: OrganizationId, stock_item_id: StockItemId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        if self.id != stock_item_id {
            return Err(DomainError::invariant("stock_item_id mismatch"));
        }
        Ok(())
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<InventoryEvent>, DomainError> {
        if cmd.stock_item_id != StockItemId::derive(cmd.product_id, cmd.variant_id, cmd.location_id) {
            return Err(DomainError::invariant("stock_item_id does not match product/variant/location"));
        }
        if self.created {
            self.ensure_opened(cmd.organization_id, cmd.stock_item_id)?;
            if self.has_applied(&cmd.reference) {
                return Ok(vec![]);
            }
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.batch_number.trim().is_empty() {
            return Err(DomainError::validation("batch_number cannot be empty"));
        }
        if cmd.reference.trim().is_empty() {
            return Err(DomainError::validation("reference cannot be empty"));
        }
        let on_hand = self
            .on_hand()
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::validation("on-hand quantity overflows"))?;

        let mut events = Vec::with_capacity(2);
        if !self.created {
            if cmd.reorder_level < 0 {
                return Err(DomainError::validation("reorder_level cannot be negative"));
            }
            events.push(InventoryEvent::StockItemOpened(StockItemOpened {
                organization_id: cmd.organization_id,
                stock_item_id: cmd.stock_item_id,
                product_id: cmd.product_id,
                variant_id: cmd.variant_id,
                location_id: cmd.location_id,
                reorder_level: cmd.reorder_level,
                occurred_at: cmd.occurred_at,
            }));
        }

        events.push(InventoryEvent::BatchReceived(BatchReceived {
            organization_id: cmd.organization_id,
            stock_item_id: cmd.stock_item_id,
            product_id: cmd.product_id,
            variant_id: cmd.variant_id,
            location_id: cmd.location_id,
            receipt_seq: self.batches.len() as u64 + 1,
            batch_number: cmd.batch_number.trim().to_string(),
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            expires_on: cmd.expires_on,
            reference: cmd.reference.clone(),
            on_hand,
            occurred_at: cmd.occurred_at,
        }));

        Ok(events)
    }

    fn handle_consume(&self, cmd: &ConsumeStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_opened(cmd.organization_id, cmd.stock_item_id)?;

        if self.has_applied(&cmd.reference) {
            return Ok(vec![]);
        }
        if cmd.reference.trim().is_empty() {
            return Err(DomainError::validation("reference cannot be empty"));
        }

        let allocations = allocate(&self.batches, cmd.quantity, cmd.method)?;
        let cost_of_goods = cost_of(&allocations)?;
        let (product_id, location_id) = match (self.product_id, self.location_id) {
            (Some(p), Some(l)) => (p, l),
            _ => return Err(DomainError::invariant("stock item is missing its product or location")),
        };

        Ok(vec![InventoryEvent::StockConsumed(StockConsumed {
            organization_id: cmd.organization_id,
            stock_item_id: cmd.stock_item_id,
            product_id,
            variant_id: self.variant_id,
            location_id,
            quantity: cmd.quantity,
            method: cmd.method,
            reason: cmd.reason,
            reference: cmd.reference.clone(),
            allocations,
            cost_of_goods,
            on_hand: self.on_hand() - cmd.quantity,
            reorder_level: self.reorder_level,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_reorder_level(&self, cmd: &SetReorderLevel) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_opened(cmd.organization_id, cmd.stock_item_id)?;

        if cmd.level < 0 {
            return Err(DomainError::validation("reorder level cannot be negative"));
        }
        if cmd.level == self.reorder_level {
            return Ok(vec![]);
        }

        Ok(vec![InventoryEvent::ReorderLevelSet(ReorderLevelSet {
            organization_id: cmd.organization_id,
            stock_item_id: cmd.stock_item_id,
            level: cmd.level,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        org: OrganizationId,
        product: ProductId,
        location: LocationId,
        item: StockItem,
    }

    impl Fixture {
        fn new() -> Self {
            let product = ProductId::generate();
            let location = LocationId::generate();
            Self {
                org: OrganizationId::new(),
                product,
                location,
                item: StockItem::empty(StockItemId::derive(product, None, location)),
            }
        }

        fn id(&self) -> StockItemId {
            *self.item.id()
        }

        fn run(&mut self, cmd: InventoryCommand) -> Result<Vec<InventoryEvent>, DomainError> {
            let events = self.item.handle(&cmd)?;
            for e in &events {
                self.item.apply(e);
            }
            Ok(events)
        }

        fn receive(&mut self, reference: &str, qty: i64, cost: Amount, expires_on: Option<NaiveDate>) -> Result<Vec<InventoryEvent>, DomainError> {
            let cmd = InventoryCommand::ReceiveStock(ReceiveStock {
                organization_id: self.org,
                stock_item_id: self.id(),
                product_id: self.product,
                variant_id: None,
                location_id: self.location,
                batch_number: format!("LOT-{reference}"),
                quantity: qty,
                unit_cost: cost,
                expires_on,
                reorder_level: 3,
                reference: reference.into(),
                occurred_at: Utc::now(),
            });
            self.run(cmd)
        }

        fn consume(&mut self, reference: &str, qty: i64, method: ValuationMethod) -> Result<Vec<InventoryEvent>, DomainError> {
            let cmd = InventoryCommand::ConsumeStock(ConsumeStock {
                organization_id: self.org,
                stock_item_id: self.id(),
                quantity: qty,
                method,
                reason: ConsumptionReason::Sale,
                reference: reference.into(),
                occurred_at: Utc::now(),
            });
            self.run(cmd)
        }
    }

    #[test]
    fn derived_ids_are_stable_and_distinct_per_location() {
        let product = ProductId::generate();
        let a = LocationId::generate();
        let b = LocationId::generate();
        assert_eq!(StockItemId::derive(product, None, a), StockItemId::derive(product, None, a));
        assert_ne!(StockItemId::derive(product, None, a), StockItemId::derive(product, None, b));
        assert_ne!(
            StockItemId::derive(product, None, a),
            StockItemId::derive(product, Some(VariantId::generate()), a)
        );
    }

    #[test]
    fn first_receipt_opens_the_item() {
        let mut f = Fixture::new();
        let events = f.receive("po-1:1", 10, 200, None).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], InventoryEvent::StockItemOpened(_)));
        assert_eq!(f.item.on_hand(), 10);
        assert_eq!(f.item.reorder_level(), 3);

        let events = f.receive("po-2:1", 5, 210, None).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            InventoryEvent::BatchReceived(e) => {
                assert_eq!(e.receipt_seq, 2);
                assert_eq!(e.on_hand, 15);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn consumption_carries_allocations_cost_and_remaining() {
        let mut f = Fixture::new();
        f.receive("r1", 4, 100, None).unwrap();
        f.receive("r2", 4, 150, None).unwrap();

        let events = f.consume("sale-1:1", 6, ValuationMethod::Fifo).unwrap();
        match &events[0] {
            InventoryEvent::StockConsumed(e) => {
                assert_eq!(e.allocations.len(), 2);
                assert_eq!(e.cost_of_goods, 4 * 100 + 2 * 150);
                assert_eq!(e.on_hand, 2);
                assert!(e.is_low_stock());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(f.item.on_hand(), 2);
        assert_eq!(f.item.batches()[0].quantity_remaining, 0);
        assert_eq!(f.item.batches()[1].quantity_remaining, 2);
    }

    #[test]
    fn stock_never_goes_negative() {
        let mut f = Fixture::new();
        f.receive("r1", 2, 100, None).unwrap();
        let err = f.consume("sale-1:1", 3, ValuationMethod::Lifo).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(f.item.on_hand(), 2);
    }

    #[test]
    fn receipts_that_overflow_on_hand_are_rejected() {
        let mut f = Fixture::new();
        f.receive("r1", i64::MAX, 1, None).unwrap();
        assert_eq!(
            f.receive("r2", 1, 1, None).unwrap_err(),
            DomainError::validation("on-hand quantity overflows")
        );
        assert_eq!(f.item.on_hand(), i64::MAX);
        assert_eq!(f.item.batches().len(), 1);
    }

    #[test]
    fn replayed_references_are_no_ops() {
        let mut f = Fixture::new();
        f.receive("po-1:1", 5, 100, None).unwrap();
        assert!(f.receive("po-1:1", 5, 100, None).unwrap().is_empty());
        assert_eq!(f.item.on_hand(), 5);

        f.consume("sale-9:1", 2, ValuationMethod::Fifo).unwrap();
        assert!(f.consume("sale-9:1", 2, ValuationMethod::Fifo).unwrap().is_empty());
        assert_eq!(f.item.on_hand(), 3);
    }

    #[test]
    fn fefo_consumes_soonest_expiring_batch() {
        let mut f = Fixture::new();
        f.receive("r1", 5, 100, NaiveDate::from_ymd_opt(2027, 3, 1)).unwrap();
        f.receive("r2", 5, 100, NaiveDate::from_ymd_opt(2026, 12, 1)).unwrap();

        f.consume("s1", 3, ValuationMethod::Fefo).unwrap();
        assert_eq!(f.item.batches()[0].quantity_remaining, 5);
        assert_eq!(f.item.batches()[1].quantity_remaining, 2);
    }

    #[test]
    fn consuming_unopened_item_is_not_found() {
        let mut f = Fixture::new();
        assert_eq!(
            f.consume("s1", 1, ValuationMethod::Fifo).unwrap_err(),
            DomainError::NotFound
        );
    }

    #[test]
    fn mismatched_stock_item_id_is_rejected() {
        let mut f = Fixture::new();
        f.item = StockItem::empty(StockItemId::generate());
        assert!(matches!(
            f.receive("r1", 1, 1, None),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn reorder_level_updates() {
        let mut f = Fixture::new();
        f.receive("r1", 1, 1, None).unwrap();
        let org = f.org;
        let id = f.id();
        f.run(InventoryCommand::SetReorderLevel(SetReorderLevel {
            organization_id: org,
            stock_item_id: id,
            level: 12,
            occurred_at: Utc::now(),
        }))
        .unwrap();
        assert_eq!(f.item.reorder_level(), 12);
    }
}
