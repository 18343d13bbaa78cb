//! Stock reactor: keeps stock items in step with sales and purchasing.
//!
//! - `sales.sale` completed → consume each line from its stock item
//! - `purchasing.order` goods received → receive each line as a batch
//!
//! Every command carries a reference derived from the source line, so a
//! redelivered envelope is a no-op at the stock item.
//!
//! Every stock decrement (sale lines and manual consumption) runs under a
//! per-organization lock. [`StockReactor::complete_sale`] checks and consumes
//! stock inside that lock, so two sales can never both claim the same units.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;
use thiserror::Error;

use shopledger_catalog::{ProductId, ValuationMethod, VariantId};
use shopledger_core::{AggregateRoot, OrganizationId};
use shopledger_events::{EventBus, EventEnvelope};
use shopledger_inventory::{
    ConsumeStock, ConsumptionReason, InventoryCommand, ReceiveStock, StockItem, StockItemId,
};
use shopledger_organization::LocationId;
use shopledger_purchasing::{GoodsReceived, PurchaseOrderEvent};
use shopledger_sales::{CompleteSale, Sale, SaleCommand, SaleCompleted, SaleEvent, SaleId, SaleStatus};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::streams;

const MAX_ATTEMPTS: usize = 3;

/// What the reactor needs to know about a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductInfo {
    pub valuation: ValuationMethod,
    pub reorder_level: i64,
}

impl Default for ProductInfo {
    fn default() -> Self {
        Self {
            valuation: ValuationMethod::Fifo,
            reorder_level: 0,
        }
    }
}

pub type ProductLookup = Arc<dyn Fn(OrganizationId, ProductId) -> Option<ProductInfo> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("failed to deserialize {aggregate_type} event: {message}")]
    Deserialize {
        aggregate_type: String,
        message: String,
    },

    #[error(transparent)]
    Lock(#[from] DispatchError),
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("insufficient stock for product {product_id}: {requested} requested, {on_hand} on hand")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        on_hand: i64,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Result of completing a sale: the sale's committed events and the
/// consumption issued for its lines.
#[derive(Debug)]
pub struct Checkout {
    pub events: Vec<StoredEvent>,
    pub reaction: Reaction,
}

/// One mutex per organization.
#[derive(Debug, Default)]
struct StockLocks {
    inner: Mutex<HashMap<OrganizationId, Arc<Mutex<()>>>>,
}

impl StockLocks {
    fn for_organization(&self, organization_id: OrganizationId) -> Result<Arc<Mutex<()>>, DispatchError> {
        let mut map = self.inner.lock().map_err(|_| lock_poisoned())?;
        Ok(map.entry(organization_id).or_default().clone())
    }
}

fn lock_poisoned() -> DispatchError {
    DispatchError::Store(EventStoreError::Unavailable("stock lock poisoned".to_string()))
}

/// Commands issued for one envelope.
#[derive(Debug, Default)]
pub struct Reaction {
    /// References of commands that were accepted (including no-op replays).
    pub applied: Vec<String>,
    /// References of commands that failed, with the failure.
    pub failed: Vec<(String, DispatchError)>,
}

pub struct StockReactor<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    products: ProductLookup,
    locks: StockLocks,
}

impl<S, B> StockReactor<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, products: ProductLookup) -> Self {
        Self {
            dispatcher,
            products,
            locks: StockLocks::default(),
        }
    }

    pub fn handles(&self, aggregate_type: &str) -> bool {
        aggregate_type == streams::SALE || aggregate_type == streams::PURCHASE_ORDER
    }

    pub fn react(&self, envelope: &EventEnvelope<JsonValue>) -> Result<Reaction, ReactorError> {
        let decode_err = |e: serde_json::Error| ReactorError::Deserialize {
            aggregate_type: envelope.aggregate_type().to_string(),
            message: e.to_string(),
        };

        let organization_id = envelope.organization_id();
        match envelope.aggregate_type() {
            streams::SALE => {
                match serde_json::from_value::<SaleEvent>(envelope.payload().clone()).map_err(decode_err)? {
                    SaleEvent::SaleCompleted(e) => {
                        let commands = self.consumptions(&e);
                        Ok(self.locked(organization_id, || self.run(organization_id, commands))?)
                    }
                    _ => Ok(Reaction::default()),
                }
            }
            streams::PURCHASE_ORDER => {
                match serde_json::from_value::<PurchaseOrderEvent>(envelope.payload().clone()).map_err(decode_err)? {
                    PurchaseOrderEvent::GoodsReceived(e) => Ok(self.run(organization_id, self.receipts(&e))),
                    _ => Ok(Reaction::default()),
                }
            }
            _ => Ok(Reaction::default()),
        }
    }

    /// Complete a sale and consume its lines.
    ///
    /// Stock is checked against the stock item aggregates first; a sale whose
    /// lines are not covered stays open. The later replay of the completion
    /// envelope through [`StockReactor::react`] finds every line applied.
    pub fn complete_sale(&self, command: CompleteSale) -> Result<Checkout, CheckoutError> {
        let organization_id = command.organization_id;
        self.locked(organization_id, || -> Result<Checkout, CheckoutError> {
            let sale: Sale = self
                .dispatcher
                .load(organization_id, command.sale_id.0, |_, id| Sale::empty(SaleId::new(id)))?;
            if sale.version() == 0 {
                return Err(DispatchError::NotFound.into());
            }
            if sale.status() == SaleStatus::Open {
                if let Some(location_id) = sale.location_id() {
                    self.ensure_covered(organization_id, location_id, &sale)?;
                }
            }

            let events = self.dispatcher.dispatch(
                organization_id,
                command.sale_id.0,
                streams::SALE,
                SaleCommand::CompleteSale(command.clone()),
                |_, id| Sale::empty(SaleId::new(id)),
            )?;

            let mut reaction = Reaction::default();
            for stored in &events {
                if let Ok(SaleEvent::SaleCompleted(e)) = serde_json::from_value::<SaleEvent>(stored.payload.clone()) {
                    reaction = self.run(organization_id, self.consumptions(&e));
                }
            }
            Ok(Checkout { events, reaction })
        })?
    }

    /// Consume stock outside a sale (write-off, adjustment).
    pub fn consume(&self, command: ConsumeStock) -> Result<Vec<StoredEvent>, DispatchError> {
        let organization_id = command.organization_id;
        let stock_item_id = command.stock_item_id;
        self.locked(organization_id, || {
            self.dispatch_with_retry(organization_id, stock_item_id, InventoryCommand::ConsumeStock(command))
        })?
    }

    fn locked<T>(&self, organization_id: OrganizationId, f: impl FnOnce() -> T) -> Result<T, DispatchError> {
        let lock = self.locks.for_organization(organization_id)?;
        let _guard = lock.lock().map_err(|_| lock_poisoned())?;
        Ok(f())
    }

    fn ensure_covered(
        &self,
        organization_id: OrganizationId,
        location_id: LocationId,
        sale: &Sale,
    ) -> Result<(), CheckoutError> {
        let mut wanted: BTreeMap<(ProductId, Option<VariantId>), i64> = BTreeMap::new();
        for item in sale.items() {
            let entry = wanted.entry((item.product_id, item.variant_id)).or_default();
            *entry = entry.saturating_add(item.quantity);
        }

        for ((product_id, variant_id), requested) in wanted {
            let stock_item_id = StockItemId::derive(product_id, variant_id, location_id);
            let item: StockItem = self
                .dispatcher
                .load(organization_id, stock_item_id.0, |_, id| StockItem::empty(StockItemId::new(id)))?;
            let on_hand = item.on_hand();
            if on_hand < requested {
                return Err(CheckoutError::InsufficientStock {
                    product_id,
                    requested,
                    on_hand,
                });
            }
        }
        Ok(())
    }

    fn run(&self, organization_id: OrganizationId, commands: Vec<(StockItemId, String, InventoryCommand)>) -> Reaction {
        let mut reaction = Reaction::default();
        for (stock_item_id, reference, command) in commands {
            match self.dispatch_with_retry(organization_id, stock_item_id, command) {
                Ok(_) => reaction.applied.push(reference),
                Err(err) => {
                    tracing::warn!(
                        %organization_id,
                        %stock_item_id,
                        reference = %reference,
                        error = %err,
                        "stock command failed"
                    );
                    reaction.failed.push((reference, err));
                }
            }
        }
        reaction
    }

    fn product(&self, organization_id: OrganizationId, product_id: ProductId) -> ProductInfo {
        (self.products)(organization_id, product_id).unwrap_or_default()
    }

    fn consumptions(&self, e: &SaleCompleted) -> Vec<(StockItemId, String, InventoryCommand)> {
        e.lines
            .iter()
            .map(|line| {
                let stock_item_id = StockItemId::derive(line.product_id, line.variant_id, e.location_id);
                let reference = format!("{}:{}", e.sale_id, line.line_no);
                let command = InventoryCommand::ConsumeStock(ConsumeStock {
                    organization_id: e.organization_id,
                    stock_item_id,
                    quantity: line.quantity,
                    method: self.product(e.organization_id, line.product_id).valuation,
                    reason: ConsumptionReason::Sale,
                    reference: reference.clone(),
                    occurred_at: e.occurred_at,
                });
                (stock_item_id, reference, command)
            })
            .collect()
    }

    fn receipts(&self, e: &GoodsReceived) -> Vec<(StockItemId, String, InventoryCommand)> {
        e.lines
            .iter()
            .map(|line| {
                let stock_item_id = StockItemId::derive(line.product_id, line.variant_id, e.location_id);
                let reference = line.receipt_reference(e.order_id);
                let command = InventoryCommand::ReceiveStock(ReceiveStock {
                    organization_id: e.organization_id,
                    stock_item_id,
                    product_id: line.product_id,
                    variant_id: line.variant_id,
                    location_id: e.location_id,
                    batch_number: line.batch_number_or_default(e.order_id),
                    quantity: line.quantity,
                    unit_cost: line.unit_cost,
                    expires_on: line.expires_on,
                    reorder_level: self.product(e.organization_id, line.product_id).reorder_level,
                    reference: reference.clone(),
                    occurred_at: e.occurred_at,
                });
                (stock_item_id, reference, command)
            })
            .collect()
    }

    fn dispatch_with_retry(
        &self,
        organization_id: OrganizationId,
        stock_item_id: StockItemId,
        command: InventoryCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let mut attempt = 1;
        loop {
            let result = self.dispatcher.dispatch(
                organization_id,
                stock_item_id.0,
                streams::STOCK_ITEM,
                command.clone(),
                |_, id| StockItem::empty(StockItemId::new(id)),
            );
            match result {
                Ok(events) => return Ok(events),
                Err(DispatchError::Concurrency(msg)) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(%stock_item_id, attempt, %msg, "retrying stock command after conflict");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
