use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use shopledger_catalog::{ProductId, VariantId};
use shopledger_core::{Aggregate, AggregateRoot, Amount, DomainError, OrganizationId};
use shopledger_events::Event;
use shopledger_organization::LocationId;

shopledger_core::aggregate_id_newtype!(
    /// Purchase order identifier (organization-scoped via `organization_id` in events/commands).
    PurchaseOrderId
);

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseOrderStatus {
    Draft,
    Approved,
    Received,
    Cancelled,
}

/// Purchase order line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_no: u32,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
    pub unit_cost: Amount,
    /// Supplier lot number; generated from the order when absent.
    pub batch_number: Option<String>,
    pub expires_on: Option<NaiveDate>,
}

impl LineItem {
    /// Stock reference used when this line is received, `"<po>:<line>"`.
    pub fn receipt_reference(&self, order_id: PurchaseOrderId) -> String {
        format!("{order_id}:{}", self.line_no)
    }

    pub fn batch_number_or_default(&self, order_id: PurchaseOrderId) -> String {
        self.batch_number
            .clone()
            .unwrap_or_else(|| format!("PO-{order_id}-{}", self.line_no))
    }
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    organization_id: Option<OrganizationId>,
    supplier_name: String,
    location_id: Option<LocationId>,
    status: PurchaseOrderStatus,
    lines: Vec<LineItem>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            organization_id: None,
            supplier_name: String::new(),
            location_id: None,
            status: PurchaseOrderStatus::Draft,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn supplier_name(&self) -> &str {
        &self.supplier_name
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn total_cost(&self) -> Amount {
        self.lines
            .iter()
            .map(|l| (l.quantity as u64).saturating_mul(l.unit_cost))
            .fold(0, u64::saturating_add)
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub supplier_name: String,
    /// Where received goods are stocked.
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine (only allowed in Draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
    pub unit_cost: Amount,
    pub batch_number: Option<String>,
    pub expires_on: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approve {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveGoods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveGoods {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    AddLine(AddLine),
    Approve(Approve),
    ReceiveGoods(ReceiveGoods),
    Cancel(Cancel),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub supplier_name: String,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLineAdded {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub line: LineItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderApproved {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GoodsReceived.
///
/// Carries every line with its receiving location; the stock reactor turns
/// each line into a `ReceiveStock` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceived {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub location_id: LocationId,
    pub lines: Vec<LineItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCancelled {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    PurchaseOrderLineAdded(PurchaseOrderLineAdded),
    PurchaseOrderApproved(PurchaseOrderApproved),
    GoodsReceived(GoodsReceived),
    PurchaseOrderCancelled(PurchaseOrderCancelled),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::PurchaseOrderLineAdded(_) => "purchasing.order.line_added",
            PurchaseOrderEvent::PurchaseOrderApproved(_) => "purchasing.order.approved",
            PurchaseOrderEvent::GoodsReceived(_) => "purchasing.order.goods_received",
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => "purchasing.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderApproved(e) => e.occurred_at,
            PurchaseOrderEvent::GoodsReceived(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.organization_id = Some(e.organization_id);
                self.supplier_name = e.supplier_name.clone();
                self.location_id = Some(e.location_id);
                self.status = PurchaseOrderStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            PurchaseOrderEvent::PurchaseOrderApproved(_) => {
                self.status = PurchaseOrderStatus::Approved;
            }
            PurchaseOrderEvent::GoodsReceived(_) => {
                self.status = PurchaseOrderStatus::Received;
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => {
                self.status = PurchaseOrderStatus::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            PurchaseOrderCommand::Approve(cmd) => self.handle_approve(cmd),
            PurchaseOrderCommand::ReceiveGoods(cmd) => self.handle_receive(cmd),
            PurchaseOrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_order(&self, organization_id: OrganizationId, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        if cmd.supplier_name.trim().is_empty() {
            return Err(DomainError::validation("supplier_name cannot be empty"));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(PurchaseOrderCreated {
            organization_id: cmd.organization_id,
            order_id: cmd.order_id,
            supplier_name: cmd.supplier_name.trim().to_string(),
            location_id: cmd.location_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_order(cmd.organization_id, cmd.order_id)?;

        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invariant("cannot add lines unless purchase order is draft"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let batch_number = cmd
            .batch_number
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);

        Ok(vec![PurchaseOrderEvent::PurchaseOrderLineAdded(PurchaseOrderLineAdded {
            organization_id: cmd.organization_id,
            order_id: cmd.order_id,
            line: LineItem {
                line_no: self.lines.len() as u32 + 1,
                product_id: cmd.product_id,
                variant_id: cmd.variant_id,
                quantity: cmd.quantity,
                unit_cost: cmd.unit_cost,
                batch_number,
                expires_on: cmd.expires_on,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &Approve) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_order(cmd.organization_id, cmd.order_id)?;

        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invariant("only draft purchase orders can be approved"));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot approve purchase order without lines"));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderApproved(PurchaseOrderApproved {
            organization_id: cmd.organization_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveGoods) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_order(cmd.organization_id, cmd.order_id)?;

        if self.status != PurchaseOrderStatus::Approved {
            return Err(DomainError::invariant("only approved purchase orders can be received"));
        }
        let location_id = self
            .location_id
            .ok_or_else(|| DomainError::invariant("purchase order has no receiving location"))?;

        Ok(vec![PurchaseOrderEvent::GoodsReceived(GoodsReceived {
            organization_id: cmd.organization_id,
            order_id: cmd.order_id,
            location_id,
            lines: self.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_order(cmd.organization_id, cmd.order_id)?;

        match self.status {
            PurchaseOrderStatus::Draft | PurchaseOrderStatus::Approved => {}
            PurchaseOrderStatus::Cancelled => return Ok(vec![]),
            PurchaseOrderStatus::Received => {
                return Err(DomainError::invariant("received purchase orders cannot be cancelled"));
            }
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCancelled(PurchaseOrderCancelled {
            organization_id: cmd.organization_id,
            order_id: cmd.order_id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
