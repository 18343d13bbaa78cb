use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_catalog::{ProductId, VariantId};
use shopledger_core::{
    Aggregate, AggregateRoot, Amount, DomainError, DomainResult, OrganizationId, UserId, checked_line_total, checked_sum,
};
use shopledger_events::Event;
use shopledger_organization::LocationId;

shopledger_core::aggregate_id_newtype!(
    /// Sale identifier (organization-scoped via `organization_id` in events/commands).
    SaleId
);

/// Sale status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    Open,
    Completed,
    Voided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    MobileMoney,
    BankTransfer,
}

/// Sale line. Amounts in smallest currency unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleItem {
    pub line_no: u32,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Amount,
    pub discount: Amount,
    pub line_total: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub method: PaymentMethod,
    pub amount: Amount,
    pub reference: Option<String>,
}

/// Aggregate root: Sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sale {
    id: SaleId,
    organization_id: Option<OrganizationId>,
    location_id: Option<LocationId>,
    cashier: Option<UserId>,
    customer_name: Option<String>,
    status: SaleStatus,
    items: Vec<SaleItem>,
    payments: Vec<Payment>,
    last_line_no: u32,
    version: u64,
    created: bool,
}

impl Sale {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: SaleId) -> Self {
        Self {
            id,
            organization_id: None,
            location_id: None,
            cashier: None,
            customer_name: None,
            status: SaleStatus::Open,
            items: Vec::new(),
            payments: Vec::new(),
            last_line_no: 0,
            version: 0,
            created: false,
        }
    }

    pub fn status(&self) -> SaleStatus {
        self.status
    }

    pub fn items(&self) -> &[SaleItem] {
        &self.items
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn total(&self) -> DomainResult<Amount> {
        checked_sum(self.items.iter().map(|i| i.line_total), "sale total")
    }

    pub fn paid(&self) -> DomainResult<Amount> {
        checked_sum(self.payments.iter().map(|p| p.amount), "amount paid")
    }
}

impl AggregateRoot for Sale {
    type Id = SaleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenSale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSale {
    pub organization_id: OrganizationId,
    pub sale_id: SaleId,
    pub location_id: LocationId,
    pub cashier: UserId,
    pub customer_name: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub organization_id: OrganizationId,
    pub sale_id: SaleId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Amount,
    pub discount: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub organization_id: OrganizationId,
    pub sale_id: SaleId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub organization_id: OrganizationId,
    pub sale_id: SaleId,
    pub method: PaymentMethod,
    pub amount: Amount,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteSale {
    pub organization_id: OrganizationId,
    pub sale_id: SaleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidSale {
    pub organization_id: OrganizationId,
    pub sale_id: SaleId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleCommand {
    OpenSale(OpenSale),
    AddItem(AddItem),
    RemoveItem(RemoveItem),
    RecordPayment(RecordPayment),
    CompleteSale(CompleteSale),
    VoidSale(VoidSale),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleOpened {
    pub organization_id: OrganizationId,
    pub sale_id: SaleId,
    pub location_id: LocationId,
    pub cashier: UserId,
    pub customer_name: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub organization_id: OrganizationId,
    pub sale_id: SaleId,
    pub item: SaleItem,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub organization_id: OrganizationId,
    pub sale_id: SaleId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub organization_id: OrganizationId,
    pub sale_id: SaleId,
    pub payment: Payment,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SaleCompleted. Carries everything the stock reactor needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleCompleted {
    pub organization_id: OrganizationId,
    pub sale_id: SaleId,
    pub location_id: LocationId,
    pub cashier: UserId,
    pub lines: Vec<SaleItem>,
    pub total: Amount,
    pub paid: Amount,
    pub change_due: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleVoided {
    pub organization_id: OrganizationId,
    pub sale_id: SaleId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleEvent {
    SaleOpened(SaleOpened),
    ItemAdded(ItemAdded),
    ItemRemoved(ItemRemoved),
    PaymentRecorded(PaymentRecorded),
    SaleCompleted(SaleCompleted),
    SaleVoided(SaleVoided),
}

impl Event for SaleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SaleEvent::SaleOpened(_) => "sales.sale.opened",
            SaleEvent::ItemAdded(_) => "sales.sale.item_added",
            SaleEvent::ItemRemoved(_) => "sales.sale.item_removed",
            SaleEvent::PaymentRecorded(_) => "sales.sale.payment_recorded",
            SaleEvent::SaleCompleted(_) => "sales.sale.completed",
            SaleEvent::SaleVoided(_) => "sales.sale.voided",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SaleEvent::SaleOpened(e) => e.occurred_at,
            SaleEvent::ItemAdded(e) => e.occurred_at,
            SaleEvent::ItemRemoved(e) => e.occurred_at,
            SaleEvent::PaymentRecorded(e) => e.occurred_at,
            SaleEvent::SaleCompleted(e) => e.occurred_at,
            SaleEvent::SaleVoided(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Sale {
    type Command = SaleCommand;
    type Event = SaleEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SaleEvent::SaleOpened(e) => {
                self.id = e.sale_id;
                self.organization_id = Some(e.organization_id);
                self.location_id = Some(e.location_id);
                self.cashier = Some(e.cashier);
                self.customer_name = e.customer_name.clone();
                self.status = SaleStatus::Open;
                self.items.clear();
                self.payments.clear();
                self.last_line_no = 0;
                self.created = true;
            }
            SaleEvent::ItemAdded(e) => {
                self.last_line_no = self.last_line_no.max(e.item.line_no);
                self.items.push(e.item.clone());
            }
            SaleEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.line_no != e.line_no);
            }
            SaleEvent::PaymentRecorded(e) => {
                self.payments.push(e.payment.clone());
            }
            SaleEvent::SaleCompleted(_) => {
                self.status = SaleStatus::Completed;
            }
            SaleEvent::SaleVoided(_) => {
                self.status = SaleStatus::Voided;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SaleCommand::OpenSale(cmd) => self.handle_open(cmd),
            SaleCommand::AddItem(cmd) => self.handle_add_item(cmd),
            SaleCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            SaleCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
            SaleCommand::CompleteSale(cmd) => self.handle_complete(cmd),
            SaleCommand::VoidSale(cmd) => self.handle_void(cmd),
        }
    }
}

impl Sale {
    fn ensure_open(&self, organization_id: OrganizationId, sale_id: SaleId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        if self.id != sale_id {
            return Err(DomainError::invariant("sale_id mismatch"));
        }
        if self.status != SaleStatus::Open {
            return Err(DomainError::invariant("sale is no longer open"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenSale) -> Result<Vec<SaleEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sale already exists"));
        }

        let customer_name = cmd
            .customer_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        Ok(vec![SaleEvent::SaleOpened(SaleOpened {
            organization_id: cmd.organization_id,
            sale_id: cmd.sale_id,
            location_id: cmd.location_id,
            cashier: cmd.cashier,
            customer_name,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<SaleEvent>, DomainError> {
        self.ensure_open(cmd.organization_id, cmd.sale_id)?;

        if cmd.description.trim().is_empty() {
            return Err(DomainError::validation("description cannot be empty"));
        }
        let line_total = checked_line_total(cmd.quantity, cmd.unit_price, cmd.discount)?;
        self.total()?
            .checked_add(line_total)
            .ok_or_else(|| DomainError::validation("sale total overflows"))?;

        Ok(vec![SaleEvent::ItemAdded(ItemAdded {
            organization_id: cmd.organization_id,
            sale_id: cmd.sale_id,
            item: SaleItem {
                line_no: self.last_line_no + 1,
                product_id: cmd.product_id,
                variant_id: cmd.variant_id,
                description: cmd.description.trim().to_string(),
                quantity: cmd.quantity,
                unit_price: cmd.unit_price,
                discount: cmd.discount,
                line_total,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<Vec<SaleEvent>, DomainError> {
        self.ensure_open(cmd.organization_id, cmd.sale_id)?;

        if !self.items.iter().any(|i| i.line_no == cmd.line_no) {
            return Err(DomainError::not_found());
        }

        Ok(vec![SaleEvent::ItemRemoved(ItemRemoved {
            organization_id: cmd.organization_id,
            sale_id: cmd.sale_id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_payment(&self, cmd: &RecordPayment) -> Result<Vec<SaleEvent>, DomainError> {
        self.ensure_open(cmd.organization_id, cmd.sale_id)?;

        if cmd.amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        self.paid()?
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::validation("amount paid overflows"))?;

        Ok(vec![SaleEvent::PaymentRecorded(PaymentRecorded {
            organization_id: cmd.organization_id,
            sale_id: cmd.sale_id,
            payment: Payment {
                method: cmd.method,
                amount: cmd.amount,
                reference: cmd.reference.clone(),
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteSale) -> Result<Vec<SaleEvent>, DomainError> {
        self.ensure_open(cmd.organization_id, cmd.sale_id)?;

        if self.items.is_empty() {
            return Err(DomainError::validation("cannot complete a sale without items"));
        }
        let total = self.total()?;
        let paid = self.paid()?;
        if paid < total {
            return Err(DomainError::invariant(format!(
                "sale is underpaid: total {total}, paid {paid}"
            )));
        }
        let (location_id, cashier) = match (self.location_id, self.cashier) {
            (Some(l), Some(c)) => (l, c),
            _ => return Err(DomainError::invariant("sale is missing location or cashier")),
        };

        Ok(vec![SaleEvent::SaleCompleted(SaleCompleted {
            organization_id: cmd.organization_id,
            sale_id: cmd.sale_id,
            location_id,
            cashier,
            lines: self.items.clone(),
            total,
            paid,
            change_due: paid - total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_void(&self, cmd: &VoidSale) -> Result<Vec<SaleEvent>, DomainError> {
        self.ensure_open(cmd.organization_id, cmd.sale_id)?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("void reason cannot be empty"));
        }

        Ok(vec![SaleEvent::SaleVoided(SaleVoided {
            organization_id: cmd.organization_id,
            sale_id: cmd.sale_id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
