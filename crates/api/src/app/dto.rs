//! Request bodies. Responses serialize the read models directly.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use shopledger_catalog::{ProductId, ValuationMethod, VariantId};
use shopledger_core::{Amount, UserId};
use shopledger_expenses::{ApprovalMode, ApproverAction, ExpenseStatus, StepCondition};
use shopledger_inventory::ConsumptionReason;
use shopledger_organization::{CategoryId, CategoryKind, LocationId, MemberRole};
use shopledger_purchasing::PurchaseOrderStatus;
use shopledger_sales::PaymentMethod;

// -------------------------
// Organization
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub owner_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: UserId,
    pub display_name: String,
    pub role: MemberRole,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: MemberRole,
}

#[derive(Debug, Deserialize)]
pub struct AddLocationRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddCategoryRequest {
    pub kind: CategoryKind,
    pub name: String,
}

// -------------------------
// Catalog
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub unit_price: Amount,
    #[serde(default)]
    pub valuation: ValuationMethod,
    #[serde(default)]
    pub reorder_level: i64,
}

#[derive(Debug, Deserialize)]
pub struct AddVariantRequest {
    pub sku: String,
    pub name: String,
    pub unit_price: Option<Amount>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePriceRequest {
    pub variant_id: Option<VariantId>,
    pub unit_price: Amount,
}

// -------------------------
// Inventory
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ReceiveStockRequest {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub location_id: LocationId,
    pub batch_number: String,
    pub quantity: i64,
    pub unit_cost: Amount,
    pub expires_on: Option<NaiveDate>,
    /// Idempotency key; generated when omitted.
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub location_id: LocationId,
    pub quantity: i64,
    pub reason: ConsumptionReason,
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReorderLevelRequest {
    pub level: i64,
}

// -------------------------
// Sales
// -------------------------

#[derive(Debug, Deserialize)]
pub struct OpenSaleRequest {
    pub location_id: LocationId,
    pub customer_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddSaleItemRequest {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
    #[serde(default)]
    pub discount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub method: PaymentMethod,
    pub amount: Amount,
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct SalesQuery {
    pub location_id: Option<LocationId>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

// -------------------------
// Purchasing
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseOrderRequest {
    pub supplier_name: String,
    pub location_id: LocationId,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseOrderLineRequest {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
    pub unit_cost: Amount,
    pub batch_number: Option<String>,
    pub expires_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct PurchasesQuery {
    pub status: Option<PurchaseOrderStatus>,
}

// -------------------------
// Workflows
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Deserialize)]
pub struct AddStepRequest {
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<StepCondition>,
    pub actions: Vec<ApproverAction>,
    #[serde(default)]
    pub mode: ApprovalMode,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub amount: Amount,
    pub category_id: CategoryId,
    pub location_id: LocationId,
}

// -------------------------
// Expenses
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateExpenseRequest {
    pub title: String,
    pub amount: Amount,
    pub category_id: CategoryId,
    pub location_id: LocationId,
    pub spent_on: NaiveDate,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateExpenseRequest {
    pub title: Option<String>,
    pub amount: Option<Amount>,
    pub category_id: Option<CategoryId>,
    pub location_id: Option<LocationId>,
    pub spent_on: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveExpenseRequest {
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PayExpenseRequest {
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct ExpensesQuery {
    pub status: Option<ExpenseStatus>,
}

// -------------------------
// Notifications
// -------------------------

#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    #[serde(default)]
    pub unread: bool,
}
