use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{Aggregate, AggregateRoot, Amount, DomainError, OrganizationId};
use shopledger_events::Event;
use shopledger_organization::{CategoryId, normalize_name};

shopledger_core::aggregate_id_newtype!(
    /// Product identifier (organization-scoped via `organization_id` in events/commands).
    ProductId
);

shopledger_core::aggregate_id_newtype!(VariantId);

/// Order in which stock batches of a product are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuationMethod {
    /// First in, first out.
    #[default]
    Fifo,
    /// Last in, first out.
    Lifo,
    /// First expired, first out.
    Fefo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: VariantId,
    pub sku: String,
    pub name: String,
    /// `None` means the product price applies.
    pub unit_price: Option<Amount>,
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    organization_id: Option<OrganizationId>,
    sku: String,
    name: String,
    category_id: Option<CategoryId>,
    unit_price: Amount,
    valuation: ValuationMethod,
    reorder_level: i64,
    status: ProductStatus,
    variants: Vec<Variant>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            organization_id: None,
            sku: String::new(),
            name: String::new(),
            category_id: None,
            unit_price: 0,
            valuation: ValuationMethod::Fifo,
            reorder_level: 0,
            status: ProductStatus::Draft,
            variants: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category_id(&self) -> Option<CategoryId> {
        self.category_id
    }

    pub fn unit_price(&self) -> Amount {
        self.unit_price
    }

    pub fn valuation(&self) -> ValuationMethod {
        self.valuation
    }

    pub fn reorder_level(&self) -> i64 {
        self.reorder_level
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variant(&self, variant_id: VariantId) -> Option<&Variant> {
        self.variants.iter().find(|v| v.variant_id == variant_id)
    }

    /// Selling price of the product or one of its variants.
    ///
    /// A variant without its own price sells at the product price.
    pub fn price_for(&self, variant_id: Option<VariantId>) -> Result<Amount, DomainError> {
        match variant_id {
            None => Ok(self.unit_price),
            Some(id) => {
                let variant = self.variant(id).ok_or_else(DomainError::not_found)?;
                Ok(variant.unit_price.unwrap_or(self.unit_price))
            }
        }
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category_id: Option<CategoryId>,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: Amount,
    pub valuation: ValuationMethod,
    pub reorder_level: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddVariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddVariant {
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub sku: String,
    pub name: String,
    pub unit_price: Option<Amount>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePrice. `variant_id = None` reprices the product itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePrice {
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub unit_price: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateProduct {
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    AddVariant(AddVariant),
    UpdatePrice(UpdatePrice),
    ActivateProduct(ActivateProduct),
    ArchiveProduct(ArchiveProduct),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub unit_price: Amount,
    pub valuation: ValuationMethod,
    pub reorder_level: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantAdded {
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub sku: String,
    pub name: String,
    pub unit_price: Option<Amount>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdated {
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub unit_price: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductActivated {
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    VariantAdded(VariantAdded),
    PriceUpdated(PriceUpdated),
    ProductActivated(ProductActivated),
    ProductArchived(ProductArchived),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "catalog.product.created",
            ProductEvent::VariantAdded(_) => "catalog.product.variant_added",
            ProductEvent::PriceUpdated(_) => "catalog.product.price_updated",
            ProductEvent::ProductActivated(_) => "catalog.product.activated",
            ProductEvent::ProductArchived(_) => "catalog.product.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::VariantAdded(e) => e.occurred_at,
            ProductEvent::PriceUpdated(e) => e.occurred_at,
            ProductEvent::ProductActivated(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.organization_id = Some(e.organization_id);
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.category_id = e.category_id;
                self.unit_price = e.unit_price;
                self.valuation = e.valuation;
                self.reorder_level = e.reorder_level;
                self.status = ProductStatus::Draft;
                self.variants.clear();
                self.created = true;
            }
            ProductEvent::VariantAdded(e) => {
                self.variants.push(Variant {
                    variant_id: e.variant_id,
                    sku: e.sku.clone(),
                    name: e.name.clone(),
                    unit_price: e.unit_price,
                });
            }
            ProductEvent::PriceUpdated(e) => match e.variant_id {
                None => self.unit_price = e.unit_price,
                Some(id) => {
                    if let Some(v) = self.variants.iter_mut().find(|v| v.variant_id == id) {
                        v.unit_price = Some(e.unit_price);
                    }
                }
            },
            ProductEvent::ProductActivated(_) => {
                self.status = ProductStatus::Active;
            }
            ProductEvent::ProductArchived(_) => {
                self.status = ProductStatus::Archived;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::AddVariant(cmd) => self.handle_add_variant(cmd),
            ProductCommand::UpdatePrice(cmd) => self.handle_update_price(cmd),
            ProductCommand::ActivateProduct(cmd) => self.handle_activate(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Product {
    fn ensure_modifiable(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("archived products cannot be modified"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        let sku = cmd.sku.trim();
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.reorder_level < 0 {
            return Err(DomainError::validation("reorder_level cannot be negative"));
        }

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            organization_id: cmd.organization_id,
            product_id: cmd.product_id,
            sku: sku.to_string(),
            name: cmd.name.trim().to_string(),
            category_id: cmd.category_id,
            unit_price: cmd.unit_price,
            valuation: cmd.valuation,
            reorder_level: cmd.reorder_level,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_variant(&self, cmd: &AddVariant) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_modifiable(cmd.organization_id, cmd.product_id)?;

        let sku = cmd.sku.trim();
        if sku.is_empty() {
            return Err(DomainError::validation("variant sku cannot be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("variant name cannot be empty"));
        }
        if self.variant(cmd.variant_id).is_some() {
            return Err(DomainError::conflict("variant id already in use"));
        }
        let wanted = normalize_name(sku);
        let taken = normalize_name(&self.sku) == wanted
            || self.variants.iter().any(|v| normalize_name(&v.sku) == wanted);
        if taken {
            return Err(DomainError::duplicate("sku", sku));
        }

        Ok(vec![ProductEvent::VariantAdded(VariantAdded {
            organization_id: cmd.organization_id,
            product_id: cmd.product_id,
            variant_id: cmd.variant_id,
            sku: sku.to_string(),
            name: cmd.name.trim().to_string(),
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_price(&self, cmd: &UpdatePrice) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_modifiable(cmd.organization_id, cmd.product_id)?;

        let current = match cmd.variant_id {
            None => Some(self.unit_price),
            Some(id) => self.variant(id).ok_or_else(DomainError::not_found)?.unit_price,
        };
        if current == Some(cmd.unit_price) {
            return Ok(vec![]);
        }

        Ok(vec![ProductEvent::PriceUpdated(PriceUpdated {
            organization_id: cmd.organization_id,
            product_id: cmd.product_id,
            variant_id: cmd.variant_id,
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_modifiable(cmd.organization_id, cmd.product_id)?;

        if self.status == ProductStatus::Active {
            return Ok(vec![]);
        }

        Ok(vec![ProductEvent::ProductActivated(ProductActivated {
            organization_id: cmd.organization_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_modifiable(cmd.organization_id, cmd.product_id)?;

        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            organization_id: cmd.organization_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn created(org: OrganizationId) -> Product {
        let product_id = ProductId::generate();
        let mut product = Product::empty(product_id);
        let events = product
            .handle(&ProductCommand::CreateProduct(CreateProduct {
                organization_id: org,
                product_id,
                sku: " TEA-001 ".into(),
                name: "Green tea".into(),
                category_id: None,
                unit_price: 450,
                valuation: ValuationMethod::Fefo,
                reorder_level: 5,
                occurred_at: now(),
            }))
            .unwrap();
        product.apply(&events[0]);
        product
    }

    fn add_variant(product: &mut Product, org: OrganizationId, sku: &str, price: Option<Amount>) -> Result<VariantId, DomainError> {
        let variant_id = VariantId::generate();
        let events = product.handle(&ProductCommand::AddVariant(AddVariant {
            organization_id: org,
            product_id: *product.id(),
            variant_id,
            sku: sku.into(),
            name: "Large".into(),
            unit_price: price,
            occurred_at: now(),
        }))?;
        for e in &events {
            product.apply(e);
        }
        Ok(variant_id)
    }

    #[test]
    fn create_trims_sku_and_starts_as_draft() {
        let product = created(OrganizationId::new());
        assert_eq!(product.sku(), "TEA-001");
        assert_eq!(product.status(), ProductStatus::Draft);
        assert_eq!(product.valuation(), ValuationMethod::Fefo);
    }

    #[test]
    fn empty_sku_is_rejected() {
        let product = Product::empty(ProductId::generate());
        let err = product
            .handle(&ProductCommand::CreateProduct(CreateProduct {
                organization_id: OrganizationId::new(),
                product_id: *product.id(),
                sku: "   ".into(),
                name: "x".into(),
                category_id: None,
                unit_price: 1,
                valuation: ValuationMethod::Fifo,
                reorder_level: 0,
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn variant_price_falls_back_to_product_price() {
        let org = OrganizationId::new();
        let mut product = created(org);
        let plain = add_variant(&mut product, org, "TEA-001-S", None).unwrap();
        let priced = add_variant(&mut product, org, "TEA-001-L", Some(600)).unwrap();

        assert_eq!(product.price_for(None).unwrap(), 450);
        assert_eq!(product.price_for(Some(plain)).unwrap(), 450);
        assert_eq!(product.price_for(Some(priced)).unwrap(), 600);
        assert_eq!(
            product.price_for(Some(VariantId::generate())),
            Err(DomainError::NotFound)
        );
    }

    #[test]
    fn variant_sku_must_be_unique_within_product() {
        let org = OrganizationId::new();
        let mut product = created(org);
        add_variant(&mut product, org, "TEA-L", None).unwrap();

        assert!(matches!(
            add_variant(&mut product, org, "tea-l", None),
            Err(DomainError::Duplicate(_))
        ));
        assert!(matches!(
            add_variant(&mut product, org, "tea-001", None),
            Err(DomainError::Duplicate(_))
        ));
    }

    #[test]
    fn unchanged_price_emits_nothing() {
        let org = OrganizationId::new();
        let product = created(org);
        let events = product
            .handle(&ProductCommand::UpdatePrice(UpdatePrice {
                organization_id: org,
                product_id: *product.id(),
                variant_id: None,
                unit_price: 450,
                occurred_at: now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn archived_product_cannot_be_modified() {
        let org = OrganizationId::new();
        let mut product = created(org);
        let events = product
            .handle(&ProductCommand::ArchiveProduct(ArchiveProduct {
                organization_id: org,
                product_id: *product.id(),
                occurred_at: now(),
            }))
            .unwrap();
        product.apply(&events[0]);

        let err = product
            .handle(&ProductCommand::UpdatePrice(UpdatePrice {
                organization_id: org,
                product_id: *product.id(),
                variant_id: None,
                unit_price: 500,
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn other_organization_cannot_touch_product() {
        let mut product = created(OrganizationId::new());
        let err = add_variant(&mut product, OrganizationId::new(), "X", None).unwrap_err();
        assert_eq!(err, DomainError::invariant("organization mismatch"));
    }
}
