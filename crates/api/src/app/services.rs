//! Infrastructure wiring: event store, bus, dispatcher, projections and the
//! background workers that keep read models and stock in step with the log.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use shopledger_catalog::ProductId;
use shopledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, OrganizationId};
use shopledger_events::{EventEnvelope, InMemoryEventBus};
use shopledger_expenses::{ExpenseId, WorkflowDefinition, WorkflowId};
use shopledger_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{InMemoryEventStore, StoredEvent},
    projections::{
        CatalogProjection, ExpenseReadModel, ExpensesProjection, NotificationsProjection,
        OrganizationReadModel, OrganizationsProjection, ProductReadModel, ProjectionSet,
        PurchaseOrderReadModel, PurchasesProjection, SaleReadModel, SalesProjection, StockLevel,
        StockProjection, WorkflowsProjection,
    },
    reactors::{Checkout, CheckoutError, ProductInfo, StockReactor},
    read_model::InMemoryOrgStore,
    workers::{ProjectionWorker, WorkerHandle},
};
use shopledger_inventory::{ConsumeStock, StockItemId};
use shopledger_purchasing::PurchaseOrderId;
use shopledger_sales::{CompleteSale, SaleId};

type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;
type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<Bus>>;
type Store<K, V> = Arc<InMemoryOrgStore<K, V>>;
type Reactor = StockReactor<Arc<InMemoryEventStore>, Arc<Bus>>;

/// Shared application state handed to every handler.
///
/// Queries go to the projections (eventually consistent); commands go through
/// the dispatcher.
pub struct AppServices {
    dispatcher: Arc<Dispatcher>,
    stock_reactor: Arc<Reactor>,
    pub organizations: Arc<OrganizationsProjection<Store<OrganizationId, OrganizationReadModel>>>,
    pub catalog: Arc<CatalogProjection<Store<ProductId, ProductReadModel>>>,
    pub stock: Arc<StockProjection<Store<StockItemId, StockLevel>>>,
    pub sales: Arc<SalesProjection<Store<SaleId, SaleReadModel>>>,
    pub purchases: Arc<PurchasesProjection<Store<PurchaseOrderId, PurchaseOrderReadModel>>>,
    pub expenses: Arc<ExpensesProjection<Store<ExpenseId, ExpenseReadModel>>>,
    pub workflows: Arc<WorkflowsProjection<Store<WorkflowId, WorkflowDefinition>>>,
    pub notifications: Arc<NotificationsProjection>,
    _workers: Vec<WorkerHandle>,
}

impl AppServices {
    /// Run a command through the event-sourcing pipeline.
    pub fn dispatch<A>(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
        aggregate_type: &'static str,
        command: A::Command,
        make_aggregate: impl FnOnce(OrganizationId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: shopledger_events::Event + Serialize + DeserializeOwned,
    {
        self.dispatcher
            .dispatch(organization_id, aggregate_id, aggregate_type, command, make_aggregate)
    }

    /// Rehydrate an aggregate that must already exist.
    pub fn load_existing<A>(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(OrganizationId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let aggregate = self.dispatcher.load(organization_id, aggregate_id, make_aggregate)?;
        if aggregate.version() == 0 {
            return Err(DispatchError::NotFound);
        }
        Ok(aggregate)
    }

    /// Complete a sale, consuming its stock in the same step.
    pub fn complete_sale(&self, command: CompleteSale) -> Result<Checkout, CheckoutError> {
        self.stock_reactor.complete_sale(command)
    }

    /// Consume stock outside a sale.
    pub fn consume_stock(&self, command: ConsumeStock) -> Result<Vec<StoredEvent>, DispatchError> {
        self.stock_reactor.consume(command)
    }
}

pub fn build_services() -> io::Result<AppServices> {
    // In-memory infra wiring: store + bus + projections.
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<Bus> = Arc::new(InMemoryEventBus::new());
    let dispatcher: Arc<Dispatcher> = Arc::new(CommandDispatcher::new(store, bus.clone()));

    let organizations: Arc<OrganizationsProjection<Store<OrganizationId, OrganizationReadModel>>> =
        Arc::new(OrganizationsProjection::new(Arc::new(InMemoryOrgStore::new())));
    let catalog: Arc<CatalogProjection<Store<ProductId, ProductReadModel>>> =
        Arc::new(CatalogProjection::new(Arc::new(InMemoryOrgStore::new())));
    let stock: Arc<StockProjection<Store<StockItemId, StockLevel>>> =
        Arc::new(StockProjection::new(Arc::new(InMemoryOrgStore::new())));
    let sales: Arc<SalesProjection<Store<SaleId, SaleReadModel>>> =
        Arc::new(SalesProjection::new(Arc::new(InMemoryOrgStore::new())));
    let purchases: Arc<PurchasesProjection<Store<PurchaseOrderId, PurchaseOrderReadModel>>> =
        Arc::new(PurchasesProjection::new(Arc::new(InMemoryOrgStore::new())));
    let expenses: Arc<ExpensesProjection<Store<ExpenseId, ExpenseReadModel>>> =
        Arc::new(ExpensesProjection::new(Arc::new(InMemoryOrgStore::new())));
    let workflows: Arc<WorkflowsProjection<Store<WorkflowId, WorkflowDefinition>>> =
        Arc::new(WorkflowsProjection::new(Arc::new(InMemoryOrgStore::new())));
    let notifications = Arc::new(NotificationsProjection::new());

    let projections = ProjectionSet::new()
        .with(organizations.clone())
        .with(catalog.clone())
        .with(stock.clone())
        .with(sales.clone())
        .with(purchases.clone())
        .with(expenses.clone())
        .with(workflows.clone())
        .with(notifications.clone());

    // The reactor reads valuation and reorder level from the catalog read model.
    let lookup = catalog.clone();
    let stock_reactor = Arc::new(StockReactor::new(
        dispatcher.clone(),
        Arc::new(move |organization_id: OrganizationId, product_id: ProductId| {
            lookup.get(organization_id, &product_id).map(|p| ProductInfo {
                valuation: p.valuation,
                reorder_level: p.reorder_level,
            })
        }),
    ));

    let reactor = stock_reactor.clone();

    // Background subscribers: bus -> projections, bus -> stock reactor.
    let projection_worker =
        ProjectionWorker::spawn("projections", bus.as_ref(), None, move |env: EventEnvelope<JsonValue>| {
            projections.apply_envelope(&env);
            Ok::<(), Infallible>(())
        })?;

    let reactor_worker =
        ProjectionWorker::spawn("stock-reactor", bus.as_ref(), None, move |env: EventEnvelope<JsonValue>| {
            if !reactor.handles(env.aggregate_type()) {
                return Ok(());
            }
            reactor.react(&env).map(|reaction| {
                if !reaction.applied.is_empty() {
                    tracing::debug!(
                        event_id = %env.event_id(),
                        applied = reaction.applied.len(),
                        failed = reaction.failed.len(),
                        "stock reaction"
                    );
                }
            })
        })?;

    Ok(AppServices {
        dispatcher,
        stock_reactor,
        organizations,
        catalog,
        stock,
        sales,
        purchases,
        expenses,
        workflows,
        notifications,
        _workers: vec![projection_worker, reactor_worker],
    })
}
