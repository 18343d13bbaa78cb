use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use shopledger_catalog::{ProductId, ValuationMethod};
use shopledger_core::{ExpectedVersion, OrganizationId};
use shopledger_events::{EventEnvelope, InMemoryEventBus};
use shopledger_infra::command_dispatcher::CommandDispatcher;
use shopledger_infra::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
use shopledger_infra::projections::{Projection, StockProjection};
use shopledger_infra::read_model::InMemoryOrgStore;
use shopledger_infra::streams;
use shopledger_inventory::{
    ConsumeStock, ConsumptionReason, InventoryCommand, InventoryEvent, ReceiveStock, StockBatch,
    StockItem, StockItemId, allocate,
};
use shopledger_organization::LocationId;
use std::sync::Arc;

type Dispatcher = CommandDispatcher<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>>;

struct StockFixture {
    dispatcher: Dispatcher,
    organization_id: OrganizationId,
    product_id: ProductId,
    location_id: LocationId,
    stock_item_id: StockItemId,
}

impl StockFixture {
    fn new() -> Self {
        let bus = Arc::new(InMemoryEventBus::new());
        let product_id = ProductId::generate();
        let location_id = LocationId::generate();
        Self {
            dispatcher: CommandDispatcher::new(InMemoryEventStore::new(), bus),
            organization_id: OrganizationId::new(),
            product_id,
            location_id,
            stock_item_id: StockItemId::derive(product_id, None, location_id),
        }
    }

    fn receive(&self, reference: String, quantity: i64) {
        let cmd = ReceiveStock {
            organization_id: self.organization_id,
            stock_item_id: self.stock_item_id,
            product_id: self.product_id,
            variant_id: None,
            location_id: self.location_id,
            batch_number: reference.clone(),
            quantity,
            unit_cost: 450,
            expires_on: None,
            reorder_level: 10,
            reference,
            occurred_at: Utc::now(),
        };
        self.dispatch(InventoryCommand::ReceiveStock(cmd));
    }

    fn dispatch(&self, cmd: InventoryCommand) {
        self.dispatcher
            .dispatch(
                self.organization_id,
                self.stock_item_id.0,
                streams::STOCK_ITEM,
                cmd,
                |_, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();
    }
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_execution_latency");
    group.sample_size(500);

    // First receipt of a fresh stock item (no history).
    group.bench_function("receive_stock_fresh", |b| {
        b.iter_batched(
            StockFixture::new,
            |fixture| fixture.receive(black_box("PO-1:1".to_string()), 100),
            BatchSize::SmallInput,
        );
    });

    // Consumption against an item that already has a history to rehydrate.
    for history in [10usize, 100] {
        group.bench_with_input(
            BenchmarkId::new("consume_with_history", history),
            &history,
            |b, &history| {
                let fixture = StockFixture::new();
                for i in 0..history {
                    fixture.receive(format!("PO-{i}:1"), 1_000_000);
                }
                let mut n = 0u64;
                b.iter(|| {
                    n += 1;
                    fixture.dispatch(InventoryCommand::ConsumeStock(ConsumeStock {
                        organization_id: fixture.organization_id,
                        stock_item_id: fixture.stock_item_id,
                        quantity: black_box(1),
                        method: ValuationMethod::Fifo,
                        reason: ConsumptionReason::Sale,
                        reference: format!("sale-{n}:1"),
                        occurred_at: Utc::now(),
                    }));
                });
            },
        );
    }

    group.finish();
}

fn bench_batch_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_allocation");

    for batch_count in [10u64, 100, 1000] {
        let batches: Vec<StockBatch> = (1..=batch_count)
            .map(|seq| StockBatch {
                receipt_seq: seq,
                batch_number: format!("B{seq}"),
                quantity_received: 10,
                quantity_remaining: 10,
                unit_cost: 100 + seq,
                expires_on: chrono::NaiveDate::from_ymd_opt(2027, 1, 1)
                    .and_then(|d| d.checked_add_days(chrono::Days::new(seq % 90))),
            })
            .collect();
        // Half of all stock, so every method walks many batches.
        let quantity = (batch_count * 5) as i64;

        group.throughput(Throughput::Elements(batch_count));
        for method in [ValuationMethod::Fifo, ValuationMethod::Lifo, ValuationMethod::Fefo] {
            group.bench_with_input(
                BenchmarkId::new(format!("{method:?}"), batch_count),
                &batches,
                |b, batches| b.iter(|| black_box(allocate(batches, quantity, method).unwrap())),
            );
        }
    }

    group.finish();
}

fn bench_projection_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild");

    for event_count in [100usize, 1000] {
        let fixture = StockFixture::new();
        for i in 0..event_count {
            fixture.receive(format!("PO-{i}:1"), 5);
        }
        let envelopes: Vec<_> = fixture
            .dispatcher
            .store()
            .all_events(fixture.organization_id)
            .unwrap()
            .iter()
            .map(|e| e.to_envelope())
            .collect();

        group.throughput(Throughput::Elements(event_count as u64));
        group.bench_with_input(BenchmarkId::new("stock", event_count), &envelopes, |b, envelopes| {
            let projection = StockProjection::new(InMemoryOrgStore::new());
            b.iter(|| projection.rebuild(fixture.organization_id, black_box(envelopes)).unwrap());
        });
    }

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");

    for batch_size in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(BenchmarkId::new("batch_append", batch_size), &batch_size, |b, &size| {
            let store = InMemoryEventStore::new();
            let organization_id = OrganizationId::new();
            let stock_item_id = StockItemId::generate();
            b.iter(|| {
                let events: Vec<UncommittedEvent> = (0..size)
                    .map(|i| {
                        let event = InventoryEvent::ReorderLevelSet(shopledger_inventory::ReorderLevelSet {
                            organization_id,
                            stock_item_id,
                            level: i as i64,
                            occurred_at: Utc::now(),
                        });
                        UncommittedEvent::from_typed(
                            organization_id,
                            stock_item_id.0,
                            streams::STOCK_ITEM,
                            uuid::Uuid::now_v7(),
                            &event,
                        )
                        .unwrap()
                    })
                    .collect();
                black_box(store.append(events, ExpectedVersion::Any).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_batch_allocation,
    bench_projection_rebuild,
    bench_event_append_throughput
);
criterion_main!(benches);
