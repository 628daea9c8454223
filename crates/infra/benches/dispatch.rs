use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use kontor_core::TenantId;
use kontor_customers::{Customer, CustomerCommand, CustomerDetails, CustomerId};
use kontor_events::{EventEnvelope, InMemoryEventBus};
use kontor_infra::command_dispatcher::CommandDispatcher;
use kontor_infra::event_store::InMemoryEventStore;
use kontor_infra::projections::{Projections, aggregate_types};

type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

fn dispatcher() -> Dispatcher {
    CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
}

fn details(name: String) -> CustomerDetails {
    CustomerDetails {
        name,
        ..CustomerDetails::default()
    }
}

fn make(_: TenantId, id: kontor_core::AggregateId) -> Customer {
    Customer::empty(CustomerId::new(id))
}

fn register(d: &Dispatcher, tenant_id: TenantId, customer_id: CustomerId, name: String) {
    let _ = d.dispatch(
        tenant_id,
        None,
        customer_id.0,
        aggregate_types::CUSTOMER,
        CustomerCommand::Register {
            tenant_id,
            customer_id,
            details: details(name),
            occurred_at: Utc::now(),
        },
        make,
    );
}

fn bench_register(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_register");
    group.throughput(Throughput::Elements(1));
    group.bench_function("customer", |b| {
        let d = dispatcher();
        let tenant = TenantId::new();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            register(&d, tenant, CustomerId::generate(), format!("Kunde {n}"));
        });
    });
    group.finish();
}

/// Update cost grows with stream length because the stream is replayed per command.
fn bench_update_by_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_update_by_history");
    for history in [1usize, 10, 100] {
        let d = dispatcher();
        let tenant = TenantId::new();
        let id = CustomerId::generate();
        register(&d, tenant, id, "Kunde".to_string());
        for i in 1..history {
            let _ = d.dispatch(
                tenant,
                None,
                id.0,
                aggregate_types::CUSTOMER,
                CustomerCommand::Update {
                    tenant_id: tenant,
                    details: details(format!("Kunde {i}")),
                    occurred_at: Utc::now(),
                },
                make,
            );
        }

        group.bench_with_input(BenchmarkId::from_parameter(history), &history, |b, _| {
            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                let dispatched = d.dispatch(
                    tenant,
                    None,
                    id.0,
                    aggregate_types::CUSTOMER,
                    CustomerCommand::Update {
                        tenant_id: tenant,
                        details: details(format!("Kunde x{n}")),
                        occurred_at: Utc::now(),
                    },
                    make,
                );
                black_box(dispatched.is_ok())
            });
        });
    }
    group.finish();
}

fn bench_projection_apply(c: &mut Criterion) {
    let d = dispatcher();
    let tenant = TenantId::new();
    let mut events = Vec::new();
    for i in 0..1_000 {
        let id = CustomerId::generate();
        if let Ok(dispatched) = d.dispatch(
            tenant,
            None,
            id.0,
            aggregate_types::CUSTOMER,
            CustomerCommand::Register {
                tenant_id: tenant,
                customer_id: id,
                details: details(format!("Kunde {i}")),
                occurred_at: Utc::now(),
            },
            make,
        ) {
            events.extend(dispatched.events);
        }
    }

    let mut group = c.benchmark_group("projection_apply");
    group.throughput(Throughput::Elements(events.len() as u64));
    group.bench_function("customers_1000", |b| {
        b.iter(|| {
            let projections = Projections::in_memory();
            projections.apply(black_box(&events));
            black_box(projections.customers.list(tenant).len())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_register, bench_update_by_history, bench_projection_apply);
criterion_main!(benches);
