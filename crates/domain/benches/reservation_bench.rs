use std::sync::Arc;

use chrono::TimeDelta;
use common::{CustomerId, OrderId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    CartStore, Clock, LineItem, Money, OrderLifecycleManager, Product, ProductCatalog, ProductId,
    ReservationManager, StockLedger, SystemClock,
};
use row_store::{InMemoryRowStore, RowStore};

const UNITS: u32 = u32::MAX / 2;

struct Bench {
    ledger: StockLedger<InMemoryRowStore>,
    carts: CartStore<InMemoryRowStore>,
    reservations: ReservationManager<InMemoryRowStore>,
    lifecycle: OrderLifecycleManager<InMemoryRowStore>,
}

async fn setup(products: usize) -> Bench {
    let store = InMemoryRowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = StockLedger::new(store.clone());
    let catalog = ProductCatalog::new(store.clone());
    let carts = CartStore::new(store.clone(), ledger.clone(), clock.clone());
    let reservations = ReservationManager::new(
        store.clone(),
        ledger.clone(),
        clock.clone(),
        TimeDelta::minutes(15),
    );
    let lifecycle = OrderLifecycleManager::new(
        store.clone(),
        catalog.clone(),
        carts.clone(),
        reservations.clone(),
        clock,
    );

    for i in 0..products {
        let product = Product::new(format!("SKU-{i:03}"), "Bench item", Money::from_cents(100));
        store
            .transaction(vec![
                catalog.insert_op(&product).unwrap(),
                ledger.register_op(&product.id, UNITS).unwrap(),
            ])
            .await
            .unwrap();
    }

    Bench {
        ledger,
        carts,
        reservations,
        lifecycle,
    }
}

fn bench_reserve_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bench = rt.block_on(setup(1));
    let product = ProductId::new("SKU-000");

    c.bench_function("stock/reserve_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                bench.ledger.reserve(&product, 1).await.unwrap();
                bench.ledger.release(&product, 1).await.unwrap();
            });
        });
    });
}

fn bench_reservation_10_products(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bench = rt.block_on(setup(10));
    let lines: Vec<_> = (0..10)
        .map(|i| LineItem::new(format!("SKU-{i:03}"), 1))
        .collect();

    c.bench_function("reservation/create_rollback_10_products", |b| {
        b.iter(|| {
            rt.block_on(async {
                let reservation = bench
                    .reservations
                    .create_reservation(OrderId::new(), &lines)
                    .await
                    .unwrap();
                bench.reservations.rollback(&reservation).await.unwrap();
            });
        });
    });
}

fn bench_checkout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bench = rt.block_on(setup(3));

    c.bench_function("order/cart_to_cancelled_order", |b| {
        b.iter(|| {
            rt.block_on(async {
                let customer = CustomerId::new();
                for i in 0..3 {
                    bench
                        .carts
                        .add_item(customer, &ProductId::new(format!("SKU-{i:03}")), 2)
                        .await
                        .unwrap();
                }
                let snapshot = bench.carts.snapshot(customer).await.unwrap();
                let order = bench.lifecycle.place_order(&snapshot).await.unwrap();
                bench
                    .lifecycle
                    .cancel(order.id(), domain::CancelReason::CustomerRequest)
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_release,
    bench_reservation_10_products,
    bench_checkout,
);
criterion_main!(benches);
