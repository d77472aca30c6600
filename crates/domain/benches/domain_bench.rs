use common::UserId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Currency, DomainEvent, Money, Order, OrderItem, Payment, ShippingAddress};

fn address() -> ShippingAddress {
    ShippingAddress {
        street: "1 MG Road".into(),
        city: "Pune".into(),
        state: "MH".into(),
        zip: "411001".into(),
        country: "IN".into(),
    }
}

fn lines(count: usize) -> Vec<OrderItem> {
    (1..=count)
        .map(|i| {
            OrderItem::new(
                format!("SKU-{i:03}").as_str(),
                format!("Product {i}"),
                (i % 5) as u32 + 1,
                Money::new(100 * i as i64, Currency::Inr),
            )
        })
        .collect()
}

fn bench_place_order(c: &mut Criterion) {
    let items = lines(5);

    c.bench_function("domain/place_order_5_lines", |b| {
        b.iter(|| {
            Order::place(UserId::new("bench-user"), items.clone(), address(), None).unwrap();
        });
    });
}

fn bench_sum_lines_100(c: &mut Criterion) {
    let items = lines(100);

    c.bench_function("domain/sum_100_lines", |b| {
        b.iter(|| Order::sum_lines(&items).unwrap());
    });
}

fn bench_payment_event_serialization(c: &mut Criterion) {
    let order = Order::place(UserId::new("bench-user"), lines(3), address(), None).unwrap();
    let payment = Payment::initiate(&order, "order_bench");

    c.bench_function("domain/serialize_payment_completed", |b| {
        b.iter(|| {
            let event = DomainEvent::payment_completed(&payment, &Default::default());
            serde_json::to_vec(&event).unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_place_order,
    bench_sum_lines_100,
    bench_payment_event_serialization,
);
criterion_main!(benches);
