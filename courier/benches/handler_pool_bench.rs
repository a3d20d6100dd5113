//! Benchmarks for handler pooling and message serialization.

use courier::handlers::{HandlerFactory, HandlerRegistration, HandlerRegistry, MessageHandler};
use courier::message::TransportMessage;
use courier::serialization::{JsonSerializer, Serializer};
use courier::testing::RecordingHandler;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn factory(reusable: bool) -> HandlerFactory {
    let registry = HandlerRegistry::new();
    registry
        .register(HandlerRegistration::new("OrderPlaced", move || {
            Arc::new(RecordingHandler::new("OrderPlaced").reusable(reusable)) as Arc<dyn MessageHandler>
        }))
        .unwrap();
    HandlerFactory::with_registry(registry)
}

fn handler_pool_benchmark(c: &mut Criterion) {
    let message = TransportMessage::new("OrderPlaced", br#"{"order":42}"#.to_vec());

    let pooled = factory(true);
    c.bench_function("get_release_reusable", |b| {
        b.iter(|| {
            let handler = pooled.get_handler(black_box(&message)).unwrap();
            pooled.release_handler(handler);
        });
    });

    let transient = factory(false);
    c.bench_function("get_release_transient", |b| {
        b.iter(|| {
            let handler = transient.get_handler(black_box(&message)).unwrap();
            transient.release_handler(handler);
        });
    });
}

fn serialization_benchmark(c: &mut Criterion) {
    let serializer = JsonSerializer::new();
    let mut message = TransportMessage::new("OrderPlaced", vec![7; 512]);
    message.register_failure("timeout", courier::utils::now_utc());

    c.bench_function("json_round_trip", |b| {
        b.iter(|| {
            let stream = serializer.serialize(black_box(&message)).unwrap();
            serializer.deserialize(&stream).unwrap()
        });
    });
}

criterion_group!(benches, handler_pool_benchmark, serialization_benchmark);
criterion_main!(benches);
