use criterion::{Criterion, criterion_group, criterion_main};
use saga_store::{Data, InMemorySagaStore, SagaId, SagaInstance, SagaStore};

fn make_saga(steps: usize) -> SagaInstance {
    let mut context = Data::new();
    context.insert("orderId".to_string(), serde_json::json!("O1"));
    let mut saga = SagaInstance::new(SagaId::new(), "order-processing", context);
    for i in 0..steps {
        let name = format!("step-{i}");
        saga.start_step(name.as_str(), "commands", Data::new());
        saga.complete_step(&name, true, Data::new(), None);
    }
    saga
}

fn bench_create(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("saga_store/create", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemorySagaStore::new();
                store.create(&make_saga(0)).await.unwrap();
            });
        });
    });
}

fn bench_read_modify_write(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemorySagaStore::new();
    let saga = make_saga(10);
    let saga_id = saga.saga_id();
    rt.block_on(store.create(&saga)).unwrap();

    c.bench_function("saga_store/read_modify_write_10_steps", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut loaded = store.get_by_id(saga_id).await.unwrap().unwrap();
                loaded.touch();
                store.update(&loaded).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_create, bench_read_modify_write);
criterion_main!(benches);
