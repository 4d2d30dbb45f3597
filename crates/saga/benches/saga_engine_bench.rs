use std::sync::Arc;
use std::time::Duration;

use common::{Data, SagaId};
use criterion::{Criterion, criterion_group, criterion_main};
use flows::FlowSet;
use messaging::InMemoryBus;
use saga::transition::{self, OutcomeEvent};
use saga::{SagaFlowEngine, UpdateQueueConfig};
use saga_store::{InMemorySagaStore, SagaInstance};

const FLOWS: &str = r#"
version: "1.0"
flows:
  checkout:
    topic: checkout
    steps:
      - name: reserve
        topic: reserve-commands
        onSuccess:
          emit: reserve.success
          topic: checkout-events
          nextSteps:
            - charge
      - name: charge
        topic: charge-commands
        onSuccess:
          emit: charge.success
          topic: checkout-events
"#;

fn engine() -> SagaFlowEngine<InMemorySagaStore> {
    let flows = Arc::new(FlowSet::from_yaml(FLOWS).unwrap());
    SagaFlowEngine::new(
        flows,
        InMemorySagaStore::new(),
        Arc::new(InMemoryBus::new()),
        UpdateQueueConfig {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        },
    )
}

fn bench_start_saga(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = engine();

    c.bench_function("saga_engine/start_saga", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine.start_saga("checkout", Data::new()).await.unwrap();
            });
        });
    });
}

fn bench_full_flow(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = engine();

    c.bench_function("saga_engine/two_step_flow", |b| {
        b.iter(|| {
            rt.block_on(async {
                let saga_id = engine.start_saga("checkout", Data::new()).await.unwrap();
                engine
                    .apply_emit(saga_id, "reserve.success", Data::new(), None)
                    .await
                    .unwrap();
                engine
                    .apply_emit(saga_id, "charge.success", Data::new(), None)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_transition(c: &mut Criterion) {
    let flows = FlowSet::from_yaml(FLOWS).unwrap();
    let flow = flows.lookup("checkout").unwrap();

    c.bench_function("saga_engine/transition_two_steps", |b| {
        b.iter(|| {
            let mut saga = SagaInstance::new(SagaId::new(), "checkout", Data::new());
            transition::start_first_step(flow, &mut saga);
            for step in ["reserve", "charge"] {
                let event = OutcomeEvent {
                    saga_id: saga.saga_id(),
                    step_name: step.to_string(),
                    emit: None,
                    success: true,
                    payload: Data::new(),
                    error: None,
                };
                transition::apply_outcome(&flows, &mut saga, &event);
            }
            saga
        });
    });
}

criterion_group!(benches, bench_start_saga, bench_full_flow, bench_transition);
criterion_main!(benches);
