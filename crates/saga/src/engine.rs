//! The saga flow engine.

use std::sync::Arc;
use std::time::Duration;

use common::{Data, SagaId};
use flows::FlowSet;
use messaging::Publisher;
use saga_store::{SagaInstance, SagaStore, SagaStoreError, SagaStoreExt};

use crate::dispatch::CommandDispatcher;
use crate::error::{Result, SagaError};
use crate::transition::{self, OutcomeEvent};
use crate::update_queue::{UpdateQueue, UpdateQueueConfig};

/// Starts sagas and advances them as step outcomes arrive.
///
/// One engine is built at startup and shared by handle with the consumer
/// and the HTTP layer. Every state change goes through its
/// [`UpdateQueue`].
pub struct SagaFlowEngine<S> {
    flows: Arc<FlowSet>,
    store: S,
    queue: UpdateQueue<S>,
    dispatcher: CommandDispatcher,
}

impl<S> SagaFlowEngine<S>
where
    S: SagaStore + Clone + 'static,
{
    pub fn new(
        flows: Arc<FlowSet>,
        store: S,
        publisher: Arc<dyn Publisher>,
        config: UpdateQueueConfig,
    ) -> Self {
        let dispatcher = CommandDispatcher::new(publisher);
        let queue = UpdateQueue::new(store.clone(), dispatcher.clone(), config);
        Self {
            flows,
            store,
            queue,
            dispatcher,
        }
    }

    pub fn flows(&self) -> &FlowSet {
        &self.flows
    }

    /// Starts `flow_name` under a new saga id.
    pub async fn start_saga(&self, flow_name: &str, data: Data) -> Result<SagaId> {
        self.start_saga_with_id(flow_name, data, None).await
    }

    /// Starts `flow_name`, optionally under a caller-chosen saga id.
    ///
    /// Creates the saga, then dispatches the first step through the update
    /// queue. Starting an id that already exists is not an error: the first
    /// step is dispatched only if nothing has been dispatched yet, so a
    /// redelivered start message does no harm.
    #[tracing::instrument(skip(self, data), fields(saga_id))]
    pub async fn start_saga_with_id(
        &self,
        flow_name: &str,
        data: Data,
        saga_id: Option<SagaId>,
    ) -> Result<SagaId> {
        let flow = self
            .flows
            .lookup(flow_name)
            .filter(|flow| !flow.steps.is_empty())
            .ok_or_else(|| SagaError::UnknownFlow(flow_name.to_string()))?;

        let saga_id = saga_id.unwrap_or_default();
        tracing::Span::current().record("saga_id", tracing::field::display(saga_id));

        let mut saga = SagaInstance::new(saga_id, flow.name.clone(), data);
        if flow.rollback {
            saga.begin_rollback();
        }

        match self.store.create(&saga).await {
            Ok(_) => {
                metrics::counter!("sagas_started_total", "flow" => flow.name.clone()).increment(1);
                tracing::info!(flow = %flow.name, "saga created");
            }
            Err(SagaStoreError::AlreadyExists(_)) => {
                tracing::info!("saga already exists; resuming its start");
            }
            Err(e) => return Err(e.into()),
        }

        let flows = Arc::clone(&self.flows);
        self.queue
            .enqueue(saga_id, move |saga| {
                let flow = flows
                    .lookup(saga.flow_name())
                    .ok_or_else(|| SagaError::UnknownFlow(saga.flow_name().to_string()))?;
                Ok(transition::start_first_step(flow, saga).into_iter().collect())
            })
            .await?;

        Ok(saga_id)
    }

    /// Publishes a start message for `flow_name` instead of starting the
    /// saga in-process. The consumer picks it up like any other start.
    #[tracing::instrument(skip(self, data))]
    pub async fn trigger_saga(&self, flow_name: &str, data: Data) -> Result<SagaId> {
        let flow = self
            .flows
            .lookup(flow_name)
            .filter(|flow| !flow.steps.is_empty())
            .ok_or_else(|| SagaError::UnknownFlow(flow_name.to_string()))?;

        let saga_id = SagaId::new();
        let delivery = self
            .dispatcher
            .publish_start(&flow.name, &flow.topic, saga_id, &data)
            .await?;
        tracing::info!(%saga_id, topic = %delivery.topic, offset = delivery.offset, "saga start published");
        Ok(saga_id)
    }

    /// Applies a step outcome.
    #[tracing::instrument(skip(self, event), fields(saga_id = %event.saga_id, step = %event.step_name, success = event.success))]
    pub async fn apply_outcome(&self, event: OutcomeEvent) -> Result<SagaInstance> {
        let flows = Arc::clone(&self.flows);
        self.queue
            .enqueue(event.saga_id, move |saga| {
                Ok(transition::apply_outcome(&flows, saga, &event))
            })
            .await
    }

    /// Applies the outcome named by `emit`.
    ///
    /// The emit is resolved against the saga's state inside the update, so
    /// an emit that no longer fits the saga is logged and ignored.
    #[tracing::instrument(skip(self, payload, error))]
    pub async fn apply_emit(
        &self,
        saga_id: SagaId,
        emit: &str,
        payload: Data,
        error: Option<String>,
    ) -> Result<SagaInstance> {
        let flows = Arc::clone(&self.flows);
        let emit = emit.to_string();
        self.queue
            .enqueue(saga_id, move |saga| {
                let Some((step_name, success)) = transition::resolve_emit(&flows, saga, &emit) else {
                    tracing::warn!(%saga_id, %emit, flow = saga.flow_name(), "emit does not match any step of the saga; ignored");
                    return Ok(Vec::new());
                };
                let event = OutcomeEvent {
                    saga_id,
                    step_name,
                    emit: Some(emit.clone()),
                    success,
                    payload: payload.clone(),
                    error: error.clone(),
                };
                Ok(transition::apply_outcome(&flows, saga, &event))
            })
            .await
    }

    pub async fn get_instance(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        Ok(self.store.get_by_id(saga_id).await?)
    }

    /// Sagas that are Running or RollingBack.
    pub async fn list_active(&self) -> Result<Vec<SagaInstance>> {
        Ok(self.store.list_active().await?)
    }

    /// Stops accepting updates and drains queued ones for up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.queue.shutdown(timeout).await
    }
}
