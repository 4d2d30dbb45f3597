//! Builds the routing table from the loaded flows.

use std::sync::Arc;

use flows::{FlowSet, rollback_target};
use messaging::{HandlerRegistry, MessageHandler};
use saga_store::SagaStore;

use crate::engine::SagaFlowEngine;
use crate::handlers::{OutcomeHandler, StartFlowHandler};

/// Routes every flow name to a start handler on the flow's topic and every
/// declared emit to the outcome handler on the emit's topic.
///
/// Rollback steps are not declared, so their conventional
/// `<step>.rollback.success` and `<step>.rollback.failed` emits are routed
/// on the topic of the undone step's success emit, or the flow topic when
/// it has none. An empty flow set gives an empty registry.
pub fn build_registry<S>(flows: &FlowSet, engine: Arc<SagaFlowEngine<S>>) -> HandlerRegistry
where
    S: SagaStore + Clone + 'static,
{
    let mut registry = HandlerRegistry::new();
    let outcome: Arc<dyn MessageHandler> = Arc::new(OutcomeHandler::new(Arc::clone(&engine)));

    for flow in flows.flows() {
        registry.register(
            flow.name.clone(),
            flow.topic.clone(),
            Arc::new(StartFlowHandler::new(Arc::clone(&engine), flow.name.clone())),
        );

        for step in &flow.steps {
            for branch in step.outcomes() {
                registry.register(branch.emit.clone(), branch.topic.clone(), Arc::clone(&outcome));

                for rollback in branch.rollback_steps() {
                    let topic = rollback_target(rollback)
                        .and_then(|base| flow.step(base))
                        .and_then(|base| base.on_success.as_ref())
                        .map(|o| o.topic.clone())
                        .unwrap_or_else(|| flow.topic.clone());
                    for suffix in ["success", "failed"] {
                        registry.register(
                            format!("{rollback}.{suffix}"),
                            topic.clone(),
                            Arc::clone(&outcome),
                        );
                    }
                }
            }
        }
    }

    tracing::info!(
        message_types = registry.len(),
        topics = ?registry.topics(),
        "routing table built"
    );
    registry
}
