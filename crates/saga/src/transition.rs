//! Saga state transitions.
//!
//! Pure functions over a [`SagaInstance`] and the loaded [`FlowSet`]. They
//! mutate the saga in place and return the step commands to publish; the
//! update pipeline takes care of publishing and persistence.

use common::{Data, SagaId};
use flows::{
    DEFAULT_COMMAND_TOPIC, FlowDefinition, FlowSet, StepDefinition, is_rollback_step,
    rollback_command_name, rollback_target,
};
use saga_store::{SagaInstance, SagaStatus, StepCompletion};

use crate::dispatch::StepCommand;

/// Emit suffixes recognised when an emit is not declared in a flow.
const EMIT_SUFFIXES: [(&str, bool); 3] = [(".success", true), (".failed", false), (".failure", false)];

/// A step finished, as reported by an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeEvent {
    pub saga_id: SagaId,
    pub step_name: String,
    /// Emit that reported the outcome, for logging.
    pub emit: Option<String>,
    pub success: bool,
    pub payload: Data,
    pub error: Option<String>,
}

/// Maps an emit to `(step name, success)` for this saga.
///
/// Declared emits of the saga's current flow win. Otherwise the
/// `<step>.success`, `<step>.failed` and `<step>.failure` conventions apply
/// to steps that are declared or have been dispatched for this saga; this
/// is how rollback steps report back. Matching ignores ASCII case and the
/// returned step name is the declared or recorded spelling. Emits declared by other flows are
/// accepted for steps this saga has dispatched.
pub fn resolve_emit(flows: &FlowSet, saga: &SagaInstance, emit: &str) -> Option<(String, bool)> {
    let current = flows.lookup(saga.flow_name());

    if let Some((step, success)) = current.and_then(|flow| flow.resolve_emit(emit)) {
        return Some((step.name.clone(), success));
    }

    for (suffix, success) in EMIT_SUFFIXES {
        let Some(split) = emit.len().checked_sub(suffix.len()) else {
            continue;
        };
        let matches = emit
            .get(split..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix));
        if !matches {
            continue;
        }
        let step = &emit[..split];
        let declared = current
            .and_then(|flow| flow.step(step))
            .map(|definition| definition.name.clone());
        let dispatched = || {
            saga.steps()
                .iter()
                .rev()
                .find(|execution| execution.step_name.eq_ignore_ascii_case(step))
                .map(|execution| execution.step_name.clone())
        };
        if let Some(name) = declared.or_else(dispatched) {
            return Some((name, success));
        }
    }

    flows
        .flows()
        .filter_map(|flow| flow.resolve_emit(emit))
        .find(|(step, _)| saga.latest_step(&step.name).is_some())
        .map(|(step, success)| (step.name.clone(), success))
}

/// Finds the flow that declares `step_name`, preferring the saga's current
/// flow. Rollback steps belong to the flow of the step they undo.
fn owning_flow<'a>(flows: &'a FlowSet, current: &str, step_name: &str) -> Option<&'a FlowDefinition> {
    let declared = rollback_target(step_name).unwrap_or(step_name);
    flows
        .lookup(current)
        .filter(|flow| flow.step(declared).is_some())
        .or_else(|| flows.flows().find(|flow| flow.step(declared).is_some()))
}

/// Dispatches the first step of `flow` if the saga has no executions yet.
pub fn start_first_step(flow: &FlowDefinition, saga: &mut SagaInstance) -> Option<StepCommand> {
    if saga.is_terminal() || !saga.steps().is_empty() {
        return None;
    }
    let first = flow.first_step()?;
    start_step(saga, flow, first)
}

/// Records a running execution of `step` and builds its command. Returns
/// None if the step is already running.
fn start_step(
    saga: &mut SagaInstance,
    flow: &FlowDefinition,
    step: &StepDefinition,
) -> Option<StepCommand> {
    let request = saga.context().clone();
    if !saga.start_step(&step.name, &step.topic, request.clone()) {
        tracing::debug!(saga_id = %saga.saga_id(), step = %step.name, "step already running; not dispatching again");
        return None;
    }
    Some(StepCommand {
        saga_id: saga.saga_id(),
        flow_name: flow.name.clone(),
        step_name: step.name.clone(),
        message_type: step.command_name().to_string(),
        topic: step.topic.clone(),
        data: request,
        rollback: false,
    })
}

/// Records a running rollback step and builds its command. The command goes
/// to the topic of the step being undone.
fn start_rollback(flows: &FlowSet, saga: &mut SagaInstance, step_name: &str) -> Option<StepCommand> {
    let base = rollback_target(step_name).unwrap_or(step_name);
    let topic = owning_flow(flows, saga.flow_name(), step_name)
        .and_then(|flow| flow.step(base))
        .map(|step| step.topic.clone())
        .unwrap_or_else(|| DEFAULT_COMMAND_TOPIC.to_string());

    saga.begin_rollback();
    let request = saga.context().clone();
    if !saga.start_step(step_name, &topic, request.clone()) {
        tracing::debug!(saga_id = %saga.saga_id(), step = step_name, "rollback already running");
        return None;
    }
    Some(StepCommand {
        saga_id: saga.saga_id(),
        flow_name: saga.flow_name().to_string(),
        step_name: step_name.to_string(),
        message_type: rollback_command_name(step_name),
        topic,
        data: request,
        rollback: true,
    })
}

/// Applies one step outcome to the saga.
///
/// Outcomes for finished sagas, for steps that were never dispatched, and
/// redelivered outcomes for steps already terminal leave the saga untouched.
pub fn apply_outcome(flows: &FlowSet, saga: &mut SagaInstance, event: &OutcomeEvent) -> Vec<StepCommand> {
    let saga_id = saga.saga_id();
    let step_name = event.step_name.as_str();

    if saga.is_terminal() {
        tracing::debug!(%saga_id, step = step_name, status = %saga.status(), "saga already finished; outcome ignored");
        return Vec::new();
    }

    match saga.complete_step(step_name, event.success, event.payload.clone(), event.error.clone()) {
        StepCompletion::Completed => {}
        StepCompletion::AlreadyTerminal => {
            tracing::debug!(%saga_id, step = step_name, "duplicate outcome ignored");
            return Vec::new();
        }
        StepCompletion::NotDispatched => {
            tracing::warn!(%saga_id, step = step_name, emit = ?event.emit, "outcome for a step that was never dispatched; ignored");
            return Vec::new();
        }
    }
    saga.merge_context(&event.payload);

    if event.success
        && let Some(base) = rollback_target(step_name)
    {
        saga.mark_step_rolled_back(base);
    }

    let flow = owning_flow(flows, saga.flow_name(), step_name);
    let definition = flow.and_then(|flow| flow.step(step_name));
    let resolved = definition.and_then(|d| d.outcome(event.success));
    let mut commands = Vec::new();
    // No outcome, or an outcome with nothing after it, ends the branch.
    let mut branch_ended = resolved.is_none_or(|outcome| outcome.is_terminal());

    if let (Some(flow), Some(outcome)) = (flow, resolved) {
        for name in outcome.rollback_steps() {
            commands.extend(start_rollback(flows, saga, name));
        }

        for name in outcome.regular_steps() {
            match flow.step(name) {
                Some(next) => commands.extend(start_step(saga, flow, next)),
                None => tracing::warn!(
                    %saga_id,
                    flow = %flow.name,
                    next_step = name,
                    "next step is not declared in the flow; skipped"
                ),
            }
        }

        if let Some(ref next_flow) = outcome.next_flow
            && !chain_flow(flows, saga, next_flow, &mut commands)
        {
            branch_ended = true;
        }
    }

    if branch_ended {
        evaluate_completion(flows, saga, event, definition);
    }

    commands
}

/// Moves the saga onto `next_flow` and dispatches its first step.
fn chain_flow(
    flows: &FlowSet,
    saga: &mut SagaInstance,
    next_flow: &str,
    commands: &mut Vec<StepCommand>,
) -> bool {
    let Some(flow) = flows.lookup(next_flow) else {
        tracing::warn!(saga_id = %saga.saga_id(), next_flow, "next flow is not defined");
        return false;
    };
    let Some(first) = flow.first_step() else {
        tracing::warn!(saga_id = %saga.saga_id(), next_flow, "next flow has no steps");
        return false;
    };

    tracing::info!(saga_id = %saga.saga_id(), from = saga.flow_name(), to = %flow.name, "chaining into next flow");
    saga.switch_flow(flow.name.clone(), flow.rollback);
    commands.extend(start_step(saga, flow, first));
    true
}

/// Every step of the saga's current flow has a terminal latest execution,
/// and nothing else is still running.
fn flow_steps_finished(flows: &FlowSet, saga: &SagaInstance) -> bool {
    let Some(flow) = flows.lookup(saga.flow_name()) else {
        return false;
    };
    let declared_done = flow.steps.iter().all(|step| {
        saga.latest_step(&step.name)
            .is_some_and(|execution| execution.status.is_terminal())
    });
    declared_done && !saga.has_running_steps()
}

fn evaluate_completion(
    flows: &FlowSet,
    saga: &mut SagaInstance,
    event: &OutcomeEvent,
    definition: Option<&StepDefinition>,
) {
    let handles_failure = definition.is_some_and(|d| d.on_failure.is_some());
    if !event.success && !handles_failure {
        let message = event
            .error
            .clone()
            .unwrap_or_else(|| format!("step '{}' failed", event.step_name));
        if saga.fail(&event.step_name, message) {
            tracing::info!(saga_id = %saga.saga_id(), step = %event.step_name, "saga failed");
        }
        return;
    }

    if !flow_steps_finished(flows, saga) {
        return;
    }

    let rollback = saga.status() == SagaStatus::RollingBack
        || is_rollback_step(&event.step_name)
        || flows.lookup(saga.flow_name()).is_some_and(|flow| flow.rollback);
    if rollback {
        saga.finish_rollback();
    } else {
        saga.succeed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga_store::StepStatus;
    use serde_json::json;

    const FLOWS: &str = r#"
flows:
  order-processing:
    topic: order-processing
    steps:
      - name: create-order
        topic: order-commands
        onSuccess: { emit: create-order.success, topic: order-events, nextSteps: [reserve-inventory, notify-customer] }
        onFailure: { emit: create-order.failed, topic: order-events }
      - name: reserve-inventory
        topic: inventory-commands
        onSuccess: { emit: reserve-inventory.success, topic: inventory-events }
        onFailure: { emit: reserve-inventory.failed, topic: inventory-events, nextSteps: create-order.rollback }
      - name: notify-customer
        topic: notification-commands
  payments:
    topic: payments
    steps:
      - name: charge
        command: charge-card
        onSuccess: { emit: charge.success, topic: payment-events, nextFlows: refunds }
        onFailure: { emit: charge.failed, topic: payment-events, nextSteps: [missing-step] }
  refunds:
    topic: refunds
    rollback: true
    steps:
      - name: refund
        topic: refund-commands
"#;

    fn flows() -> FlowSet {
        FlowSet::from_yaml(FLOWS).unwrap()
    }

    fn saga_on(flows: &FlowSet, flow: &str) -> (SagaInstance, Vec<StepCommand>) {
        let mut context = Data::new();
        context.insert("orderId".to_string(), json!("O1"));
        let mut saga = SagaInstance::new(SagaId::new(), flow, context);
        let command = start_first_step(flows.lookup(flow).unwrap(), &mut saga);
        (saga, command.into_iter().collect())
    }

    fn outcome(saga: &SagaInstance, step: &str, success: bool, payload: Data) -> OutcomeEvent {
        OutcomeEvent {
            saga_id: saga.saga_id(),
            step_name: step.to_string(),
            emit: None,
            success,
            payload,
            error: (!success).then(|| format!("{step} broke")),
        }
    }

    fn names(commands: &[StepCommand]) -> Vec<&str> {
        commands.iter().map(|c| c.message_type.as_str()).collect()
    }

    #[test]
    fn first_step_dispatch_is_idempotent() {
        let flows = flows();
        let (mut saga, commands) = saga_on(&flows, "order-processing");
        assert_eq!(names(&commands), vec!["create-order"]);
        assert_eq!(commands[0].topic, "order-commands");
        assert_eq!(commands[0].data["orderId"], json!("O1"));

        let again = start_first_step(flows.lookup("order-processing").unwrap(), &mut saga);
        assert!(again.is_none());
        assert_eq!(saga.steps().len(), 1);
    }

    #[test]
    fn success_fans_out_to_every_next_step() {
        let flows = flows();
        let (mut saga, _) = saga_on(&flows, "order-processing");

        let event = outcome(&saga, "create-order", true, Data::new());
        let commands = apply_outcome(&flows, &mut saga, &event);
        assert_eq!(names(&commands), vec!["reserve-inventory", "notify-customer"]);
        assert_eq!(saga.status(), SagaStatus::Running);

        let event = outcome(&saga, "reserve-inventory", true, Data::new());
        let commands = apply_outcome(&flows, &mut saga, &event);
        assert!(commands.is_empty());
        assert_eq!(saga.status(), SagaStatus::Running, "notify-customer still running");

        let event = outcome(&saga, "notify-customer", true, Data::new());
        apply_outcome(&flows, &mut saga, &event);
        assert_eq!(saga.status(), SagaStatus::Succeeded);
        assert!(saga.completed_at().is_some());
    }

    #[test]
    fn failure_dispatches_rollback_command() {
        let flows = flows();
        let (mut saga, _) = saga_on(&flows, "order-processing");
        let event = outcome(&saga, "create-order", true, Data::new());
        apply_outcome(&flows, &mut saga, &event);
        let event = outcome(&saga, "notify-customer", true, Data::new());
        apply_outcome(&flows, &mut saga, &event);

        let event = outcome(&saga, "reserve-inventory", false, Data::new());
        let commands = apply_outcome(&flows, &mut saga, &event);
        assert_eq!(names(&commands), vec!["create-order.command"]);
        assert_eq!(commands[0].step_name, "create-order.rollback");
        assert_eq!(commands[0].topic, "order-commands");
        assert!(commands[0].rollback);
        assert_eq!(saga.status(), SagaStatus::RollingBack);

        let event = outcome(&saga, "create-order.rollback", true, Data::new());
        let commands = apply_outcome(&flows, &mut saga, &event);
        assert!(commands.is_empty());
        assert_eq!(saga.status(), SagaStatus::RolledBack);
        assert_eq!(saga.latest_step("create-order").unwrap().status, StepStatus::RolledBack);
    }

    #[test]
    fn failure_without_failure_branch_fails_the_saga() {
        let flows = flows();
        let (mut saga, _) = saga_on(&flows, "order-processing");
        let event = outcome(&saga, "create-order", true, Data::new());
        apply_outcome(&flows, &mut saga, &event);

        let event = outcome(&saga, "notify-customer", false, Data::new());
        apply_outcome(&flows, &mut saga, &event);
        assert_eq!(saga.status(), SagaStatus::Failed);
        assert_eq!(saga.error_step(), Some("notify-customer"));
        assert_eq!(saga.error_message(), Some("notify-customer broke"));

        // Finished sagas are sinks.
        let event = outcome(&saga, "reserve-inventory", true, Data::new());
        let commands = apply_outcome(&flows, &mut saga, &event);
        assert!(commands.is_empty());
        assert!(saga.is_step_running("reserve-inventory"));
        assert_eq!(saga.status(), SagaStatus::Failed);
    }

    #[test]
    fn duplicate_and_unknown_outcomes_change_nothing() {
        let flows = flows();
        let (mut saga, _) = saga_on(&flows, "order-processing");
        let event = outcome(&saga, "create-order", true, Data::new());
        apply_outcome(&flows, &mut saga, &event);
        let snapshot = saga.clone();

        let event = outcome(&saga, "create-order", true, Data::new());
        let duplicate = apply_outcome(&flows, &mut saga, &event);
        assert!(duplicate.is_empty());
        let event = outcome(&saga, "ship-order", true, Data::new());
        let unknown = apply_outcome(&flows, &mut saga, &event);
        assert!(unknown.is_empty());
        assert_eq!(saga, snapshot);
    }

    #[test]
    fn context_merge_keeps_first_value() {
        let flows = flows();
        let (mut saga, _) = saga_on(&flows, "order-processing");

        let mut first = Data::new();
        first.insert("x".to_string(), json!(1));
        first.insert("orderId".to_string(), json!("changed"));
        let event = outcome(&saga, "create-order", true, first);
        apply_outcome(&flows, &mut saga, &event);

        let mut second = Data::new();
        second.insert("x".to_string(), json!(2));
        let event = outcome(&saga, "reserve-inventory", true, second);
        apply_outcome(&flows, &mut saga, &event);

        assert_eq!(saga.context()["x"], json!(1));
        assert_eq!(saga.context()["orderId"], json!("O1"));
    }

    #[test]
    fn next_flow_chains_under_the_same_saga() {
        let flows = flows();
        let (mut saga, commands) = saga_on(&flows, "payments");
        assert_eq!(names(&commands), vec!["charge-card"]);
        assert_eq!(commands[0].topic, DEFAULT_COMMAND_TOPIC);
        let saga_id = saga.saga_id();

        let event = outcome(&saga, "charge", true, Data::new());
        let commands = apply_outcome(&flows, &mut saga, &event);
        assert_eq!(names(&commands), vec!["refund"]);
        assert_eq!(commands[0].saga_id, saga_id);
        assert_eq!(saga.flow_name(), "refunds");
        assert_eq!(saga.status(), SagaStatus::RollingBack);

        let event = outcome(&saga, "refund", true, Data::new());
        apply_outcome(&flows, &mut saga, &event);
        assert_eq!(saga.status(), SagaStatus::RolledBack);
    }

    #[test]
    fn dangling_next_step_keeps_the_saga_running() {
        let flows = flows();
        let (mut saga, _) = saga_on(&flows, "payments");

        let event = outcome(&saga, "charge", false, Data::new());
        let commands = apply_outcome(&flows, &mut saga, &event);
        assert!(commands.is_empty());
        // The failure branch continues, so completion is not evaluated.
        assert_eq!(saga.status(), SagaStatus::Running);
        assert!(saga.completed_at().is_none());
    }

    #[test]
    fn handled_failure_waits_for_undispatched_steps() {
        let flows = flows();
        let (mut saga, _) = saga_on(&flows, "order-processing");

        let event = outcome(&saga, "create-order", false, Data::new());
        let commands = apply_outcome(&flows, &mut saga, &event);
        assert!(commands.is_empty());
        assert_eq!(saga.status(), SagaStatus::Running);
        assert!(saga.completed_at().is_none());
        assert!(saga.latest_step("reserve-inventory").is_none());
    }

    #[test]
    fn emits_resolve_by_declaration_or_convention() {
        let flows = flows();
        let (mut saga, _) = saga_on(&flows, "order-processing");

        assert_eq!(
            resolve_emit(&flows, &saga, "RESERVE-INVENTORY.FAILED"),
            Some(("reserve-inventory".to_string(), false))
        );
        assert_eq!(
            resolve_emit(&flows, &saga, "notify-customer.success"),
            Some(("notify-customer".to_string(), true))
        );
        assert_eq!(resolve_emit(&flows, &saga, "create-order.rollback.success"), None);

        saga.start_step("create-order.rollback", "order-commands", Data::new());
        assert_eq!(
            resolve_emit(&flows, &saga, "create-order.rollback.failure"),
            Some(("create-order.rollback".to_string(), false))
        );
        assert_eq!(resolve_emit(&flows, &saga, "charge.success"), None);
        assert_eq!(resolve_emit(&flows, &saga, "success"), None);
    }

    #[test]
    fn conventional_emits_ignore_case() {
        let flows = flows();
        let (mut saga, _) = saga_on(&flows, "order-processing");

        assert_eq!(
            resolve_emit(&flows, &saga, "NOTIFY-CUSTOMER.SUCCESS"),
            Some(("notify-customer".to_string(), true))
        );

        saga.start_step("create-order.rollback", "order-commands", Data::new());
        assert_eq!(
            resolve_emit(&flows, &saga, "Create-Order.Rollback.Success"),
            Some(("create-order.rollback".to_string(), true))
        );
    }
}
