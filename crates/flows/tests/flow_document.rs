//! Loads the flow document shipped with the orchestrator.

use flows::{FlowSet, rollback_command_name};

const SHIPPED: &str = include_str!("../../../flows/order-processing.yaml");

#[test]
fn shipped_document_loads_every_flow() {
    let set = FlowSet::from_yaml(SHIPPED).unwrap();
    assert!(set.is_loaded());

    let names: Vec<_> = set.flows().map(|f| f.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "order-processing",
            "payment-processing",
            "order-fulfillment",
            "payment-rollback"
        ]
    );
}

#[test]
fn order_processing_matches_expected_graph() {
    let set = FlowSet::from_yaml(SHIPPED).unwrap();
    let flow = set.lookup("order-processing").unwrap();

    assert_eq!(flow.topic, "order-processing");
    assert!(!flow.rollback);
    assert_eq!(flow.first_step().unwrap().name, "create-order");

    let create = flow.step("create-order").unwrap();
    assert_eq!(
        create.on_success.as_ref().unwrap().next_steps,
        vec!["reserve-inventory"]
    );

    let reserve = flow.step("reserve-inventory").unwrap();
    assert!(reserve.on_success.as_ref().unwrap().is_terminal());
    let on_failure = reserve.on_failure.as_ref().unwrap();
    let rollbacks: Vec<_> = on_failure.rollback_steps().collect();
    assert_eq!(rollbacks, vec!["create-order.rollback"]);
    assert_eq!(rollback_command_name(rollbacks[0]), "create-order.command");
}

#[test]
fn chaining_and_rollback_flows() {
    let set = FlowSet::from_yaml(SHIPPED).unwrap();

    let payment = set.lookup("payment-processing").unwrap();
    let charge = payment.step("charge-payment").unwrap();
    assert_eq!(charge.command_name(), "charge-payment.command");
    assert_eq!(
        charge.on_success.as_ref().unwrap().next_flow.as_deref(),
        Some("order-fulfillment")
    );

    assert!(set.lookup("payment-rollback").unwrap().rollback);

    let fulfillment = set.lookup("order-fulfillment").unwrap();
    let (step, success) = fulfillment.resolve_emit("prepare-shipment.success").unwrap();
    assert_eq!(step.name, "prepare-shipment");
    assert!(success);
    assert_eq!(
        step.on_success.as_ref().unwrap().next_steps,
        vec!["dispatch-parcel", "notify-customer"]
    );
}
