//! Validated flow model. Immutable once loaded.

/// Topic used for step commands when a step only names a command.
pub const DEFAULT_COMMAND_TOPIC: &str = "saga-orchestration";

const ROLLBACK_SUFFIX: &str = ".rollback";
const COMMAND_SUFFIX: &str = ".command";

/// Returns true if `step_name` names a compensation step (`<step>.rollback`).
pub fn is_rollback_step(step_name: &str) -> bool {
    step_name.ends_with(ROLLBACK_SUFFIX)
}

/// Returns the step a compensation step undoes: `create-order.rollback` → `create-order`.
pub fn rollback_target(step_name: &str) -> Option<&str> {
    step_name.strip_suffix(ROLLBACK_SUFFIX)
}

/// Derives the command for a compensation step.
///
/// `create-order.rollback` becomes `create-order.command`; a name without the
/// rollback suffix gets `.command` appended.
pub fn rollback_command_name(step_name: &str) -> String {
    match rollback_target(step_name) {
        Some(base) => format!("{base}{COMMAND_SUFFIX}"),
        None => format!("{step_name}{COMMAND_SUFFIX}"),
    }
}

/// The success or failure branch of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Event name that resolves this branch, e.g. `create-order.success`.
    pub emit: String,
    /// Topic the emit arrives on.
    pub topic: String,
    /// Steps to dispatch, all of them.
    pub next_steps: Vec<String>,
    /// Flow to chain into.
    pub next_flow: Option<String>,
}

impl Outcome {
    /// An outcome with nothing after it ends its branch.
    pub fn is_terminal(&self) -> bool {
        self.next_steps.is_empty() && self.next_flow.is_none()
    }

    /// Next steps that compensate earlier work.
    pub fn rollback_steps(&self) -> impl Iterator<Item = &str> {
        self.next_steps
            .iter()
            .map(String::as_str)
            .filter(|s| is_rollback_step(s))
    }

    /// Next steps that are ordinary steps of the flow.
    pub fn regular_steps(&self) -> impl Iterator<Item = &str> {
        self.next_steps
            .iter()
            .map(String::as_str)
            .filter(|s| !is_rollback_step(s))
    }

    /// Case-insensitive emit comparison.
    pub fn emits(&self, emit: &str) -> bool {
        self.emit.eq_ignore_ascii_case(emit)
    }
}

/// One step of a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDefinition {
    pub name: String,
    /// Topic the step's command is published to.
    pub topic: String,
    /// Command name; the step name is used when absent.
    pub command: Option<String>,
    pub on_success: Option<Outcome>,
    pub on_failure: Option<Outcome>,
}

impl StepDefinition {
    /// Message type of the command dispatched for this step.
    pub fn command_name(&self) -> &str {
        self.command.as_deref().unwrap_or(&self.name)
    }

    /// The branch selected by `success`.
    pub fn outcome(&self, success: bool) -> Option<&Outcome> {
        if success {
            self.on_success.as_ref()
        } else {
            self.on_failure.as_ref()
        }
    }

    /// Both branches, success first.
    pub fn outcomes(&self) -> impl Iterator<Item = &Outcome> {
        self.on_success.iter().chain(self.on_failure.iter())
    }
}

/// A named flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDefinition {
    pub name: String,
    pub description: Option<String>,
    /// Topic carrying start messages for this flow.
    pub topic: String,
    /// Whether the flow compensates another; sagas on it finish as RolledBack.
    pub rollback: bool,
    pub steps: Vec<StepDefinition>,
}

impl FlowDefinition {
    /// Finds a step by name, ignoring ASCII case.
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn first_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    /// Finds the step and branch an emit belongs to: `(step, success)`.
    pub fn resolve_emit(&self, emit: &str) -> Option<(&StepDefinition, bool)> {
        self.steps.iter().find_map(|step| {
            if step.on_success.as_ref().is_some_and(|o| o.emits(emit)) {
                Some((step, true))
            } else if step.on_failure.as_ref().is_some_and(|o| o.emits(emit)) {
                Some((step, false))
            } else {
                None
            }
        })
    }
}
