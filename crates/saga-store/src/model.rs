//! Saga instance aggregate and its step executions.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Data, SagaId};

/// Concurrency token for a saga instance.
///
/// A saga is stored at version 1 on creation and every successful update
/// bumps it by one. Writers must present the version they read.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of a saga that has not been stored yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version assigned on creation.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Returned when a stored status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(pub String);

impl std::fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown status: {}", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

/// Lifecycle of a saga.
///
/// ```text
/// Running ──┬──► Succeeded
///           ├──► Failed
///           └──► RollingBack ──► RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaStatus {
    Running,
    Succeeded,
    Failed,
    RollingBack,
    RolledBack,
}

impl SagaStatus {
    /// Statuses of sagas that can still receive events.
    pub const ACTIVE: [SagaStatus; 2] = [SagaStatus::Running, SagaStatus::RollingBack];

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Succeeded | SagaStatus::Failed | SagaStatus::RolledBack
        )
    }

    /// Returns true if the saga is still being driven by events.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Running => "Running",
            SagaStatus::Succeeded => "Succeeded",
            SagaStatus::Failed => "Failed",
            SagaStatus::RollingBack => "RollingBack",
            SagaStatus::RolledBack => "RolledBack",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SagaStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Running" => Ok(SagaStatus::Running),
            "Succeeded" => Ok(SagaStatus::Succeeded),
            "Failed" => Ok(SagaStatus::Failed),
            "RollingBack" => Ok(SagaStatus::RollingBack),
            "RolledBack" => Ok(SagaStatus::RolledBack),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Lifecycle of a single dispatched step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    RolledBack,
}

impl StepStatus {
    /// Returns true once the step's outcome has been recorded.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "Pending",
            StepStatus::Running => "Running",
            StepStatus::Success => "Success",
            StepStatus::Failed => "Failed",
            StepStatus::Skipped => "Skipped",
            StepStatus::RolledBack => "RolledBack",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(StepStatus::Pending),
            "Running" => Ok(StepStatus::Running),
            "Success" => Ok(StepStatus::Success),
            "Failed" => Ok(StepStatus::Failed),
            "Skipped" => Ok(StepStatus::Skipped),
            "RolledBack" => Ok(StepStatus::RolledBack),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// One dispatch of a step, owned by its saga through `saga_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub saga_id: SagaId,
    pub step_name: String,
    pub topic: String,
    pub status: StepStatus,
    /// Saga context at dispatch time.
    pub request: Data,
    /// Payload of the outcome event.
    pub response: Data,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Result of recording an outcome against a step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCompletion {
    /// A running execution was moved to a terminal status.
    Completed,
    /// Every execution of the step is already terminal; redelivered event.
    AlreadyTerminal,
    /// The step was never dispatched for this saga.
    NotDispatched,
}

/// A saga instance: the aggregate root persisted by the saga store.
///
/// Status changes go through the methods below so that `completed_at` is
/// set exactly when the status is terminal, and terminal statuses are never
/// left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    pub(crate) saga_id: SagaId,
    pub(crate) flow_name: String,
    pub(crate) current_step: Option<String>,
    pub(crate) context: Data,
    pub(crate) status: SagaStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) error_step: Option<String>,
    pub(crate) error_message: Option<String>,
    pub(crate) version: Version,
    pub(crate) steps: Vec<StepExecution>,
}

impl SagaInstance {
    /// Creates a running saga for `flow_name` seeded with `context`.
    pub fn new(saga_id: SagaId, flow_name: impl Into<String>, context: Data) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            flow_name: flow_name.into(),
            current_step: None,
            context,
            status: SagaStatus::Running,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_step: None,
            error_message: None,
            version: Version::initial(),
            steps: Vec::new(),
        }
    }

    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    pub fn flow_name(&self) -> &str {
        &self.flow_name
    }

    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    pub fn context(&self) -> &Data {
        &self.context
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error_step(&self) -> Option<&str> {
        self.error_step.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// The version this copy was read at.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Step executions in dispatch order.
    pub fn steps(&self) -> &[StepExecution] {
        &self.steps
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Records the version assigned by the store.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Stamps the last-modified time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Merges `data` into the context without overwriting existing keys.
    pub fn merge_context(&mut self, data: &Data) -> usize {
        common::merge_additive(&mut self.context, data)
    }

    /// Returns the most recent execution of `step_name`.
    pub fn latest_step(&self, step_name: &str) -> Option<&StepExecution> {
        self.steps.iter().rev().find(|s| s.step_name == step_name)
    }

    pub fn is_step_running(&self, step_name: &str) -> bool {
        self.steps
            .iter()
            .any(|s| s.step_name == step_name && s.status == StepStatus::Running)
    }

    pub fn has_running_steps(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Running)
    }

    /// Moves the saga onto another flow, keeping its id and context.
    ///
    /// A rollback flow moves a running saga to RollingBack. A saga already
    /// rolling back stays so whatever flow it moves onto.
    pub fn switch_flow(&mut self, flow_name: impl Into<String>, rollback: bool) {
        if self.is_terminal() {
            return;
        }
        self.flow_name = flow_name.into();
        self.current_step = None;
        if rollback {
            self.status = SagaStatus::RollingBack;
        }
    }

    /// Records a new running execution of `step_name`.
    ///
    /// Returns false without changes if the step already has a running
    /// execution.
    pub fn start_step(
        &mut self,
        step_name: impl Into<String>,
        topic: impl Into<String>,
        request: Data,
    ) -> bool {
        let step_name = step_name.into();
        if self.is_step_running(&step_name) {
            return false;
        }
        self.current_step = Some(step_name.clone());
        self.steps.push(StepExecution {
            saga_id: self.saga_id,
            step_name,
            topic: topic.into(),
            status: StepStatus::Running,
            request,
            response: Data::new(),
            error_message: None,
            created_at: Utc::now(),
            ended_at: None,
        });
        true
    }

    /// Moves the running execution of `step_name` to Success or Failed.
    pub fn complete_step(
        &mut self,
        step_name: &str,
        success: bool,
        response: Data,
        error: Option<String>,
    ) -> StepCompletion {
        let running = self
            .steps
            .iter()
            .rposition(|s| s.step_name == step_name && s.status == StepStatus::Running);

        match running {
            Some(index) => {
                let step = &mut self.steps[index];
                step.status = if success {
                    StepStatus::Success
                } else {
                    StepStatus::Failed
                };
                step.response = response;
                step.error_message = error;
                step.ended_at = Some(Utc::now());
                StepCompletion::Completed
            }
            None if self.steps.iter().any(|s| s.step_name == step_name) => {
                StepCompletion::AlreadyTerminal
            }
            None => StepCompletion::NotDispatched,
        }
    }

    /// Marks the latest finished execution of `step_name` as compensated.
    pub fn mark_step_rolled_back(&mut self, step_name: &str) -> bool {
        let finished = self.steps.iter_mut().rev().find(|s| {
            s.step_name == step_name
                && matches!(s.status, StepStatus::Success | StepStatus::Failed)
        });
        match finished {
            Some(step) => {
                step.status = StepStatus::RolledBack;
                true
            }
            None => false,
        }
    }

    /// Running → RollingBack.
    pub fn begin_rollback(&mut self) -> bool {
        if self.status != SagaStatus::Running {
            return false;
        }
        self.status = SagaStatus::RollingBack;
        true
    }

    /// Finishes the saga as Succeeded.
    pub fn succeed(&mut self) -> bool {
        self.finish(SagaStatus::Succeeded)
    }

    /// Finishes the saga as RolledBack.
    pub fn finish_rollback(&mut self) -> bool {
        self.finish(SagaStatus::RolledBack)
    }

    /// Finishes the saga as Failed, recording the step that caused it.
    pub fn fail(&mut self, step_name: impl Into<String>, message: impl Into<String>) -> bool {
        if !self.finish(SagaStatus::Failed) {
            return false;
        }
        self.error_step = Some(step_name.into());
        self.error_message = Some(message.into());
        true
    }

    fn finish(&mut self, status: SagaStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }
}
