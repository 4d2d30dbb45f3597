//! Per-saga serialized update pipeline.
//!
//! Every mutation of a saga goes through [`UpdateQueue::enqueue`]. Each saga
//! id gets its own queue and a single worker task, created on first use and
//! removed once the queue drains. A worker applies one mutation at a time
//! against freshly read state:
//!
//! 1. read the saga from the store
//! 2. run the mutation, which returns the step commands it produced
//! 3. publish the commands
//! 4. persist with an optimistic version check
//!
//! A version conflict restarts the whole unit against re-read state with
//! exponential backoff, up to a bounded number of attempts. Commands may
//! therefore be published more than once; downstream steps are expected to
//! be idempotent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use common::SagaId;
use dashmap::DashMap;
use saga_store::{SagaInstance, SagaStore};
use tokio::sync::{Notify, mpsc, oneshot};

use crate::dispatch::{CommandDispatcher, StepCommand};
use crate::error::{Result, SagaError};

/// A mutation applied inside the pipeline. It may run more than once.
pub type Mutation = Box<dyn FnMut(&mut SagaInstance) -> Result<Vec<StepCommand>> + Send>;

/// Retry bounds for concurrency conflicts.
#[derive(Debug, Clone)]
pub struct UpdateQueueConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub base_backoff: Duration,
}

impl Default for UpdateQueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
        }
    }
}

struct UpdateRequest {
    mutate: Mutation,
    reply: oneshot::Sender<Result<SagaInstance>>,
}

struct Inner<S> {
    store: S,
    dispatcher: CommandDispatcher,
    config: UpdateQueueConfig,
    queues: DashMap<SagaId, mpsc::UnboundedSender<UpdateRequest>>,
    closing: AtomicBool,
    idle: Notify,
}

/// Serializes mutations per saga id.
pub struct UpdateQueue<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for UpdateQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> UpdateQueue<S>
where
    S: SagaStore + 'static,
{
    pub fn new(store: S, dispatcher: CommandDispatcher, config: UpdateQueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                dispatcher,
                config,
                queues: DashMap::new(),
                closing: AtomicBool::new(false),
                idle: Notify::new(),
            }),
        }
    }

    /// Applies `mutate` to the saga and waits until the result is persisted
    /// or has failed.
    ///
    /// Mutations for one saga run in submission order. A mutation that
    /// leaves the saga unchanged and produces no commands is not written.
    pub async fn enqueue<F>(&self, saga_id: SagaId, mutate: F) -> Result<SagaInstance>
    where
        F: FnMut(&mut SagaInstance) -> Result<Vec<StepCommand>> + Send + 'static,
    {
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(SagaError::ShuttingDown);
        }

        let (reply, response) = oneshot::channel();
        let request = UpdateRequest {
            mutate: Box::new(mutate),
            reply,
        };

        {
            // Sending under the entry lock keeps the worker from retiring
            // between lookup and send.
            let mut sender = self
                .inner
                .queues
                .entry(saga_id)
                .or_insert_with(|| spawn_worker(&self.inner, saga_id));
            if let Err(mpsc::error::SendError(request)) = sender.send(request) {
                tracing::warn!(%saga_id, "update worker vanished; restarting it");
                *sender = spawn_worker(&self.inner, saga_id);
                sender
                    .send(request)
                    .map_err(|_| SagaError::ShuttingDown)?;
            }
        }

        response.await.map_err(|_| SagaError::ShuttingDown)?
    }

    /// Number of sagas with queued or running mutations.
    pub fn active_queues(&self) -> usize {
        self.inner.queues.len()
    }

    /// Stops accepting work and waits up to `timeout` for queued mutations
    /// to finish. Returns false if work was still pending at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.closing.store(true, Ordering::SeqCst);

        let drained = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.inner.queues.is_empty() {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        if drained {
            tracing::info!("saga update queues drained");
        } else {
            tracing::warn!(
                pending = self.inner.queues.len(),
                "shutdown timeout reached; abandoning queued saga updates"
            );
        }
        drained
    }
}

/// Upper bound on the delay between conflict retries.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Delay before retrying after failed attempt `attempt` (1-based): the base
/// doubled per earlier retry, capped at [`MAX_BACKOFF`].
fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
}

fn spawn_worker<S>(inner: &Arc<Inner<S>>, saga_id: SagaId) -> mpsc::UnboundedSender<UpdateRequest>
where
    S: SagaStore + 'static,
{
    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(run_worker(Arc::clone(inner), saga_id, receiver));
    sender
}

async fn run_worker<S>(
    inner: Arc<Inner<S>>,
    saga_id: SagaId,
    mut receiver: mpsc::UnboundedReceiver<UpdateRequest>,
) where
    S: SagaStore + 'static,
{
    while let Some(mut request) = receiver.recv().await {
        let result = inner.apply(saga_id, &mut request.mutate).await;
        // The submitter may have gone away; the update stands regardless.
        let _ = request.reply.send(result);

        if inner
            .queues
            .remove_if(&saga_id, |_, _| receiver.is_empty())
            .is_some()
        {
            break;
        }
    }
    inner.idle.notify_waiters();
}

impl<S> Inner<S>
where
    S: SagaStore,
{
    #[tracing::instrument(skip_all, fields(%saga_id))]
    async fn apply(&self, saga_id: SagaId, mutate: &mut Mutation) -> Result<SagaInstance> {
        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let current = self
                .store
                .get_by_id(saga_id)
                .await?
                .ok_or(SagaError::SagaNotFound(saga_id))?;
            let mut next = current.clone();
            let commands = mutate(&mut next)?;

            if commands.is_empty() && next == current {
                tracing::debug!("mutation made no changes");
                return Ok(current);
            }

            for command in &commands {
                self.dispatcher.dispatch(command).await?;
            }

            next.touch();
            match self.store.update(&next).await {
                Ok(version) => {
                    next.set_version(version);
                    metrics::histogram!("saga_update_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    if !current.is_terminal() && next.is_terminal() {
                        metrics::counter!("sagas_finished_total", "status" => next.status().as_str())
                            .increment(1);
                        tracing::info!(status = %next.status(), "saga finished");
                    }
                    return Ok(next);
                }
                Err(e) if e.is_concurrency_conflict() => {
                    metrics::counter!("saga_update_conflicts_total").increment(1);
                    if attempt >= max_attempts {
                        tracing::error!(attempts = attempt, "giving up after repeated concurrency conflicts");
                        return Err(SagaError::ConcurrencyExhausted {
                            saga_id,
                            attempts: attempt,
                        });
                    }
                    let backoff = retry_backoff(self.config.base_backoff, attempt);
                    tracing::warn!(attempt, ?backoff, error = %e, "concurrency conflict; retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
