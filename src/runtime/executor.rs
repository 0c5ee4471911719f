use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    build::traits::TransactionBuilder,
    chain::ChainView,
    core::queue::{OperationQueue, QueueError},
    journal::StoredTransition,
    operation::{OperationId, OperationState, Outcome},
    policy::ValidationPolicy,
};

use super::{
    events::OperationEvent,
    handle::{PersistMsg, RuntimeConfig, RuntimeError},
};

/// Reason recorded for operations found mid-execution at startup.
pub const INTERRUPTED: &str = "operation interrupted before completion";
/// Reason recorded for operations registered while the runtime was stopping.
pub const RUNTIME_STOPPED: &str = "operation runtime stopped before execution";

/// Collaborators the executor needs.
#[derive(Clone)]
pub struct Services {
    /// Source of the chain tip.
    pub chain: Arc<dyn ChainView>,
    /// Admission rules.
    pub policy: Arc<ValidationPolicy>,
    /// Transaction construction.
    pub builder: Arc<dyn TransactionBuilder>,
}

pub(crate) struct ExecutorContext {
    pub(crate) queue: Arc<OperationQueue>,
    pub(crate) services: Services,
    pub(crate) persist_tx: Option<mpsc::Sender<PersistMsg>>,
    pub(crate) events_tx: broadcast::Sender<OperationEvent>,
    pub(crate) config: RuntimeConfig,
    since_snapshot: AtomicUsize,
}

impl ExecutorContext {
    pub(crate) fn new(
        queue: Arc<OperationQueue>,
        services: Services,
        persist_tx: Option<mpsc::Sender<PersistMsg>>,
        events_tx: broadcast::Sender<OperationEvent>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            queue,
            services,
            persist_tx,
            events_tx,
            config,
            since_snapshot: AtomicUsize::new(0),
        }
    }

    /// Hands a transition to persistence, or marks it durable at once when
    /// running without a sink.
    pub(crate) async fn record(&self, stored: StoredTransition) -> Result<(), RuntimeError> {
        let Some(tx) = self.persist_tx.as_ref() else {
            let _ = self.events_tx.send(OperationEvent::DurableUpTo { seq: stored.seq });
            return Ok(());
        };

        tx.send(PersistMsg::Transition(stored))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        self.maybe_auto_checkpoint().await;
        Ok(())
    }

    pub(crate) async fn checkpoint(&self) -> Result<(), RuntimeError> {
        let Some(tx) = self.persist_tx.as_ref() else {
            return Ok(());
        };

        let snapshot = self.queue.export_snapshot();
        let last_seq = snapshot.next_seq.saturating_sub(1);
        let (cp_tx, cp_rx) = oneshot::channel();
        tx.send(PersistMsg::Checkpoint {
            snapshot,
            last_seq,
            compact: self.config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .map_err(|_| RuntimeError::ChannelClosed)?;
        cp_rx
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?
            .map_err(RuntimeError::from)
    }

    async fn maybe_auto_checkpoint(&self) {
        let every = self.config.snapshot_every_transitions;
        if every == 0 {
            return;
        }

        let seen = self.since_snapshot.fetch_add(1, Ordering::AcqRel) + 1;
        if seen < every {
            return;
        }
        // Only the caller that observes the threshold resets it.
        if self
            .since_snapshot
            .compare_exchange(seen, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if let Err(err) = self.checkpoint().await {
            tracing::warn!("automatic checkpoint failed: {err}");
        }
    }

    /// Drives one operation from `Pending` to a terminal state.
    pub(crate) async fn execute(&self, id: OperationId) {
        // The decision height is fixed here and never re-read.
        let tip = self.services.chain.current_height();
        let inclusion_height = tip.saturating_add(1);

        let stored = match self.queue.mark_executing(id, inclusion_height) {
            Ok(stored) => stored,
            Err(err) => lifecycle_violation(err),
        };
        let request = stored_request(&self.queue, id);
        self.record_or_log(stored).await;
        tracing::debug!(%id, kind = %request.kind, inclusion_height, "executing operation");
        let _ = self.events_tx.send(OperationEvent::Executing { id });

        let outcome = match self.services.policy.evaluate(&request, inclusion_height) {
            Err(denied) => {
                tracing::info!(%id, kind = %request.kind, inclusion_height, "policy denied: {denied}");
                Outcome::Failed(denied.reason().to_string())
            }
            Ok(()) => {
                let builder = Arc::clone(&self.services.builder);
                let built = tokio::task::spawn_blocking(move || builder.build(&request, inclusion_height)).await;
                match built {
                    Ok(Ok(tx)) => Outcome::Succeeded(tx.txid),
                    Ok(Err(err)) => Outcome::Failed(err.to_string()),
                    Err(err) => Outcome::Failed(format!("transaction builder aborted: {err}")),
                }
            }
        };

        self.finish(id, outcome).await;
    }

    /// Fails operations a previous process left `Executing` and re-queues
    /// the `Pending` ones.
    pub(crate) async fn recover(&self, work_tx: &mpsc::UnboundedSender<OperationId>) {
        for record in self.queue.unfinished() {
            match record.state {
                OperationState::Executing => {
                    tracing::warn!(id = %record.id, "failing operation interrupted by restart");
                    self.finish(record.id, Outcome::Failed(INTERRUPTED.to_string())).await;
                }
                OperationState::Pending => {
                    if work_tx.send(record.id).is_err() {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    /// Fails an operation that was registered but can no longer reach a
    /// worker.
    pub(crate) async fn abandon(&self, id: OperationId) {
        let inclusion_height = self.services.chain.next_height();
        match self.queue.mark_executing(id, inclusion_height) {
            Ok(stored) => self.record_or_log(stored).await,
            Err(err) => lifecycle_violation(err),
        }
        tracing::warn!(%id, "operation abandoned by stopping runtime");
        self.finish(id, Outcome::Failed(RUNTIME_STOPPED.to_string())).await;
    }

    async fn finish(&self, id: OperationId, outcome: Outcome) {
        let height = self.services.chain.current_height();
        let stored = match self.queue.complete(id, outcome.clone(), height) {
            Ok(stored) => stored,
            Err(err) => lifecycle_violation(err),
        };
        self.record_or_log(stored).await;

        let event = match outcome {
            Outcome::Succeeded(txid) => {
                tracing::info!(%id, %txid, "operation succeeded");
                OperationEvent::Succeeded { id, txid }
            }
            Outcome::Failed(reason) => {
                tracing::info!(%id, %reason, "operation failed");
                OperationEvent::Failed { id, reason }
            }
        };
        let _ = self.events_tx.send(event);
    }

    async fn record_or_log(&self, stored: StoredTransition) {
        let seq = stored.seq;
        if let Err(err) = self.record(stored).await {
            tracing::error!(seq, "transition not persisted: {err}");
        }
    }
}

/// Starts `workers` tasks sharing one work channel. Each exits once
/// `shutdown` flips or the channel closes; none abandons an operation it
/// has already picked up.
pub(crate) fn spawn_workers(
    ctx: Arc<ExecutorContext>,
    work_rx: mpsc::UnboundedReceiver<OperationId>,
    shutdown: watch::Receiver<bool>,
    workers: usize,
) -> Vec<JoinHandle<()>> {
    let work_rx = Arc::new(Mutex::new(work_rx));
    (0..workers.max(1))
        .map(|worker| {
            let ctx = Arc::clone(&ctx);
            let work_rx = Arc::clone(&work_rx);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let next = {
                        let mut rx = work_rx.lock().await;
                        if *shutdown.borrow() {
                            None
                        } else {
                            tokio::select! {
                                biased;
                                _ = shutdown.changed() => None,
                                id = rx.recv() => id,
                            }
                        }
                    };
                    let Some(id) = next else {
                        break;
                    };
                    ctx.execute(id).await;
                }
                tracing::debug!(worker, "operation worker stopped");
            })
        })
        .collect()
}

fn stored_request(queue: &OperationQueue, id: OperationId) -> crate::operation::OperationRequest {
    match queue.get(id) {
        Ok(record) => record.request,
        Err(err) => lifecycle_violation(err),
    }
}

fn lifecycle_violation(err: QueueError) -> ! {
    tracing::error!("operation lifecycle violated: {err}");
    panic!("operation lifecycle violated: {err}");
}
