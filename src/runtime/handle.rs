use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Duration, Instant},
};

use crate::{
    chain::UpgradeInfo,
    core::queue::{OperationQueue, QueueError, QueueSnapshotV1},
    journal::{DurableWatermark, StoredTransition, Transition},
    operation::{OperationId, OperationRecord, OperationRequest, OperationState, RequestError},
    persist::{PersistError, TransitionSink},
    policy::PolicyDenied,
    types::{Height, OpSeq, PoolType},
};

use super::{
    events::OperationEvent,
    executor::{ExecutorContext, Services, spawn_workers},
};

/// Errors surfaced to callers of [`OperationsHandle`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The request is structurally malformed.
    #[error("invalid request: {0}")]
    Request(#[from] RequestError),
    /// Unknown id or lifecycle violation.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Persistence failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// The operation did not finish within the caller's deadline.
    #[error("operation {0} still running at deadline")]
    Timeout(OperationId),
    /// A runtime task is gone.
    #[error("runtime channel closed")]
    ChannelClosed,
}

/// Worker pool and persistence tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of executor tasks.
    pub workers: usize,
    /// Write submissions through to disk immediately.
    pub flush_on_submit: bool,
    /// Flush once this many transitions are buffered.
    pub batch_max_transitions: usize,
    /// Flush buffered transitions after this long.
    pub batch_max_latency_ms: u64,
    /// Capacity of the persistence channel.
    pub persist_queue_bound: usize,
    /// Snapshot after this many transitions; 0 disables.
    pub snapshot_every_transitions: usize,
    /// Drop journal rows covered by a snapshot.
    pub compact_after_snapshot: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            flush_on_submit: true,
            batch_max_transitions: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 256,
            snapshot_every_transitions: 2000,
            compact_after_snapshot: false,
        }
    }
}

/// Caller-side handle: submit, poll, and shut down.
pub struct OperationsHandle {
    ctx: Arc<ExecutorContext>,
    work_tx: mpsc::UnboundedSender<OperationId>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Clone for OperationsHandle {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            work_tx: self.work_tx.clone(),
            shutdown_tx: Arc::clone(&self.shutdown_tx),
            workers: Arc::clone(&self.workers),
        }
    }
}

pub(crate) enum PersistMsg {
    Transition(StoredTransition),
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: QueueSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Starts the worker pool (and persistence worker when `sink` is given)
/// over `queue`. Operations left unfinished in `queue` are recovered first.
pub fn spawn_operations(
    queue: OperationQueue,
    services: Services,
    sink: Option<Box<dyn TransitionSink>>,
    config: RuntimeConfig,
) -> OperationsHandle {
    let (events_tx, _) = broadcast::channel::<OperationEvent>(1024);
    let (work_tx, work_rx) = mpsc::unbounded_channel::<OperationId>();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let durable = DurableWatermark::new(queue.latest_seq());
    let persist_tx = sink.map(|sink| {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
        spawn_persistence_worker(sink, persist_rx, events_tx.clone(), config.clone(), durable);
        persist_tx
    });

    let ctx = Arc::new(ExecutorContext::new(
        Arc::new(queue),
        services,
        persist_tx,
        events_tx,
        config.clone(),
    ));

    let recovery_ctx = Arc::clone(&ctx);
    let recovery_tx = work_tx.clone();
    tokio::spawn(async move {
        recovery_ctx.recover(&recovery_tx).await;
    });

    let workers = spawn_workers(Arc::clone(&ctx), work_rx, shutdown_rx, config.workers);
    tracing::info!(workers = workers.len(), "operation runtime started");

    OperationsHandle {
        ctx,
        work_tx,
        shutdown_tx: Arc::new(shutdown_tx),
        workers: Arc::new(Mutex::new(workers)),
    }
}

impl OperationsHandle {
    /// Receives lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.ctx.events_tx.subscribe()
    }

    /// Registers `request` and returns its id without waiting for execution.
    ///
    /// Only structural defects are rejected here; consensus rules are applied
    /// by the executor and show up as a `Failed` state. After shutdown this
    /// returns [`RuntimeError::ChannelClosed`] without registering anything.
    pub async fn submit(&self, request: OperationRequest) -> Result<OperationId, RuntimeError> {
        request.validate()?;
        if *self.shutdown_tx.borrow() || self.work_tx.is_closed() {
            return Err(RuntimeError::ChannelClosed);
        }

        let created_at = self.ctx.services.chain.current_height();
        let (id, stored) = self.ctx.queue.submit(request, created_at);
        if let Err(err) = self.ctx.record(stored).await {
            self.ctx.abandon(id).await;
            return Err(err);
        }
        tracing::debug!(%id, created_at, "operation submitted");
        let _ = self.ctx.events_tx.send(OperationEvent::Submitted { id });

        if self.work_tx.send(id).is_err() {
            self.ctx.abandon(id).await;
            return Err(RuntimeError::ChannelClosed);
        }
        Ok(id)
    }

    /// Current record for `id`.
    pub fn get(&self, id: OperationId) -> Result<OperationRecord, RuntimeError> {
        Ok(self.ctx.queue.get(id)?)
    }

    /// Current state for `id`.
    pub fn status(&self, id: OperationId) -> Result<OperationState, RuntimeError> {
        Ok(self.ctx.queue.state(id)?)
    }

    /// Ids in submission order, optionally filtered by status label.
    pub fn list(&self, status: Option<&str>) -> Vec<OperationId> {
        self.ctx.queue.list(status)
    }

    /// Polls `id` every `interval` until it is terminal or `timeout` passes.
    pub async fn wait_terminal(
        &self,
        id: OperationId,
        interval: Duration,
        timeout: Duration,
    ) -> Result<OperationRecord, RuntimeError> {
        let deadline = Instant::now() + timeout;
        loop {
            let record = self.get(id)?;
            if record.state.is_terminal() {
                return Ok(record);
            }
            if Instant::now() >= deadline {
                return Err(RuntimeError::Timeout(id));
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Whether a new `pool` address may be created at the current tip.
    pub fn authorize_new_address(&self, pool: PoolType) -> Result<(), PolicyDenied> {
        let height = self.ctx.services.chain.current_height();
        self.ctx.services.policy.check_new_address(pool, height)
    }

    /// Current tip height.
    pub fn current_height(&self) -> Height {
        self.ctx.services.chain.current_height()
    }

    /// Upgrade status table at the tip.
    pub fn upgrades(&self) -> Vec<UpgradeInfo> {
        self.ctx.services.chain.upgrades()
    }

    /// Waits until everything handed to persistence is on disk.
    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        let Some(tx) = self.ctx.persist_tx.as_ref() else {
            return Ok(self.ctx.queue.latest_seq());
        };

        let (flush_tx, flush_rx) = oneshot::channel();
        tx.send(PersistMsg::Flush { resp: flush_tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        flush_rx
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?
            .map_err(RuntimeError::from)
    }

    /// Writes a snapshot of the queue.
    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        self.ctx.checkpoint().await
    }

    /// Stops taking new work, lets running operations finish, and closes
    /// persistence. Operations still `Pending` stay registered.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let _ = self.shutdown_tx.send(true);
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::error!("operation worker ended abnormally: {err}");
            }
        }

        let Some(tx) = self.ctx.persist_tx.as_ref() else {
            return Ok(());
        };
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(PersistMsg::Shutdown { resp: done_tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        done_rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn TransitionSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    events_tx: broadcast::Sender<OperationEvent>,
    config: RuntimeConfig,
    mut durable: DurableWatermark,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredTransition>::new();
        let latency = Duration::from_millis(config.batch_max_latency_ms);
        let mut deadline = Instant::now() + latency;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut durable, &events_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Transition(stored) => {
                            let is_submit = matches!(stored.transition, Transition::Submitted { .. });
                            buf.push(stored);

                            if buf.len() >= config.batch_max_transitions || (config.flush_on_submit && is_submit) {
                                // Failures stay buffered and are retried on the next flush.
                                let _ = flush_buf(&sink, &mut buf, &mut durable, &events_tx, true).await;
                                deadline = Instant::now() + latency;
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut durable, &events_tx, true).await;
                            let _ = resp.send(result.map(|_| durable.through()));
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let result = match flush_buf(&sink, &mut buf, &mut durable, &events_tx, true).await {
                                Ok(()) => write_checkpoint(&sink, snapshot, last_seq, compact).await,
                                Err(err) => Err(err),
                            };
                            if result.is_ok() {
                                let before = durable.through();
                                if durable.cover_through(last_seq) > before {
                                    let _ = events_tx.send(OperationEvent::DurableUpTo { seq: durable.through() });
                                }
                            }
                            let _ = resp.send(result);
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut durable, &events_tx, true).await;
                            if !buf.is_empty() {
                                tracing::error!(lost = buf.len(), "journal closed with unpersisted transitions");
                            }
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut durable, &events_tx, false).await;
                    deadline = Instant::now() + latency;
                }
            }
        }
    });
}

async fn write_checkpoint(
    sink: &Arc<Mutex<Box<dyn TransitionSink>>>,
    snapshot: QueueSnapshotV1,
    last_seq: OpSeq,
    compact: bool,
) -> Result<(), PersistError> {
    let sink = Arc::clone(sink);
    tokio::task::spawn_blocking(move || {
        let mut sink = sink.blocking_lock();
        sink.write_snapshot(&snapshot, last_seq)?;
        if compact {
            let removed = sink.compact_through(last_seq)?;
            tracing::debug!(last_seq, removed, "journal compacted");
        }
        Ok::<(), PersistError>(())
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?
}

/// Appends the buffered batch. A batch the sink rejects is put back at the
/// front of `buf`; the watermark only advances over appended sequences.
async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn TransitionSink>>>,
    buf: &mut Vec<StoredTransition>,
    durable: &mut DurableWatermark,
    events_tx: &broadcast::Sender<OperationEvent>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() && !call_flush {
        return Ok(());
    }

    let batch = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let (batch, appended, flushed) = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let appended = if batch.is_empty() {
            Ok(())
        } else {
            sink.append_transitions(&batch).map(|_| ())
        };
        let flushed = if call_flush && appended.is_ok() {
            sink.flush()
        } else {
            Ok(())
        };
        (batch, appended, flushed)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    if let Err(err) = appended {
        tracing::error!(retained = batch.len(), "journal append failed: {err}");
        let mut retained = batch;
        retained.append(buf);
        *buf = retained;
        return Err(err);
    }

    let before = durable.through();
    let through = durable.mark(batch.iter().map(|t| t.seq));
    if through > before {
        let _ = events_tx.send(OperationEvent::DurableUpTo { seq: through });
    }

    flushed.inspect_err(|err| tracing::error!("journal flush failed: {err}"))
}
