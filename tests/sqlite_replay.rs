use std::{sync::Arc, time::Duration};

use tempfile::TempDir;

use shieldq::{
    build::simulated::SimulatedBuilder,
    chain::ChainTip,
    core::queue::OperationQueue,
    journal::Transition,
    operation::{OperationRequest, OperationState, Outcome},
    persist::{
        TransitionSink,
        sqlite::{JournalStats, SqliteTransitionSink},
    },
    policy::{DEPOSITS_DISABLED, ValidationPolicy},
    runtime::{
        executor::{INTERRUPTED, Services},
        handle::{RuntimeConfig, spawn_operations},
    },
    types::PoolType,
    upgrade::{UpgradeId, UpgradeSchedule},
};

fn shield(to: PoolType) -> OperationRequest {
    OperationRequest::shield_coinbase(to, 100)
}

#[test]
fn journal_replay_restores_queue() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("ops.db");

    let queue = OperationQueue::new();
    let (a, t1) = queue.submit(shield(PoolType::Sapling), 100);
    let (b, t2) = queue.submit(shield(PoolType::Orchard), 100);
    let t3 = queue.mark_executing(a, 101).expect("exec a");
    let t4 = queue
        .complete(a, Outcome::Succeeded("ab".repeat(32)), 101)
        .expect("complete a");
    let t5 = queue.mark_executing(b, 101).expect("exec b");

    {
        let mut sink = SqliteTransitionSink::open(&path).expect("open");
        assert_eq!(sink.append_transitions(&[t1, t2, t3]).expect("append"), 3);
        assert_eq!(sink.append_transitions(&[t4, t5]).expect("append"), 5);
        sink.flush().expect("flush");
    }

    let sink = SqliteTransitionSink::open(&path).expect("reopen");
    assert_eq!(sink.latest_seq().expect("latest"), 5);
    assert_eq!(sink.load_transitions_after(3).expect("tail").len(), 2);

    let restored = sink.load_queue().expect("load");
    assert_eq!(restored.export_snapshot(), queue.export_snapshot());
    assert_eq!(restored.latest_seq(), 5);
    assert_eq!(restored.state(b).expect("b"), OperationState::Executing);
}

#[test]
fn snapshot_then_compaction_keeps_the_tail() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("ops.db");
    let mut sink = SqliteTransitionSink::open(&path).expect("open");

    let queue = OperationQueue::new();
    let mut pending = Vec::new();
    for _ in 0..4 {
        let (id, stored) = queue.submit(shield(PoolType::Sapling), 100);
        pending.push(stored);
        let stored = queue.mark_executing(id, 101).expect("exec");
        pending.push(stored);
    }
    sink.append_transitions(&pending).expect("append");

    let snapshot = queue.export_snapshot();
    sink.write_snapshot(&snapshot, 8).expect("snapshot");
    assert_eq!(sink.compact_through(8).expect("compact"), 8);
    assert_eq!(sink.latest_seq().expect("latest"), 0);

    let last = queue.list(None)[3];
    let tail = queue
        .complete(last, Outcome::Failed("x".to_string()), 102)
        .expect("complete");
    sink.append_transitions(&[tail]).expect("append tail");

    let restored = SqliteTransitionSink::open(&path)
        .expect("reopen")
        .load_queue()
        .expect("load");
    assert_eq!(restored.export_snapshot(), queue.export_snapshot());
    assert_eq!(restored.get(last).expect("last").state.failure_reason(), Some("x"));
}

#[test]
fn history_and_stats_read_the_operation_index() {
    let mut sink = SqliteTransitionSink::open_in_memory().expect("open");
    let queue = OperationQueue::new();
    let (a, t1) = queue.submit(shield(PoolType::Sapling), 100);
    let (b, t2) = queue.submit(shield(PoolType::Orchard), 100);
    let t3 = queue.mark_executing(a, 101).expect("exec a");
    let t4 = queue
        .complete(a, Outcome::Failed("Could not find any coinbase funds to shield".to_string()), 101)
        .expect("complete a");
    // Out of sequence order, as concurrent workers may deliver them.
    sink.append_transitions(&[t1, t3]).expect("append");
    sink.append_transitions(&[t4, t2]).expect("append");

    let history = sink.operation_history(a).expect("history");
    assert_eq!(history.iter().map(|t| t.seq).collect::<Vec<_>>(), vec![1, 3, 4]);
    assert!(matches!(history[0].transition, Transition::Submitted { ref record } if record.id == a));
    assert!(matches!(history[2].transition, Transition::Completed { id, .. } if id == a));
    assert_eq!(sink.operation_history(b).expect("history").len(), 1);

    assert_eq!(
        sink.stats().expect("stats"),
        JournalStats {
            submitted: 2,
            executing: 1,
            completed: 1,
        }
    );

    let restored = sink.load_queue().expect("load");
    assert_eq!(restored.export_snapshot(), queue.export_snapshot());
}

#[test]
fn empty_journal_loads_empty_queue() {
    let sink = SqliteTransitionSink::open_in_memory().expect("open");
    let queue = sink.load_queue().expect("load");
    assert!(queue.is_empty());
    assert_eq!(queue.latest_seq(), 0);
}

#[tokio::test]
async fn runtime_state_survives_restart() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("ops.db");
    let schedule = Arc::new(
        UpgradeSchedule::new([
            (UpgradeId::Overwinter, 1),
            (UpgradeId::Sapling, 1),
            (UpgradeId::Blossom, 205),
            (UpgradeId::Heartwood, 210),
            (UpgradeId::Canopy, 220),
        ])
        .expect("schedule"),
    );
    let services = || {
        let builder = SimulatedBuilder::new();
        builder.fund(PoolType::Transparent, 1_000);
        Services {
            chain: Arc::new(ChainTip::new(Arc::clone(&schedule), 225)),
            policy: Arc::new(ValidationPolicy::new(Arc::clone(&schedule), UpgradeId::Canopy)),
            builder: Arc::new(builder),
        }
    };
    let config = RuntimeConfig {
        workers: 2,
        ..RuntimeConfig::default()
    };

    let sink = SqliteTransitionSink::open(&path).expect("open");
    let handle = spawn_operations(OperationQueue::new(), services(), Some(Box::new(sink)), config.clone());
    let denied = handle.submit(shield(PoolType::Sprout)).await.expect("submit");
    let ok = handle.submit(shield(PoolType::Sapling)).await.expect("submit");
    for id in [denied, ok] {
        handle
            .wait_terminal(id, Duration::from_millis(5), Duration::from_secs(5))
            .await
            .expect("terminal");
    }
    let before = (handle.get(denied).expect("denied"), handle.get(ok).expect("ok"));
    handle.flush().await.expect("flush");
    handle.shutdown().await.expect("shutdown");

    let sink = SqliteTransitionSink::open(&path).expect("reopen");
    let queue = sink.load_queue().expect("load");
    assert_eq!(queue.get(denied).expect("denied"), before.0);
    assert_eq!(queue.get(ok).expect("ok"), before.1);
    assert_eq!(before.0.state.failure_reason(), Some(DEPOSITS_DISABLED));

    // A record left mid-execution is failed by the next process.
    let (stuck, _) = queue.submit(shield(PoolType::Sapling), 225);
    queue.mark_executing(stuck, 226).expect("exec");
    let handle = spawn_operations(queue, services(), Some(Box::new(sink)), config);
    let rec = handle
        .wait_terminal(stuck, Duration::from_millis(5), Duration::from_secs(5))
        .await
        .expect("terminal");
    assert_eq!(rec.state.failure_reason(), Some(INTERRUPTED));
    assert_eq!(handle.list(None).len(), 3);
    handle.shutdown().await.expect("shutdown");
}
