use crate::*;

use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use bus::{StatusPublisher, StatusSink};
use pcp::{ClientIdentity, PcpStatus, PortId, TransferState};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum RenderCall {
    TriggersEnabled(bool),
    ClearStation(String),
    StageSource(String, usize),
    MoveToStaging(usize),
    Tagging(usize),
    PlaceAtDestination { item: usize, row: usize, col: usize },
    RestoreMarkers,
    Complete(usize),
}

/// Harness renderer: records every visual action and, when built with an
/// ack sender, immediately confirms each awaited phase.
struct HarnessRenderer {
    calls: StdMutex<Vec<RenderCall>>,
    acks: Option<mpsc::Sender<PhaseComplete>>,
}

impl HarnessRenderer {
    fn auto_acking(acks: mpsc::Sender<PhaseComplete>) -> Arc<Self> {
        Arc::new(Self {
            calls: StdMutex::new(Vec::new()),
            acks: Some(acks),
        })
    }

    fn silent() -> Arc<Self> {
        Arc::new(Self {
            calls: StdMutex::new(Vec::new()),
            acks: None,
        })
    }

    fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: RenderCall) {
        self.calls.lock().expect("calls lock").push(call);
    }

    async fn ack(&self, item: usize, phase: TransferPhase) {
        if let Some(acks) = &self.acks {
            acks.send(PhaseComplete { item, phase })
                .await
                .expect("ack channel open");
        }
    }
}

#[async_trait]
impl TransferRenderer for HarnessRenderer {
    async fn set_triggers_enabled(&self, enabled: bool) {
        self.record(RenderCall::TriggersEnabled(enabled));
    }

    async fn clear_station(&self, port: &PortId) {
        self.record(RenderCall::ClearStation(port.as_str().to_string()));
    }

    async fn stage_source_items(&self, port: &PortId, count: usize) {
        self.record(RenderCall::StageSource(port.as_str().to_string(), count));
    }

    async fn begin_move_to_staging(&self, item: usize) {
        self.record(RenderCall::MoveToStaging(item));
        self.ack(item, TransferPhase::MoveToStaging).await;
    }

    async fn begin_tagging(&self, item: usize) {
        self.record(RenderCall::Tagging(item));
        self.ack(item, TransferPhase::Tag).await;
    }

    async fn place_at_destination(&self, item: usize, row: usize, col: usize) {
        self.record(RenderCall::PlaceAtDestination { item, row, col });
    }

    async fn restore_default_markers(&self) {
        self.record(RenderCall::RestoreMarkers);
    }

    async fn notify_complete(&self, moved: usize) {
        self.record(RenderCall::Complete(moved));
    }
}

struct RecordingSink {
    published: StdMutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            published: StdMutex::new(Vec::new()),
        })
    }

    fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().expect("published lock").clone()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.published
            .lock()
            .expect("published lock")
            .push((topic.to_string(), payload));
        Ok(())
    }
}

fn port(id: &str) -> PortId {
    PortId::new(id).expect("valid port id")
}

fn orchestrator(
    renderer: Arc<HarnessRenderer>,
    sink: Arc<RecordingSink>,
    signals: mpsc::Receiver<PhaseComplete>,
    phase_timeout: Option<Duration>,
) -> TransferOrchestrator {
    TransferOrchestrator::new(
        renderer,
        StatusPublisher::new(sink),
        signals,
        phase_timeout,
    )
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn completed_run_moves_every_item() {
    let (ack_tx, ack_rx) = mpsc::channel(16);
    let renderer = HarnessRenderer::auto_acking(ack_tx);
    let sink = RecordingSink::new();
    let orchestrator = orchestrator(Arc::clone(&renderer), Arc::clone(&sink), ack_rx, None);

    orchestrator
        .start_transfer(&port("s1"), &port("s2"), ClientIdentity::Xms)
        .await;

    let snapshot = orchestrator.snapshot().await;
    assert!(!snapshot.running);
    assert_eq!(snapshot.items_moved, ITEM_COUNT);
    assert_eq!(snapshot.dest_len, ITEM_COUNT);
    assert_eq!(snapshot.source_len, 0);

    let calls = renderer.calls();
    let completions: Vec<_> = calls
        .iter()
        .filter(|call| matches!(call, RenderCall::Complete(_)))
        .collect();
    assert_eq!(completions, vec![&RenderCall::Complete(ITEM_COUNT)]);
    assert_eq!(
        calls.last(),
        Some(&RenderCall::Complete(ITEM_COUNT)),
        "completion notice comes after triggers are re-armed"
    );
    let trigger_changes: Vec<_> = calls
        .iter()
        .filter_map(|call| match call {
            RenderCall::TriggersEnabled(enabled) => Some(*enabled),
            _ => None,
        })
        .collect();
    assert_eq!(trigger_changes, vec![false, true]);
}

#[tokio::test(start_paused = true)]
async fn items_finalize_in_ascending_order_two_per_row() {
    let (ack_tx, ack_rx) = mpsc::channel(16);
    let renderer = HarnessRenderer::auto_acking(ack_tx);
    let orchestrator = orchestrator(Arc::clone(&renderer), RecordingSink::new(), ack_rx, None);

    orchestrator
        .start_transfer(&port("s1"), &port("s2"), ClientIdentity::Xms)
        .await;

    let placements: Vec<_> = renderer
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RenderCall::PlaceAtDestination { item, row, col } => Some((item, row, col)),
            _ => None,
        })
        .collect();
    assert_eq!(placements, vec![(0, 0, 0), (1, 0, 1), (2, 1, 0), (3, 1, 1)]);
}

#[tokio::test(start_paused = true)]
async fn phases_run_strictly_in_sequence() {
    let (ack_tx, ack_rx) = mpsc::channel(16);
    let renderer = HarnessRenderer::auto_acking(ack_tx);
    let orchestrator = orchestrator(Arc::clone(&renderer), RecordingSink::new(), ack_rx, None);

    orchestrator
        .start_transfer(&port("s1"), &port("s2"), ClientIdentity::Xms)
        .await;

    let per_item: Vec<_> = renderer
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RenderCall::MoveToStaging(item) => Some((item, 0)),
            RenderCall::Tagging(item) => Some((item, 1)),
            RenderCall::PlaceAtDestination { item, .. } => Some((item, 2)),
            _ => None,
        })
        .collect();
    let expected: Vec<_> = (0..ITEM_COUNT)
        .flat_map(|item| [(item, 0), (item, 1), (item, 2)])
        .collect();
    assert_eq!(per_item, expected, "no pipelining across items");
}

#[tokio::test(start_paused = true)]
async fn shrinking_source_list_skips_no_item() {
    let (ack_tx, ack_rx) = mpsc::channel(16);
    let renderer = HarnessRenderer::auto_acking(ack_tx);
    let orchestrator = orchestrator(Arc::clone(&renderer), RecordingSink::new(), ack_rx, None);

    orchestrator
        .start_transfer(&port("s1"), &port("s2"), ClientIdentity::Xms)
        .await;

    // The source list loses one handle per finalized item; the per-item
    // guard must still let every remaining index through.
    let staged: Vec<_> = renderer
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RenderCall::MoveToStaging(item) => Some(item),
            _ => None,
        })
        .collect();
    assert_eq!(staged, vec![0, 1, 2, 3]);
    assert_eq!(orchestrator.snapshot().await.items_moved, ITEM_COUNT);
}

#[tokio::test(start_paused = true)]
async fn run_announces_unloading_then_loading() {
    let (ack_tx, ack_rx) = mpsc::channel(16);
    let renderer = HarnessRenderer::auto_acking(ack_tx);
    let sink = RecordingSink::new();
    let orchestrator = orchestrator(renderer, Arc::clone(&sink), ack_rx, None);

    orchestrator
        .start_transfer(&port("s1"), &port("s2"), ClientIdentity::Aas)
        .await;

    let published = sink.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].0, "xms/s1/status/aas");
    assert_eq!(published[1].0, "xms/s2/status/aas");
    let first = PcpStatus::decode(&published[0].1).expect("decode");
    assert_eq!(first.port_id, "s1");
    assert_eq!(first.state, TransferState::Unloading);
    let second = PcpStatus::decode(&published[1].1).expect("decode");
    assert_eq!(second.port_id, "s2");
    assert_eq!(second.state, TransferState::Loading);
}

#[tokio::test(start_paused = true)]
async fn start_while_running_leaves_run_state_untouched() {
    let (signal_tx, signal_rx) = mpsc::channel(16);
    let renderer = HarnessRenderer::silent();
    let orchestrator = Arc::new(orchestrator(
        Arc::clone(&renderer),
        RecordingSink::new(),
        signal_rx,
        None,
    ));

    let runner = Arc::clone(&orchestrator);
    let run = tokio::spawn(async move {
        runner
            .start_transfer(&port("s1"), &port("s2"), ClientIdentity::Xms)
            .await;
    });

    {
        let renderer = Arc::clone(&renderer);
        wait_for(move || {
            renderer
                .calls()
                .contains(&RenderCall::MoveToStaging(0))
        })
        .await;
    }

    orchestrator
        .start_transfer(&port("s1"), &port("s2"), ClientIdentity::Xms)
        .await;
    let snapshot = orchestrator.snapshot().await;
    assert!(snapshot.running);
    assert_eq!(snapshot.items_moved, 0);
    assert_eq!(snapshot.source_len, ITEM_COUNT);
    assert_eq!(snapshot.dest_len, 0);

    for item in 0..ITEM_COUNT {
        signal_tx
            .send(PhaseComplete {
                item,
                phase: TransferPhase::MoveToStaging,
            })
            .await
            .expect("signal channel open");
        signal_tx
            .send(PhaseComplete {
                item,
                phase: TransferPhase::Tag,
            })
            .await
            .expect("signal channel open");
    }
    run.await.expect("run task");

    let snapshot = orchestrator.snapshot().await;
    assert!(!snapshot.running);
    assert_eq!(snapshot.items_moved, ITEM_COUNT);
}

#[tokio::test(start_paused = true)]
async fn stale_phase_signals_are_discarded() {
    let (signal_tx, signal_rx) = mpsc::channel(16);
    let renderer = HarnessRenderer::silent();
    let orchestrator = Arc::new(orchestrator(
        Arc::clone(&renderer),
        RecordingSink::new(),
        signal_rx,
        None,
    ));

    let runner = Arc::clone(&orchestrator);
    let run = tokio::spawn(async move {
        runner
            .start_transfer(&port("s1"), &port("s2"), ClientIdentity::Xms)
            .await;
    });

    // A burst of mismatched signals first; the orchestrator must hold its
    // position until the matching pair arrives.
    signal_tx
        .send(PhaseComplete {
            item: 3,
            phase: TransferPhase::Tag,
        })
        .await
        .expect("signal channel open");
    for item in 0..ITEM_COUNT {
        signal_tx
            .send(PhaseComplete {
                item,
                phase: TransferPhase::MoveToStaging,
            })
            .await
            .expect("signal channel open");
        signal_tx
            .send(PhaseComplete {
                item,
                phase: TransferPhase::Tag,
            })
            .await
            .expect("signal channel open");
    }
    run.await.expect("run task");

    assert_eq!(orchestrator.snapshot().await.items_moved, ITEM_COUNT);
}

#[tokio::test(start_paused = true)]
async fn reset_zeroes_counters_and_lists() {
    let (ack_tx, ack_rx) = mpsc::channel(16);
    let renderer = HarnessRenderer::auto_acking(ack_tx);
    let orchestrator = orchestrator(Arc::clone(&renderer), RecordingSink::new(), ack_rx, None);

    orchestrator
        .start_transfer(&port("s1"), &port("s2"), ClientIdentity::Xms)
        .await;
    orchestrator.reset(&port("s1"), &port("s2")).await;

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(
        snapshot,
        RunSnapshot {
            running: false,
            items_moved: 0,
            source_len: 0,
            dest_len: 0,
        }
    );
    let calls = renderer.calls();
    assert!(calls.contains(&RenderCall::RestoreMarkers));
    assert_eq!(calls.last(), Some(&RenderCall::TriggersEnabled(true)));
}

#[tokio::test(start_paused = true)]
async fn reset_is_rejected_mid_run() {
    let (signal_tx, signal_rx) = mpsc::channel(16);
    let renderer = HarnessRenderer::silent();
    let orchestrator = Arc::new(orchestrator(
        Arc::clone(&renderer),
        RecordingSink::new(),
        signal_rx,
        None,
    ));

    let runner = Arc::clone(&orchestrator);
    let run = tokio::spawn(async move {
        runner
            .start_transfer(&port("s1"), &port("s2"), ClientIdentity::Xms)
            .await;
    });

    {
        let renderer = Arc::clone(&renderer);
        wait_for(move || {
            renderer
                .calls()
                .contains(&RenderCall::MoveToStaging(0))
        })
        .await;
    }

    orchestrator.reset(&port("s1"), &port("s2")).await;
    let snapshot = orchestrator.snapshot().await;
    assert!(snapshot.running, "reset must not interrupt an active run");
    assert_eq!(snapshot.source_len, ITEM_COUNT);

    for item in 0..ITEM_COUNT {
        for phase in [TransferPhase::MoveToStaging, TransferPhase::Tag] {
            signal_tx
                .send(PhaseComplete { item, phase })
                .await
                .expect("signal channel open");
        }
    }
    run.await.expect("run task");
}

#[tokio::test(start_paused = true)]
async fn phase_timeout_aborts_and_rearms_triggers() {
    let (_signal_tx, signal_rx) = mpsc::channel(16);
    let renderer = HarnessRenderer::silent();
    let orchestrator = orchestrator(
        Arc::clone(&renderer),
        RecordingSink::new(),
        signal_rx,
        Some(Duration::from_secs(1)),
    );

    orchestrator
        .start_transfer(&port("s1"), &port("s2"), ClientIdentity::Xms)
        .await;

    let snapshot = orchestrator.snapshot().await;
    assert!(!snapshot.running);
    assert_eq!(snapshot.items_moved, 0);
    let calls = renderer.calls();
    assert!(!calls.iter().any(|call| matches!(call, RenderCall::Complete(_))));
    assert_eq!(calls.last(), Some(&RenderCall::TriggersEnabled(true)));
}
