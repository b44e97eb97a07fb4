//! Transfer orchestrator: a single-flight, strictly-ordered state machine
//! that drives a fixed number of items through a move -> tag -> move
//! sequence, suspending at each phase boundary until the rendering layer
//! signals completion.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bus::StatusPublisher;
use pcp::{ClientIdentity, PortId, TransferState};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// Items moved per run. Fixed by the process definition.
pub const ITEM_COUNT: usize = 4;
/// Pause between finishing one item and starting the next.
pub const INTER_ITEM_DELAY: Duration = Duration::from_millis(500);
/// Destination layout: two items per row.
pub const ITEMS_PER_ROW: usize = 2;

/// The three ordered sub-steps an item passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    MoveToStaging,
    Tag,
    MoveToDestination,
}

/// Completion signal from the rendering layer, correlated to one item and
/// one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseComplete {
    pub item: usize,
    pub phase: TransferPhase,
}

/// Handle for one tracked item at a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHandle {
    pub index: usize,
    pub tagged: bool,
}

impl ItemHandle {
    fn fresh(index: usize) -> Self {
        Self {
            index,
            tagged: false,
        }
    }

    fn tagged(index: usize) -> Self {
        Self {
            index,
            tagged: true,
        }
    }
}

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    items_moved: usize,
    source_items: Vec<ItemHandle>,
    dest_items: Vec<ItemHandle>,
}

/// Read-only view of the run state for callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSnapshot {
    pub running: bool,
    pub items_moved: usize,
    pub source_len: usize,
    pub dest_len: usize,
}

/// Seam to the excluded rendering layer. Every method fires the visual
/// action and returns; phase completion arrives separately as a
/// [`PhaseComplete`] signal.
#[async_trait]
pub trait TransferRenderer: Send + Sync {
    async fn set_triggers_enabled(&self, enabled: bool);
    async fn clear_station(&self, port: &PortId);
    async fn stage_source_items(&self, port: &PortId, count: usize);
    async fn begin_move_to_staging(&self, item: usize);
    async fn begin_tagging(&self, item: usize);
    async fn place_at_destination(&self, item: usize, row: usize, col: usize);
    async fn restore_default_markers(&self);
    async fn notify_complete(&self, moved: usize);
}

enum PhaseWait {
    Signaled,
    Timeout,
    Closed,
}

/// One orchestrator instance, one run at a time.
pub struct TransferOrchestrator {
    renderer: Arc<dyn TransferRenderer>,
    publisher: StatusPublisher,
    state: Mutex<RunState>,
    signals: Mutex<mpsc::Receiver<PhaseComplete>>,
    phase_timeout: Option<Duration>,
}

impl TransferOrchestrator {
    /// `signals` carries the rendering layer's phase-completion
    /// notifications. `phase_timeout` of `None` waits indefinitely.
    pub fn new(
        renderer: Arc<dyn TransferRenderer>,
        publisher: StatusPublisher,
        signals: mpsc::Receiver<PhaseComplete>,
        phase_timeout: Option<Duration>,
    ) -> Self {
        Self {
            renderer,
            publisher,
            state: Mutex::new(RunState::default()),
            signals: Mutex::new(signals),
            phase_timeout,
        }
    }

    pub async fn snapshot(&self) -> RunSnapshot {
        let state = self.state.lock().await;
        RunSnapshot {
            running: state.running,
            items_moved: state.items_moved,
            source_len: state.source_items.len(),
            dest_len: state.dest_items.len(),
        }
    }

    /// Drives one full transfer from `source` to `dest`, announcing
    /// progress to `consumer`. A second start while a run is active is a
    /// silent no-op that leaves the run state untouched.
    pub async fn start_transfer(
        &self,
        source: &PortId,
        dest: &PortId,
        consumer: ClientIdentity,
    ) {
        {
            let mut state = self.state.lock().await;
            if state.running {
                debug!(source = %source, "transfer start ignored: run already active");
                return;
            }
            state.running = true;
            state.items_moved = 0;
            state.source_items = (0..ITEM_COUNT).map(ItemHandle::fresh).collect();
            state.dest_items.clear();
        }

        info!(source = %source, dest = %dest, "transfer started");
        self.renderer.set_triggers_enabled(false).await;
        self.renderer.clear_station(source).await;
        self.renderer.clear_station(dest).await;
        self.renderer.stage_source_items(source, ITEM_COUNT).await;
        self.publisher
            .publish_status(source, TransferState::Unloading, consumer)
            .await;

        let mut signals = self.signals.lock().await;
        for item in 0..ITEM_COUNT {
            {
                let state = self.state.lock().await;
                // Membership, not length: phase C shrinks the source list
                // every iteration.
                if !state.source_items.iter().any(|handle| handle.index == item) {
                    // Defensive guard, not an error.
                    debug!(item, "skipping item missing from tracked source");
                    continue;
                }
            }

            self.renderer.begin_move_to_staging(item).await;
            match self
                .await_phase(&mut signals, item, TransferPhase::MoveToStaging)
                .await
            {
                PhaseWait::Signaled => {}
                PhaseWait::Timeout => return self.abort_run(item, "phase signal timed out").await,
                PhaseWait::Closed => {
                    return self.abort_run(item, "phase signal channel closed").await
                }
            }

            self.renderer.begin_tagging(item).await;
            match self.await_phase(&mut signals, item, TransferPhase::Tag).await {
                PhaseWait::Signaled => {}
                PhaseWait::Timeout => return self.abort_run(item, "phase signal timed out").await,
                PhaseWait::Closed => {
                    return self.abort_run(item, "phase signal channel closed").await
                }
            }

            {
                let mut state = self.state.lock().await;
                state.source_items.retain(|handle| handle.index != item);
                state.dest_items.push(ItemHandle::tagged(item));
                state.items_moved += 1;
            }
            self.renderer
                .place_at_destination(item, item / ITEMS_PER_ROW, item % ITEMS_PER_ROW)
                .await;
            debug!(item, "item finalized at destination");

            tokio::time::sleep(INTER_ITEM_DELAY).await;
        }
        drop(signals);

        let moved = {
            let mut state = self.state.lock().await;
            state.running = false;
            state.items_moved
        };
        self.publisher
            .publish_status(dest, TransferState::Loading, consumer)
            .await;
        self.renderer.set_triggers_enabled(true).await;
        self.renderer.notify_complete(moved).await;
        info!(moved, "transfer complete");
    }

    /// Clears both stations and re-arms the triggers. Rejected while a run
    /// is active.
    pub async fn reset(&self, source: &PortId, dest: &PortId) {
        {
            let mut state = self.state.lock().await;
            if state.running {
                warn!("reset rejected while a transfer is running");
                return;
            }
            state.running = false;
            state.items_moved = 0;
            state.source_items.clear();
            state.dest_items.clear();
        }
        self.renderer.clear_station(source).await;
        self.renderer.clear_station(dest).await;
        self.renderer.restore_default_markers().await;
        self.renderer.set_triggers_enabled(true).await;
        info!("run state reset");
    }

    /// Waits for the completion signal of exactly this (item, phase) pair.
    /// Signals for any other pair are stale and discarded.
    async fn await_phase(
        &self,
        signals: &mut mpsc::Receiver<PhaseComplete>,
        item: usize,
        phase: TransferPhase,
    ) -> PhaseWait {
        loop {
            let received = match self.phase_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, signals.recv()).await {
                    Ok(received) => received,
                    Err(_) => return PhaseWait::Timeout,
                },
                None => signals.recv().await,
            };
            match received {
                Some(signal) if signal.item == item && signal.phase == phase => {
                    return PhaseWait::Signaled;
                }
                Some(signal) => {
                    warn!(
                        expected_item = item,
                        got_item = signal.item,
                        ?phase,
                        got_phase = ?signal.phase,
                        "discarding stale phase signal"
                    );
                }
                None => return PhaseWait::Closed,
            }
        }
    }

    /// Ends a run that cannot make progress. Item lists stay as they
    /// stand; triggers come back so the operator can reset or retry.
    async fn abort_run(&self, item: usize, reason: &'static str) {
        warn!(item, reason, "transfer aborted");
        {
            let mut state = self.state.lock().await;
            state.running = false;
        }
        self.renderer.set_triggers_enabled(true).await;
    }
}
