//! Headless stand-in for the excluded rendering layer: logs each visual
//! action and acknowledges awaited phases after a simulated animation
//! delay.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use pcp::PortId;
use tokio::sync::mpsc;
use tracing::info;
use transfer::{PhaseComplete, TransferPhase, TransferRenderer};

const ANIMATION_DELAY: Duration = Duration::from_millis(200);

pub struct AutoRenderer {
    signals: mpsc::Sender<PhaseComplete>,
}

impl AutoRenderer {
    pub fn new(signals: mpsc::Sender<PhaseComplete>) -> Arc<Self> {
        Arc::new(Self { signals })
    }

    fn ack_later(&self, item: usize, phase: TransferPhase) {
        let signals = self.signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ANIMATION_DELAY).await;
            let _ = signals.send(PhaseComplete { item, phase }).await;
        });
    }
}

#[async_trait]
impl TransferRenderer for AutoRenderer {
    async fn set_triggers_enabled(&self, enabled: bool) {
        info!(enabled, "triggers");
    }

    async fn clear_station(&self, port: &PortId) {
        info!(port = %port, "station cleared");
    }

    async fn stage_source_items(&self, port: &PortId, count: usize) {
        info!(port = %port, count, "source items staged");
    }

    async fn begin_move_to_staging(&self, item: usize) {
        info!(item, "moving to staging");
        self.ack_later(item, TransferPhase::MoveToStaging);
    }

    async fn begin_tagging(&self, item: usize) {
        info!(item, "tagging");
        self.ack_later(item, TransferPhase::Tag);
    }

    async fn place_at_destination(&self, item: usize, row: usize, col: usize) {
        info!(item, row, col, "placed at destination");
    }

    async fn restore_default_markers(&self) {
        info!("default markers restored");
    }

    async fn notify_complete(&self, moved: usize) {
        info!(moved, "transfer finished");
    }
}
