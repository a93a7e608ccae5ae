//! Background task keeping `producer_summaries` in step with production.
//!
//! Updates are queued by the batch and applied in arrival order by a single
//! task, so the read model lags the ledger but never blocks a commit. A full
//! queue drops the update with a warning.

use chrono::{DateTime, NaiveDate, Utc};
use colony_core::ProducerId;
use persistence::Store;
use rust_decimal::Decimal;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const QUEUE_DEPTH: usize = 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct SummaryUpdate {
    pub producer_id: ProducerId,
    pub produced: Decimal,
    pub active_modules: u32,
    pub cycle_date: NaiveDate,
    pub at: DateTime<Utc>,
}

enum Message {
    Update(SummaryUpdate),
    Flush(oneshot::Sender<()>),
}

/// Handle to the sync task. Dropping it closes the queue; the task drains
/// what is left and exits.
pub struct SummarySync {
    tx: mpsc::Sender<Message>,
    task: JoinHandle<()>,
}

/// Cloneable sending side, handed to batch workers.
#[derive(Clone)]
pub struct SummarySender(mpsc::Sender<Message>);

impl SummarySender {
    /// Queue an update without waiting. Returns false if it was dropped.
    pub fn send(&self, update: SummaryUpdate) -> bool {
        let producer = update.producer_id;
        match self.0.try_send(Message::Update(update)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(category = "summary_sync", %producer, "summary queue full, update dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(category = "summary_sync", %producer, "summary queue closed, update dropped");
                false
            }
        }
    }
}

impl SummarySync {
    /// Spawn the task on the current Tokio runtime.
    pub fn spawn(store: Store) -> Self {
        let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
        let task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    Message::Update(u) => apply(&store, u).await,
                    Message::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!(category = "summary_sync", "summary queue drained");
        });
        Self { tx, task }
    }

    pub fn sender(&self) -> SummarySender {
        SummarySender(self.tx.clone())
    }

    /// Wait until every update queued before this call has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Message::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// Close the queue and wait for the task to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            error!(category = "summary_sync", error = %e, "summary task ended abnormally");
        }
    }
}

async fn apply(store: &Store, u: SummaryUpdate) {
    let result = store
        .upsert_summary(
            u.producer_id,
            u.produced,
            u.active_modules,
            u.cycle_date,
            u.at,
        )
        .await;
    if let Err(e) = result {
        error!(
            category = "summary_sync",
            producer = %u.producer_id,
            error = %e,
            "summary update failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn update(producer: ProducerId, at: DateTime<Utc>) -> SummaryUpdate {
        SummaryUpdate {
            producer_id: producer,
            produced: Decimal::new(5, 0),
            active_modules: 1,
            cycle_date: at.date_naive(),
            at,
        }
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_waiting() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let sender = SummarySender(tx);
        assert!(sender.send(update(ProducerId(1), now)));
        assert!(!sender.send(update(ProducerId(2), now)));
    }

    #[tokio::test]
    async fn updates_land_after_flush() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let p = store
            .create_producer("p", None, Decimal::ZERO, now)
            .await
            .unwrap();
        let sync = SummarySync::spawn(store.clone());
        let tx = sync.sender();
        for _ in 0..3 {
            assert!(tx.send(update(p.id, now)));
        }
        sync.flush().await;
        let s = store.get_summary(p.id).await.unwrap().unwrap();
        assert_eq!(s.lifetime_production, Decimal::new(15, 0));
        sync.shutdown().await;
    }
}
