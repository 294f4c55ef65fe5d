//! Producer of orders that still await a final status

use shared::models::Order;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::db::{RepoError, Store};

/// Polls the store for non-terminal orders and hands them to the reconciler
///
/// Keeps an `offset` cursor over non-terminal orders ordered by id. Every tick
/// fetches one page at the cursor and advances it by the page size; an empty
/// page resets the cursor to the front so newly uploaded orders and orders
/// that are still pending get picked up again.
pub struct OrderSource {
    store: Arc<dyn Store>,
    limit: i64,
    poll_interval: Duration,
    offset: i64,
}

impl OrderSource {
    pub fn new(store: Arc<dyn Store>, limit: i64, poll_interval: Duration) -> Self {
        Self {
            store,
            limit,
            poll_interval,
            offset: 0,
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Fetch the next page and move the cursor
    pub async fn poll_once(&mut self) -> Vec<Order> {
        match self.store.unprocessed_orders(self.limit, self.offset).await {
            Ok(orders) => {
                self.offset += orders.len() as i64;
                orders
            }
            Err(RepoError::NotFound(_)) => {
                if self.offset != 0 {
                    tracing::debug!(offset = self.offset, "No more unprocessed orders, rewinding");
                }
                self.offset = 0;
                Vec::new()
            }
            Err(e) => {
                tracing::error!(offset = self.offset, error = %e, "Failed to fetch unprocessed orders");
                Vec::new()
            }
        }
    }

    /// Produce orders into `tx` until `cancel` fires or the receiver is gone.
    ///
    /// Owns the sending half; it is closed by being dropped on return.
    pub async fn run(mut self, tx: mpsc::Sender<Order>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            for order in self.poll_once().await {
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = tx.send(order) => sent,
                };
                if sent.is_err() {
                    tracing::debug!("Order consumer is gone, source stopping");
                    return;
                }
            }
        }

        tracing::debug!("Order source stopped");
    }
}
