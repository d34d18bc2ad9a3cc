//! Row-level change notifications for the `orders` table.

use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgListener, PgPool};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Postgres channel the `orders` trigger notifies on.
pub const ORDER_CHANNEL: &str = "order_changes";

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One notification, as sent by the trigger: `{"op": "UPDATE", "id": ..., "restaurant_id": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderChange {
    #[serde(rename = "op")]
    pub kind: ChangeKind,
    pub id: Uuid,
    pub restaurant_id: Uuid,
}

/// Fan-out of order changes to every subscriber in the process.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<OrderChange>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, change: OrderChange) {
        // No receivers is fine: nobody is watching this restaurant.
        let _ = self.tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderChange> {
        self.tx.subscribe()
    }
}

/// Forwards `NOTIFY order_changes` payloads into `feed` until the connection drops.
pub async fn listen_postgres(db: PgPool, feed: ChangeFeed) -> anyhow::Result<()> {
    let mut listener = PgListener::connect_with(&db).await?;
    listener.listen(ORDER_CHANNEL).await?;
    info!(channel = ORDER_CHANNEL, "listening for order changes");

    loop {
        let notification = listener.recv().await?;
        match serde_json::from_str::<OrderChange>(notification.payload()) {
            Ok(change) => {
                debug!(?change, "order change");
                feed.publish(change);
            }
            Err(e) => {
                warn!(error = %e, payload = notification.payload(), "malformed order change");
            }
        }
    }
}
