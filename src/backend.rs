use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    items::repo::{ItemRepo, PgItemRepo},
    memory::MemoryBackend,
    orders::repo::{OrderRepo, PgOrderRepo},
    realtime::ChangeFeed,
    restaurants::repo::{PgRestaurantRepo, RestaurantRepo},
    sections::repo::{PgSectionRepo, SectionRepo},
};

/// Table access shared by every holder, plus the `orders` change feed.
#[derive(Clone)]
pub struct Backend {
    pub restaurants: Arc<dyn RestaurantRepo>,
    pub sections: Arc<dyn SectionRepo>,
    pub items: Arc<dyn ItemRepo>,
    pub orders: Arc<dyn OrderRepo>,
    pub feed: ChangeFeed,
}

impl Backend {
    /// Postgres tables; the feed is filled by [`crate::realtime::listen_postgres`].
    pub fn postgres(db: PgPool, feed: ChangeFeed) -> Self {
        Self {
            restaurants: Arc::new(PgRestaurantRepo::new(db.clone())),
            sections: Arc::new(PgSectionRepo::new(db.clone())),
            items: Arc::new(PgItemRepo::new(db.clone())),
            orders: Arc::new(PgOrderRepo::new(db)),
            feed,
        }
    }

    pub fn memory(feed: ChangeFeed) -> (Self, Arc<MemoryBackend>) {
        let mem = Arc::new(MemoryBackend::new(feed.clone()));
        let backend = Self {
            restaurants: mem.clone(),
            sections: mem.clone(),
            items: mem.clone(),
            orders: mem.clone(),
            feed,
        };
        (backend, mem)
    }
}
