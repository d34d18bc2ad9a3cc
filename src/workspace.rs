//! Per-owner holder sets, created on first use and dropped on sign-out.

use std::{collections::HashMap, sync::Arc};

use tokio::{
    sync::{broadcast, broadcast::error::RecvError, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::services::SessionEvent,
    backend::Backend,
    error::StoreError,
    items::{
        repo_types::{ItemDraft, ItemPatch, MenuItem},
        services::ItemsHolder,
    },
    orders::services::{OrdersHolder, Subscription},
    restaurants::services::RestaurantHolder,
    sections::services::SectionsHolder,
};

pub struct Workspace {
    pub owner_id: Uuid,
    pub restaurant: RestaurantHolder,
    pub sections: SectionsHolder,
    pub items: ItemsHolder,
    pub orders: Arc<OrdersHolder>,
    order_watch: Mutex<Option<Subscription>>,
}

impl Workspace {
    pub fn new(owner_id: Uuid, backend: &Backend) -> Self {
        Self {
            owner_id,
            restaurant: RestaurantHolder::new(owner_id, backend.restaurants.clone()),
            sections: SectionsHolder::new(owner_id, backend.sections.clone()),
            items: ItemsHolder::new(owner_id, backend.items.clone()),
            orders: Arc::new(OrdersHolder::new(backend.orders.clone(), backend.feed.clone())),
            order_watch: Mutex::default(),
        }
    }

    /// Loads sections and items once, so positions and lookups see the whole menu.
    pub async fn ensure_menu(&self) -> Result<(), StoreError> {
        if !self.sections.is_loaded().await {
            let restaurant = self.restaurant.require().await?;
            self.sections.fetch(&restaurant).await?;
        }
        if !self.items.is_loaded().await {
            self.items.fetch(None).await?;
        }
        Ok(())
    }

    /// Adds an item to one of the owner's own sections.
    pub async fn add_item(&self, draft: ItemDraft) -> Result<MenuItem, StoreError> {
        self.ensure_menu().await?;
        self.own_section(draft.section_id).await?;
        self.items.add(draft).await
    }

    /// Patches an item; a move must target one of the owner's own sections.
    pub async fn update_item(&self, id: Uuid, patch: ItemPatch) -> Result<MenuItem, StoreError> {
        if let Some(section_id) = patch.section_id {
            self.ensure_menu().await?;
            self.own_section(section_id).await?;
        }
        self.items.update(id, patch).await
    }

    async fn own_section(&self, section_id: Uuid) -> Result<(), StoreError> {
        if self
            .sections
            .snapshot()
            .await
            .iter()
            .any(|s| s.id == section_id)
        {
            return Ok(());
        }
        warn!(owner_id = %self.owner_id, %section_id, "section outside the owner's menu");
        Err(StoreError::NotFound("section"))
    }

    /// Deletes a section; its items go with it.
    pub async fn delete_section(&self, id: Uuid) -> Result<(), StoreError> {
        self.sections.delete(id).await?;
        self.items.forget_section(id).await;
        Ok(())
    }

    /// Keeps the order board live for `restaurant_id`.
    pub async fn watch_orders(&self, restaurant_id: Uuid) {
        let mut watch = self.order_watch.lock().await;
        if watch
            .as_ref()
            .is_some_and(|s| s.restaurant_id() == restaurant_id)
        {
            return;
        }
        debug!(owner_id = %self.owner_id, %restaurant_id, "watching orders");
        *watch = Some(self.orders.subscribe(restaurant_id));
    }
}

/// Registry of open workspaces keyed by owner id.
#[derive(Clone)]
pub struct Workspaces {
    backend: Backend,
    open: Arc<RwLock<HashMap<Uuid, Arc<Workspace>>>>,
}

impl Workspaces {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            open: Arc::default(),
        }
    }

    pub async fn get(&self, owner_id: Uuid) -> Arc<Workspace> {
        if let Some(ws) = self.open.read().await.get(&owner_id) {
            return ws.clone();
        }
        let mut open = self.open.write().await;
        open.entry(owner_id)
            .or_insert_with(|| {
                debug!(%owner_id, "workspace opened");
                Arc::new(Workspace::new(owner_id, &self.backend))
            })
            .clone()
    }

    pub async fn evict(&self, owner_id: Uuid) -> bool {
        let removed = self.open.write().await.remove(&owner_id).is_some();
        if removed {
            debug!(%owner_id, "workspace closed");
        }
        removed
    }

    #[cfg(test)]
    pub async fn is_open(&self, owner_id: Uuid) -> bool {
        self.open.read().await.contains_key(&owner_id)
    }

    /// Follows session changes: sign-in warms the owner's restaurant, sign-out drops the workspace.
    pub fn spawn_session_sync(&self, mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::SignedIn { user_id }) => {
                        let ws = this.get(user_id).await;
                        match ws.restaurant.fetch().await {
                            Ok(_) => {
                                let onboarded = ws.restaurant.is_onboarded().await;
                                debug!(%user_id, onboarded, "workspace warmed");
                            }
                            Err(e) => {
                                warn!(error = %e, %user_id, "loading restaurant after sign-in failed")
                            }
                        }
                    }
                    Ok(SessionEvent::SignedOut { user_id }) => {
                        this.evict(user_id).await;
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "session events lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
            info!("session sync stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{realtime::ChangeFeed, restaurants::repo_types::RestaurantDetails};

    fn registry() -> Workspaces {
        let (backend, _) = Backend::memory(ChangeFeed::new());
        Workspaces::new(backend)
    }

    async fn onboarded(ws: &Workspace) {
        ws.restaurant
            .create(RestaurantDetails {
                name: "Spice Route".into(),
                ..RestaurantDetails::default()
            })
            .await
            .unwrap();
    }

    fn draft(section_id: Uuid, name: &str) -> ItemDraft {
        ItemDraft {
            section_id,
            name: name.into(),
            description: None,
            price: 120.0,
            image_url: None,
            is_available: true,
        }
    }

    #[tokio::test]
    async fn same_owner_gets_same_workspace() {
        let reg = registry();
        let owner = Uuid::new_v4();
        let a = reg.get(owner).await;
        let b = reg.get(owner).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &reg.get(Uuid::new_v4()).await));
    }

    #[tokio::test]
    async fn deleting_a_section_hides_its_items() {
        let reg = registry();
        let ws = reg.get(Uuid::new_v4()).await;
        onboarded(&ws).await;
        ws.ensure_menu().await.unwrap();
        let restaurant = ws.restaurant.require().await.unwrap();

        let mains = ws.sections.add(&restaurant, "Mains", None).await.unwrap();
        let drinks = ws.sections.add(&restaurant, "Drinks", None).await.unwrap();
        ws.items.add(draft(mains.id, "Biryani")).await.unwrap();
        ws.items.add(draft(mains.id, "Korma")).await.unwrap();
        let lassi = ws.items.add(draft(drinks.id, "Lassi")).await.unwrap();

        ws.delete_section(mains.id).await.unwrap();
        assert_eq!(ws.items.snapshot().await, vec![lassi]);
        assert_eq!(ws.sections.snapshot().await, vec![drinks]);

        ws.items.fetch(None).await.unwrap();
        assert_eq!(ws.items.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn items_stay_inside_the_owners_sections() {
        let reg = registry();
        let owner = reg.get(Uuid::new_v4()).await;
        let other = reg.get(Uuid::new_v4()).await;
        onboarded(&owner).await;
        onboarded(&other).await;
        owner.ensure_menu().await.unwrap();
        other.ensure_menu().await.unwrap();

        let owner_restaurant = owner.restaurant.require().await.unwrap();
        let other_restaurant = other.restaurant.require().await.unwrap();
        let mains = owner.sections.add(&owner_restaurant, "Mains", None).await.unwrap();
        let foreign = other.sections.add(&other_restaurant, "Desserts", None).await.unwrap();

        assert_eq!(
            owner.add_item(draft(foreign.id, "Kulfi")).await.unwrap_err(),
            StoreError::NotFound("section")
        );
        let biryani = owner.add_item(draft(mains.id, "Biryani")).await.unwrap();
        let moved = ItemPatch {
            section_id: Some(foreign.id),
            ..ItemPatch::default()
        };
        assert_eq!(
            owner.update_item(biryani.id, moved).await.unwrap_err(),
            StoreError::NotFound("section")
        );

        // The backend refuses as well when the cache is bypassed.
        assert_eq!(
            owner.items.add(draft(foreign.id, "Kulfi")).await.unwrap_err(),
            StoreError::NotFound("section")
        );
        other.items.fetch(None).await.unwrap();
        assert!(other.items.snapshot().await.is_empty());
        assert_eq!(owner.items.snapshot().await, vec![biryani]);
    }

    #[tokio::test]
    async fn concurrent_menu_loads_see_every_item() {
        let (backend, mem) = Backend::memory(ChangeFeed::new());
        let reg = Workspaces::new(backend);
        let owner_id = Uuid::new_v4();
        let section = {
            let ws = reg.get(owner_id).await;
            onboarded(&ws).await;
            ws.ensure_menu().await.unwrap();
            let restaurant = ws.restaurant.require().await.unwrap();
            let mains = ws.sections.add(&restaurant, "Mains", None).await.unwrap();
            ws.add_item(draft(mains.id, "Biryani")).await.unwrap();
            ws.add_item(draft(mains.id, "Korma")).await.unwrap();
            mains
        };
        reg.evict(owner_id).await;
        mem.slow_reads(Duration::from_millis(20));

        let ws = reg.get(owner_id).await;
        let (a, b) = tokio::join!(
            ws.add_item(draft(section.id, "Naan")),
            ws.add_item(draft(section.id, "Raita"))
        );
        let mut positions = vec![a.unwrap().position, b.unwrap().position];
        positions.sort();
        assert_eq!(positions, [2, 3]);
    }

    #[tokio::test]
    async fn ensure_menu_requires_onboarding() {
        let reg = registry();
        let ws = reg.get(Uuid::new_v4()).await;
        assert_eq!(ws.ensure_menu().await.unwrap_err(), StoreError::NotOnboarded);
    }

    #[tokio::test]
    async fn sign_out_evicts_workspace() {
        let reg = registry();
        let (tx, rx) = broadcast::channel(8);
        let task = reg.spawn_session_sync(rx);
        let owner = Uuid::new_v4();

        tx.send(SessionEvent::SignedIn { user_id: owner }).unwrap();
        for _ in 0..100 {
            if reg.is_open(owner).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(reg.is_open(owner).await);

        tx.send(SessionEvent::SignedOut { user_id: owner }).unwrap();
        for _ in 0..100 {
            if !reg.is_open(owner).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!reg.is_open(owner).await);

        drop(tx);
        task.await.unwrap();
    }
}
