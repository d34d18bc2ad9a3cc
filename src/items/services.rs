use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{
    repo::ItemRepo,
    repo_types::{ItemDraft, ItemPatch, MenuItem, NewItem},
};
use crate::{
    error::StoreError,
    fetch_gate::{FetchGate, Flight},
    ordering::{position_updates, reorder_by_ids},
};

fn validate_draft(draft: &ItemDraft) -> Result<(), StoreError> {
    if draft.name.trim().is_empty() {
        return Err(StoreError::Validation("Item name is required".into()));
    }
    validate_price(draft.price)
}

fn validate_patch(patch: &ItemPatch) -> Result<(), StoreError> {
    if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(StoreError::Validation("Item name is required".into()));
    }
    patch.price.map_or(Ok(()), validate_price)
}

fn validate_price(price: f64) -> Result<(), StoreError> {
    if !price.is_finite() || price < 0.0 {
        return Err(StoreError::Validation("Price must be a non-negative number".into()));
    }
    Ok(())
}

#[derive(Default)]
struct ItemsState {
    items: Vec<MenuItem>,
    loaded: bool,
}

/// Menu items of the owner across all sections.
pub struct ItemsHolder {
    owner_id: Uuid,
    repo: Arc<dyn ItemRepo>,
    state: RwLock<ItemsState>,
    gate: FetchGate,
}

impl ItemsHolder {
    pub fn new(owner_id: Uuid, repo: Arc<dyn ItemRepo>) -> Self {
        Self {
            owner_id,
            repo,
            state: RwLock::default(),
            gate: FetchGate::default(),
        }
    }

    pub async fn snapshot(&self) -> Vec<MenuItem> {
        self.state.read().await.items.clone()
    }

    /// Cached items of one section, by position.
    #[cfg(test)]
    pub async fn in_section(&self, section_id: Uuid) -> Vec<MenuItem> {
        let mut items: Vec<MenuItem> = self
            .state
            .read()
            .await
            .items
            .iter()
            .filter(|i| i.section_id == section_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.position);
        items
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.loaded
    }

    /// Loads all items, or only one section's items when `section_id` is set.
    /// A filtered fetch replaces just that section in the cache.
    ///
    /// A caller that waited on a completed full fetch is answered from the cache.
    #[instrument(skip(self))]
    pub async fn fetch(&self, section_id: Option<Uuid>) -> Result<Vec<MenuItem>, StoreError> {
        if self.gate.is_loading() {
            debug!("waiting for item fetch in flight");
        }
        let flight = match self.gate.enter().await {
            Flight::Joined => {
                let st = self.state.read().await;
                return Ok(st
                    .items
                    .iter()
                    .filter(|i| section_id.map_or(true, |s| i.section_id == s))
                    .cloned()
                    .collect());
            }
            Flight::Leader(flight) => flight,
        };

        let rows = self
            .repo
            .list_by_owner(self.owner_id, section_id)
            .await
            .map_err(|e| {
                error!(error = %e, "fetching items failed");
                e
            })?;

        let mut st = self.state.write().await;
        match section_id {
            Some(section_id) => {
                st.items.retain(|i| i.section_id != section_id);
                st.items.extend(rows.iter().cloned());
            }
            None => {
                st.items = rows.clone();
                st.loaded = true;
                flight.complete();
            }
        }
        Ok(rows)
    }

    /// Adds an item at the end of its section.
    #[instrument(skip(self, draft), fields(section_id = %draft.section_id))]
    pub async fn add(&self, draft: ItemDraft) -> Result<MenuItem, StoreError> {
        validate_draft(&draft)?;
        let position = self
            .state
            .read()
            .await
            .items
            .iter()
            .filter(|i| i.section_id == draft.section_id)
            .count() as i32;
        let created = self
            .repo
            .insert(&NewItem {
                owner_id: self.owner_id,
                position,
                draft,
            })
            .await?;
        info!(item_id = %created.id, position, "item added");
        self.state.write().await.items.push(created.clone());
        Ok(created)
    }

    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: Uuid, patch: ItemPatch) -> Result<MenuItem, StoreError> {
        validate_patch(&patch)?;
        let updated = self.repo.update(id, self.owner_id, &patch).await?;
        self.replace_cached(&updated).await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.repo.delete(id, self.owner_id).await?;
        self.state.write().await.items.retain(|i| i.id != id);
        Ok(())
    }

    /// Flips `is_available` of one cached item.
    #[instrument(skip(self))]
    pub async fn toggle_availability(&self, id: Uuid) -> Result<MenuItem, StoreError> {
        let current = self
            .state
            .read()
            .await
            .items
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.is_available)
            .ok_or(StoreError::NotFound("item"))?;

        let updated = self
            .repo
            .update(id, self.owner_id, &ItemPatch::availability(!current))
            .await?;
        debug!(item_id = %id, is_available = updated.is_available, "availability toggled");
        self.replace_cached(&updated).await;
        Ok(updated)
    }

    /// Reorders one section's items; see [`crate::sections::services::SectionsHolder::reorder`].
    #[instrument(skip(self, ordered_ids), fields(count = ordered_ids.len()))]
    pub async fn reorder(
        &self,
        section_id: Uuid,
        ordered_ids: &[Uuid],
    ) -> Result<Vec<MenuItem>, StoreError> {
        let (previous, optimistic, reordered) = {
            let mut st = self.state.write().await;
            let mut scope: Vec<MenuItem> = st
                .items
                .iter()
                .filter(|i| i.section_id == section_id)
                .cloned()
                .collect();
            scope.sort_by_key(|i| i.position);
            let reordered = reorder_by_ids(&scope, ordered_ids)?;

            let mut optimistic: Vec<MenuItem> = st
                .items
                .iter()
                .filter(|i| i.section_id != section_id)
                .cloned()
                .collect();
            optimistic.extend(reordered.iter().cloned());
            let previous = std::mem::replace(&mut st.items, optimistic.clone());
            (previous, optimistic, reordered)
        };

        if let Err(e) = self
            .repo
            .update_positions(self.owner_id, &position_updates(&reordered))
            .await
        {
            let mut st = self.state.write().await;
            if st.items == optimistic {
                st.items = previous;
            } else {
                warn!("items changed during failed reorder; keeping current list");
            }
            error!(error = %e, "persisting item order failed");
            return Err(e);
        }
        Ok(reordered)
    }

    /// Drops a deleted section's items from the cache.
    pub async fn forget_section(&self, section_id: Uuid) {
        self.state
            .write()
            .await
            .items
            .retain(|i| i.section_id != section_id);
    }

    async fn replace_cached(&self, updated: &MenuItem) {
        let mut st = self.state.write().await;
        match st.items.iter_mut().find(|i| i.id == updated.id) {
            Some(slot) => *slot = updated.clone(),
            None => st.items.push(updated.clone()),
        }
    }
}
