use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{
    repo::SectionRepo,
    repo_types::{MenuSection, NewSection},
};
use crate::{
    error::StoreError,
    fetch_gate::{FetchGate, Flight},
    ordering::{position_updates, reorder_by_ids},
    restaurants::repo_types::Restaurant,
};

fn require_name(name: &str) -> Result<String, StoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::Validation("Section name is required".into()));
    }
    Ok(name.to_string())
}

#[derive(Default)]
struct SectionsState {
    sections: Vec<MenuSection>,
    loaded: bool,
}

/// Menu sections of the owner's restaurant, kept in display order.
pub struct SectionsHolder {
    owner_id: Uuid,
    repo: Arc<dyn SectionRepo>,
    state: RwLock<SectionsState>,
    gate: FetchGate,
}

impl SectionsHolder {
    pub fn new(owner_id: Uuid, repo: Arc<dyn SectionRepo>) -> Self {
        Self {
            owner_id,
            repo,
            state: RwLock::default(),
            gate: FetchGate::default(),
        }
    }

    pub async fn snapshot(&self) -> Vec<MenuSection> {
        self.state.read().await.sections.clone()
    }

    /// Whether a fetch has completed since the holder was created.
    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.loaded
    }

    #[instrument(skip(self, restaurant), fields(restaurant_id = %restaurant.id))]
    pub async fn fetch(&self, restaurant: &Restaurant) -> Result<Vec<MenuSection>, StoreError> {
        if self.gate.is_loading() {
            debug!("waiting for section fetch in flight");
        }
        let flight = match self.gate.enter().await {
            Flight::Joined => return Ok(self.snapshot().await),
            Flight::Leader(flight) => flight,
        };

        let rows = self
            .repo
            .list_by_restaurant(restaurant.id)
            .await
            .map_err(|e| {
                error!(error = %e, "fetching sections failed");
                e
            })?;

        let mut st = self.state.write().await;
        st.sections = rows.clone();
        st.loaded = true;
        flight.complete();
        Ok(rows)
    }

    /// Appends a section after the cached ones.
    #[instrument(skip(self, restaurant, description), fields(restaurant_id = %restaurant.id))]
    pub async fn add(
        &self,
        restaurant: &Restaurant,
        name: &str,
        description: Option<String>,
    ) -> Result<MenuSection, StoreError> {
        let name = require_name(name)?;
        let position = self.state.read().await.sections.len() as i32;
        let created = self
            .repo
            .insert(&NewSection {
                restaurant_id: restaurant.id,
                owner_id: self.owner_id,
                name,
                description,
                position,
            })
            .await?;
        info!(section_id = %created.id, position, "section added");
        self.state.write().await.sections.push(created.clone());
        Ok(created)
    }

    #[instrument(skip(self, description))]
    pub async fn update(
        &self,
        id: Uuid,
        name: &str,
        description: Option<String>,
    ) -> Result<MenuSection, StoreError> {
        let name = require_name(name)?;
        let updated = self
            .repo
            .update(id, self.owner_id, &name, description.as_deref())
            .await?;
        let mut st = self.state.write().await;
        if let Some(slot) = st.sections.iter_mut().find(|s| s.id == id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    /// Removes the section; remaining positions are left as they are.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.repo.delete(id, self.owner_id).await?;
        self.state.write().await.sections.retain(|s| s.id != id);
        Ok(())
    }

    /// Applies a new display order locally, then persists positions `0..n`.
    ///
    /// If the write fails the previous order is restored, unless another
    /// operation has changed the list in the meantime.
    #[instrument(skip(self, ordered_ids), fields(count = ordered_ids.len()))]
    pub async fn reorder(&self, ordered_ids: &[Uuid]) -> Result<Vec<MenuSection>, StoreError> {
        let (previous, reordered) = {
            let mut st = self.state.write().await;
            let reordered = reorder_by_ids(&st.sections, ordered_ids)?;
            let previous = std::mem::replace(&mut st.sections, reordered.clone());
            (previous, reordered)
        };

        if let Err(e) = self
            .repo
            .update_positions(self.owner_id, &position_updates(&reordered))
            .await
        {
            let mut st = self.state.write().await;
            if st.sections == reordered {
                st.sections = previous;
            } else {
                warn!("sections changed during failed reorder; keeping current list");
            }
            error!(error = %e, "persisting section order failed");
            return Err(e);
        }
        Ok(reordered)
    }
}
