use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::ordering::Positioned;

/// Menu item record in the `menu_items` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MenuItem {
    pub id: Uuid,
    pub section_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub image_url: Option<String>,
    pub is_available: bool,
    pub position: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Positioned for MenuItem {
    fn id(&self) -> Uuid {
        self.id
    }
    fn set_position(&mut self, position: i32) {
        self.position = position;
    }
}

/// Item form as submitted by the owner.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemDraft {
    pub section_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub price: f64,
    pub image_url: Option<String>,
    #[serde(default = "default_available")]
    pub is_available: bool,
}

fn default_available() -> bool {
    true
}

/// Row to insert; owner and position are filled in by the holder.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub owner_id: Uuid,
    pub position: i32,
    pub draft: ItemDraft,
}

/// Partial update; `None` leaves a column unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemPatch {
    pub section_id: Option<Uuid>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub image_url: Option<String>,
    pub is_available: Option<bool>,
}

impl ItemPatch {
    pub fn availability(is_available: bool) -> Self {
        Self {
            is_available: Some(is_available),
            ..Self::default()
        }
    }

    pub fn apply(&self, item: &mut MenuItem) {
        if let Some(v) = self.section_id {
            item.section_id = v;
        }
        if let Some(v) = &self.name {
            item.name = v.clone();
        }
        if let Some(v) = &self.description {
            item.description = Some(v.clone());
        }
        if let Some(v) = self.price {
            item.price = v;
        }
        if let Some(v) = &self.image_url {
            item.image_url = Some(v.clone());
        }
        if let Some(v) = self.is_available {
            item.is_available = v;
        }
    }
}
