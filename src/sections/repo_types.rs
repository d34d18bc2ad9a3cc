use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::ordering::Positioned;

/// Menu section record in the `menu_sections` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MenuSection {
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub position: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Positioned for MenuSection {
    fn id(&self) -> Uuid {
        self.id
    }
    fn set_position(&mut self, position: i32) {
        self.position = position;
    }
}

/// Row to insert; `position` is chosen by the holder.
#[derive(Debug, Clone)]
pub struct NewSection {
    pub restaurant_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub position: i32,
}
