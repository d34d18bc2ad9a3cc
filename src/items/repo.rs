use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{ItemPatch, MenuItem, NewItem};
use crate::error::StoreError;

/// Table access for `menu_items`.
#[async_trait]
pub trait ItemRepo: Send + Sync {
    /// Items of one owner ordered by position, optionally limited to one section.
    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        section_id: Option<Uuid>,
    ) -> Result<Vec<MenuItem>, StoreError>;
    async fn insert(&self, new: &NewItem) -> Result<MenuItem, StoreError>;
    async fn update(&self, id: Uuid, owner_id: Uuid, patch: &ItemPatch) -> Result<MenuItem, StoreError>;
    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<(), StoreError>;
    async fn update_positions(&self, owner_id: Uuid, positions: &[(Uuid, i32)]) -> Result<(), StoreError>;
}

const COLUMNS: &str = "id, section_id, owner_id, name, description, price, image_url, is_available, \
                       position, created_at, updated_at";

#[derive(Clone)]
pub struct PgItemRepo {
    db: PgPool,
}

impl PgItemRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ItemRepo for PgItemRepo {
    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        section_id: Option<Uuid>,
    ) -> Result<Vec<MenuItem>, StoreError> {
        let rows = sqlx::query_as::<_, MenuItem>(&format!(
            r#"
            SELECT {COLUMNS}
              FROM menu_items
             WHERE owner_id = $1 AND ($2::uuid IS NULL OR section_id = $2)
             ORDER BY position ASC
            "#
        ))
        .bind(owner_id)
        .bind(section_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn insert(&self, new: &NewItem) -> Result<MenuItem, StoreError> {
        let d = &new.draft;
        let row = sqlx::query_as::<_, MenuItem>(&format!(
            r#"
            INSERT INTO menu_items
                (section_id, owner_id, name, description, price, image_url, is_available, position)
            SELECT $1::uuid, $2::uuid, $3::text, $4::text, $5::float8, $6::text, $7::bool, $8::int4
             WHERE EXISTS (SELECT 1 FROM menu_sections WHERE id = $1 AND owner_id = $2)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(d.section_id)
        .bind(new.owner_id)
        .bind(&d.name)
        .bind(&d.description)
        .bind(d.price)
        .bind(&d.image_url)
        .bind(d.is_available)
        .bind(new.position)
        .fetch_optional(&self.db)
        .await?;
        row.ok_or(StoreError::NotFound("section"))
    }

    async fn update(&self, id: Uuid, owner_id: Uuid, patch: &ItemPatch) -> Result<MenuItem, StoreError> {
        sqlx::query_as::<_, MenuItem>(&format!(
            r#"
            UPDATE menu_items
               SET section_id = COALESCE($3, section_id),
                   name = COALESCE($4, name),
                   description = COALESCE($5, description),
                   price = COALESCE($6, price),
                   image_url = COALESCE($7, image_url),
                   is_available = COALESCE($8, is_available),
                   updated_at = now()
             WHERE id = $1 AND owner_id = $2
               AND ($3::uuid IS NULL OR EXISTS (
                       SELECT 1 FROM menu_sections WHERE id = $3 AND owner_id = $2))
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(patch.section_id)
        .bind(&patch.name)
        .bind(&patch.description)
        .bind(patch.price)
        .bind(&patch.image_url)
        .bind(patch.is_available)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound("item"))
    }

    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<(), StoreError> {
        let done = sqlx::query("DELETE FROM menu_items WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.db)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound("item"));
        }
        Ok(())
    }

    async fn update_positions(&self, owner_id: Uuid, positions: &[(Uuid, i32)]) -> Result<(), StoreError> {
        let (ids, ranks): (Vec<Uuid>, Vec<i32>) = positions.iter().copied().unzip();
        sqlx::query(
            r#"
            UPDATE menu_items AS i
               SET position = v.position, updated_at = now()
              FROM UNNEST($1::uuid[], $2::int4[]) AS v(id, position)
             WHERE i.id = v.id AND i.owner_id = $3
            "#,
        )
        .bind(&ids)
        .bind(&ranks)
        .bind(owner_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
