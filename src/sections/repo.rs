use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{MenuSection, NewSection};
use crate::error::StoreError;

/// Table access for `menu_sections`.
#[async_trait]
pub trait SectionRepo: Send + Sync {
    async fn list_by_restaurant(&self, restaurant_id: Uuid) -> Result<Vec<MenuSection>, StoreError>;
    async fn insert(&self, new: &NewSection) -> Result<MenuSection, StoreError>;
    async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<MenuSection, StoreError>;
    /// Deletes the section; its items go with it.
    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<(), StoreError>;
    async fn update_positions(&self, owner_id: Uuid, positions: &[(Uuid, i32)]) -> Result<(), StoreError>;
}

const COLUMNS: &str = "id, restaurant_id, owner_id, name, description, position, created_at, updated_at";

#[derive(Clone)]
pub struct PgSectionRepo {
    db: PgPool,
}

impl PgSectionRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SectionRepo for PgSectionRepo {
    async fn list_by_restaurant(&self, restaurant_id: Uuid) -> Result<Vec<MenuSection>, StoreError> {
        let rows = sqlx::query_as::<_, MenuSection>(&format!(
            "SELECT {COLUMNS} FROM menu_sections WHERE restaurant_id = $1 ORDER BY position ASC"
        ))
        .bind(restaurant_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn insert(&self, new: &NewSection) -> Result<MenuSection, StoreError> {
        let row = sqlx::query_as::<_, MenuSection>(&format!(
            r#"
            INSERT INTO menu_sections (restaurant_id, owner_id, name, description, position)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(new.restaurant_id)
        .bind(new.owner_id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.position)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<MenuSection, StoreError> {
        sqlx::query_as::<_, MenuSection>(&format!(
            r#"
            UPDATE menu_sections
               SET name = $3, description = $4, updated_at = now()
             WHERE id = $1 AND owner_id = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(name)
        .bind(description)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound("section"))
    }

    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<(), StoreError> {
        let done = sqlx::query("DELETE FROM menu_sections WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.db)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound("section"));
        }
        Ok(())
    }

    async fn update_positions(&self, owner_id: Uuid, positions: &[(Uuid, i32)]) -> Result<(), StoreError> {
        let (ids, ranks): (Vec<Uuid>, Vec<i32>) = positions.iter().copied().unzip();
        sqlx::query(
            r#"
            UPDATE menu_sections AS s
               SET position = v.position, updated_at = now()
              FROM UNNEST($1::uuid[], $2::int4[]) AS v(id, position)
             WHERE s.id = v.id AND s.owner_id = $3
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
