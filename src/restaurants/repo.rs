use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use super::repo_types::{ProfileUpdate, Restaurant, RestaurantDetails, RestaurantRow};
use crate::error::StoreError;

/// Table access for `restaurants`.
#[async_trait]
pub trait RestaurantRepo: Send + Sync {
    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Option<Restaurant>, StoreError>;
    async fn find_by_key(&self, unique_key: &str) -> Result<Option<Restaurant>, StoreError>;
    async fn insert(
        &self,
        owner_id: Uuid,
        unique_key: &str,
        new: &RestaurantDetails,
    ) -> Result<Restaurant, StoreError>;
    async fn update_details(
        &self,
        id: Uuid,
        owner_id: Uuid,
        details: &RestaurantDetails,
    ) -> Result<Restaurant, StoreError>;
    async fn update_profile(
        &self,
        id: Uuid,
        owner_id: Uuid,
        profile: &ProfileUpdate,
    ) -> Result<Restaurant, StoreError>;
    async fn set_unique_key(
        &self,
        id: Uuid,
        owner_id: Uuid,
        unique_key: &str,
    ) -> Result<Restaurant, StoreError>;
}

const COLUMNS: &str = "id, owner_id, name, phone, address, latitude, longitude, unique_key, \
                       description, images, business_hours, created_at, updated_at";

#[derive(Clone)]
pub struct PgRestaurantRepo {
    db: PgPool,
}

impl PgRestaurantRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RestaurantRepo for PgRestaurantRepo {
    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Option<Restaurant>, StoreError> {
        let row = sqlx::query_as::<_, RestaurantRow>(&format!(
            "SELECT {COLUMNS} FROM restaurants WHERE owner_id = $1"
        ))
        .bind(owner_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Restaurant::from))
    }

    async fn find_by_key(&self, unique_key: &str) -> Result<Option<Restaurant>, StoreError> {
        let row = sqlx::query_as::<_, RestaurantRow>(&format!(
            "SELECT {COLUMNS} FROM restaurants WHERE unique_key = $1"
        ))
        .bind(unique_key)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Restaurant::from))
    }

    async fn insert(
        &self,
        owner_id: Uuid,
        unique_key: &str,
        new: &RestaurantDetails,
    ) -> Result<Restaurant, StoreError> {
        let row = sqlx::query_as::<_, RestaurantRow>(&format!(
            r#"
            INSERT INTO restaurants (owner_id, unique_key, name, phone, address, latitude, longitude)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(owner_id)
        .bind(unique_key)
        .bind(&new.name)
        .bind(&new.phone)
        .bind(&new.address)
        .bind(new.latitude)
        .bind(new.longitude)
        .fetch_one(&self.db)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict(_) => {
                StoreError::Conflict("Owner already has a restaurant".into())
            }
            other => other,
        })?;
        Ok(row.into())
    }

    async fn update_details(
        &self,
        id: Uuid,
        owner_id: Uuid,
        details: &RestaurantDetails,
    ) -> Result<Restaurant, StoreError> {
        let row = sqlx::query_as::<_, RestaurantRow>(&format!(
            r#"
            UPDATE restaurants
               SET name = $3, phone = $4, address = $5, latitude = $6, longitude = $7,
                   updated_at = now()
             WHERE id = $1 AND owner_id = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(&details.name)
        .bind(&details.phone)
        .bind(&details.address)
        .bind(details.latitude)
        .bind(details.longitude)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound("restaurant"))?;
        Ok(row.into())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        owner_id: Uuid,
        profile: &ProfileUpdate,
    ) -> Result<Restaurant, StoreError> {
        let row = sqlx::query_as::<_, RestaurantRow>(&format!(
            r#"
            UPDATE restaurants
               SET description = COALESCE($3, description),
                   images = COALESCE($4, images),
                   business_hours = COALESCE($5, business_hours),
                   updated_at = now()
             WHERE id = $1 AND owner_id = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(&profile.description)
        .bind(&profile.images)
        .bind(profile.business_hours.as_ref().map(Json))
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound("restaurant"))?;
        Ok(row.into())
    }

    async fn set_unique_key(
        &self,
        id: Uuid,
        owner_id: Uuid,
        unique_key: &str,
    ) -> Result<Restaurant, StoreError> {
        let row = sqlx::query_as::<_, RestaurantRow>(&format!(
            r#"
            UPDATE restaurants
               SET unique_key = $3, updated_at = now()
             WHERE id = $1 AND owner_id = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner_id)
        .bind(unique_key)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound("restaurant"))?;
        Ok(row.into())
    }
}
