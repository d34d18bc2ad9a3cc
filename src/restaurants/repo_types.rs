use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

/// Opening hours of one weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: String,  // HH:MM
    pub close: String, // HH:MM
    #[serde(default)]
    pub closed: bool,
}

/// Weekly schedule keyed by lowercase day name (`monday`..`sunday`).
pub type BusinessHours = BTreeMap<String, DayHours>;

pub const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

pub const MAX_IMAGES: usize = 5;

/// Restaurant record as stored in the `restaurants` table.
#[derive(Debug, Clone, FromRow)]
pub struct RestaurantRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub unique_key: String,
    pub description: Option<String>,
    pub images: Option<Vec<String>>,
    pub business_hours: Option<Json<BusinessHours>>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub unique_key: String,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub business_hours: Option<BusinessHours>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<RestaurantRow> for Restaurant {
    fn from(r: RestaurantRow) -> Self {
        Self {
            id: r.id,
            owner_id: r.owner_id,
            name: r.name,
            phone: r.phone,
            address: r.address,
            latitude: r.latitude,
            longitude: r.longitude,
            unique_key: r.unique_key,
            description: r.description,
            images: r.images.unwrap_or_default(),
            business_hours: r.business_hours.map(|j| j.0),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Onboarding form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRestaurant {
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Settings form; replaces all contact and location fields.
pub type RestaurantDetails = NewRestaurant;

/// Profile page; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub description: Option<String>,
    pub images: Option<Vec<String>>,
    pub business_hours: Option<BusinessHours>,
}
