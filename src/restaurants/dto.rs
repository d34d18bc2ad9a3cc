use serde::Serialize;
use uuid::Uuid;

use super::repo_types::{BusinessHours, Restaurant};
use crate::{items::repo_types::MenuItem, sections::repo_types::MenuSection};

/// Restaurant fields a guest may see.
#[derive(Debug, Serialize)]
pub struct PublicRestaurant {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub business_hours: Option<BusinessHours>,
}

impl From<Restaurant> for PublicRestaurant {
    fn from(r: Restaurant) -> Self {
        Self {
            id: r.id,
            name: r.name,
            phone: r.phone,
            address: r.address,
            latitude: r.latitude,
            longitude: r.longitude,
            description: r.description,
            images: r.images,
            business_hours: r.business_hours,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PublicMenu {
    pub restaurant: PublicRestaurant,
    pub sections: Vec<MenuSection>,
    pub items: Vec<MenuItem>,
}
