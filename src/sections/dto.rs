use serde::Deserialize;
use uuid::Uuid;

/// Body of `POST /sections` and `PUT /sections/:id`.
#[derive(Debug, Deserialize)]
pub struct SectionRequest {
    pub name: String,
    pub description: Option<String>,
}

/// New display order, first id gets position 0.
#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub ordered_ids: Vec<Uuid>,
}
