use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct ItemQuery {
    pub section_id: Option<Uuid>,
}
