use std::sync::Arc;

use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use time::{macros::format_description, Time};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::{
    dto::{PublicMenu, PublicRestaurant},
    repo::RestaurantRepo,
    repo_types::{
        BusinessHours, ProfileUpdate, Restaurant, RestaurantDetails, MAX_IMAGES, WEEKDAYS,
    },
};
use crate::{
    backend::Backend,
    error::StoreError,
    fetch_gate::{FetchGate, Flight},
};

const KEY_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const KEY_LEN: usize = 9;

/// New shareable key: `sk_` and nine base-36 characters.
///
/// The key is an identifier, not a credential, so a non-cryptographic RNG is enough.
pub fn generate_public_key() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..KEY_LEN)
        .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
        .collect();
    format!("sk_{suffix}")
}

pub(crate) fn is_public_key(key: &str) -> bool {
    lazy_static! {
        static ref KEY_RE: Regex = Regex::new(r"^sk_[0-9a-z]{1,9}$").unwrap();
    }
    KEY_RE.is_match(key)
}

fn validate_details(details: &RestaurantDetails) -> Result<(), StoreError> {
    if details.name.trim().is_empty() {
        return Err(StoreError::Validation("Restaurant name is required".into()));
    }
    if details.latitude.is_some_and(|lat| !(-90.0..=90.0).contains(&lat)) {
        return Err(StoreError::Validation("Latitude must be between -90 and 90".into()));
    }
    if details
        .longitude
        .is_some_and(|lon| !(-180.0..=180.0).contains(&lon))
    {
        return Err(StoreError::Validation("Longitude must be between -180 and 180".into()));
    }
    Ok(())
}

fn validate_hours(hours: &BusinessHours) -> Result<(), StoreError> {
    let hh_mm = format_description!("[hour]:[minute]");
    for (day, slot) in hours {
        if !WEEKDAYS.contains(&day.as_str()) {
            return Err(StoreError::Validation(format!("Unknown day {day:?}")));
        }
        for t in [&slot.open, &slot.close] {
            Time::parse(t, &hh_mm)
                .map_err(|_| StoreError::Validation(format!("Invalid time {t:?} for {day}")))?;
        }
    }
    Ok(())
}

fn validate_profile(profile: &ProfileUpdate) -> Result<(), StoreError> {
    if let Some(images) = &profile.images {
        if images.len() > MAX_IMAGES {
            return Err(StoreError::Validation(format!(
                "You can only add up to {MAX_IMAGES} images."
            )));
        }
        if images.iter().any(|url| url.trim().is_empty()) {
            return Err(StoreError::Validation("Image URL must not be empty".into()));
        }
    }
    if let Some(hours) = &profile.business_hours {
        validate_hours(hours)?;
    }
    Ok(())
}

#[derive(Default)]
struct RestaurantState {
    restaurant: Option<Restaurant>,
}

/// The owner's restaurant row, mirrored locally.
pub struct RestaurantHolder {
    owner_id: Uuid,
    repo: Arc<dyn RestaurantRepo>,
    state: RwLock<RestaurantState>,
    gate: FetchGate,
}

impl RestaurantHolder {
    pub fn new(owner_id: Uuid, repo: Arc<dyn RestaurantRepo>) -> Self {
        Self {
            owner_id,
            repo,
            state: RwLock::default(),
            gate: FetchGate::default(),
        }
    }

    pub async fn snapshot(&self) -> Option<Restaurant> {
        self.state.read().await.restaurant.clone()
    }

    pub async fn is_onboarded(&self) -> bool {
        self.state.read().await.restaurant.is_some()
    }

    /// Loads the owner's row. Callers arriving while a fetch is in flight
    /// wait for it and read its result from the cache.
    #[instrument(skip(self), fields(owner_id = %self.owner_id))]
    pub async fn fetch(&self) -> Result<Option<Restaurant>, StoreError> {
        if self.gate.is_loading() {
            debug!("waiting for restaurant fetch in flight");
        }
        let flight = match self.gate.enter().await {
            Flight::Joined => return Ok(self.snapshot().await),
            Flight::Leader(flight) => flight,
        };

        let result = self.repo.find_by_owner(self.owner_id).await;

        let mut st = self.state.write().await;
        match result {
            Ok(Some(restaurant)) => {
                st.restaurant = Some(restaurant.clone());
                flight.complete();
                Ok(Some(restaurant))
            }
            Ok(None) => {
                flight.complete();
                Ok(None)
            }
            Err(e) => {
                error!(error = %e, "fetching restaurant failed");
                Err(e)
            }
        }
    }

    /// Cached row, fetching it first if needed.
    pub async fn require(&self) -> Result<Restaurant, StoreError> {
        if let Some(r) = self.snapshot().await {
            return Ok(r);
        }
        self.fetch().await?.ok_or(StoreError::NotOnboarded)
    }

    /// Onboarding: creates the owner's only restaurant.
    #[instrument(skip(self, new), fields(owner_id = %self.owner_id))]
    pub async fn create(&self, new: RestaurantDetails) -> Result<Restaurant, StoreError> {
        validate_details(&new)?;
        let created = self
            .repo
            .insert(self.owner_id, &generate_public_key(), &new)
            .await
            .map_err(|e| {
                error!(error = %e, "creating restaurant failed");
                e
            })?;
        info!(restaurant_id = %created.id, "restaurant created");
        self.state.write().await.restaurant = Some(created.clone());
        Ok(created)
    }

    /// Settings form: name, phone, address and coordinates.
    #[instrument(skip(self, details), fields(owner_id = %self.owner_id))]
    pub async fn update_details(&self, details: RestaurantDetails) -> Result<Restaurant, StoreError> {
        validate_details(&details)?;
        let current = self.require().await?;
        let updated = self
            .repo
            .update_details(current.id, self.owner_id, &details)
            .await?;
        self.state.write().await.restaurant = Some(updated.clone());
        Ok(updated)
    }

    /// Profile page: description, images and business hours.
    #[instrument(skip(self, profile), fields(owner_id = %self.owner_id))]
    pub async fn update_profile(&self, profile: ProfileUpdate) -> Result<Restaurant, StoreError> {
        validate_profile(&profile)?;
        let current = self.require().await?;
        let updated = self
            .repo
            .update_profile(current.id, self.owner_id, &profile)
            .await?;
        self.state.write().await.restaurant = Some(updated.clone());
        Ok(updated)
    }

    /// Replaces the public key; old shared menu links stop working.
    #[instrument(skip(self), fields(owner_id = %self.owner_id))]
    pub async fn reset_key(&self) -> Result<Restaurant, StoreError> {
        let current = self.require().await?;
        let key = generate_public_key();
        let updated = self
            .repo
            .set_unique_key(current.id, self.owner_id, &key)
            .await?;
        debug!(restaurant_id = %updated.id, "public key reset");
        self.state.write().await.restaurant = Some(updated.clone());
        Ok(updated)
    }
}

/// Read-only menu behind a shareable link.
#[instrument(skip(backend))]
pub async fn public_menu(backend: &Backend, key: &str) -> Result<PublicMenu, StoreError> {
    if !is_public_key(key) {
        return Err(StoreError::NotFound("menu"));
    }
    let restaurant = backend
        .restaurants
        .find_by_key(key)
        .await?
        .ok_or(StoreError::NotFound("menu"))?;
    let sections = backend.sections.list_by_restaurant(restaurant.id).await?;
    let mut items: Vec<_> = backend
        .items
        .list_by_owner(restaurant.owner_id, None)
        .await?
        .into_iter()
        .filter(|item| item.is_available)
        .collect();

    let section_rank = |section_id| {
        sections
            .iter()
            .position(|s| s.id == section_id)
            .unwrap_or(usize::MAX)
    };
    items.retain(|item| section_rank(item.section_id) != usize::MAX);
    items.sort_by_key(|item| (section_rank(item.section_id), item.position));

    Ok(PublicMenu {
        restaurant: PublicRestaurant::from(restaurant),
        sections,
        items,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        items::repo_types::{ItemDraft, NewItem},
        memory::MemoryBackend,
        realtime::ChangeFeed,
        restaurants::repo_types::DayHours,
        sections::repo_types::NewSection,
    };

    fn holder() -> (RestaurantHolder, Arc<MemoryBackend>) {
        let mem = Arc::new(MemoryBackend::default());
        (RestaurantHolder::new(Uuid::new_v4(), mem.clone()), mem)
    }

    fn details(name: &str) -> RestaurantDetails {
        RestaurantDetails {
            name: name.into(),
            phone: Some("+91 98100 00000".into()),
            address: Some("12 MG Road".into()),
            latitude: Some(12.97),
            longitude: Some(77.59),
        }
    }

    #[test]
    fn generated_keys_have_the_public_shape() {
        for _ in 0..100 {
            let key = generate_public_key();
            assert_eq!(key.len(), 12);
            assert!(is_public_key(&key), "{key}");
        }
    }

    #[test]
    fn hours_validation() {
        let mut hours = BusinessHours::new();
        hours.insert(
            "monday".into(),
            DayHours {
                open: "09:00".into(),
                close: "22:30".into(),
                closed: false,
            },
        );
        assert!(validate_hours(&hours).is_ok());

        hours.insert(
            "funday".into(),
            DayHours {
                open: "09:00".into(),
                close: "22:00".into(),
                closed: false,
            },
        );
        assert!(validate_hours(&hours).is_err());

        let mut bad_time = BusinessHours::new();
        bad_time.insert(
            "friday".into(),
            DayHours {
                open: "9am".into(),
                close: "22:00".into(),
                closed: false,
            },
        );
        assert!(validate_hours(&bad_time).is_err());
    }

    #[tokio::test]
    async fn fetch_without_restaurant_is_not_onboarded() {
        let (h, _) = holder();
        assert_eq!(h.fetch().await.unwrap(), None);
        assert!(!h.is_onboarded().await);
        assert_eq!(h.require().await.unwrap_err(), StoreError::NotOnboarded);
    }

    #[tokio::test]
    async fn create_then_second_create_conflicts() {
        let (h, _) = holder();
        let created = h.create(details("Spice Route")).await.unwrap();
        assert!(is_public_key(&created.unique_key));
        assert!(h.is_onboarded().await);

        let err = h.create(details("Spice Route 2")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(h.snapshot().await.unwrap().name, "Spice Route");
    }

    #[tokio::test]
    async fn create_requires_a_name() {
        let (h, _) = holder();
        let err = h.create(details("   ")).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn fresh_holder_picks_up_existing_row() {
        let (h, mem) = holder();
        let created = h.create(details("Spice Route")).await.unwrap();
        let other_tab = RestaurantHolder::new(created.owner_id, mem);
        assert_eq!(other_tab.require().await.unwrap().id, created.id);
    }

    #[tokio::test]
    async fn concurrent_requires_share_one_fetch() {
        let (h, mem) = holder();
        let created = h.create(details("Spice Route")).await.unwrap();
        mem.slow_reads(Duration::from_millis(20));
        let h = RestaurantHolder::new(created.owner_id, mem.clone());
        let reads_before = mem.read_count();

        let (a, b) = tokio::join!(h.require(), h.require());
        assert_eq!(a.unwrap().id, created.id);
        assert_eq!(b.unwrap().id, created.id);
        assert_eq!(mem.read_count() - reads_before, 1);
    }

    #[tokio::test]
    async fn abandoned_fetch_does_not_block_later_ones() {
        let (h, mem) = holder();
        let created = h.create(details("Spice Route")).await.unwrap();
        mem.slow_reads(Duration::from_millis(20));
        let h = RestaurantHolder::new(created.owner_id, mem);

        let abandoned = tokio::time::timeout(Duration::from_millis(5), h.require()).await;
        assert!(abandoned.is_err());
        assert_eq!(h.require().await.unwrap().id, created.id);
    }

    #[tokio::test]
    async fn update_profile_enforces_image_limit() {
        let (h, _) = holder();
        h.create(details("Spice Route")).await.unwrap();

        let six: Vec<String> = (0..6).map(|i| format!("https://img.example/{i}.jpg")).collect();
        let err = h
            .update_profile(ProfileUpdate {
                images: Some(six),
                ..ProfileUpdate::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let five: Vec<String> = (0..5).map(|i| format!("https://img.example/{i}.jpg")).collect();
        let updated = h
            .update_profile(ProfileUpdate {
                description: Some("North Indian classics".into()),
                images: Some(five.clone()),
                business_hours: None,
            })
            .await
            .unwrap();
        assert_eq!(updated.images, five);
        assert_eq!(updated.description.as_deref(), Some("North Indian classics"));
    }

    #[tokio::test]
    async fn update_profile_keeps_unspecified_fields() {
        let (h, _) = holder();
        h.create(details("Spice Route")).await.unwrap();
        h.update_profile(ProfileUpdate {
            description: Some("first".into()),
            ..ProfileUpdate::default()
        })
        .await
        .unwrap();
        let updated = h
            .update_profile(ProfileUpdate {
                images: Some(vec!["https://img.example/a.jpg".into()]),
                ..ProfileUpdate::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("first"));
        assert_eq!(updated.images.len(), 1);
    }

    #[tokio::test]
    async fn update_details_replaces_contact_fields() {
        let (h, _) = holder();
        h.create(details("Spice Route")).await.unwrap();
        let updated = h
            .update_details(RestaurantDetails {
                name: "Spice Route Express".into(),
                ..RestaurantDetails::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.name, "Spice Route Express");
        assert_eq!(updated.phone, None);
        assert_eq!(updated.latitude, None);
    }

    #[tokio::test]
    async fn reset_key_changes_the_key() {
        let (h, mem) = holder();
        let created = h.create(details("Spice Route")).await.unwrap();
        let updated = h.reset_key().await.unwrap();
        assert_ne!(updated.unique_key, created.unique_key);
        assert!(is_public_key(&updated.unique_key));
        assert!(mem.find_by_key(&created.unique_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn public_menu_lists_available_items_in_menu_order() {
        let (backend, mem) = Backend::memory(ChangeFeed::new());
        let h = RestaurantHolder::new(Uuid::new_v4(), mem.clone());
        let restaurant = h.create(details("Spice Route")).await.unwrap();

        let mut sections = Vec::new();
        for (position, name) in ["Mains", "Starters"].into_iter().enumerate() {
            sections.push(
                backend
                    .sections
                    .insert(&NewSection {
                        restaurant_id: restaurant.id,
                        owner_id: restaurant.owner_id,
                        name: name.into(),
                        description: None,
                        position: position as i32,
                    })
                    .await
                    .unwrap(),
            );
        }
        let add = |section_id, name: &str, position, is_available| NewItem {
            owner_id: restaurant.owner_id,
            position,
            draft: ItemDraft {
                section_id,
                name: name.into(),
                description: None,
                price: 100.0,
                image_url: None,
                is_available,
            },
        };
        for new in [
            add(sections[1].id, "Samosa", 0, true),
            add(sections[0].id, "Biryani", 1, true),
            add(sections[0].id, "Butter Chicken", 0, true),
            add(sections[0].id, "Sold Out Special", 2, false),
        ] {
            backend.items.insert(&new).await.unwrap();
        }

        let menu = public_menu(&backend, &restaurant.unique_key).await.unwrap();
        assert_eq!(menu.restaurant.name, "Spice Route");
        let names: Vec<&str> = menu.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Mains", "Starters"]);
        let items: Vec<&str> = menu.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(items, ["Butter Chicken", "Biryani", "Samosa"]);
    }

    #[tokio::test]
    async fn public_menu_unknown_key_is_not_found() {
        let (backend, _) = Backend::memory(ChangeFeed::new());
        assert_eq!(
            public_menu(&backend, "sk_nothere1").await.unwrap_err(),
            StoreError::NotFound("menu")
        );
        assert_eq!(
            public_menu(&backend, "../etc").await.unwrap_err(),
            StoreError::NotFound("menu")
        );
    }
}
