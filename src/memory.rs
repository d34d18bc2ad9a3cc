//! In-process backend used when no database is configured and by the tests.
//!
//! Mirrors the Postgres schema closely enough for the holders: one restaurant
//! per owner, cascading section deletes and change notifications on `orders`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    error::StoreError,
    items::{
        repo::ItemRepo,
        repo_types::{ItemPatch, MenuItem, NewItem},
    },
    orders::{
        repo::OrderRepo,
        repo_types::{
            MenuItemRef, NewOrder, Order, OrderDetails, OrderFilter, OrderItem, OrderStatus,
            OrderSummary, Profile,
        },
    },
    realtime::{ChangeFeed, ChangeKind, OrderChange},
    restaurants::{
        repo::RestaurantRepo,
        repo_types::{ProfileUpdate, Restaurant, RestaurantDetails},
    },
    sections::{
        repo::SectionRepo,
        repo_types::{MenuSection, NewSection},
    },
};

#[derive(Default)]
struct Tables {
    restaurants: Vec<Restaurant>,
    sections: Vec<MenuSection>,
    items: Vec<MenuItem>,
    orders: Vec<Order>,
    order_items: Vec<OrderItem>,
    profiles: HashMap<Uuid, Profile>,
}

impl Tables {
    fn details(&self, order: &Order) -> OrderDetails {
        let order_items = self
            .order_items
            .iter()
            .filter(|line| line.order_id == order.id)
            .map(|line| {
                let mut line = line.clone();
                line.menu_item = self
                    .items
                    .iter()
                    .find(|item| item.id == line.menu_item_id)
                    .map(|item| MenuItemRef {
                        name: item.name.clone(),
                        image_url: item.image_url.clone(),
                    });
                line
            })
            .collect();
        OrderDetails {
            order: order.clone(),
            order_items,
            customer_profile: self
                .profiles
                .get(&order.user_id)
                .cloned()
                .map(Into::into)
                .unwrap_or_default(),
        }
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    feed: ChangeFeed,
    fail_next: Mutex<Option<String>>,
    read_delay: Mutex<Option<Duration>>,
    reads: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(feed: ChangeFeed) -> Self {
        Self {
            tables: Mutex::default(),
            feed,
            fail_next: Mutex::default(),
            read_delay: Mutex::default(),
            reads: AtomicUsize::new(0),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    /// Makes the next write fail with `message`, as if the backend were unreachable.
    pub fn fail_next_write(&self, message: &str) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }

    fn check_write(&self) -> Result<(), StoreError> {
        match self.fail_next.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(message) => Err(StoreError::Remote(message)),
            None => Ok(()),
        }
    }

    /// Counts a list or lookup and waits out the configured latency.
    async fn begin_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let delay = *self.read_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    #[cfg(test)]
    /// Makes every list or lookup take `delay`, like a remote round trip.
    pub fn slow_reads(&self, delay: Duration) {
        *self.read_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    #[cfg(test)]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn upsert_profile(&self, profile: Profile) {
        self.tables().profiles.insert(profile.id, profile);
    }

    #[cfg(test)]
    /// Removes an order and notifies subscribers, like a delete issued by another client.
    pub fn delete_order(&self, id: Uuid) -> Option<Order> {
        let removed = {
            let mut t = self.tables();
            let index = t.orders.iter().position(|o| o.id == id)?;
            t.order_items.retain(|line| line.order_id != id);
            t.orders.remove(index)
        };
        self.feed.publish(OrderChange {
            kind: ChangeKind::Delete,
            id,
            restaurant_id: removed.restaurant_id,
        });
        Some(removed)
    }

    #[cfg(test)]
    /// Backdates an order; used to exercise date-range filters.
    pub fn set_order_created_at(&self, id: Uuid, created_at: OffsetDateTime) {
        if let Some(order) = self.tables().orders.iter_mut().find(|o| o.id == id) {
            order.created_at = created_at;
        }
    }

    #[cfg(test)]
    pub fn section_count(&self) -> usize {
        self.tables().sections.len()
    }

    #[cfg(test)]
    pub fn item_count(&self) -> usize {
        self.tables().items.len()
    }
}

#[async_trait]
impl RestaurantRepo for MemoryBackend {
    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Option<Restaurant>, StoreError> {
        self.begin_read().await;
        Ok(self
            .tables()
            .restaurants
            .iter()
            .find(|r| r.owner_id == owner_id)
            .cloned())
    }

    async fn find_by_key(&self, unique_key: &str) -> Result<Option<Restaurant>, StoreError> {
        Ok(self
            .tables()
            .restaurants
            .iter()
            .find(|r| r.unique_key == unique_key)
            .cloned())
    }

    async fn insert(
        &self,
        owner_id: Uuid,
        unique_key: &str,
        new: &RestaurantDetails,
    ) -> Result<Restaurant, StoreError> {
        self.check_write()?;
        let mut t = self.tables();
        if t.restaurants.iter().any(|r| r.owner_id == owner_id) {
            return Err(StoreError::Conflict("Owner already has a restaurant".into()));
        }
        let now = OffsetDateTime::now_utc();
        let restaurant = Restaurant {
            id: Uuid::new_v4(),
            owner_id,
            name: new.name.clone(),
            phone: new.phone.clone(),
            address: new.address.clone(),
            latitude: new.latitude,
            longitude: new.longitude,
            unique_key: unique_key.to_string(),
            description: None,
            images: Vec::new(),
            business_hours: None,
            created_at: now,
            updated_at: now,
        };
        t.restaurants.push(restaurant.clone());
        Ok(restaurant)
    }

    async fn update_details(
        &self,
        id: Uuid,
        owner_id: Uuid,
        details: &RestaurantDetails,
    ) -> Result<Restaurant, StoreError> {
        self.check_write()?;
        let mut t = self.tables();
        let r = t
            .restaurants
            .iter_mut()
            .find(|r| r.id == id && r.owner_id == owner_id)
            .ok_or(StoreError::NotFound("restaurant"))?;
        r.name = details.name.clone();
        r.phone = details.phone.clone();
        r.address = details.address.clone();
        r.latitude = details.latitude;
        r.longitude = details.longitude;
        r.updated_at = OffsetDateTime::now_utc();
        Ok(r.clone())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        owner_id: Uuid,
        profile: &ProfileUpdate,
    ) -> Result<Restaurant, StoreError> {
        self.check_write()?;
        let mut t = self.tables();
        let r = t
            .restaurants
            .iter_mut()
            .find(|r| r.id == id && r.owner_id == owner_id)
            .ok_or(StoreError::NotFound("restaurant"))?;
        if let Some(description) = &profile.description {
            r.description = Some(description.clone());
        }
        if let Some(images) = &profile.images {
            r.images = images.clone();
        }
        if let Some(hours) = &profile.business_hours {
            r.business_hours = Some(hours.clone());
        }
        r.updated_at = OffsetDateTime::now_utc();
        Ok(r.clone())
    }

    async fn set_unique_key(
        &self,
        id: Uuid,
        owner_id: Uuid,
        unique_key: &str,
    ) -> Result<Restaurant, StoreError> {
        self.check_write()?;
        let mut t = self.tables();
        let r = t
            .restaurants
            .iter_mut()
            .find(|r| r.id == id && r.owner_id == owner_id)
            .ok_or(StoreError::NotFound("restaurant"))?;
        r.unique_key = unique_key.to_string();
        r.updated_at = OffsetDateTime::now_utc();
        Ok(r.clone())
    }
}

#[async_trait]
impl SectionRepo for MemoryBackend {
    async fn list_by_restaurant(&self, restaurant_id: Uuid) -> Result<Vec<MenuSection>, StoreError> {
        self.begin_read().await;
        let mut rows: Vec<MenuSection> = self
            .tables()
            .sections
            .iter()
            .filter(|s| s.restaurant_id == restaurant_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.position);
        Ok(rows)
    }

    async fn insert(&self, new: &NewSection) -> Result<MenuSection, StoreError> {
        self.check_write()?;
        let now = OffsetDateTime::now_utc();
        let section = MenuSection {
            id: Uuid::new_v4(),
            restaurant_id: new.restaurant_id,
            owner_id: new.owner_id,
            name: new.name.clone(),
            description: new.description.clone(),
            position: new.position,
            created_at: now,
            updated_at: now,
        };
        self.tables().sections.push(section.clone());
        Ok(section)
    }

    async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<MenuSection, StoreError> {
        self.check_write()?;
        let mut t = self.tables();
        let s = t
            .sections
            .iter_mut()
            .find(|s| s.id == id && s.owner_id == owner_id)
            .ok_or(StoreError::NotFound("section"))?;
        s.name = name.to_string();
        s.description = description.map(str::to_string);
        s.updated_at = OffsetDateTime::now_utc();
        Ok(s.clone())
    }

    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<(), StoreError> {
        self.check_write()?;
        let mut t = self.tables();
        let before = t.sections.len();
        t.sections.retain(|s| !(s.id == id && s.owner_id == owner_id));
        if t.sections.len() == before {
            return Err(StoreError::NotFound("section"));
        }
        t.items.retain(|i| i.section_id != id);
        Ok(())
    }

    async fn update_positions(&self, owner_id: Uuid, positions: &[(Uuid, i32)]) -> Result<(), StoreError> {
        self.check_write()?;
        let mut t = self.tables();
        let now = OffsetDateTime::now_utc();
        for (id, position) in positions {
            if let Some(s) = t
                .sections
                .iter_mut()
                .find(|s| s.id == *id && s.owner_id == owner_id)
            {
                s.position = *position;
                s.updated_at = now;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ItemRepo for MemoryBackend {
    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        section_id: Option<Uuid>,
    ) -> Result<Vec<MenuItem>, StoreError> {
        self.begin_read().await;
        let mut rows: Vec<MenuItem> = self
            .tables()
            .items
            .iter()
            .filter(|i| i.owner_id == owner_id && section_id.map_or(true, |s| i.section_id == s))
            .cloned()
            .collect();
        rows.sort_by_key(|i| i.position);
        Ok(rows)
    }

    async fn insert(&self, new: &NewItem) -> Result<MenuItem, StoreError> {
        self.check_write()?;
        let mut t = self.tables();
        if !t
            .sections
            .iter()
            .any(|s| s.id == new.draft.section_id && s.owner_id == new.owner_id)
        {
            return Err(StoreError::NotFound("section"));
        }
        let now = OffsetDateTime::now_utc();
        let d = &new.draft;
        let item = MenuItem {
            id: Uuid::new_v4(),
            section_id: d.section_id,
            owner_id: new.owner_id,
            name: d.name.clone(),
            description: d.description.clone(),
            price: d.price,
            image_url: d.image_url.clone(),
            is_available: d.is_available,
            position: new.position,
            created_at: now,
            updated_at: now,
        };
        t.items.push(item.clone());
        Ok(item)
    }

    async fn update(&self, id: Uuid, owner_id: Uuid, patch: &ItemPatch) -> Result<MenuItem, StoreError> {
        self.check_write()?;
        let mut t = self.tables();
        if let Some(section_id) = patch.section_id {
            if !t
                .sections
                .iter()
                .any(|s| s.id == section_id && s.owner_id == owner_id)
            {
                return Err(StoreError::NotFound("section"));
            }
        }
        let item = t
            .items
            .iter_mut()
            .find(|i| i.id == id && i.owner_id == owner_id)
            .ok_or(StoreError::NotFound("item"))?;
        patch.apply(item);
        item.updated_at = OffsetDateTime::now_utc();
        Ok(item.clone())
    }

    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<(), StoreError> {
        self.check_write()?;
        let mut t = self.tables();
        let before = t.items.len();
        t.items.retain(|i| !(i.id == id && i.owner_id == owner_id));
        if t.items.len() == before {
            return Err(StoreError::NotFound("item"));
        }
        Ok(())
    }

    async fn update_positions(&self, owner_id: Uuid, positions: &[(Uuid, i32)]) -> Result<(), StoreError> {
        self.check_write()?;
        let mut t = self.tables();
        let now = OffsetDateTime::now_utc();
        for (id, position) in positions {
            if let Some(i) = t
                .items
                .iter_mut()
                .find(|i| i.id == *id && i.owner_id == owner_id)
            {
                i.position = *position;
                i.updated_at = now;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepo for MemoryBackend {
    async fn insert(&self, user_id: Uuid, new: &NewOrder, total_price: f64) -> Result<Uuid, StoreError> {
        self.check_write()?;
        let now = OffsetDateTime::now_utc();
        let order = Order {
            id: Uuid::new_v4(),
            user_id,
            restaurant_id: new.restaurant_id,
            status: OrderStatus::Pending,
            total_price,
            delivery_address: new.delivery_address.clone(),
            delivery_instructions: new.delivery_instructions.clone(),
            estimated_delivery_time: None,
            created_at: now,
            updated_at: now,
        };
        {
            let mut t = self.tables();
            for line in &new.items {
                t.order_items.push(OrderItem {
                    id: Uuid::new_v4(),
                    order_id: order.id,
                    menu_item_id: line.menu_item_id,
                    quantity: line.quantity,
                    price: line.price,
                    special_instructions: line.special_instructions.clone(),
                    created_at: now,
                    menu_item: None,
                });
            }
            t.orders.push(order.clone());
        }
        self.feed.publish(OrderChange {
            kind: ChangeKind::Insert,
            id: order.id,
            restaurant_id: order.restaurant_id,
        });
        Ok(order.id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<OrderDetails>, StoreError> {
        let t = self.tables();
        Ok(t.orders.iter().find(|o| o.id == id).map(|o| t.details(o)))
    }

    async fn list(
        &self,
        restaurant_id: Uuid,
        filter: &OrderFilter,
    ) -> Result<(Vec<OrderDetails>, i64), StoreError> {
        self.begin_read().await;
        let t = self.tables();
        let mut matching: Vec<&Order> = t
            .orders
            .iter()
            .filter(|o| o.restaurant_id == restaurant_id && filter.matches(o))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let count = matching.len() as i64;

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter
            .effective_limit()
            .map_or(usize::MAX, |l| l.max(0) as usize);
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|o| t.details(o))
            .collect();
        Ok((page, count))
    }

    async fn update_status(
        &self,
        restaurant_id: Uuid,
        id: Uuid,
        status: OrderStatus,
        estimated_delivery_time: Option<OffsetDateTime>,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        {
            let mut t = self.tables();
            let order = t
                .orders
                .iter_mut()
                .find(|o| o.id == id && o.restaurant_id == restaurant_id)
                .ok_or(StoreError::NotFound("order"))?;
            order.status = status;
            if estimated_delivery_time.is_some() {
                order.estimated_delivery_time = estimated_delivery_time;
            }
            order.updated_at = OffsetDateTime::now_utc();
        }
        self.feed.publish(OrderChange {
            kind: ChangeKind::Update,
            id,
            restaurant_id,
        });
        Ok(())
    }

    async fn bulk_update_status(
        &self,
        restaurant_id: Uuid,
        ids: &[Uuid],
        status: OrderStatus,
    ) -> Result<u64, StoreError> {
        self.check_write()?;
        let mut changed = Vec::new();
        {
            let mut t = self.tables();
            let now = OffsetDateTime::now_utc();
            for order in t
                .orders
                .iter_mut()
                .filter(|o| o.restaurant_id == restaurant_id && ids.contains(&o.id))
            {
                order.status = status;
                order.updated_at = now;
                changed.push(order.id);
            }
        }
        for id in &changed {
            self.feed.publish(OrderChange {
                kind: ChangeKind::Update,
                id: *id,
                restaurant_id,
            });
        }
        Ok(changed.len() as u64)
    }

    async fn summaries(
        &self,
        restaurant_id: Uuid,
        date_from: Option<OffsetDateTime>,
        date_to: Option<OffsetDateTime>,
    ) -> Result<Vec<OrderSummary>, StoreError> {
        let filter = OrderFilter {
            date_from,
            date_to,
            ..OrderFilter::default()
        };
        Ok(self
            .tables()
            .orders
            .iter()
            .filter(|o| o.restaurant_id == restaurant_id && filter.matches(o))
            .map(|o| OrderSummary {
                status: o.status,
                total_price: o.total_price,
                created_at: o.created_at,
            })
            .collect())
    }

    async fn find_customers(&self, query: &str) -> Result<Vec<Uuid>, StoreError> {
        let needle = query.to_lowercase();
        let contains = |field: &Option<String>| {
            field
                .as_deref()
                .map_or(false, |v| v.to_lowercase().contains(&needle))
        };
        Ok(self
            .tables()
            .profiles
            .values()
            .filter(|p| contains(&p.full_name) || contains(&p.phone))
            .map(|p| p.id)
            .collect())
    }
}
