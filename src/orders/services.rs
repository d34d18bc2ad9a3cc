use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Weak},
};

use time::{Duration, OffsetDateTime};
use tokio::{
    sync::{broadcast::error::RecvError, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::OrderStatistics,
    repo::OrderRepo,
    repo_types::{NewOrder, OrderDetails, OrderFilter, OrderStatus},
};
use crate::{
    error::StoreError,
    fetch_gate::{FetchGate, Flight},
    realtime::{ChangeFeed, ChangeKind, OrderChange},
};

pub const DEFAULT_PREP_MINUTES: i64 = 20;

/// Shortest query matched against order ids.
const ID_QUERY_MIN_LEN: usize = 6;

pub fn estimated_delivery_time(prep_minutes: i64) -> OffsetDateTime {
    OffsetDateTime::now_utc() + Duration::minutes(prep_minutes)
}

fn validate_order(new: &NewOrder) -> Result<(), StoreError> {
    if new.items.is_empty() {
        return Err(StoreError::Validation("Order has no items".into()));
    }
    for line in &new.items {
        if line.quantity <= 0 {
            return Err(StoreError::Validation("Quantity must be at least 1".into()));
        }
        if !line.price.is_finite() || line.price < 0.0 {
            return Err(StoreError::Validation("Price must be a non-negative number".into()));
        }
    }
    Ok(())
}

/// Places an order for `customer_id` in status `pending`.
#[instrument(skip(repo, new), fields(restaurant_id = %new.restaurant_id))]
pub async fn create_order(
    repo: &dyn OrderRepo,
    customer_id: Uuid,
    new: &NewOrder,
) -> Result<OrderDetails, StoreError> {
    validate_order(new)?;
    let total = new.total_price();
    let id = repo.insert(customer_id, new, total).await?;
    info!(order_id = %id, total, lines = new.items.len(), "order placed");
    repo.get(id).await?.ok_or(StoreError::NotFound("order"))
}

/// One order of `restaurant_id`; orders of other restaurants are not found.
pub async fn get_order(
    repo: &dyn OrderRepo,
    restaurant_id: Uuid,
    id: Uuid,
) -> Result<OrderDetails, StoreError> {
    repo.get(id)
        .await?
        .filter(|d| d.order.restaurant_id == restaurant_id)
        .ok_or(StoreError::NotFound("order"))
}

/// Finds orders by id fragment, or else by customer name or phone.
#[instrument(skip(repo))]
pub async fn search_orders(
    repo: &dyn OrderRepo,
    restaurant_id: Uuid,
    query: &str,
) -> Result<Vec<OrderDetails>, StoreError> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let (orders, _) = repo.list(restaurant_id, &OrderFilter::default()).await?;

    if query.chars().count() >= ID_QUERY_MIN_LEN {
        let needle = query.to_lowercase();
        if let Some(hit) = orders
            .iter()
            .find(|d| d.order.id.to_string().contains(&needle))
        {
            return Ok(vec![hit.clone()]);
        }
    }

    let customers: HashSet<Uuid> = repo.find_customers(query).await?.into_iter().collect();
    debug!(customers = customers.len(), "customer matches");
    Ok(orders
        .into_iter()
        .filter(|d| customers.contains(&d.order.user_id))
        .collect())
}

#[instrument(skip(repo))]
pub async fn order_statistics(
    repo: &dyn OrderRepo,
    restaurant_id: Uuid,
    date_from: Option<OffsetDateTime>,
    date_to: Option<OffsetDateTime>,
) -> Result<OrderStatistics, StoreError> {
    let summaries = repo.summaries(restaurant_id, date_from, date_to).await?;
    Ok(OrderStatistics::from_summaries(&summaries))
}

#[derive(Default)]
struct OrdersState {
    orders: Vec<OrderDetails>,
    total_count: i64,
    /// Restaurant and filter of the cached page.
    loaded_for: Option<(Uuid, OrderFilter)>,
}

impl OrdersState {
    fn holds(&self, restaurant_id: Uuid, filter: &OrderFilter) -> bool {
        self.loaded_for
            .as_ref()
            .is_some_and(|(r, f)| *r == restaurant_id && f == filter)
    }
}

/// The order board: last fetched page of orders, kept live by [`OrdersHolder::subscribe`].
pub struct OrdersHolder {
    repo: Arc<dyn OrderRepo>,
    feed: ChangeFeed,
    state: RwLock<OrdersState>,
    gate: FetchGate,
}

/// Live updates for one restaurant; dropping it stops them.
pub struct Subscription {
    restaurant_id: Uuid,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn restaurant_id(&self) -> Uuid {
        self.restaurant_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl OrdersHolder {
    pub fn new(repo: Arc<dyn OrderRepo>, feed: ChangeFeed) -> Self {
        Self {
            repo,
            feed,
            state: RwLock::default(),
            gate: FetchGate::default(),
        }
    }

    pub async fn snapshot(&self) -> Vec<OrderDetails> {
        self.state.read().await.orders.clone()
    }

    pub async fn total_count(&self) -> i64 {
        self.state.read().await.total_count
    }

    /// Loads one page of orders into the board. A caller that waited on an
    /// identical fetch reads its result instead of repeating it.
    #[instrument(skip(self, filter))]
    pub async fn fetch(
        &self,
        restaurant_id: Uuid,
        filter: &OrderFilter,
    ) -> Result<(Vec<OrderDetails>, i64), StoreError> {
        loop {
            if self.gate.is_loading() {
                debug!("waiting for order fetch in flight");
            }
            let flight = match self.gate.enter().await {
                Flight::Joined => {
                    let st = self.state.read().await;
                    if st.holds(restaurant_id, filter) {
                        return Ok((st.orders.clone(), st.total_count));
                    }
                    continue;
                }
                Flight::Leader(flight) => flight,
            };

            let (orders, count) = self
                .repo
                .list(restaurant_id, filter)
                .await
                .map_err(|e| {
                    error!(error = %e, "fetching orders failed");
                    e
                })?;

            let mut st = self.state.write().await;
            st.orders = orders.clone();
            st.total_count = count;
            st.loaded_for = Some((restaurant_id, filter.clone()));
            flight.complete();
            return Ok((orders, count));
        }
    }

    /// Makes sure the cache holds every order of `restaurant_id`, not a filtered page.
    pub async fn load_board(&self, restaurant_id: Uuid) -> Result<(), StoreError> {
        let board = OrderFilter::default();
        if !self.state.read().await.holds(restaurant_id, &board) {
            self.fetch(restaurant_id, &board).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        restaurant_id: Uuid,
        id: Uuid,
        status: OrderStatus,
        estimated_delivery_time: Option<OffsetDateTime>,
    ) -> Result<(), StoreError> {
        self.repo
            .update_status(restaurant_id, id, status, estimated_delivery_time)
            .await?;

        let now = OffsetDateTime::now_utc();
        let mut st = self.state.write().await;
        if let Some(d) = st.orders.iter_mut().find(|d| d.order.id == id) {
            d.order.status = status;
            if estimated_delivery_time.is_some() {
                d.order.estimated_delivery_time = estimated_delivery_time;
            }
            d.order.updated_at = now;
        }
        Ok(())
    }

    /// Sets one status on many orders; returns how many rows changed.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn bulk_update_status(
        &self,
        restaurant_id: Uuid,
        ids: &[Uuid],
        status: OrderStatus,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let changed = self
            .repo
            .bulk_update_status(restaurant_id, ids, status)
            .await?;

        let now = OffsetDateTime::now_utc();
        let mut st = self.state.write().await;
        for d in st.orders.iter_mut().filter(|d| ids.contains(&d.order.id)) {
            d.order.status = status;
            d.order.updated_at = now;
        }
        info!(changed, %status, "bulk status update");
        Ok(changed)
    }

    /// Cached orders with `status`, or all of them.
    pub async fn filter_by_status(&self, status: Option<OrderStatus>) -> Vec<OrderDetails> {
        self.state
            .read()
            .await
            .orders
            .iter()
            .filter(|d| status.map_or(true, |s| d.order.status == s))
            .cloned()
            .collect()
    }

    /// Cached orders grouped by status; every status has an entry.
    pub async fn partition_by_status(&self) -> BTreeMap<OrderStatus, Vec<OrderDetails>> {
        let mut groups: BTreeMap<OrderStatus, Vec<OrderDetails>> =
            OrderStatus::ALL.into_iter().map(|s| (s, Vec::new())).collect();
        for d in self.state.read().await.orders.iter() {
            groups.entry(d.order.status).or_default().push(d.clone());
        }
        groups
    }

    /// Applies insert, update and delete notifications for `restaurant_id` to the board.
    pub fn subscribe(self: &Arc<Self>, restaurant_id: Uuid) -> Subscription {
        let rx = self.feed.subscribe();
        let holder = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut rx = rx;
            loop {
                match rx.recv().await {
                    Ok(change) if change.restaurant_id == restaurant_id => {
                        let Some(holder) = Weak::upgrade(&holder) else {
                            break;
                        };
                        holder.apply_change(change).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, %restaurant_id, "order feed lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(%restaurant_id, "order subscription ended");
        });
        info!(%restaurant_id, "subscribed to order changes");
        Subscription {
            restaurant_id,
            task,
        }
    }

    async fn apply_change(&self, change: OrderChange) {
        let fresh = match change.kind {
            ChangeKind::Delete => None,
            ChangeKind::Insert | ChangeKind::Update => match self.repo.get(change.id).await {
                Ok(found) => found,
                Err(e) => {
                    error!(error = %e, order_id = %change.id, "refetching changed order failed");
                    return;
                }
            },
        };

        let mut st = self.state.write().await;
        let fresh = fresh.filter(|d| {
            st.loaded_for
                .as_ref()
                .map_or(true, |(_, filter)| filter.matches(&d.order))
        });
        let index = st.orders.iter().position(|d| d.order.id == change.id);
        match (fresh, index) {
            (Some(details), Some(i)) => st.orders[i] = details,
            (Some(details), None) => {
                st.orders.insert(0, details);
                st.total_count += 1;
            }
            (None, Some(i)) => {
                st.orders.remove(i);
                st.total_count = (st.total_count - 1).max(0);
            }
            (None, None) => {}
        }
        debug!(?change, "order board patched");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::{
        memory::MemoryBackend,
        orders::repo_types::{NewOrderLine, Profile},
    };

    fn line(quantity: i32, price: f64) -> NewOrderLine {
        NewOrderLine {
            menu_item_id: Uuid::new_v4(),
            quantity,
            price,
            special_instructions: None,
        }
    }

    fn new_order(restaurant_id: Uuid, lines: Vec<NewOrderLine>) -> NewOrder {
        NewOrder {
            restaurant_id,
            items: lines,
            delivery_address: Some("4 Park Street".into()),
            delivery_instructions: None,
        }
    }

    async fn place(mem: &MemoryBackend, restaurant_id: Uuid, total: f64) -> OrderDetails {
        create_order(mem, Uuid::new_v4(), &new_order(restaurant_id, vec![line(1, total)]))
            .await
            .unwrap()
    }

    async fn wait_for(holder: &OrdersHolder, done: impl Fn(&[OrderDetails]) -> bool) {
        for _ in 0..200 {
            if done(&holder.snapshot().await) {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!("board never reached the expected state");
    }

    #[tokio::test]
    async fn create_order_totals_lines() {
        let mem = MemoryBackend::default();
        let restaurant_id = Uuid::new_v4();
        let placed = create_order(
            &mem,
            Uuid::new_v4(),
            &new_order(restaurant_id, vec![line(2, 150.0), line(3, 20.0)]),
        )
        .await
        .unwrap();
        assert_eq!(placed.order.total_price, 360.0);
        assert_eq!(placed.order.status, OrderStatus::Pending);
        assert_eq!(placed.order_items.len(), 2);
    }

    #[tokio::test]
    async fn create_order_rejects_empty_or_zero_quantity() {
        let mem = MemoryBackend::default();
        let err = create_order(&mem, Uuid::new_v4(), &new_order(Uuid::new_v4(), vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let err = create_order(
            &mem,
            Uuid::new_v4(),
            &new_order(Uuid::new_v4(), vec![line(0, 10.0)]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn get_order_is_scoped_to_restaurant() {
        let mem = MemoryBackend::default();
        let restaurant_id = Uuid::new_v4();
        let placed = place(&mem, restaurant_id, 99.0).await;
        assert!(get_order(&mem, restaurant_id, placed.order.id).await.is_ok());
        assert_eq!(
            get_order(&mem, Uuid::new_v4(), placed.order.id).await.unwrap_err(),
            StoreError::NotFound("order")
        );
    }

    #[tokio::test]
    async fn status_groups_partition_the_board() {
        let mem = Arc::new(MemoryBackend::default());
        let restaurant_id = Uuid::new_v4();
        let holder = OrdersHolder::new(mem.clone(), ChangeFeed::new());
        let mut ids = Vec::new();
        for total in [10.0, 20.0, 30.0, 40.0, 50.0] {
            ids.push(place(&mem, restaurant_id, total).await.order.id);
        }
        holder.fetch(restaurant_id, &OrderFilter::default()).await.unwrap();
        holder
            .update_status(restaurant_id, ids[0], OrderStatus::Preparing, None)
            .await
            .unwrap();
        holder
            .bulk_update_status(restaurant_id, &ids[1..3], OrderStatus::Delivered)
            .await
            .unwrap();

        let all = holder.filter_by_status(None).await;
        let groups = holder.partition_by_status().await;
        assert_eq!(groups.len(), OrderStatus::ALL.len());

        let mut seen: Vec<Uuid> = groups
            .values()
            .flat_map(|g| g.iter().map(|d| d.order.id))
            .collect();
        seen.sort();
        let mut expected: Vec<Uuid> = all.iter().map(|d| d.order.id).collect();
        expected.sort();
        assert_eq!(seen, expected);

        for (status, group) in &groups {
            assert!(group.iter().all(|d| d.order.status == *status));
            assert_eq!(group.len(), holder.filter_by_status(Some(*status)).await.len());
        }
        assert_eq!(groups[&OrderStatus::Delivered].len(), 2);
        assert_eq!(groups[&OrderStatus::Pending].len(), 2);
    }

    #[tokio::test]
    async fn board_reloads_after_a_filtered_page() {
        let mem = Arc::new(MemoryBackend::default());
        let restaurant_id = Uuid::new_v4();
        let holder = OrdersHolder::new(mem.clone(), ChangeFeed::new());
        let mut ids = Vec::new();
        for total in [10.0, 20.0, 30.0, 40.0] {
            ids.push(place(&mem, restaurant_id, total).await.order.id);
        }
        mem.bulk_update_status(restaurant_id, &ids[..2], OrderStatus::Delivered)
            .await
            .unwrap();

        let page = OrderFilter {
            status: Some(OrderStatus::Delivered),
            limit: Some(1),
            ..OrderFilter::default()
        };
        let (orders, count) = holder.fetch(restaurant_id, &page).await.unwrap();
        assert_eq!((orders.len(), count), (1, 2));

        holder.load_board(restaurant_id).await.unwrap();
        assert_eq!(holder.total_count().await, 4);
        let groups = holder.partition_by_status().await;
        assert_eq!(groups[&OrderStatus::Delivered].len(), 2);
        assert_eq!(groups[&OrderStatus::Pending].len(), 2);

        let reads = mem.read_count();
        holder.load_board(restaurant_id).await.unwrap();
        assert_eq!(mem.read_count(), reads);
    }

    #[tokio::test]
    async fn identical_fetches_share_one_read() {
        let mem = Arc::new(MemoryBackend::default());
        let restaurant_id = Uuid::new_v4();
        place(&mem, restaurant_id, 10.0).await;
        mem.slow_reads(StdDuration::from_millis(20));
        let holder = OrdersHolder::new(mem.clone(), ChangeFeed::new());

        let pending = OrderFilter {
            status: Some(OrderStatus::Pending),
            ..OrderFilter::default()
        };
        let all = OrderFilter::default();
        let reads = mem.read_count();
        let (a, b, c) = tokio::join!(
            holder.fetch(restaurant_id, &all),
            holder.fetch(restaurant_id, &all),
            holder.fetch(restaurant_id, &pending)
        );
        assert_eq!(a.unwrap().1, 1);
        assert_eq!(b.unwrap().1, 1);
        assert_eq!(c.unwrap().1, 1);
        assert_eq!(mem.read_count() - reads, 2);
    }

    #[tokio::test]
    async fn statistics_over_date_range() {
        let mem = MemoryBackend::default();
        let restaurant_id = Uuid::new_v4();
        let old = place(&mem, restaurant_id, 500.0).await;
        let a = place(&mem, restaurant_id, 100.0).await;
        let b = place(&mem, restaurant_id, 300.0).await;
        place(&mem, restaurant_id, 200.0).await;
        place(&mem, Uuid::new_v4(), 1000.0).await;

        let now = OffsetDateTime::now_utc();
        mem.set_order_created_at(old.order.id, now - Duration::days(30));
        for id in [old.order.id, a.order.id, b.order.id] {
            mem.update_status(restaurant_id, id, OrderStatus::Delivered, None)
                .await
                .unwrap();
        }

        let stats = order_statistics(&mem, restaurant_id, Some(now - Duration::days(1)), None)
            .await
            .unwrap();
        assert_eq!(stats.total_orders, 3);
        assert_eq!(stats.completed_orders, 2);
        assert_eq!(stats.pending_orders, 1);
        assert_eq!(stats.total_revenue, 400.0);
        assert_eq!(stats.avg_order_value, 200.0);

        let all_time = order_statistics(&mem, restaurant_id, None, None).await.unwrap();
        assert_eq!(all_time.total_orders, 4);
        assert_eq!(all_time.total_revenue, 900.0);
    }

    #[tokio::test]
    async fn search_by_id_fragment_then_customer() {
        let mem = MemoryBackend::default();
        let restaurant_id = Uuid::new_v4();
        let customer = Uuid::new_v4();
        mem.upsert_profile(Profile {
            id: customer,
            full_name: Some("Asha Verma".into()),
            phone: Some("+91 90000 11111".into()),
        });
        let by_asha = create_order(&mem, customer, &new_order(restaurant_id, vec![line(1, 50.0)]))
            .await
            .unwrap();
        let other = place(&mem, restaurant_id, 70.0).await;

        let fragment = &other.order.id.to_string()[..8];
        let hits = search_orders(&mem, restaurant_id, &fragment.to_uppercase())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].order.id, other.order.id);

        let hits = search_orders(&mem, restaurant_id, "asha").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].order.id, by_asha.order.id);
        assert_eq!(hits[0].customer_profile.full_name.as_deref(), Some("Asha Verma"));

        assert!(search_orders(&mem, restaurant_id, "nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_non_ascii_query_searches_customers() {
        let mem = MemoryBackend::default();
        let restaurant_id = Uuid::new_v4();
        let customer = Uuid::new_v4();
        mem.upsert_profile(Profile {
            id: customer,
            full_name: Some("Zoë Ångström".into()),
            phone: None,
        });
        let placed = create_order(&mem, customer, &new_order(restaurant_id, vec![line(1, 50.0)]))
            .await
            .unwrap();
        place(&mem, restaurant_id, 70.0).await;

        // Five characters, six bytes.
        let hits = search_orders(&mem, restaurant_id, "ångst").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].order.id, placed.order.id);
    }

    #[tokio::test]
    async fn subscription_patches_board_for_its_restaurant_only() {
        let feed = ChangeFeed::new();
        let mem = Arc::new(MemoryBackend::new(feed.clone()));
        let restaurant_id = Uuid::new_v4();
        let holder = Arc::new(OrdersHolder::new(mem.clone(), feed));
        holder.fetch(restaurant_id, &OrderFilter::default()).await.unwrap();
        let sub = holder.subscribe(restaurant_id);
        assert_eq!(sub.restaurant_id(), restaurant_id);

        place(&mem, Uuid::new_v4(), 10.0).await;
        let placed = place(&mem, restaurant_id, 25.0).await;
        wait_for(&holder, |board| board.len() == 1).await;
        assert_eq!(holder.snapshot().await[0].order.id, placed.order.id);

        mem.update_status(restaurant_id, placed.order.id, OrderStatus::Ready, None)
            .await
            .unwrap();
        wait_for(&holder, |board| board[0].order.status == OrderStatus::Ready).await;

        mem.delete_order(placed.order.id).unwrap();
        wait_for(&holder, |board| board.is_empty()).await;

        drop(sub);
        tokio::task::yield_now().await;
        place(&mem, restaurant_id, 5.0).await;
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(holder.snapshot().await.is_empty());
    }

    #[test]
    fn eta_is_prep_minutes_ahead() {
        let before = OffsetDateTime::now_utc();
        let eta = estimated_delivery_time(DEFAULT_PREP_MINUTES);
        let ahead = eta - before;
        assert!(ahead >= Duration::minutes(20) && ahead < Duration::minutes(21));
    }
}
