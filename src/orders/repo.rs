use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{
    NewOrder, Order, OrderDetails, OrderFilter, OrderItem, OrderItemRow, OrderRow, OrderStatus,
    OrderSummary, Profile,
};
use crate::error::StoreError;

/// Table access for `orders`, `order_items` and the customer `profiles` they join.
#[async_trait]
pub trait OrderRepo: Send + Sync {
    /// Writes the order and all of its lines, or nothing.
    async fn insert(&self, user_id: Uuid, new: &NewOrder, total_price: f64) -> Result<Uuid, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<OrderDetails>, StoreError>;
    /// Newest first, with the number of rows matching the filter before paging.
    async fn list(
        &self,
        restaurant_id: Uuid,
        filter: &OrderFilter,
    ) -> Result<(Vec<OrderDetails>, i64), StoreError>;
    async fn update_status(
        &self,
        restaurant_id: Uuid,
        id: Uuid,
        status: OrderStatus,
        estimated_delivery_time: Option<OffsetDateTime>,
    ) -> Result<(), StoreError>;
    async fn bulk_update_status(
        &self,
        restaurant_id: Uuid,
        ids: &[Uuid],
        status: OrderStatus,
    ) -> Result<u64, StoreError>;
    async fn summaries(
        &self,
        restaurant_id: Uuid,
        date_from: Option<OffsetDateTime>,
        date_to: Option<OffsetDateTime>,
    ) -> Result<Vec<OrderSummary>, StoreError>;
    /// Ids of customers whose full name or phone contains `query`, ignoring case.
    async fn find_customers(&self, query: &str) -> Result<Vec<Uuid>, StoreError>;
}

const ORDER_COLUMNS: &str = "id, user_id, restaurant_id, status, total_price, delivery_address, \
                             delivery_instructions, estimated_delivery_time, created_at, updated_at";

#[derive(Clone)]
pub struct PgOrderRepo {
    db: PgPool,
}

impl PgOrderRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        new: &NewOrder,
        total_price: f64,
    ) -> Result<Uuid, StoreError> {
        let (order_id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO orders
                (user_id, restaurant_id, total_price, delivery_address, delivery_instructions, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(new.restaurant_id)
        .bind(total_price)
        .bind(&new.delivery_address)
        .bind(&new.delivery_instructions)
        .fetch_one(&mut **tx)
        .await?;

        for line in &new.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, menu_item_id, quantity, price, special_instructions)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order_id)
            .bind(line.menu_item_id)
            .bind(line.quantity)
            .bind(line.price)
            .bind(&line.special_instructions)
            .execute(&mut **tx)
            .await?;
        }
        Ok(order_id)
    }

    /// Joins order lines and customer profiles onto `orders`, keeping their order.
    async fn attach_details(&self, orders: Vec<Order>) -> Result<Vec<OrderDetails>, StoreError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut user_ids: Vec<Uuid> = orders.iter().map(|o| o.user_id).collect();
        user_ids.sort_unstable();
        user_ids.dedup();

        let lines = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT oi.id, oi.order_id, oi.menu_item_id, oi.quantity, oi.price,
                   oi.special_instructions, oi.created_at,
                   mi.name AS item_name, mi.image_url AS item_image_url
              FROM order_items oi
              LEFT JOIN menu_items mi ON mi.id = oi.menu_item_id
             WHERE oi.order_id = ANY($1)
             ORDER BY oi.created_at ASC
            "#,
        )
        .bind(&order_ids)
        .fetch_all(&self.db)
        .await?;

        let profiles = sqlx::query_as::<_, Profile>(
            "SELECT id, full_name, phone FROM profiles WHERE id = ANY($1)",
        )
        .bind(&user_ids)
        .fetch_all(&self.db)
        .await?;

        let mut lines_by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for line in lines {
            lines_by_order
                .entry(line.order_id)
                .or_default()
                .push(line.into());
        }
        let mut profiles: HashMap<Uuid, Profile> =
            profiles.into_iter().map(|p| (p.id, p)).collect();

        Ok(orders
            .into_iter()
            .map(|order| OrderDetails {
                order_items: lines_by_order.remove(&order.id).unwrap_or_default(),
                customer_profile: profiles
                    .get(&order.user_id)
                    .cloned()
                    .map(Into::into)
                    .unwrap_or_default(),
                order,
            })
            .collect())
    }
}

fn into_orders(rows: Vec<OrderRow>) -> Result<Vec<Order>, StoreError> {
    rows.into_iter().map(Order::try_from).collect()
}

/// Escapes LIKE wildcards so the query matches literally.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl OrderRepo for PgOrderRepo {
    async fn insert(&self, user_id: Uuid, new: &NewOrder, total_price: f64) -> Result<Uuid, StoreError> {
        let mut tx = self.db.begin().await?;
        let id = Self::insert_tx(&mut tx, user_id, new, total_price).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<OrderDetails>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut details = self.attach_details(vec![row.try_into()?]).await?;
        Ok(details.pop())
    }

    async fn list(
        &self,
        restaurant_id: Uuid,
        filter: &OrderFilter,
    ) -> Result<(Vec<OrderDetails>, i64), StoreError> {
        const WHERE: &str = r#"
             WHERE restaurant_id = $1
               AND ($2::text IS NULL OR status = $2)
               AND ($3::timestamptz IS NULL OR created_at >= $3)
               AND ($4::timestamptz IS NULL OR created_at <= $4)
        "#;
        let status = filter.status.map(OrderStatus::as_str);

        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM orders {WHERE}"))
            .bind(restaurant_id)
            .bind(status)
            .bind(filter.date_from)
            .bind(filter.date_to)
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders {WHERE}
             ORDER BY created_at DESC
             LIMIT $5 OFFSET $6
            "#
        ))
        .bind(restaurant_id)
        .bind(status)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(filter.effective_limit())
        .bind(filter.offset.unwrap_or(0))
        .fetch_all(&self.db)
        .await?;

        let details = self.attach_details(into_orders(rows)?).await?;
        Ok((details, count))
    }

    async fn update_status(
        &self,
        restaurant_id: Uuid,
        id: Uuid,
        status: OrderStatus,
        estimated_delivery_time: Option<OffsetDateTime>,
    ) -> Result<(), StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE orders
               SET status = $3,
                   estimated_delivery_time = COALESCE($4, estimated_delivery_time),
                   updated_at = now()
             WHERE id = $1 AND restaurant_id = $2
            "#,
        )
        .bind(id)
        .bind(restaurant_id)
        .bind(status.as_str())
        .bind(estimated_delivery_time)
        .execute(&self.db)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound("order"));
        }
        Ok(())
    }

    async fn bulk_update_status(
        &self,
        restaurant_id: Uuid,
        ids: &[Uuid],
        status: OrderStatus,
    ) -> Result<u64, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE orders
               SET status = $3, updated_at = now()
             WHERE id = ANY($1) AND restaurant_id = $2
            "#,
        )
        .bind(ids)
        .bind(restaurant_id)
        .bind(status.as_str())
        .execute(&self.db)
        .await?;
        Ok(done.rows_affected())
    }

    async fn summaries(
        &self,
        restaurant_id: Uuid,
        date_from: Option<OffsetDateTime>,
        date_to: Option<OffsetDateTime>,
    ) -> Result<Vec<OrderSummary>, StoreError> {
        let rows: Vec<(String, f64, OffsetDateTime)> = sqlx::query_as(
            r#"
            SELECT status, total_price, created_at
              FROM orders
             WHERE restaurant_id = $1
               AND ($2::timestamptz IS NULL OR created_at >= $2)
               AND ($3::timestamptz IS NULL OR created_at <= $3)
            "#,
        )
        .bind(restaurant_id)
        .bind(date_from)
        .bind(date_to)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|(status, total_price, created_at)| {
                Ok(OrderSummary {
                    status: status.parse()?,
                    total_price,
                    created_at,
                })
            })
            .collect()
    }

    async fn find_customers(&self, query: &str) -> Result<Vec<Uuid>, StoreError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM profiles WHERE full_name ILIKE $1 OR phone ILIKE $1",
        )
        .bind(like_pattern(query))
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
