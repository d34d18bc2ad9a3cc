use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StoreError;

/// Lifecycle of an order. Transitions are suggestions; any status may be set from any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Human label shown on the order board.
    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "New Order",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Preparing => "Preparing",
            OrderStatus::Ready => "Ready",
            OrderStatus::OutForDelivery => "Out for Delivery",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Step suggested by the order board's action button.
    pub fn next(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending | OrderStatus::Confirmed => Some(OrderStatus::Preparing),
            OrderStatus::Preparing => Some(OrderStatus::Ready),
            OrderStatus::Ready | OrderStatus::OutForDelivery => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }

    pub fn is_editable(self) -> bool {
        !matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn can_cancel(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    /// Still moving through the kitchen or delivery.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::Confirmed
                | OrderStatus::Preparing
                | OrderStatus::Ready
                | OrderStatus::OutForDelivery
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StoreError::Validation(format!("unknown order status {s:?}")))
    }
}

/// `orders` row with the status still as text.
#[derive(Debug, Clone, FromRow)]
pub struct OrderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub restaurant_id: Uuid,
    pub status: String,
    pub total_price: f64,
    pub delivery_address: Option<String>,
    pub delivery_instructions: Option<String>,
    pub estimated_delivery_time: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub restaurant_id: Uuid,
    pub status: OrderStatus,
    pub total_price: f64,
    pub delivery_address: Option<String>,
    pub delivery_instructions: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub estimated_delivery_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            restaurant_id: r.restaurant_id,
            status: r.status.parse()?,
            total_price: r.total_price,
            delivery_address: r.delivery_address,
            delivery_instructions: r.delivery_instructions,
            estimated_delivery_time: r.estimated_delivery_time,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Menu item fields joined onto an order line for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItemRef {
    pub name: String,
    pub image_url: Option<String>,
}

/// `order_items` row joined with `menu_items (name, image_url)`.
#[derive(Debug, Clone, FromRow)]
pub struct OrderItemRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub menu_item_id: Uuid,
    pub quantity: i32,
    pub price: f64,
    pub special_instructions: Option<String>,
    pub created_at: OffsetDateTime,
    pub item_name: Option<String>,
    pub item_image_url: Option<String>,
}

/// Order line with quantity and price captured at order time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub menu_item_id: Uuid,
    pub quantity: i32,
    pub price: f64,
    pub special_instructions: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub menu_item: Option<MenuItemRef>,
}

impl From<OrderItemRow> for OrderItem {
    fn from(r: OrderItemRow) -> Self {
        Self {
            id: r.id,
            order_id: r.order_id,
            menu_item_id: r.menu_item_id,
            quantity: r.quantity,
            price: r.price,
            special_instructions: r.special_instructions,
            created_at: r.created_at,
            menu_item: r.item_name.map(|name| MenuItemRef {
                name,
                image_url: r.item_image_url,
            }),
        }
    }
}

/// `profiles` row of a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

impl From<Profile> for CustomerProfile {
    fn from(p: Profile) -> Self {
        Self {
            full_name: p.full_name,
            phone: p.phone,
        }
    }
}

/// Order joined with its lines and customer profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub order_items: Vec<OrderItem>,
    pub customer_profile: CustomerProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrderLine {
    pub menu_item_id: Uuid,
    pub quantity: i32,
    pub price: f64,
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub restaurant_id: Uuid,
    pub items: Vec<NewOrderLine>,
    pub delivery_address: Option<String>,
    pub delivery_instructions: Option<String>,
}

impl NewOrder {
    pub fn total_price(&self) -> f64 {
        self.items
            .iter()
            .map(|line| line.price * f64::from(line.quantity))
            .sum()
    }
}

/// Filters for listing a restaurant's orders; `created_at` bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date_from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date_to: Option<OffsetDateTime>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl OrderFilter {
    pub const DEFAULT_PAGE: i64 = 10;

    /// An offset without a limit pages by [`Self::DEFAULT_PAGE`].
    pub fn effective_limit(&self) -> Option<i64> {
        self.limit
            .or_else(|| self.offset.map(|_| Self::DEFAULT_PAGE))
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.status.map_or(true, |s| order.status == s)
            && self.date_from.map_or(true, |from| order.created_at >= from)
            && self.date_to.map_or(true, |to| order.created_at <= to)
    }
}

/// Columns needed for statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSummary {
    pub status: OrderStatus,
    pub total_price: f64,
    pub created_at: OffsetDateTime,
}
