use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{OrderDetails, OrderStatus, OrderSummary};

/// Order as shown on the board, with the actions its status allows.
#[derive(Debug, Serialize)]
pub struct OrderCard {
    #[serde(flatten)]
    pub details: OrderDetails,
    pub status_label: &'static str,
    pub next_status: Option<OrderStatus>,
    pub can_cancel: bool,
    pub is_editable: bool,
}

impl From<OrderDetails> for OrderCard {
    fn from(details: OrderDetails) -> Self {
        let status = details.order.status;
        Self {
            details,
            status_label: status.label(),
            next_status: status.next(),
            can_cancel: status.can_cancel(),
            is_editable: status.is_editable(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderPage {
    pub orders: Vec<OrderCard>,
    pub total_count: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct BoardQuery {
    pub status: Option<OrderStatus>,
}

/// Cached board split into status columns.
#[derive(Debug, Serialize)]
pub struct OrderBoard {
    pub columns: BTreeMap<OrderStatus, Vec<OrderCard>>,
    pub total_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub estimated_delivery_time: Option<OffsetDateTime>,
    /// Sets the estimate to now plus this many minutes when no explicit time is given.
    pub prep_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusRequest {
    pub ids: Vec<Uuid>,
    pub status: OrderStatus,
}

#[derive(Debug, Serialize)]
pub struct BulkStatusResponse {
    pub updated: u64,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date_from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date_to: Option<OffsetDateTime>,
}

/// Dashboard figures for a date range.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderStatistics {
    pub total_orders: usize,
    /// Orders still in the kitchen or on the road.
    pub pending_orders: usize,
    pub completed_orders: usize,
    /// Sum over delivered orders.
    pub total_revenue: f64,
    /// Mean total over all orders in range.
    pub avg_order_value: f64,
}

impl OrderStatistics {
    pub fn from_summaries(orders: &[OrderSummary]) -> Self {
        let total_orders = orders.len();
        let delivered = orders
            .iter()
            .filter(|o| o.status == OrderStatus::Delivered);
        let total_revenue: f64 = delivered.clone().map(|o| o.total_price).sum();
        let all_value: f64 = orders.iter().map(|o| o.total_price).sum();
        Self {
            total_orders,
            pending_orders: orders.iter().filter(|o| o.status.is_active()).count(),
            completed_orders: delivered.count(),
            total_revenue,
            avg_order_value: if total_orders == 0 {
                0.0
            } else {
                all_value / total_orders as f64
            },
        }
    }
}
