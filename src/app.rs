use std::net::SocketAddr;
use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use crate::state::AppState;
use crate::{auth, items, orders, restaurants, sections};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1",
              Router::new()
                  .merge(auth::router())
                  .merge(restaurants::router())
                  .merge(sections::router())
                  .merge(items::router())
                  .merge(orders::router())
                  .route("/health", get(|| async { "ok" }))
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
        .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Client {
        app: Router,
        token: Option<String>,
    }

    impl Client {
        fn new() -> Self {
            Self {
                app: build_app(AppState::fake()),
                token: None,
            }
        }

        async fn call(&self, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
            let mut req = Request::builder()
                .method(method)
                .uri(format!("/api/v1{path}"));
            if let Some(token) = &self.token {
                req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let req = match body {
                Some(v) => req
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(v.to_string())),
                None => req.body(Body::empty()),
            }
            .unwrap();

            let res = self.app.clone().oneshot(req).await.unwrap();
            let status = res.status();
            let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
            let value = serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
            (status, value)
        }

        async fn sign_up(&mut self, email: &str) -> Value {
            let (status, body) = self
                .call(
                    Method::POST,
                    "/auth/signup",
                    Some(json!({ "email": email, "password": "pw123456" })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
            self.token = body["session"]["access_token"].as_str().map(String::from);
            body
        }
    }

    #[tokio::test]
    async fn health_is_public() {
        let client = Client::new();
        let (status, body) = client.call(Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("ok".into()));
    }

    #[tokio::test]
    async fn owner_routes_need_a_token() {
        let client = Client::new();
        let (status, _) = client.call(Method::GET, "/restaurant", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn onboarding_flow() {
        let mut client = Client::new();
        let signed_up = client.sign_up("owner@example.com").await;
        assert_eq!(signed_up["is_onboarded"], false);

        let (status, _) = client.call(Method::GET, "/restaurant", None).await;
        assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);

        let (status, restaurant) = client
            .call(
                Method::POST,
                "/restaurant",
                Some(json!({ "name": "Spice Route", "phone": "+91 98100 00000" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let key = restaurant["unique_key"].as_str().unwrap().to_string();

        let (status, _) = client
            .call(Method::POST, "/restaurant", Some(json!({ "name": "Again" })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, me) = client.call(Method::GET, "/me", None).await;
        assert_eq!(me["is_onboarded"], true);

        let anonymous = Client {
            app: client.app.clone(),
            token: None,
        };
        let (status, menu) = anonymous
            .call(Method::GET, &format!("/public/menu/{key}"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(menu["restaurant"]["name"], "Spice Route");
        assert!(menu["restaurant"].get("owner_id").is_none());
    }

    #[tokio::test]
    async fn menu_editing_over_http() {
        let mut client = Client::new();
        client.sign_up("owner@example.com").await;
        client
            .call(Method::POST, "/restaurant", Some(json!({ "name": "Spice Route" })))
            .await;

        let mut section_ids = Vec::new();
        for name in ["Starters", "Mains"] {
            let (status, section) = client
                .call(Method::POST, "/sections", Some(json!({ "name": name })))
                .await;
            assert_eq!(status, StatusCode::CREATED);
            section_ids.push(section["id"].as_str().unwrap().to_string());
        }

        let (status, reordered) = client
            .call(
                Method::PUT,
                "/sections/order",
                Some(json!({ "ordered_ids": [section_ids[1], section_ids[0]] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reordered[0]["name"], "Mains");
        assert_eq!(reordered[0]["position"], 0);

        let (status, item) = client
            .call(
                Method::POST,
                "/items",
                Some(json!({ "section_id": section_ids[0], "name": "Samosa", "price": 40.0 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let item_id = item["id"].as_str().unwrap().to_string();

        let (status, toggled) = client
            .call(Method::POST, &format!("/items/{item_id}/availability"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(toggled["is_available"], false);

        let (status, _) = client
            .call(Method::DELETE, &format!("/sections/{}", section_ids[0]), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, items) = client.call(Method::GET, "/items", None).await;
        assert_eq!(items, json!([]));
    }

    #[tokio::test]
    async fn orders_over_http() {
        let mut owner = Client::new();
        owner.sign_up("owner@example.com").await;
        let (_, restaurant) = owner
            .call(Method::POST, "/restaurant", Some(json!({ "name": "Spice Route" })))
            .await;

        let mut customer = Client {
            app: owner.app.clone(),
            token: None,
        };
        customer.sign_up("guest@example.com").await;
        let (status, placed) = customer
            .call(
                Method::POST,
                "/orders",
                Some(json!({
                    "restaurant_id": restaurant["id"],
                    "items": [{ "menu_item_id": uuid::Uuid::new_v4(), "quantity": 2, "price": 150.0 }]
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{placed}");
        assert_eq!(placed["total_price"], 300.0);
        let order_id = placed["id"].as_str().unwrap().to_string();

        let (status, page) = owner.call(Method::GET, "/orders?status=pending", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total_count"], 1);
        assert_eq!(page["orders"][0]["status_label"], "New Order");

        let (status, board) = owner.call(Method::GET, "/orders/board", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(board["columns"]["pending"][0]["id"], placed["id"]);
        assert_eq!(board["columns"]["delivered"], json!([]));

        let (status, card) = owner
            .call(
                Method::PATCH,
                &format!("/orders/{order_id}/status"),
                Some(json!({ "status": "preparing", "prep_minutes": 25 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(card["status"], "preparing");
        assert!(card["estimated_delivery_time"].is_string());

        let (_, stats) = owner.call(Method::GET, "/orders/stats", None).await;
        assert_eq!(stats["total_orders"], 1);
        assert_eq!(stats["pending_orders"], 1);

        let (status, bulk) = owner
            .call(
                Method::POST,
                "/orders/status",
                Some(json!({ "ids": [order_id], "status": "delivered" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bulk["updated"], 1);

        let (_, page) = owner
            .call(Method::GET, "/orders?status=cancelled&limit=5", None)
            .await;
        assert_eq!(page["total_count"], 0);
        let (_, board) = owner.call(Method::GET, "/orders/board", None).await;
        assert_eq!(board["total_count"], 1);
        assert_eq!(board["columns"]["delivered"][0]["id"], placed["id"]);

        let (status, _) = customer
            .call(Method::GET, &format!("/orders/{order_id}"), None)
            .await;
        assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
    }
}
