use crate::auth::dto::JwtKeys;
use crate::auth::identity::{GoTrueClient, IdentityProvider, LocalIdentity};
use crate::auth::services::AuthService;
use crate::backend::Backend;
use crate::config::AppConfig;
use crate::realtime::{listen_postgres, ChangeFeed};
use crate::workspace::Workspaces;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Set when running against Postgres.
    pub db: Option<PgPool>,
    pub backend: Backend,
    pub auth: AuthService,
    pub workspaces: Workspaces,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let feed = ChangeFeed::new();

        let (backend, db) = match &config.database_url {
            Some(url) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await?;

                let listener_db = db.clone();
                let listener_feed = feed.clone();
                tokio::spawn(async move {
                    if let Err(e) = listen_postgres(listener_db, listener_feed).await {
                        tracing::error!(error = %e, "order change listener stopped");
                    }
                });

                (Backend::postgres(db.clone(), feed), Some(db))
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory tables");
                (Backend::memory(feed).0, None)
            }
        };

        let identity: Arc<dyn IdentityProvider> = match &config.identity.url {
            Some(url) => Arc::new(GoTrueClient::new(url, &config.identity.anon_key)),
            None => {
                tracing::warn!("IDENTITY_URL not set; using local accounts");
                Arc::new(LocalIdentity::new(JwtKeys::from(&config.jwt)))
            }
        };

        let state = Self::from_parts(config, db, backend, identity);
        state.workspaces.spawn_session_sync(state.auth.subscribe());
        Ok(state)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        db: Option<PgPool>,
        backend: Backend,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let auth = AuthService::new(
            identity,
            backend.restaurants.clone(),
            config.identity.oauth_redirect.clone(),
        );
        let workspaces = Workspaces::new(backend.clone());
        Self {
            config,
            db,
            backend,
            auth,
            workspaces,
        }
    }

    /// In-memory state with local accounts, for tests.
    #[cfg(test)]
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig::for_tests());
        let (backend, _) = Backend::memory(ChangeFeed::new());
        let identity = Arc::new(LocalIdentity::new(JwtKeys::from(&config.jwt)));
        Self::from_parts(config, None, backend, identity)
    }
}
