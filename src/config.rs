use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Where sign-in, sign-up and OAuth are delegated to.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// GoTrue base URL, e.g. `https://project.supabase.co/auth/v1`.
    /// Without it the local development provider is used.
    pub url: Option<String>,
    pub anon_key: String,
    pub oauth_redirect: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Without a database the service runs on the in-memory backend.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub identity: IdentityConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok();
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").ok(),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "authenticated".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
            refresh_ttl_minutes: std::env::var("JWT_REFRESH_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 14),
        };
        let identity = IdentityConfig {
            url: std::env::var("IDENTITY_URL").ok(),
            anon_key: std::env::var("IDENTITY_ANON_KEY").unwrap_or_default(),
            oauth_redirect: std::env::var("OAUTH_REDIRECT_URL")
                .unwrap_or_else(|_| "http://localhost:5173/dashboard".into()),
        };
        Ok(Self {
            database_url,
            jwt,
            identity,
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: None,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: Some("test-issuer".into()),
                audience: "authenticated".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            identity: IdentityConfig {
                url: None,
                anon_key: String::new(),
                oauth_redirect: "http://localhost:5173/dashboard".into(),
            },
        }
    }
}
