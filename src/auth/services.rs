pub(crate) use crate::auth::dto::{Claims, JwtKeys, TokenKind};
use crate::auth::dto::{AuthResponse, AuthStatus, Session};
use crate::auth::identity::IdentityProvider;
use crate::config::JwtConfig;
use crate::error::StoreError;
use crate::restaurants::repo::RestaurantRepo;
use crate::state::AppState;
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap, StatusCode},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

lazy_static! {
    static ref PROVIDER_RE: Regex = Regex::new(r"^[a-z0-9_]+$").unwrap();
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

impl From<&JwtConfig> for JwtKeys {
    fn from(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs((cfg.ttl_minutes as u64) * 60),
            refresh_ttl: Duration::from_secs((cfg.refresh_ttl_minutes as u64) * 60),
        }
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::from(&state.config.jwt)
    }
}

impl JwtKeys {
    fn sign_with_kind(&self, user_id: Uuid, kind: TokenKind) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            aud: self.audience.clone(),
            iss: self.issuer.clone(),
            email: None,
            role: Some("authenticated".into()),
            kind,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, TokenKind::Access)
    }
    pub fn sign_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, TokenKind::Refresh)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(std::slice::from_ref(issuer));
        }
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> anyhow::Result<Claims> {
        let claims = self.verify(token)?;
        if claims.kind != TokenKind::Refresh {
            anyhow::bail!("not a refresh token");
        }
        Ok(claims)
    }
}

/// `Bearer <token>` from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, (StatusCode, String)> {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header".to_string(),
        ))?;

    auth_header.strip_prefix("Bearer ").ok_or((
        StatusCode::UNAUTHORIZED,
        "Invalid Authorization header".to_string(),
    ))
}

pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let token = bearer_token(&parts.headers)?;

        let claims = match keys.verify(token) {
            Ok(c) => c,
            Err(_) => {
                warn!("invalid or expired token");
                return Err((
                    StatusCode::UNAUTHORIZED,
                    "Invalid or expired token".to_string(),
                ));
            }
        };

        if claims.kind != TokenKind::Access {
            return Err((
                StatusCode::UNAUTHORIZED,
                "Access token required".to_string(),
            ));
        }

        Ok(AuthUser(claims.sub))
    }
}


/// Sign-in state changes, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: Uuid },
    SignedOut { user_id: Uuid },
}

/// Sign-up, sign-in and session bookkeeping on top of an [`IdentityProvider`].
#[derive(Clone)]
pub struct AuthService {
    identity: Arc<dyn IdentityProvider>,
    restaurants: Arc<dyn RestaurantRepo>,
    events: broadcast::Sender<SessionEvent>,
    oauth_redirect: String,
}

impl AuthService {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        restaurants: Arc<dyn RestaurantRepo>,
        oauth_redirect: String,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            identity,
            restaurants,
            events,
            oauth_redirect,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn is_onboarded(&self, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.restaurants.find_by_owner(user_id).await?.is_some())
    }

    fn check_credentials(email: &str, password: &str) -> Result<String, StoreError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || password.is_empty() {
            return Err(StoreError::Validation("Email and password are required".into()));
        }
        if !is_valid_email(&email) {
            warn!(email = %email, "invalid email");
            return Err(StoreError::Validation("Invalid email".into()));
        }
        Ok(email)
    }

    #[instrument(skip(self, password))]
    pub async fn signup(&self, email: &str, password: &str) -> Result<AuthResponse, StoreError> {
        let email = Self::check_credentials(email, password)?;
        let outcome = self.identity.sign_up(&email, password).await?;
        if outcome.session.is_some() {
            self.publish(SessionEvent::SignedIn {
                user_id: outcome.user.id,
            });
        }
        info!(user_id = %outcome.user.id, confirmed = outcome.session.is_some(), "user signed up");
        Ok(AuthResponse {
            user: outcome.user,
            session: outcome.session,
            is_onboarded: false,
        })
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, StoreError> {
        let email = Self::check_credentials(email, password)?;
        let session = self.identity.sign_in(&email, password).await?;
        self.signed_in(session).await
    }

    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, StoreError> {
        let session = self.identity.refresh(refresh_token).await?;
        self.signed_in(session).await
    }

    async fn signed_in(&self, session: Session) -> Result<AuthResponse, StoreError> {
        let user = session.user.clone();
        let is_onboarded = self.is_onboarded(user.id).await?;
        self.publish(SessionEvent::SignedIn { user_id: user.id });
        info!(user_id = %user.id, is_onboarded, "user signed in");
        Ok(AuthResponse {
            user,
            session: Some(session),
            is_onboarded,
        })
    }

    pub fn oauth_url(&self, provider: &str) -> Result<String, StoreError> {
        if !PROVIDER_RE.is_match(provider) {
            return Err(StoreError::Validation(format!("Unknown provider {provider:?}")));
        }
        self.identity.authorize_url(provider, &self.oauth_redirect)
    }

    /// Signs out at the provider. The owner's session state is dropped either way.
    #[instrument(skip(self, access_token))]
    pub async fn logout(&self, access_token: &str, user_id: Uuid) -> Result<(), StoreError> {
        let result = self.identity.sign_out(access_token).await;
        self.publish(SessionEvent::SignedOut { user_id });
        if let Err(e) = &result {
            warn!(error = %e, %user_id, "provider sign-out failed");
        }
        result
    }

    pub async fn status(&self, user_id: Uuid) -> Result<AuthStatus, StoreError> {
        Ok(AuthStatus {
            user_id,
            is_authenticated: true,
            is_onboarded: self.is_onboarded(user_id).await?,
        })
    }
}
