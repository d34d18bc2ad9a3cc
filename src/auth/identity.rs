//! Identity providers: a GoTrue-compatible REST service, or local accounts for development.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    dto::{JwtKeys, Session, SessionUser, SignUpOutcome},
    services::{hash_password, verify_password},
};
use crate::error::StoreError;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, StoreError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, StoreError>;
    async fn refresh(&self, refresh_token: &str) -> Result<Session, StoreError>;
    async fn sign_out(&self, access_token: &str) -> Result<(), StoreError>;
    /// Where to send the browser for an OAuth sign-in with `provider`.
    fn authorize_url(&self, provider: &str, redirect_to: &str) -> Result<String, StoreError>;
}

/// GoTrue REST client (`/signup`, `/token`, `/logout`, `/authorize`).
pub struct GoTrueClient {
    http: Client,
    base_url: String,
    anon_key: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpBody {
    Session(Session),
    User(SessionUser),
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self, fallback: String) -> String {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
            .unwrap_or(fallback)
    }
}

impl GoTrueClient {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .header("apikey", &self.anon_key)
    }

    async fn check(resp: Response) -> Result<Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body: ErrorBody = resp.json().await.unwrap_or_default();
        let message = body.into_message(format!("identity service returned {status}"));
        warn!(%status, %message, "identity request rejected");
        Err(match status.as_u16() {
            400 | 401 | 403 => StoreError::Unauthorized(message),
            422 => StoreError::Validation(message),
            _ => StoreError::Remote(message),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, StoreError> {
        let resp = self
            .post("/signup")
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body: SignUpBody = Self::check(resp).await?.json().await?;
        Ok(match body {
            SignUpBody::Session(session) => SignUpOutcome {
                user: session.user.clone(),
                session: Some(session),
            },
            SignUpBody::User(user) => {
                debug!(user_id = %user.id, "sign-up awaits email confirmation");
                SignUpOutcome {
                    user,
                    session: None,
                }
            }
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        let resp = self
            .post("/token?grant_type=password")
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, StoreError> {
        let resp = self
            .post("/token?grant_type=refresh_token")
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), StoreError> {
        let resp = self.post("/logout").bearer_auth(access_token).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    fn authorize_url(&self, provider: &str, redirect_to: &str) -> Result<String, StoreError> {
        let url = Url::parse_with_params(
            &format!("{}/authorize", self.base_url),
            &[("provider", provider), ("redirect_to", redirect_to)],
        )
        .map_err(|e| StoreError::Remote(e.to_string()))?;
        Ok(url.into())
    }
}

struct Account {
    id: Uuid,
    password_hash: String,
}

/// In-process accounts with argon2 hashes; tokens are signed with the API's own keys.
pub struct LocalIdentity {
    keys: JwtKeys,
    accounts: RwLock<HashMap<String, Account>>,
}

impl LocalIdentity {
    pub fn new(keys: JwtKeys) -> Self {
        Self {
            keys,
            accounts: RwLock::default(),
        }
    }

    fn issue(&self, id: Uuid, email: Option<String>) -> Result<Session, StoreError> {
        let remote = |e: anyhow::Error| StoreError::Remote(e.to_string());
        Ok(Session {
            access_token: self.keys.sign_access(id).map_err(remote)?,
            refresh_token: self.keys.sign_refresh(id).map_err(remote)?,
            expires_in: self.keys.access_ttl.as_secs() as i64,
            token_type: "bearer".into(),
            user: SessionUser { id, email },
        })
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, StoreError> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(email) {
            return Err(StoreError::Conflict("User already registered".into()));
        }
        let password_hash =
            hash_password(password).map_err(|e| StoreError::Remote(e.to_string()))?;
        let id = Uuid::new_v4();
        accounts.insert(email.to_string(), Account { id, password_hash });
        info!(user_id = %id, "local account created");

        let session = self.issue(id, Some(email.to_string()))?;
        Ok(SignUpOutcome {
            user: session.user.clone(),
            session: Some(session),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        let invalid = || StoreError::Unauthorized("Invalid login credentials".into());
        let id = {
            let accounts = self.accounts.read().await;
            let account = accounts.get(email).ok_or_else(invalid)?;
            let ok = verify_password(password, &account.password_hash)
                .map_err(|e| StoreError::Remote(e.to_string()))?;
            if !ok {
                return Err(invalid());
            }
            account.id
        };
        self.issue(id, Some(email.to_string()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, StoreError> {
        let claims = self
            .keys
            .verify_refresh(refresh_token)
            .map_err(|e| StoreError::Unauthorized(e.to_string()))?;
        let email = self
            .accounts
            .read()
            .await
            .iter()
            .find(|(_, a)| a.id == claims.sub)
            .map(|(email, _)| email.clone())
            .ok_or_else(|| StoreError::Unauthorized("User not found".into()))?;
        self.issue(claims.sub, Some(email))
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn authorize_url(&self, provider: &str, _redirect_to: &str) -> Result<String, StoreError> {
        Err(StoreError::Validation(format!(
            "{provider} sign-in needs an identity service"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::FromRef;

    use crate::state::AppState;

    fn local() -> LocalIdentity {
        LocalIdentity::new(JwtKeys::from_ref(&AppState::fake()))
    }

    #[tokio::test]
    async fn local_sign_up_then_sign_in() {
        let idp = local();
        let outcome = idp.sign_up("owner@example.com", "hunter22").await.unwrap();
        let session = outcome.session.unwrap();
        assert_eq!(session.user.email.as_deref(), Some("owner@example.com"));

        let again = idp.sign_in("owner@example.com", "hunter22").await.unwrap();
        assert_eq!(again.user.id, outcome.user.id);

        let err = idp.sign_in("owner@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn local_refresh_needs_refresh_token() {
        let idp = local();
        let session = idp
            .sign_up("owner@example.com", "hunter22")
            .await
            .unwrap()
            .session
            .unwrap();
        let refreshed = idp.refresh(&session.refresh_token).await.unwrap();
        assert_eq!(refreshed.user.id, session.user.id);
        assert!(idp.refresh(&session.access_token).await.is_err());
    }

    #[tokio::test]
    async fn local_accounts_keep_only_argon2_hashes() {
        let idp = local();
        idp.sign_up("owner@example.com", "hunter22").await.unwrap();
        let accounts = idp.accounts.read().await;
        let stored = &accounts["owner@example.com"].password_hash;
        assert!(stored.starts_with("$argon2"), "{stored}");
        assert!(!stored.contains("hunter22"));
    }

    #[tokio::test]
    async fn unreadable_stored_hash_fails_sign_in() {
        let idp = local();
        idp.sign_up("owner@example.com", "hunter22").await.unwrap();
        idp.accounts
            .write()
            .await
            .get_mut("owner@example.com")
            .unwrap()
            .password_hash = "not-a-phc-string".into();
        assert!(matches!(
            idp.sign_in("owner@example.com", "hunter22").await.unwrap_err(),
            StoreError::Remote(_)
        ));
    }

    #[tokio::test]
    async fn duplicate_local_account_conflicts() {
        let idp = local();
        idp.sign_up("owner@example.com", "hunter22").await.unwrap();
        assert!(matches!(
            idp.sign_up("owner@example.com", "other-pass").await.unwrap_err(),
            StoreError::Conflict(_)
        ));
    }

    #[test]
    fn authorize_url_encodes_redirect() {
        let gotrue = GoTrueClient::new("https://abc.supabase.co/auth/v1/", "anon");
        let url = gotrue
            .authorize_url("google", "http://localhost:5173/dashboard")
            .unwrap();
        assert_eq!(
            url,
            "https://abc.supabase.co/auth/v1/authorize?provider=google&redirect_to=http%3A%2F%2Flocalhost%3A5173%2Fdashboard"
        );
    }

    #[test]
    fn sign_up_body_accepts_session_or_bare_user() {
        let id = Uuid::new_v4();
        let bare: SignUpBody =
            serde_json::from_value(json!({ "id": id, "email": "a@b.co", "aud": "authenticated" }))
                .unwrap();
        assert!(matches!(bare, SignUpBody::User(u) if u.id == id));

        let with_session: SignUpBody = serde_json::from_value(json!({
            "access_token": "a", "refresh_token": "r", "expires_in": 3600,
            "token_type": "bearer", "user": { "id": id, "email": "a@b.co" }
        }))
        .unwrap();
        assert!(matches!(with_session, SignUpBody::Session(s) if s.user.id == id));
    }
}
