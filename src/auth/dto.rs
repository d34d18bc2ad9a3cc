use jsonwebtoken::{DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Token type used to distinguish Access and Refresh JWTs.
/// Tokens from the identity service carry no kind and count as access tokens.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    #[default]
    Access,
    Refresh,
}

/// JWT claims accepted by the API.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,  // user ID
    pub exp: usize, // expiration time
    pub iat: usize, // issued at
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub kind: TokenKind,
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: Option<String>,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// Request body for sign-up and login.
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: Option<String>,
}

/// Token pair as issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(default = "bearer")]
    pub token_type: String,
    pub user: SessionUser,
}

fn bearer() -> String {
    "bearer".into()
}

/// Result of sign-up; `session` is absent while the email awaits confirmation.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: SessionUser,
    pub session: Option<Session>,
}

/// Response returned after sign-up, login or refresh.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: SessionUser,
    pub session: Option<Session>,
    pub is_onboarded: bool,
}

#[derive(Debug, Serialize)]
pub struct OAuthResponse {
    pub url: String,
}

/// What the dashboard needs to route a signed-in user.
#[derive(Debug, Serialize, PartialEq)]
pub struct AuthStatus {
    pub user_id: Uuid,
    pub is_authenticated: bool,
    pub is_onboarded: bool,
}
