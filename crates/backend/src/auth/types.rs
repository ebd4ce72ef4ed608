//! Auth-related types and configuration.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Re-export shared types for convenience
pub use shared_types::{AuthUserResponse, LoginInitResponse};

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (agent id)
    pub sub: String,
    pub email: String,
    /// Display name from Google
    pub name: Option<String>,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
}

/// Authenticated agent, inserted into request extensions by `require_auth`
#[derive(Debug, Clone)]
pub struct AuthAgent {
    pub agent_id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

/// Auth configuration loaded from environment
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_duration_days: i64,
    pub cookie_name: String,
    pub google_client_id: String,
    pub google_client_secret: String,
    pub auth_redirect_uri: String,
    /// Where the browser lands after login/logout
    pub frontend_url: String,
}

impl AuthConfig {
    /// Load auth configuration from environment variables.
    ///
    /// Required env vars:
    /// - `JWT_SECRET`: Secret key for signing JWTs
    /// - `GOOGLE_CLIENT_ID`: Google OAuth client ID
    /// - `GOOGLE_CLIENT_SECRET`: Google OAuth client secret
    /// - `AUTH_REDIRECT_URI`: OAuth callback URI for agent login
    ///
    /// `FRONTEND_URL` defaults to `/`.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            jwt_secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            token_duration_days: 7,
            cookie_name: "auth_token".to_string(),
            google_client_id: std::env::var("GOOGLE_CLIENT_ID")
                .context("GOOGLE_CLIENT_ID must be set")?,
            google_client_secret: std::env::var("GOOGLE_CLIENT_SECRET")
                .context("GOOGLE_CLIENT_SECRET must be set")?,
            auth_redirect_uri: std::env::var("AUTH_REDIRECT_URI")
                .context("AUTH_REDIRECT_URI must be set")?,
            frontend_url: std::env::var("FRONTEND_URL").unwrap_or_else(|_| "/".to_string()),
        })
    }
}
