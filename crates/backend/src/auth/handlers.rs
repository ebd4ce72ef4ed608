//! Authentication HTTP handlers.

use axum::extract::Query;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;

use crate::db::{agents, get_conn};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

use super::{
    build_auth_cookie, extract_auth_agent, jwt,
    types::{AuthUserResponse, LoginInitResponse},
};

/// Start Google OAuth login flow.
///
/// Returns a URL that the frontend should redirect the agent to.
pub async fn auth_login(State(state): State<AppState>) -> ApiResult<Json<LoginInitResponse>> {
    let config = &state.auth_config;

    let csrf_state = uuid::Uuid::new_v4().to_string();
    let scopes = ["openid", "email", "profile"].join(" ");

    let auth_url = format!(
        "https://accounts.google.com/o/oauth2/v2/auth?\
         client_id={}&\
         redirect_uri={}&\
         response_type=code&\
         scope={}&\
         prompt=select_account&\
         state={}",
        urlencoding::encode(&config.google_client_id),
        urlencoding::encode(&config.auth_redirect_uri),
        urlencoding::encode(&scopes),
        csrf_state
    );

    Ok(Json(LoginInitResponse { auth_url }))
}

#[derive(Debug, Deserialize)]
pub struct AuthCallbackParams {
    pub code: String,
    #[allow(dead_code)]
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: Option<String>,
    email: String,
    name: Option<String>,
}

/// Handle Google OAuth callback.
///
/// Exchanges the code, upserts the agent, sends the welcome email to new
/// agents and sets the auth cookie.
pub async fn auth_callback(
    State(state): State<AppState>,
    Query(params): Query<AuthCallbackParams>,
) -> Response {
    match handle_callback_inner(&state, params).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Auth callback error: {:?}", e);
            Redirect::to(&format!("{}?auth_error=auth_failed", state.auth_config.frontend_url))
                .into_response()
        }
    }
}

async fn handle_callback_inner(
    state: &AppState,
    params: AuthCallbackParams,
) -> Result<Response, ApiError> {
    let config = &state.auth_config;
    let client = reqwest::Client::new();

    let token_response = client
        .post("https://oauth2.googleapis.com/token")
        .form(&[
            ("code", params.code.as_str()),
            ("client_id", config.google_client_id.as_str()),
            ("client_secret", config.google_client_secret.as_str()),
            ("redirect_uri", config.auth_redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Token exchange failed: {}", e)))?;

    if !token_response.status().is_success() {
        let status = token_response.status();
        let body = token_response.text().await.unwrap_or_default();
        tracing::error!("Token exchange failed: {} - {}", status, body);
        return Ok(Redirect::to(&format!(
            "{}?auth_error=token_exchange_failed",
            config.frontend_url
        ))
        .into_response());
    }

    let tokens: GoogleTokenResponse = token_response
        .json()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Invalid token response: {}", e)))?;

    let user_info: GoogleUserInfo = client
        .get("https://www.googleapis.com/oauth2/v2/userinfo")
        .bearer_auth(&tokens.access_token)
        .send()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to get user info: {}", e)))?
        .json()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Invalid user info response: {}", e)))?;

    tracing::info!("OAuth login attempt from: {}", user_info.email);

    let mut conn = get_conn(&state.pool).await?;
    let (agent, created) = agents::upsert_login(
        &mut conn,
        &user_info.email,
        user_info.name.as_deref(),
        user_info.id.as_deref(),
    )
    .await?;

    if created {
        tracing::info!("Created agent {} for {}", agent.id, agent.email);
        state.mailer.send_welcome(&agent);
    }

    let token = jwt::create_token(config, agent.id, &agent.email, agent.name.clone())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to create token: {}", e)))?;

    let cookie = build_auth_cookie(&config.cookie_name, &token, config.token_duration_days);

    tracing::info!("Successful login for: {}", agent.email);

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, config.frontend_url.as_str()),
            (header::SET_COOKIE, cookie.as_str()),
        ],
    )
        .into_response())
}

/// Get current authenticated agent info.
pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let agent = match extract_auth_agent(&headers, &state.auth_config) {
        Ok(agent) => agent,
        Err(err) => return err.into_response(),
    };

    // The token may outlive the agent row
    let lookup = async {
        let mut conn = get_conn(&state.pool).await?;
        agents::get_by_id(&mut conn, agent.agent_id).await
    };

    match lookup.await {
        Ok(row) => Json(AuthUserResponse {
            agent_id: row.id,
            email: row.email,
            name: row.name,
        })
        .into_response(),
        Err(e) => {
            tracing::warn!("Token for unknown agent {}: {:?}", agent.agent_id, e);
            ApiError::Unauthorized("Unknown agent".to_string()).into_response()
        }
    }
}

/// Logout - clear auth cookie.
pub async fn auth_logout(State(state): State<AppState>) -> impl IntoResponse {
    let cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        state.auth_config.cookie_name
    );

    (
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, state.auth_config.frontend_url.clone()),
            (header::SET_COOKIE, cookie),
        ],
    )
}
