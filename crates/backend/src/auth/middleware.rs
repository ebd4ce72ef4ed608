//! Authentication middleware layer for protecting routes.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::error::ErrorResponse;
use crate::AppState;

use super::jwt;
use super::types::{AuthAgent, AuthConfig, Claims};

type AuthRejection = (StatusCode, Json<ErrorResponse>);

fn reject(message: &str) -> AuthRejection {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message.to_string(),
            details: None,
        }),
    )
}

/// Middleware that requires a valid token and injects the `AuthAgent`
/// into request extensions.
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let config = &state.auth_config;

    let (agent, claims) = match authenticate(request.headers(), config) {
        Ok(found) => found,
        Err(rejection) => return rejection.into_response(),
    };

    request.extensions_mut().insert(agent);
    let response = next.run(request).await;

    // Sliding session: reissue tokens older than a day
    if jwt::should_refresh(&claims) {
        if let Ok(agent_id) = Uuid::parse_str(&claims.sub) {
            if let Ok(new_token) =
                jwt::create_token(config, agent_id, &claims.email, claims.name.clone())
            {
                let cookie =
                    build_auth_cookie(&config.cookie_name, &new_token, config.token_duration_days);
                let (mut parts, body) = response.into_parts();
                if let Ok(cookie_value) = cookie.parse() {
                    parts.headers.insert(header::SET_COOKIE, cookie_value);
                }
                return Response::from_parts(parts, body);
            }
        }
    }

    response
}

fn authenticate(headers: &HeaderMap, config: &AuthConfig) -> Result<(AuthAgent, Claims), AuthRejection> {
    let token = extract_token_from_cookie(headers, &config.cookie_name)
        .or_else(|| extract_token_from_header(headers))
        .ok_or_else(|| reject("Missing authentication"))?;

    let claims = jwt::validate_token(config, &token).map_err(|_| reject("Invalid or expired token"))?;
    let agent_id = Uuid::parse_str(&claims.sub).map_err(|_| reject("Invalid token subject"))?;

    let agent = AuthAgent {
        agent_id,
        email: claims.email.clone(),
        name: claims.name.clone(),
    };

    Ok((agent, claims))
}

fn extract_token_from_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;

    for cookie_str in cookie_header.split(';') {
        if let Ok(cookie) = cookie::Cookie::parse(cookie_str.trim()) {
            if cookie.name() == cookie_name {
                return Some(cookie.value().to_string());
            }
        }
    }

    None
}

fn extract_token_from_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|s| s.to_string())
}

/// Build an auth cookie string.
pub fn build_auth_cookie(name: &str, value: &str, days: i64) -> String {
    let max_age = days * 24 * 60 * 60;
    let secure = if std::env::var("RUST_ENV").unwrap_or_default() == "production" {
        "; Secure"
    } else {
        ""
    };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        name, value, max_age, secure
    )
}

/// Extract and validate the agent from request headers.
pub fn extract_auth_agent(headers: &HeaderMap, config: &AuthConfig) -> Result<AuthAgent, AuthRejection> {
    authenticate(headers, config).map(|(agent, _)| agent)
}
