//! Calendar connection, sync control and provider push notifications.

use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Redirect,
    Extension,
};
use chrono::Utc;
use serde::Deserialize;
use shared_types::{
    CalendarSettingsResponse, ConnectCalendarResponse, Meeting, ResolveConflictRequest, SyncState,
    SyncStatusResponse, SyncSummary, ToggleSyncRequest,
};
use uuid::Uuid;

use crate::auth::AuthAgent;
use crate::db::{calendar_settings, get_conn, sync_logs};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

const RECENT_LOG_LIMIT: i64 = 20;
const CHANNEL_ID_HEADER: &str = "x-goog-channel-id";
const RESOURCE_STATE_HEADER: &str = "x-goog-resource-state";

#[derive(Debug, Deserialize)]
pub struct CalendarCallbackQuery {
    pub code: Option<String>,
    pub error: Option<String>,
}

/// Start the calendar OAuth flow.
pub async fn connect_calendar(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
) -> Json<ConnectCalendarResponse> {
    // Not checked on return: the callback sits behind require_auth and binds the grant to that agent
    let csrf = Uuid::new_v4().to_string();
    tracing::debug!("Agent {} starting calendar connection", agent.agent_id);

    Json(ConnectCalendarResponse {
        auth_url: state.calendar.authorization_url(&csrf),
    })
}

/// OAuth redirect target; always lands the browser back on the frontend.
pub async fn calendar_callback(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Query(query): Query<CalendarCallbackQuery>,
) -> Redirect {
    let frontend = &state.auth_config.frontend_url;

    if let Some(error) = query.error {
        tracing::warn!("Calendar OAuth denied for agent {}: {}", agent.agent_id, error);
        return Redirect::to(&format!("{}?calendar=error", frontend));
    }

    let Some(code) = query.code else {
        return Redirect::to(&format!("{}?calendar=error", frontend));
    };

    match state.calendar.connect(agent.agent_id, &code).await {
        Ok(_) => Redirect::to(&format!("{}?calendar=connected", frontend)),
        Err(e) => {
            tracing::error!("Calendar connection failed for agent {}: {}", agent.agent_id, e);
            Redirect::to(&format!("{}?calendar=error", frontend))
        }
    }
}

pub async fn disconnect_calendar(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
) -> ApiResult<StatusCode> {
    state.calendar.disconnect(agent.agent_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Settings without tokens; an agent that never connected gets defaults.
pub async fn get_settings(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
) -> ApiResult<Json<CalendarSettingsResponse>> {
    let mut conn = get_conn(&state.pool).await?;
    let settings = calendar_settings::get(&mut conn, agent.agent_id).await?;

    Ok(Json(
        settings
            .map(CalendarSettingsResponse::from)
            .unwrap_or_else(disconnected_settings),
    ))
}

fn disconnected_settings() -> CalendarSettingsResponse {
    CalendarSettingsResponse {
        connected: false,
        calendar_id: "primary".to_string(),
        sync_enabled: false,
        sync_status: SyncState::NotSynced,
        last_synced_at: None,
        last_sync_error: None,
        token_expires_at: None,
        channel_id: None,
        channel_expires_at: None,
    }
}

pub async fn toggle_sync(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Json(payload): Json<ToggleSyncRequest>,
) -> ApiResult<Json<CalendarSettingsResponse>> {
    let settings = state
        .calendar
        .set_enabled(agent.agent_id, payload.enabled)
        .await?;
    Ok(Json(settings.into()))
}

pub async fn run_sync(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
) -> ApiResult<Json<SyncSummary>> {
    let started = Utc::now();
    let summary = state.calendar.perform_full_sync(agent.agent_id).await?;

    tracing::info!(
        "Manual sync for agent {} finished as {} in {}ms",
        agent.agent_id,
        summary.status,
        (summary.completed_at - started).num_milliseconds()
    );
    Ok(Json(summary))
}

pub async fn sync_status(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
) -> ApiResult<Json<SyncStatusResponse>> {
    let mut conn = get_conn(&state.pool).await?;
    let settings = calendar_settings::get(&mut conn, agent.agent_id).await?;
    let recent_logs = sync_logs::list_recent(&mut conn, agent.agent_id, RECENT_LOG_LIMIT).await?;

    let response = match settings {
        Some(s) => SyncStatusResponse {
            sync_enabled: s.sync_enabled,
            status: s.sync_status,
            last_synced_at: s.last_synced_at,
            last_sync_error: s.last_sync_error,
            recent_logs,
        },
        None => SyncStatusResponse {
            sync_enabled: false,
            status: SyncState::NotSynced,
            last_synced_at: None,
            last_sync_error: None,
            recent_logs,
        },
    };

    Ok(Json(response))
}

/// Create the push channel, or replace it when one already exists.
pub async fn upsert_channel(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
) -> ApiResult<Json<CalendarSettingsResponse>> {
    let existing = {
        let mut conn = get_conn(&state.pool).await?;
        calendar_settings::get(&mut conn, agent.agent_id).await?
    };

    if existing.is_some_and(|s| s.channel_id.is_some()) {
        state.calendar.renew_channel(agent.agent_id).await?;
    } else {
        state.calendar.create_channel(agent.agent_id).await?;
    }

    let mut conn = get_conn(&state.pool).await?;
    calendar_settings::get(&mut conn, agent.agent_id)
        .await?
        .map(|s| Json(s.into()))
        .ok_or_else(|| ApiError::not_found("Calendar settings"))
}

pub async fn delete_channel(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
) -> ApiResult<StatusCode> {
    if state.calendar.delete_channel(agent.agent_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Channel"))
    }
}

pub async fn resolve_conflict(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(meeting_id): Path<Uuid>,
    Json(payload): Json<ResolveConflictRequest>,
) -> ApiResult<Json<Meeting>> {
    let meeting = state
        .calendar
        .resolve_conflict(agent.agent_id, meeting_id, payload.side)
        .await?;
    Ok(Json(meeting))
}

/// Provider push endpoint. Acknowledges immediately and pulls in the
/// background; the provider retries anything other than a 2xx.
pub async fn calendar_webhook(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    let (channel_id, resource_state) = notification_headers(&headers)?;

    let calendar = state.calendar.clone();
    tokio::spawn(async move {
        match calendar.handle_notification(&channel_id, &resource_state).await {
            Ok(Some(report)) => tracing::debug!("Channel {} processed: {:?}", channel_id, report),
            Ok(None) => {}
            Err(e) => tracing::warn!("Notification on channel {} failed: {}", channel_id, e),
        }
    });

    Ok(StatusCode::OK)
}

fn notification_headers(headers: &HeaderMap) -> ApiResult<(String, String)> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    match (read(CHANNEL_ID_HEADER), read(RESOURCE_STATE_HEADER)) {
        (Some(channel), Some(resource_state)) => Ok((channel, resource_state)),
        _ => Err(ApiError::bad_request("Missing channel notification headers")),
    }
}
