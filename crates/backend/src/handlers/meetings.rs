//! Meetings plus their checklist, notes and sync history.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    Extension,
};
use chrono::Utc;
use shared_types::{
    ChecklistItem, CreateChecklistItemRequest, CreateMeetingRequest, CreateNoteRequest, Meeting,
    MeetingDetails, MeetingNote, MonthQuery, RescheduleMeetingRequest, SyncLog, UpcomingQuery,
    UpdateMeetingRequest,
};
use uuid::Uuid;

use crate::auth::AuthAgent;
use crate::db::{checklist, get_conn, meetings, notes, sync_logs};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

use super::validate_month;

const DEFAULT_UPCOMING: i64 = 10;
const MAX_UPCOMING: i64 = 100;

pub async fn list_meetings(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Query(query): Query<MonthQuery>,
) -> ApiResult<Json<Vec<Meeting>>> {
    validate_month(&query)?;

    let mut conn = get_conn(&state.pool).await?;
    let items = meetings::list_by_month(&mut conn, agent.agent_id, query.year, query.month).await?;
    Ok(Json(items))
}

pub async fn list_meetings_with_details(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Query(query): Query<MonthQuery>,
) -> ApiResult<Json<Vec<MeetingDetails>>> {
    validate_month(&query)?;

    let details = state
        .meetings
        .details_for_month(agent.agent_id, query.year, query.month)
        .await?;
    Ok(Json(details))
}

pub async fn list_upcoming(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Query(query): Query<UpcomingQuery>,
) -> ApiResult<Json<Vec<Meeting>>> {
    let limit = query.limit.unwrap_or(DEFAULT_UPCOMING).clamp(1, MAX_UPCOMING);

    let mut conn = get_conn(&state.pool).await?;
    let items = meetings::list_upcoming(&mut conn, agent.agent_id, Utc::now(), limit).await?;
    Ok(Json(items))
}

pub async fn create_meeting(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Json(payload): Json<CreateMeetingRequest>,
) -> ApiResult<(StatusCode, Json<MeetingDetails>)> {
    let created = state.meetings.create(agent.agent_id, payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_meeting(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MeetingDetails>> {
    Ok(Json(state.meetings.details(agent.agent_id, id).await?))
}

pub async fn update_meeting(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateMeetingRequest>,
) -> ApiResult<Json<Meeting>> {
    Ok(Json(state.meetings.update(agent.agent_id, id, payload).await?))
}

pub async fn reschedule_meeting(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RescheduleMeetingRequest>,
) -> ApiResult<Json<Meeting>> {
    Ok(Json(state.meetings.reschedule(agent.agent_id, id, payload).await?))
}

pub async fn cancel_meeting(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Meeting>> {
    Ok(Json(state.meetings.cancel(agent.agent_id, id).await?))
}

pub async fn complete_meeting(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Meeting>> {
    Ok(Json(state.meetings.complete(agent.agent_id, id).await?))
}

pub async fn delete_meeting(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.meetings.delete(agent.agent_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Checklist handlers
pub async fn list_checklist(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(meeting_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ChecklistItem>>> {
    let mut conn = get_conn(&state.pool).await?;
    let items = checklist::list_for_meeting(&mut conn, agent.agent_id, meeting_id).await?;
    Ok(Json(items))
}

pub async fn add_checklist_item(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(meeting_id): Path<Uuid>,
    Json(payload): Json<CreateChecklistItemRequest>,
) -> ApiResult<(StatusCode, Json<ChecklistItem>)> {
    let label = payload.label.trim();
    if label.is_empty() {
        return Err(ApiError::bad_request("label must not be empty"));
    }

    let mut conn = get_conn(&state.pool).await?;
    checklist::add(&mut conn, agent.agent_id, meeting_id, label)
        .await?
        .map(|item| (StatusCode::CREATED, Json(item)))
        .ok_or_else(|| ApiError::not_found("Meeting"))
}

pub async fn toggle_checklist_item(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(item_id): Path<Uuid>,
) -> ApiResult<Json<ChecklistItem>> {
    let mut conn = get_conn(&state.pool).await?;
    checklist::toggle(&mut conn, agent.agent_id, item_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Checklist item"))
}

// Note handlers
pub async fn list_notes(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(meeting_id): Path<Uuid>,
) -> ApiResult<Json<Vec<MeetingNote>>> {
    let mut conn = get_conn(&state.pool).await?;
    let items = notes::list_for_meeting(&mut conn, agent.agent_id, meeting_id).await?;
    Ok(Json(items))
}

pub async fn add_note(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(meeting_id): Path<Uuid>,
    Json(payload): Json<CreateNoteRequest>,
) -> ApiResult<(StatusCode, Json<MeetingNote>)> {
    if payload.body.trim().is_empty() {
        return Err(ApiError::bad_request("body must not be empty"));
    }

    let mut conn = get_conn(&state.pool).await?;
    notes::add(&mut conn, agent.agent_id, meeting_id, &payload.body)
        .await?
        .map(|note| (StatusCode::CREATED, Json(note)))
        .ok_or_else(|| ApiError::not_found("Meeting"))
}

pub async fn delete_note(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(note_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = get_conn(&state.pool).await?;
    if notes::delete(&mut conn, agent.agent_id, note_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Note"))
    }
}

/// Sync history survives meeting deletion, so no existence check here.
pub async fn list_meeting_sync_logs(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(meeting_id): Path<Uuid>,
) -> ApiResult<Json<Vec<SyncLog>>> {
    let mut conn = get_conn(&state.pool).await?;
    let items = sync_logs::list_for_meeting(&mut conn, agent.agent_id, meeting_id).await?;
    Ok(Json(items))
}
