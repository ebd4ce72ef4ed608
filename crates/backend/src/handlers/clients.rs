use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    Extension,
};
use shared_types::{Client, ClientListQuery, CreateClientRequest, UpdateClientRequest};
use uuid::Uuid;

use crate::auth::AuthAgent;
use crate::db::get_conn;
use crate::error::{ApiError, ApiResult};
use crate::repository::{AgentRepository, Clients};
use crate::AppState;

pub async fn list_clients(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Query(query): Query<ClientListQuery>,
) -> ApiResult<Json<Vec<Client>>> {
    let mut conn = get_conn(&state.pool).await?;
    let items = Clients::list(&mut conn, agent.agent_id, query.status).await?;
    Ok(Json(items))
}

pub async fn get_client(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Client>> {
    let mut conn = get_conn(&state.pool).await?;
    Clients::get(&mut conn, agent.agent_id, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Client"))
}

pub async fn create_client(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Json(payload): Json<CreateClientRequest>,
) -> ApiResult<(StatusCode, Json<Client>)> {
    if payload.first_name.trim().is_empty() || payload.last_name.trim().is_empty() {
        return Err(ApiError::bad_request("first_name and last_name are required"));
    }

    let mut conn = get_conn(&state.pool).await?;
    let client = Clients::create(&mut conn, agent.agent_id, payload).await?;
    tracing::info!("Agent {} created client {}", agent.agent_id, client.id);

    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn update_client(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateClientRequest>,
) -> ApiResult<Json<Client>> {
    let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
    if blank(&payload.first_name) || blank(&payload.last_name) {
        return Err(ApiError::bad_request("first_name and last_name cannot be blank"));
    }

    let mut conn = get_conn(&state.pool).await?;
    Clients::update(&mut conn, agent.agent_id, id, payload)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Client"))
}

pub async fn delete_client(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.meetings.delete_client(agent.agent_id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Client"))
    }
}
