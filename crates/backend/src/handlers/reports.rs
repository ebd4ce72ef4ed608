use axum::{
    extract::{Json, Query, State},
    Extension,
};
use shared_types::{MeetingStats, MonthQuery};

use crate::auth::AuthAgent;
use crate::db::{get_conn, reports};
use crate::error::ApiResult;
use crate::AppState;

use super::validate_month;

pub async fn meeting_report(
    State(state): State<AppState>,
    Extension(agent): Extension<AuthAgent>,
    Query(query): Query<MonthQuery>,
) -> ApiResult<Json<MeetingStats>> {
    validate_month(&query)?;

    let mut conn = get_conn(&state.pool).await?;
    let stats = reports::meeting_stats(&mut conn, agent.agent_id, query.year, query.month).await?;
    Ok(Json(stats))
}
