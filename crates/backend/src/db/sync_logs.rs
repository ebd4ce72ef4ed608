//! The sync log is append-only: this module only inserts and reads.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared_types::SyncLog;
use uuid::Uuid;

use crate::models::NewSyncLog;

pub async fn insert(conn: &mut AsyncPgConnection, entry: &NewSyncLog) -> anyhow::Result<SyncLog> {
    use crate::schema::sync_logs::dsl::*;

    let row = diesel::insert_into(sync_logs)
        .values(entry)
        .get_result::<SyncLog>(conn)
        .await?;

    Ok(row)
}

pub async fn list_recent(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    limit: i64,
) -> anyhow::Result<Vec<SyncLog>> {
    use crate::schema::sync_logs::dsl::*;

    let items = sync_logs
        .filter(agent_id.eq(agent))
        .order_by(created_at.desc())
        .limit(limit)
        .load::<SyncLog>(conn)
        .await?;

    Ok(items)
}

pub async fn list_for_meeting(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    meeting: Uuid,
) -> anyhow::Result<Vec<SyncLog>> {
    use crate::schema::sync_logs::dsl::*;

    let items = sync_logs
        .filter(agent_id.eq(agent))
        .filter(meeting_id.eq(meeting))
        .order_by(created_at.desc())
        .load::<SyncLog>(conn)
        .await?;

    Ok(items)
}
