use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared_types::MeetingNote;
use uuid::Uuid;

use crate::models::NewMeetingNote;

pub async fn list_for_meeting(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    meeting: Uuid,
) -> anyhow::Result<Vec<MeetingNote>> {
    use crate::schema::meeting_notes::dsl::*;

    let items = meeting_notes
        .filter(meeting_id.eq(meeting))
        .filter(agent_id.eq(agent))
        .order_by(created_at.desc())
        .load::<MeetingNote>(conn)
        .await?;

    Ok(items)
}

/// `None` when the meeting is not the agent's.
pub async fn add(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    meeting: Uuid,
    body_val: &str,
) -> anyhow::Result<Option<MeetingNote>> {
    use crate::schema::meeting_notes::dsl::*;

    if crate::db::meetings::get(conn, agent, meeting).await?.is_none() {
        return Ok(None);
    }

    let note = diesel::insert_into(meeting_notes)
        .values(NewMeetingNote {
            meeting_id: meeting,
            agent_id: agent,
            body: body_val.to_string(),
        })
        .get_result::<MeetingNote>(conn)
        .await?;

    Ok(Some(note))
}

pub async fn delete(conn: &mut AsyncPgConnection, agent: Uuid, note_id: Uuid) -> anyhow::Result<bool> {
    use crate::schema::meeting_notes::dsl::*;

    let deleted = diesel::delete(meeting_notes.filter(id.eq(note_id)).filter(agent_id.eq(agent)))
        .execute(conn)
        .await?;

    Ok(deleted > 0)
}
