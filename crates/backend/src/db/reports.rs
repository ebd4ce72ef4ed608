use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared_types::{ChecklistItem, Meeting, MeetingStats, MeetingStatus, MeetingType, MeetingTypeCount};
use uuid::Uuid;

/// Monthly meeting statistics for one agent.
pub async fn meeting_stats(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    year: i32,
    month: u32,
) -> anyhow::Result<MeetingStats> {
    use crate::schema::checklist_items::dsl::*;

    let month_meetings = crate::db::meetings::list_by_month(conn, agent, year, month).await?;
    let ids: Vec<Uuid> = month_meetings.iter().map(|m| m.id).collect();

    let items = if ids.is_empty() {
        Vec::new()
    } else {
        checklist_items
            .filter(meeting_id.eq_any(ids))
            .load::<ChecklistItem>(conn)
            .await?
    };

    Ok(summarize(year, month, &month_meetings, &items))
}

pub fn summarize(
    year: i32,
    month: u32,
    meetings: &[Meeting],
    checklist: &[ChecklistItem],
) -> MeetingStats {
    let count_status =
        |s: MeetingStatus| meetings.iter().filter(|m| m.status == s).count() as i64;

    let by_type = MeetingType::ALL
        .iter()
        .map(|t| MeetingTypeCount {
            meeting_type: *t,
            count: meetings.iter().filter(|m| m.meeting_type == *t).count() as i64,
        })
        .filter(|c| c.count > 0)
        .collect();

    let checklist_items = checklist.len() as i64;
    let checklist_completed = checklist.iter().filter(|i| i.completed).count() as i64;
    let checklist_completion = if checklist_items == 0 {
        0.0
    } else {
        checklist_completed as f32 / checklist_items as f32
    };

    MeetingStats {
        year,
        month,
        total: meetings.len() as i64,
        scheduled: count_status(MeetingStatus::Scheduled),
        completed: count_status(MeetingStatus::Completed),
        cancelled: count_status(MeetingStatus::Cancelled),
        rescheduled: count_status(MeetingStatus::Rescheduled),
        by_type,
        checklist_items,
        checklist_completed,
        checklist_completion,
    }
}
