use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use diesel::dsl;
use diesel::prelude::*;
use diesel::query_builder::{DeleteStatement, IntoUpdateTarget, UpdateStatement};
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared_types::{ChecklistItem, Meeting, MeetingStatus, SyncState};
use uuid::Uuid;

use crate::models::{MeetingChanges, NewChecklistItem, NewMeeting};
use crate::schema;

/// One meeting, only when it belongs to the agent.
type OwnedMeeting = dsl::Filter<
    dsl::Filter<schema::meetings::table, dsl::Eq<schema::meetings::id, Uuid>>,
    dsl::Eq<schema::meetings::agent_id, Uuid>,
>;

type OwnedMeetingTarget = <OwnedMeeting as IntoUpdateTarget>::WhereClause;

fn owned_meeting(agent: Uuid, meeting_id: Uuid) -> OwnedMeeting {
    schema::meetings::table
        .filter(schema::meetings::id.eq(meeting_id))
        .filter(schema::meetings::agent_id.eq(agent))
}

fn update_stmt(
    agent: Uuid,
    meeting_id: Uuid,
    changes: &MeetingChanges,
) -> UpdateStatement<schema::meetings::table, OwnedMeetingTarget, <&MeetingChanges as AsChangeset>::Changeset> {
    diesel::update(owned_meeting(agent, meeting_id)).set(changes)
}

fn delete_stmt(agent: Uuid, meeting_id: Uuid) -> DeleteStatement<schema::meetings::table, OwnedMeetingTarget> {
    diesel::delete(owned_meeting(agent, meeting_id))
}

/// Inclusive UTC bounds of a calendar month: first instant to last
/// representable (microsecond) instant.
pub fn month_bounds(year: i32, month: u32) -> anyhow::Result<(DateTime<Utc>, DateTime<Utc>)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .with_context(|| format!("Invalid month {}-{:02}", year, month))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .with_context(|| format!("Month {}-{:02} has no successor", year, month))?;

    let start = first.and_time(chrono::NaiveTime::MIN).and_utc();
    let end = next.and_time(chrono::NaiveTime::MIN).and_utc() - Duration::microseconds(1);

    Ok((start, end))
}

/// Insert a meeting and seed the default checklist for its type, atomically.
pub async fn create_with_checklist(
    conn: &mut AsyncPgConnection,
    new_meeting: NewMeeting,
) -> anyhow::Result<(Meeting, Vec<ChecklistItem>)> {
    let created = conn
        .transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let meeting = diesel::insert_into(crate::schema::meetings::table)
                    .values(&new_meeting)
                    .get_result::<Meeting>(conn)
                    .await?;

                let seed: Vec<NewChecklistItem> = meeting
                    .meeting_type
                    .default_checklist()
                    .iter()
                    .enumerate()
                    .map(|(i, label)| NewChecklistItem {
                        meeting_id: meeting.id,
                        label: (*label).to_string(),
                        position: i as i32,
                        completed: false,
                    })
                    .collect();

                let items = if seed.is_empty() {
                    Vec::new()
                } else {
                    diesel::insert_into(crate::schema::checklist_items::table)
                        .values(&seed)
                        .get_results::<ChecklistItem>(conn)
                        .await?
                };

                Ok((meeting, items))
            }
            .scope_boxed()
        })
        .await?;

    Ok(created)
}

pub async fn get(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    meeting_id: Uuid,
) -> anyhow::Result<Option<Meeting>> {
    use crate::schema::meetings::dsl::*;

    let meeting = meetings
        .filter(id.eq(meeting_id))
        .filter(agent_id.eq(agent))
        .first::<Meeting>(conn)
        .await
        .optional()?;

    Ok(meeting)
}

/// Meetings whose `scheduled_at` falls inside the month, bounds inclusive.
pub async fn list_by_month(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    year: i32,
    month: u32,
) -> anyhow::Result<Vec<Meeting>> {
    use crate::schema::meetings::dsl::*;

    let (start, end) = month_bounds(year, month)?;

    let items = meetings
        .filter(agent_id.eq(agent))
        .filter(scheduled_at.ge(start))
        .filter(scheduled_at.le(end))
        .order_by(scheduled_at.asc())
        .load::<Meeting>(conn)
        .await?;

    Ok(items)
}

pub async fn list_upcoming(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    from: DateTime<Utc>,
    limit: i64,
) -> anyhow::Result<Vec<Meeting>> {
    use crate::schema::meetings::dsl::*;

    let items = meetings
        .filter(agent_id.eq(agent))
        .filter(scheduled_at.ge(from))
        .filter(status.ne(MeetingStatus::Cancelled))
        .order_by(scheduled_at.asc())
        .limit(limit)
        .load::<Meeting>(conn)
        .await?;

    Ok(items)
}

pub async fn update(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    meeting_id: Uuid,
    mut changes: MeetingChanges,
) -> anyhow::Result<Option<Meeting>> {
    changes.updated_at = Some(Utc::now());

    let updated = update_stmt(agent, meeting_id, &changes)
        .get_result::<Meeting>(conn)
        .await
        .optional()?;

    Ok(updated)
}

/// Delete a meeting, returning the removed row. Checklist items and notes
/// cascade; sync logs are kept.
pub async fn delete(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    meeting_id: Uuid,
) -> anyhow::Result<Option<Meeting>> {
    let deleted = delete_stmt(agent, meeting_id)
        .get_result::<Meeting>(conn)
        .await
        .optional()?;

    Ok(deleted)
}

/// Active meetings that have never been pushed to the external calendar.
pub async fn list_missing_external_event(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
) -> anyhow::Result<Vec<Meeting>> {
    use crate::schema::meetings::dsl::*;

    let items = meetings
        .filter(agent_id.eq(agent))
        .filter(external_event_id.is_null())
        .filter(status.ne(MeetingStatus::Cancelled))
        .order_by(scheduled_at.asc())
        .load::<Meeting>(conn)
        .await?;

    Ok(items)
}

pub async fn list_linked(conn: &mut AsyncPgConnection, agent: Uuid) -> anyhow::Result<Vec<Meeting>> {
    use crate::schema::meetings::dsl::*;

    let items = meetings
        .filter(agent_id.eq(agent))
        .filter(external_event_id.is_not_null())
        .load::<Meeting>(conn)
        .await?;

    Ok(items)
}

/// A client's meetings that carry an external event.
pub async fn list_linked_for_client(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    client: Uuid,
) -> anyhow::Result<Vec<Meeting>> {
    let items = linked_for_client_query(agent, client).load::<Meeting>(conn).await?;
    Ok(items)
}

fn linked_for_client_query(agent: Uuid, client: Uuid) -> schema::meetings::BoxedQuery<'static, diesel::pg::Pg> {
    schema::meetings::table
        .filter(schema::meetings::agent_id.eq(agent))
        .filter(schema::meetings::client_id.eq(client))
        .filter(schema::meetings::external_event_id.is_not_null())
        .into_boxed()
}

pub async fn set_external_event(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    meeting_id: Uuid,
    event_id: Option<&str>,
) -> anyhow::Result<()> {
    use crate::schema::meetings::dsl::*;

    diesel::update(meetings.filter(id.eq(meeting_id)).filter(agent_id.eq(agent)))
        .set(external_event_id.eq(event_id))
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn set_sync_status(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    meeting_id: Uuid,
    state: SyncState,
) -> anyhow::Result<()> {
    use crate::schema::meetings::dsl::*;

    diesel::update(meetings.filter(id.eq(meeting_id)).filter(agent_id.eq(agent)))
        .set(sync_status.eq(state))
        .execute(conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_month_bounds_cover_whole_month() {
        let (start, end) = month_bounds(2024, 2).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(
            end,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() - Duration::microseconds(1)
        );
        // leap day is inside
        assert!(Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap() <= end);
    }

    #[test]
    fn test_month_bounds_december_rolls_year() {
        let (start, end) = month_bounds(2023, 12).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap());
        assert!(end < Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(end > Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap());
    }

    #[test]
    fn test_update_is_scoped_to_agent() {
        let agent = Uuid::new_v4();
        let meeting = Uuid::new_v4();
        let changes = MeetingChanges {
            title: Some("Renewal".to_string()),
            ..Default::default()
        };

        let sql = diesel::debug_query::<diesel::pg::Pg, _>(&update_stmt(agent, meeting, &changes)).to_string();
        assert!(sql.starts_with(r#"UPDATE "meetings" SET "title" = $1"#), "{}", sql);
        assert!(sql.contains(r#"WHERE (("meetings"."id" = $2)"#), "{}", sql);
        assert!(sql.contains(r#"AND ("meetings"."agent_id" = $3)"#), "{}", sql);
        assert!(sql.contains(&agent.to_string()));
        assert!(sql.contains(&meeting.to_string()));
    }

    #[test]
    fn test_delete_is_scoped_to_agent() {
        let agent = Uuid::new_v4();
        let meeting = Uuid::new_v4();

        let sql = diesel::debug_query::<diesel::pg::Pg, _>(&delete_stmt(agent, meeting)).to_string();
        assert!(sql.starts_with(r#"DELETE FROM "meetings""#), "{}", sql);
        assert!(sql.contains(r#"WHERE (("meetings"."id" = $1)"#), "{}", sql);
        assert!(sql.contains(r#"AND ("meetings"."agent_id" = $2)"#), "{}", sql);
        assert!(sql.contains(&agent.to_string()));
    }

    #[test]
    fn test_linked_for_client_is_scoped() {
        let agent = Uuid::new_v4();
        let client = Uuid::new_v4();

        let sql = diesel::debug_query::<diesel::pg::Pg, _>(&linked_for_client_query(agent, client)).to_string();
        assert!(sql.contains(r#""meetings"."agent_id" = $1"#), "{}", sql);
        assert!(sql.contains(r#""meetings"."client_id" = $2"#), "{}", sql);
        assert!(sql.contains(r#""meetings"."external_event_id" IS NOT NULL"#), "{}", sql);
    }

    #[test]
    fn test_month_bounds_rejects_invalid_month() {
        assert!(month_bounds(2024, 0).is_err());
        assert!(month_bounds(2024, 13).is_err());
    }
}
