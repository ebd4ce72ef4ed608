use chrono::{DateTime, Utc};
use diesel::dsl;
use diesel::prelude::*;
use diesel::query_builder::{IntoUpdateTarget, UpdateStatement};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared_types::ChecklistItem;
use uuid::Uuid;

use crate::models::NewChecklistItem;
use crate::schema::{checklist_items as items, meetings};

type OwnedMeetingIds = dsl::Select<dsl::Filter<meetings::table, dsl::Eq<meetings::agent_id, Uuid>>, meetings::id>;

type OwnedItem = dsl::Filter<
    dsl::Filter<items::table, dsl::Eq<items::id, Uuid>>,
    dsl::EqAny<items::meeting_id, OwnedMeetingIds>,
>;

type ToggleChanges = (
    dsl::Eq<items::completed, dsl::not<items::completed>>,
    dsl::Eq<items::updated_at, DateTime<Utc>>,
);

type ToggleStmt = UpdateStatement<
    items::table,
    <OwnedItem as IntoUpdateTarget>::WhereClause,
    <ToggleChanges as AsChangeset>::Changeset,
>;

fn owned_meeting_ids(agent: Uuid) -> OwnedMeetingIds {
    meetings::table
        .filter(meetings::agent_id.eq(agent))
        .select(meetings::id)
}

fn toggle_stmt(agent: Uuid, item_id: Uuid, now: DateTime<Utc>) -> ToggleStmt {
    let owned: OwnedItem = items::table
        .filter(items::id.eq(item_id))
        .filter(items::meeting_id.eq_any(owned_meeting_ids(agent)));

    diesel::update(owned).set((
        items::completed.eq(dsl::not(items::completed)),
        items::updated_at.eq(now),
    ))
}

pub async fn list_for_meeting(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    meeting: Uuid,
) -> anyhow::Result<Vec<ChecklistItem>> {
    use crate::schema::checklist_items::dsl::*;

    let found = checklist_items
        .filter(meeting_id.eq(meeting))
        .filter(meeting_id.eq_any(owned_meeting_ids(agent)))
        .order_by((position.asc(), created_at.asc()))
        .load::<ChecklistItem>(conn)
        .await?;

    Ok(found)
}

/// Append an item to a meeting's checklist. `None` when the meeting is not
/// the agent's.
pub async fn add(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    meeting: Uuid,
    label_val: &str,
) -> anyhow::Result<Option<ChecklistItem>> {
    use crate::schema::checklist_items::dsl::*;

    if crate::db::meetings::get(conn, agent, meeting).await?.is_none() {
        return Ok(None);
    }

    let last_position: Option<i32> = checklist_items
        .filter(meeting_id.eq(meeting))
        .select(diesel::dsl::max(position))
        .first(conn)
        .await?;

    let item = diesel::insert_into(checklist_items)
        .values(NewChecklistItem {
            meeting_id: meeting,
            label: label_val.to_string(),
            position: last_position.map_or(0, |p| p + 1),
            completed: false,
        })
        .get_result::<ChecklistItem>(conn)
        .await?;

    Ok(Some(item))
}

/// Flip exactly one item's `completed` flag and stamp its `updated_at`.
///
/// Ownership is checked through the parent meeting; `None` when the item
/// does not exist or belongs to another agent.
pub async fn toggle(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    item_id: Uuid,
) -> anyhow::Result<Option<ChecklistItem>> {
    let toggled = toggle_stmt(agent, item_id, Utc::now())
        .get_result::<ChecklistItem>(conn)
    .await
    .optional()?;

    Ok(toggled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_touches_only_completion() {
        let agent = Uuid::new_v4();
        let item = Uuid::new_v4();

        let sql = diesel::debug_query::<diesel::pg::Pg, _>(&toggle_stmt(agent, item, Utc::now())).to_string();
        let (set, filter) = sql.split_once(" WHERE ").unwrap();

        assert!(set.starts_with(r#"UPDATE "checklist_items" SET "completed" = NOT "#), "{}", sql);
        assert!(set.ends_with(r#", "updated_at" = $1"#), "{}", sql);
        assert_eq!(set.matches(" = ").count(), 2, "{}", sql);
        assert!(filter.contains(r#""checklist_items"."id" = $2"#), "{}", sql);
        assert!(filter.contains(r#""checklist_items"."meeting_id" IN (SELECT "meetings"."id" FROM "meetings""#), "{}", sql);
        assert!(filter.contains(r#""meetings"."agent_id" = $3"#), "{}", sql);
        assert!(sql.contains(&item.to_string()));
        assert!(sql.contains(&agent.to_string()));
    }
}
