use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared_types::SyncState;
use uuid::Uuid;

use crate::models::CalendarSettings;

pub async fn get(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
) -> anyhow::Result<Option<CalendarSettings>> {
    use crate::schema::calendar_settings::dsl::*;

    let settings = calendar_settings
        .filter(agent_id.eq(agent))
        .select(CalendarSettings::as_select())
        .first(conn)
        .await
        .optional()?;

    Ok(settings)
}

pub async fn get_by_channel(
    conn: &mut AsyncPgConnection,
    channel: &str,
) -> anyhow::Result<Option<CalendarSettings>> {
    use crate::schema::calendar_settings::dsl::*;

    let settings = calendar_settings
        .filter(channel_id.eq(channel))
        .select(CalendarSettings::as_select())
        .first(conn)
        .await
        .optional()?;

    Ok(settings)
}

/// Settings rows of agents with sync switched on and tokens present.
pub async fn list_sync_enabled(conn: &mut AsyncPgConnection) -> anyhow::Result<Vec<CalendarSettings>> {
    use crate::schema::calendar_settings::dsl::*;

    let items = calendar_settings
        .filter(sync_enabled.eq(true))
        .filter(refresh_token.is_not_null())
        .select(CalendarSettings::as_select())
        .load(conn)
        .await?;

    Ok(items)
}

/// Store (encoded) tokens, creating the settings row on first connect.
///
/// A `None` refresh token keeps the one already stored.
pub async fn store_tokens(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    access: &str,
    refresh: Option<&str>,
    expires_at: DateTime<Utc>,
) -> anyhow::Result<CalendarSettings> {
    use crate::schema::calendar_settings::dsl::*;

    let existing = get(conn, agent).await?;

    let settings = match existing {
        Some(current) => diesel::update(calendar_settings.filter(agent_id.eq(agent)))
            .set((
                access_token.eq(Some(access)),
                refresh_token.eq(refresh.or(current.refresh_token.as_deref())),
                token_expires_at.eq(Some(expires_at)),
                updated_at.eq(Utc::now()),
            ))
            .returning(CalendarSettings::as_returning())
            .get_result(conn)
            .await?,
        None => diesel::insert_into(calendar_settings)
            .values((
                agent_id.eq(agent),
                access_token.eq(Some(access)),
                refresh_token.eq(refresh),
                token_expires_at.eq(Some(expires_at)),
            ))
            .returning(CalendarSettings::as_returning())
            .get_result(conn)
            .await?,
    };

    Ok(settings)
}

pub async fn set_sync_enabled(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    enabled: bool,
) -> anyhow::Result<Option<CalendarSettings>> {
    use crate::schema::calendar_settings::dsl::*;

    let settings = diesel::update(calendar_settings.filter(agent_id.eq(agent)))
        .set((sync_enabled.eq(enabled), updated_at.eq(Utc::now())))
        .returning(CalendarSettings::as_returning())
        .get_result(conn)
        .await
        .optional()?;

    Ok(settings)
}

/// Record the aggregate sync state. `finished` also stamps `last_synced_at`.
pub async fn set_sync_state(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    state: SyncState,
    error: Option<&str>,
    finished: bool,
) -> anyhow::Result<()> {
    use crate::schema::calendar_settings::dsl::*;

    let target = calendar_settings.filter(agent_id.eq(agent));
    let now = Utc::now();

    if finished {
        diesel::update(target)
            .set((
                sync_status.eq(state),
                last_sync_error.eq(error),
                last_synced_at.eq(Some(now)),
                updated_at.eq(now),
            ))
            .execute(conn)
            .await?;
    } else {
        diesel::update(target)
            .set((
                sync_status.eq(state),
                last_sync_error.eq(error),
                updated_at.eq(now),
            ))
            .execute(conn)
            .await?;
    }

    Ok(())
}

/// Mirror the provider's watch channel locally; `None` clears it.
pub async fn set_channel(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    channel: Option<(&str, &str, Option<DateTime<Utc>>)>,
) -> anyhow::Result<()> {
    use crate::schema::calendar_settings::dsl::*;

    let (new_id, new_resource, new_expiry) = match channel {
        Some((cid, resource, expiry)) => (Some(cid), Some(resource), expiry),
        None => (None, None, None),
    };

    diesel::update(calendar_settings.filter(agent_id.eq(agent)))
        .set((
            channel_id.eq(new_id),
            channel_resource_id.eq(new_resource),
            channel_expires_at.eq(new_expiry),
            updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;

    Ok(())
}

/// Forget tokens and channel, switch sync off.
pub async fn clear_connection(conn: &mut AsyncPgConnection, agent: Uuid) -> anyhow::Result<()> {
    use crate::schema::calendar_settings::dsl::*;

    diesel::update(calendar_settings.filter(agent_id.eq(agent)))
        .set((
            access_token.eq(None::<String>),
            refresh_token.eq(None::<String>),
            token_expires_at.eq(None::<DateTime<Utc>>),
            sync_enabled.eq(false),
            sync_status.eq(SyncState::NotSynced),
            last_sync_error.eq(None::<String>),
            channel_id.eq(None::<String>),
            channel_resource_id.eq(None::<String>),
            channel_expires_at.eq(None::<DateTime<Utc>>),
            updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;

    Ok(())
}
