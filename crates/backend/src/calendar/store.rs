//! Persistence seam for the sync engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{Meeting, MeetingStatus, SyncLog, SyncState};
use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::models::{CalendarSettings, MeetingChanges, NewSyncLog};

/// Everything the sync engine reads or writes locally.
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn settings(&self, agent: Uuid) -> anyhow::Result<Option<CalendarSettings>>;

    async fn settings_by_channel(&self, channel_id: &str) -> anyhow::Result<Option<CalendarSettings>>;

    /// Tokens arrive already encoded.
    async fn store_tokens(
        &self,
        agent: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<CalendarSettings>;

    async fn set_sync_enabled(&self, agent: Uuid, enabled: bool) -> anyhow::Result<Option<CalendarSettings>>;

    async fn set_sync_state(
        &self,
        agent: Uuid,
        state: SyncState,
        error: Option<String>,
        finished: bool,
    ) -> anyhow::Result<()>;

    async fn save_channel(
        &self,
        agent: Uuid,
        channel: Option<(String, String, Option<DateTime<Utc>>)>,
    ) -> anyhow::Result<()>;

    async fn clear_connection(&self, agent: Uuid) -> anyhow::Result<()>;

    async fn append_log(&self, entry: NewSyncLog) -> anyhow::Result<SyncLog>;

    async fn meetings_missing_event(&self, agent: Uuid) -> anyhow::Result<Vec<Meeting>>;

    async fn linked_meetings(&self, agent: Uuid) -> anyhow::Result<Vec<Meeting>>;

    async fn meeting(&self, agent: Uuid, meeting_id: Uuid) -> anyhow::Result<Option<Meeting>>;

    async fn link_event(&self, agent: Uuid, meeting_id: Uuid, event_id: Option<String>) -> anyhow::Result<()>;

    async fn set_meeting_sync_state(&self, agent: Uuid, meeting_id: Uuid, state: SyncState) -> anyhow::Result<()>;

    /// Overwrite a meeting's title, window and cancellation from the external side.
    async fn apply_external(
        &self,
        agent: Uuid,
        meeting_id: Uuid,
        title: Option<String>,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        cancelled: bool,
    ) -> anyhow::Result<Option<Meeting>>;
}

/// Postgres-backed store; each call checks out its own connection.
#[derive(Clone)]
pub struct PgSyncStore {
    pool: DbPool,
}

impl PgSyncStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStore for PgSyncStore {
    async fn settings(&self, agent: Uuid) -> anyhow::Result<Option<CalendarSettings>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::calendar_settings::get(&mut conn, agent).await
    }

    async fn settings_by_channel(&self, channel_id: &str) -> anyhow::Result<Option<CalendarSettings>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::calendar_settings::get_by_channel(&mut conn, channel_id).await
    }

    async fn store_tokens(
        &self,
        agent: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<CalendarSettings> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::calendar_settings::store_tokens(&mut conn, agent, access_token, refresh_token, expires_at).await
    }

    async fn set_sync_enabled(&self, agent: Uuid, enabled: bool) -> anyhow::Result<Option<CalendarSettings>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::calendar_settings::set_sync_enabled(&mut conn, agent, enabled).await
    }

    async fn set_sync_state(
        &self,
        agent: Uuid,
        state: SyncState,
        error: Option<String>,
        finished: bool,
    ) -> anyhow::Result<()> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::calendar_settings::set_sync_state(&mut conn, agent, state, error.as_deref(), finished).await
    }

    async fn save_channel(
        &self,
        agent: Uuid,
        channel: Option<(String, String, Option<DateTime<Utc>>)>,
    ) -> anyhow::Result<()> {
        let mut conn = db::get_conn(&self.pool).await?;
        let borrowed = channel
            .as_ref()
            .map(|(id, resource, expiry)| (id.as_str(), resource.as_str(), *expiry));
        db::calendar_settings::set_channel(&mut conn, agent, borrowed).await
    }

    async fn clear_connection(&self, agent: Uuid) -> anyhow::Result<()> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::calendar_settings::clear_connection(&mut conn, agent).await
    }

    async fn append_log(&self, entry: NewSyncLog) -> anyhow::Result<SyncLog> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::sync_logs::insert(&mut conn, &entry).await
    }

    async fn meetings_missing_event(&self, agent: Uuid) -> anyhow::Result<Vec<Meeting>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::meetings::list_missing_external_event(&mut conn, agent).await
    }

    async fn linked_meetings(&self, agent: Uuid) -> anyhow::Result<Vec<Meeting>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::meetings::list_linked(&mut conn, agent).await
    }

    async fn meeting(&self, agent: Uuid, meeting_id: Uuid) -> anyhow::Result<Option<Meeting>> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::meetings::get(&mut conn, agent, meeting_id).await
    }

    async fn link_event(&self, agent: Uuid, meeting_id: Uuid, event_id: Option<String>) -> anyhow::Result<()> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::meetings::set_external_event(&mut conn, agent, meeting_id, event_id.as_deref()).await
    }

    async fn set_meeting_sync_state(&self, agent: Uuid, meeting_id: Uuid, state: SyncState) -> anyhow::Result<()> {
        let mut conn = db::get_conn(&self.pool).await?;
        db::meetings::set_sync_status(&mut conn, agent, meeting_id, state).await
    }

    async fn apply_external(
        &self,
        agent: Uuid,
        meeting_id: Uuid,
        title: Option<String>,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        cancelled: bool,
    ) -> anyhow::Result<Option<Meeting>> {
        let mut conn = db::get_conn(&self.pool).await?;
        let Some(current) = db::meetings::get(&mut conn, agent, meeting_id).await? else {
            return Ok(None);
        };

        let status = if cancelled {
            Some(MeetingStatus::Cancelled)
        } else if current.status == MeetingStatus::Cancelled {
            Some(MeetingStatus::Scheduled)
        } else {
            None
        };

        let changes = MeetingChanges {
            title,
            status,
            scheduled_at: window.map(|(start, _)| start),
            ends_at: window.map(|(_, end)| end),
            ..Default::default()
        };

        db::meetings::update(&mut conn, agent, meeting_id, changes).await
    }
}
