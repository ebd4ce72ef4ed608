// Database models for Diesel
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared_types::{
    CalendarSettingsResponse, ClientStatus, JsonWrapper, MeetingStatus, MeetingType,
    SyncDirection, SyncOutcome, SyncState,
};
use uuid::Uuid;

/// Database representation of calendar_settings.
///
/// Token columns hold base64-encoded strings; see `calendar::tokens`.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable)]
#[diesel(table_name = crate::schema::calendar_settings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CalendarSettings {
    pub agent_id: Uuid,
    pub calendar_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub sync_enabled: bool,
    pub sync_status: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
    pub channel_id: Option<String>,
    pub channel_resource_id: Option<String>,
    pub channel_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarSettings {
    pub fn is_connected(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }
}

impl From<CalendarSettings> for CalendarSettingsResponse {
    fn from(settings: CalendarSettings) -> Self {
        CalendarSettingsResponse {
            connected: settings.is_connected(),
            calendar_id: settings.calendar_id,
            sync_enabled: settings.sync_enabled,
            sync_status: settings.sync_status,
            last_synced_at: settings.last_synced_at,
            last_sync_error: settings.last_sync_error,
            token_expires_at: settings.token_expires_at,
            channel_id: settings.channel_id,
            channel_expires_at: settings.channel_expires_at,
        }
    }
}

/// Insertable struct for new clients
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::clients)]
pub struct NewClient {
    pub agent_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: ClientStatus,
    pub notes: Option<String>,
}

/// Changeset for client updates; `None` fields are left untouched
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = crate::schema::clients)]
pub struct ClientChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<ClientStatus>,
    pub notes: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Insertable struct for new meetings
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::meetings)]
pub struct NewMeeting {
    pub agent_id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub meeting_type: MeetingType,
    pub status: MeetingStatus,
    pub scheduled_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub metadata: JsonWrapper<serde_json::Value>,
    pub sync_status: SyncState,
}

/// Changeset for meeting edits; `None` fields are left untouched
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = crate::schema::meetings)]
pub struct MeetingChanges {
    pub title: Option<String>,
    pub status: Option<MeetingStatus>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<JsonWrapper<serde_json::Value>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::checklist_items)]
pub struct NewChecklistItem {
    pub meeting_id: Uuid,
    pub label: String,
    pub position: i32,
    pub completed: bool,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::meeting_notes)]
pub struct NewMeetingNote {
    pub meeting_id: Uuid,
    pub agent_id: Uuid,
    pub body: String,
}

/// Insertable struct for sync log rows (the table is append-only)
#[derive(Debug, Clone, PartialEq, Eq, Insertable)]
#[diesel(table_name = crate::schema::sync_logs)]
pub struct NewSyncLog {
    pub agent_id: Uuid,
    pub direction: SyncDirection,
    pub outcome: SyncOutcome,
    pub meeting_id: Option<Uuid>,
    pub external_event_id: Option<String>,
    pub message: Option<String>,
}
