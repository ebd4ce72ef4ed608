//! External calendar provider interface.
//!
//! The sync engine only talks to the provider through this trait, which
//! keeps the reconciliation logic independent of Google's SDK types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{Meeting, MeetingStatus};
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by a calendar provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Token rejected or missing
    #[error("Provider rejected credentials: {0}")]
    Unauthorized(String),

    /// Event or channel does not exist (or was already deleted)
    #[error("Provider resource not found: {0}")]
    NotFound(String),

    /// Provider answered with an error status
    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Request never got a usable answer
    #[error("Provider transport error: {0}")]
    Transport(String),
}

/// An event as seen on the external calendar
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalEvent {
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub updated: Option<DateTime<Utc>>,
    /// Local meeting id carried in the event's private properties
    pub meeting_id: Option<Uuid>,
}

/// What we send when creating or overwriting an external event
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub meeting_id: Uuid,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cancelled: bool,
}

impl From<&Meeting> for EventDraft {
    fn from(meeting: &Meeting) -> Self {
        EventDraft {
            meeting_id: meeting.id,
            summary: meeting.title.clone(),
            description: meeting.description.clone(),
            location: meeting.location.clone(),
            start: meeting.scheduled_at,
            end: meeting.ends_at,
            cancelled: meeting.status == MeetingStatus::Cancelled,
        }
    }
}

/// OAuth token grant returned by code exchange or refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Only present on the initial exchange (and occasionally on refresh)
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// A push-notification channel registered with the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchChannel {
    pub id: String,
    pub resource_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Half-open time range used when listing events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Operations the sync engine needs from an external calendar.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// URL the agent is sent to in order to grant calendar access.
    fn authorization_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError>;

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;

    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<ExternalEvent>, ProviderError>;

    async fn get_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<ExternalEvent, ProviderError>;

    async fn insert_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        draft: &EventDraft,
    ) -> Result<ExternalEvent, ProviderError>;

    async fn update_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        draft: &EventDraft,
    ) -> Result<ExternalEvent, ProviderError>;

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), ProviderError>;

    async fn watch_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        channel_id: &str,
        address: &str,
    ) -> Result<WatchChannel, ProviderError>;

    async fn stop_channel(
        &self,
        access_token: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<(), ProviderError>;
}
