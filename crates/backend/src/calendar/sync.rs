//! Two-way reconciliation between local meetings and the external calendar.
//!
//! Every attempt to move one item across the boundary writes exactly one
//! sync log row. The aggregate status of a run is derived from the
//! per-item outcomes of both passes, never set ahead of them.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use shared_types::{
    ConflictSide, Meeting, MeetingStatus, PassReport, SyncDirection, SyncLog, SyncOutcome,
    SyncState, SyncSummary,
};
use thiserror::Error;
use uuid::Uuid;

use super::provider::{CalendarProvider, EventDraft, ExternalEvent, ProviderError, TimeWindow, WatchChannel};
use super::store::SyncStore;
use super::tokens;
use crate::models::{CalendarSettings, NewSyncLog};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Calendar is not connected")]
    NotConnected,

    #[error("Meeting not found")]
    MeetingNotFound,

    #[error("Meeting has no linked calendar event")]
    NotLinked,

    #[error("WEBHOOK_ADDRESS is not configured")]
    MissingWebhookAddress,

    #[error("Refreshed token does not extend the current expiry")]
    StaleGrant,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Tuning for the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Days before now included in a pull
    pub pull_past_days: i64,
    /// Days after now included in a pull
    pub pull_future_days: i64,
    /// Public URL the provider posts channel notifications to
    pub webhook_address: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pull_past_days: 30,
            pull_future_days: 90,
            webhook_address: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let pull_past_days = std::env::var("CALENDAR_PULL_PAST_DAYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.pull_past_days);

        let pull_future_days = std::env::var("CALENDAR_PULL_FUTURE_DAYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.pull_future_days);

        Self {
            pull_past_days,
            pull_future_days,
            webhook_address: std::env::var("WEBHOOK_ADDRESS").ok().filter(|s| !s.is_empty()),
        }
    }
}

/// Any failure wins over conflicts; conflicts win over success.
pub fn derive_status(pulled: &PassReport, pushed: &PassReport) -> SyncState {
    if pulled.failed + pushed.failed > 0 {
        SyncState::SyncFailed
    } else if pulled.conflicts + pushed.conflicts > 0 {
        SyncState::SyncConflict
    } else {
        SyncState::Synced
    }
}

fn failure_summary(pulled: &PassReport, pushed: &PassReport) -> Option<String> {
    if pulled.failed + pushed.failed == 0 {
        return None;
    }
    Some(format!(
        "{} of {} pulled and {} of {} pushed items failed",
        pulled.failed,
        pulled.attempts(),
        pushed.failed,
        pushed.attempts()
    ))
}

/// Describe how a linked meeting and its external event disagree.
pub fn detect_conflict(meeting: &Meeting, event: &ExternalEvent) -> Option<String> {
    let mut differences = Vec::new();

    if event.cancelled != (meeting.status == MeetingStatus::Cancelled) {
        differences.push("cancellation");
    }
    if !event.cancelled {
        if event.start.is_some_and(|start| start != meeting.scheduled_at) {
            differences.push("start");
        }
        if event.end.is_some_and(|end| end != meeting.ends_at) {
            differences.push("end");
        }
        if event.summary.as_deref().is_some_and(|title| title != meeting.title) {
            differences.push("title");
        }
    }

    if differences.is_empty() {
        None
    } else {
        Some(format!("External event differs in {}", differences.join(", ")))
    }
}

fn log_entry(
    agent: Uuid,
    direction: SyncDirection,
    outcome: SyncOutcome,
    meeting_id: Option<Uuid>,
    external_event_id: Option<String>,
    message: Option<String>,
) -> NewSyncLog {
    NewSyncLog {
        agent_id: agent,
        direction,
        outcome,
        meeting_id,
        external_event_id,
        message,
    }
}

pub struct CalendarSync<P, S> {
    provider: P,
    store: S,
    config: SyncConfig,
}

impl<P: CalendarProvider, S: SyncStore> CalendarSync<P, S> {
    pub fn new(provider: P, store: S, config: SyncConfig) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    pub fn authorization_url(&self, state: &str) -> String {
        self.provider.authorization_url(state)
    }

    /// Exchange an OAuth code, store the encoded tokens and switch sync on.
    pub async fn connect(&self, agent: Uuid, code: &str) -> Result<CalendarSettings, SyncError> {
        let grant = self.provider.exchange_code(code).await?;
        let expires_at = tokens::expiry_from(Utc::now(), grant.expires_in);

        let settings = self
            .store
            .store_tokens(
                agent,
                &tokens::encode(&grant.access_token),
                grant.refresh_token.as_deref().map(tokens::encode).as_deref(),
                expires_at,
            )
            .await?;

        if settings.refresh_token.is_none() {
            tracing::warn!("Calendar connected for agent {} without a refresh token", agent);
        }

        let settings = self
            .store
            .set_sync_enabled(agent, true)
            .await?
            .unwrap_or(settings);

        tracing::info!("Calendar connected for agent {}", agent);
        Ok(settings)
    }

    /// Stop the watch channel (best effort), forget tokens and switch sync off.
    pub async fn disconnect(&self, agent: Uuid) -> Result<(), SyncError> {
        if let Some(settings) = self.store.settings(agent).await? {
            if settings.channel_id.is_some() && settings.is_connected() {
                if let Err(e) = self.stop_current_channel(&settings).await {
                    tracing::warn!("Failed to stop channel while disconnecting agent {}: {}", agent, e);
                }
            }
        }

        self.store.clear_connection(agent).await?;
        tracing::info!("Calendar disconnected for agent {}", agent);
        Ok(())
    }

    pub async fn set_enabled(&self, agent: Uuid, enabled: bool) -> Result<CalendarSettings, SyncError> {
        self.store
            .set_sync_enabled(agent, enabled)
            .await?
            .ok_or(SyncError::NotConnected)
    }

    async fn connected_settings(&self, agent: Uuid) -> Result<CalendarSettings, SyncError> {
        match self.store.settings(agent).await? {
            Some(settings) if settings.is_connected() => Ok(settings),
            _ => Err(SyncError::NotConnected),
        }
    }

    /// A usable access token, refreshing it first when close to expiry.
    pub async fn access_token(&self, settings: &CalendarSettings) -> Result<String, SyncError> {
        let now = Utc::now();
        let stored = settings.access_token.as_deref().ok_or(SyncError::NotConnected)?;

        if !tokens::needs_refresh(settings.token_expires_at, now) {
            return Ok(tokens::decode(stored)?);
        }

        let refresh = settings.refresh_token.as_deref().ok_or(SyncError::NotConnected)?;
        let grant = self
            .provider
            .refresh_access_token(&tokens::decode(refresh)?)
            .await?;

        let expires_at = tokens::expiry_from(now, grant.expires_in);
        if settings.token_expires_at.is_some_and(|previous| expires_at <= previous) {
            return Err(SyncError::StaleGrant);
        }

        self.store
            .store_tokens(
                settings.agent_id,
                &tokens::encode(&grant.access_token),
                grant.refresh_token.as_deref().map(tokens::encode).as_deref(),
                expires_at,
            )
            .await?;

        tracing::debug!("Refreshed access token for agent {} (expires {})", settings.agent_id, expires_at);
        Ok(grant.access_token)
    }

    /// Fetch a token for an attempt; a failure is itself logged as a failed attempt.
    async fn token_for_attempt(
        &self,
        settings: &CalendarSettings,
        direction: SyncDirection,
        meeting_id: Option<Uuid>,
    ) -> Result<String, SyncError> {
        match self.access_token(settings).await {
            Ok(token) => Ok(token),
            Err(e) => {
                tracing::warn!("Token unavailable for agent {}: {}", settings.agent_id, e);
                self.store
                    .append_log(log_entry(
                        settings.agent_id,
                        direction,
                        SyncOutcome::Failed,
                        meeting_id,
                        None,
                        Some(format!("Token refresh failed: {}", e)),
                    ))
                    .await?;
                Err(e)
            }
        }
    }

    /// An attempt whose log row cannot be written counts as failed.
    async fn record(&self, report: &mut PassReport, entry: NewSyncLog) {
        let outcome = entry.outcome;
        match self.store.append_log(entry).await {
            Ok(_) => report.record(outcome),
            Err(e) => {
                tracing::error!("Failed to write sync log: {:?}", e);
                report.record(SyncOutcome::Failed);
            }
        }
    }

    /// Pull and push concurrently, then derive and store the aggregate status.
    pub async fn perform_full_sync(&self, agent: Uuid) -> Result<SyncSummary, SyncError> {
        let settings = self.connected_settings(agent).await?;
        self.store.set_sync_state(agent, SyncState::Syncing, None, false).await?;

        let token = match self
            .token_for_attempt(&settings, SyncDirection::FromExternal, None)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                self.store
                    .set_sync_state(agent, SyncState::SyncFailed, Some(e.to_string()), true)
                    .await?;
                return Err(e);
            }
        };

        let calendar_id = settings.calendar_id.as_str();
        let (pulled, pushed) = tokio::join!(
            self.pull_pass(agent, &token, calendar_id),
            self.push_pass(agent, &token, calendar_id)
        );

        let status = derive_status(&pulled, &pushed);
        self.store
            .set_sync_state(agent, status, failure_summary(&pulled, &pushed), true)
            .await?;

        tracing::info!(
            "Full sync for agent {} finished as {} (pulled {:?}, pushed {:?})",
            agent,
            status,
            pulled,
            pushed
        );

        Ok(SyncSummary {
            status,
            pulled,
            pushed,
            completed_at: Utc::now(),
        })
    }

    /// Compare external events against linked meetings. One log row per event.
    pub async fn pull_pass(&self, agent: Uuid, token: &str, calendar_id: &str) -> PassReport {
        let mut report = PassReport::default();
        let now = Utc::now();
        let window = TimeWindow {
            start: now - Duration::days(self.config.pull_past_days),
            end: now + Duration::days(self.config.pull_future_days),
        };

        let events = match self.provider.list_events(token, calendar_id, window).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Failed to list events for agent {}: {}", agent, e);
                let entry = log_entry(
                    agent,
                    SyncDirection::FromExternal,
                    SyncOutcome::Failed,
                    None,
                    None,
                    Some(format!("Failed to list events: {}", e)),
                );
                self.record(&mut report, entry).await;
                return report;
            }
        };

        let linked = match self.store.linked_meetings(agent).await {
            Ok(meetings) => meetings,
            Err(e) => {
                tracing::error!("Failed to load linked meetings for agent {}: {:?}", agent, e);
                let entry = log_entry(
                    agent,
                    SyncDirection::FromExternal,
                    SyncOutcome::Failed,
                    None,
                    None,
                    Some(format!("Failed to load linked meetings: {}", e)),
                );
                self.record(&mut report, entry).await;
                return report;
            }
        };

        let by_event: HashMap<&str, &Meeting> = linked
            .iter()
            .filter_map(|m| m.external_event_id.as_deref().map(|id| (id, m)))
            .collect();
        let by_id: HashMap<Uuid, &Meeting> = linked.iter().map(|m| (m.id, m)).collect();

        for event in &events {
            let meeting = by_event
                .get(event.id.as_str())
                .or_else(|| event.meeting_id.and_then(|id| by_id.get(&id)))
                .copied();

            let entry = match meeting {
                Some(meeting) => self.reconcile_event(agent, meeting, event).await,
                None => log_entry(
                    agent,
                    SyncDirection::FromExternal,
                    SyncOutcome::Synced,
                    None,
                    Some(event.id.clone()),
                    None,
                ),
            };
            self.record(&mut report, entry).await;
        }

        tracing::debug!("Pull pass for agent {}: {:?}", agent, report);
        report
    }

    async fn reconcile_event(&self, agent: Uuid, meeting: &Meeting, event: &ExternalEvent) -> NewSyncLog {
        let (state, outcome, message) = match detect_conflict(meeting, event) {
            Some(reason) => (SyncState::SyncConflict, SyncOutcome::Conflict, Some(reason)),
            None => (SyncState::Synced, SyncOutcome::Synced, None),
        };

        let (outcome, message) = match self.store.set_meeting_sync_state(agent, meeting.id, state).await {
            Ok(()) => (outcome, message),
            Err(e) => (
                SyncOutcome::Failed,
                Some(format!("Failed to update meeting sync status: {}", e)),
            ),
        };

        log_entry(
            agent,
            SyncDirection::FromExternal,
            outcome,
            Some(meeting.id),
            Some(event.id.clone()),
            message,
        )
    }

    /// Insert every unlinked active meeting. One log row per meeting.
    pub async fn push_pass(&self, agent: Uuid, token: &str, calendar_id: &str) -> PassReport {
        let mut report = PassReport::default();

        let meetings = match self.store.meetings_missing_event(agent).await {
            Ok(meetings) => meetings,
            Err(e) => {
                tracing::error!("Failed to load unsynced meetings for agent {}: {:?}", agent, e);
                let entry = log_entry(
                    agent,
                    SyncDirection::ToExternal,
                    SyncOutcome::Failed,
                    None,
                    None,
                    Some(format!("Failed to load meetings: {}", e)),
                );
                self.record(&mut report, entry).await;
                return report;
            }
        };

        for meeting in &meetings {
            let entry = self.push_one(agent, token, calendar_id, meeting).await;
            self.record(&mut report, entry).await;
        }

        tracing::debug!("Push pass for agent {}: {:?}", agent, report);
        report
    }

    /// Create or overwrite the meeting's external event and describe the attempt.
    async fn push_one(&self, agent: Uuid, token: &str, calendar_id: &str, meeting: &Meeting) -> NewSyncLog {
        if let Err(e) = self
            .store
            .set_meeting_sync_state(agent, meeting.id, SyncState::Syncing)
            .await
        {
            tracing::warn!("Failed to mark meeting {} as syncing: {:?}", meeting.id, e);
        }

        let draft = EventDraft::from(meeting);
        let result = match meeting.external_event_id.as_deref() {
            Some(event_id) => {
                self.provider
                    .update_event(token, calendar_id, event_id, &draft)
                    .await
            }
            None => self.provider.insert_event(token, calendar_id, &draft).await,
        };

        let failed = |event_id: Option<String>, message: String| {
            log_entry(
                agent,
                SyncDirection::ToExternal,
                SyncOutcome::Failed,
                Some(meeting.id),
                event_id,
                Some(message),
            )
        };

        let event = match result {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Failed to push meeting {}: {}", meeting.id, e);
                if let Err(e) = self
                    .store
                    .set_meeting_sync_state(agent, meeting.id, SyncState::SyncFailed)
                    .await
                {
                    tracing::warn!("Failed to mark meeting {} as failed: {:?}", meeting.id, e);
                }
                return failed(meeting.external_event_id.clone(), e.to_string());
            }
        };

        if meeting.external_event_id.as_deref() != Some(event.id.as_str()) {
            if let Err(e) = self
                .store
                .link_event(agent, meeting.id, Some(event.id.clone()))
                .await
            {
                return failed(Some(event.id), format!("Failed to store event id: {}", e));
            }
        }

        if let Err(e) = self
            .store
            .set_meeting_sync_state(agent, meeting.id, SyncState::Synced)
            .await
        {
            return failed(Some(event.id), format!("Failed to update meeting sync status: {}", e));
        }

        log_entry(
            agent,
            SyncDirection::ToExternal,
            SyncOutcome::Synced,
            Some(meeting.id),
            Some(event.id),
            None,
        )
    }

    /// Push one meeting after a local change. `None` when sync is off or
    /// there is nothing to push.
    pub async fn push_meeting(&self, agent: Uuid, meeting_id: Uuid) -> Result<Option<SyncLog>, SyncError> {
        let settings = match self.store.settings(agent).await? {
            Some(settings) if settings.is_connected() && settings.sync_enabled => settings,
            _ => return Ok(None),
        };

        let meeting = self
            .store
            .meeting(agent, meeting_id)
            .await?
            .ok_or(SyncError::MeetingNotFound)?;

        if meeting.external_event_id.is_none() && meeting.status == MeetingStatus::Cancelled {
            return Ok(None);
        }

        let token = self
            .token_for_attempt(&settings, SyncDirection::ToExternal, Some(meeting.id))
            .await?;
        let entry = self.push_one(agent, &token, &settings.calendar_id, &meeting).await;

        Ok(Some(self.store.append_log(entry).await?))
    }

    /// Delete the external event of a meeting that was removed locally.
    pub async fn remove_meeting_event(&self, agent: Uuid, meeting: &Meeting) -> Result<Option<SyncLog>, SyncError> {
        let Some(event_id) = meeting.external_event_id.clone() else {
            return Ok(None);
        };
        let settings = match self.store.settings(agent).await? {
            Some(settings) if settings.is_connected() && settings.sync_enabled => settings,
            _ => return Ok(None),
        };

        let token = self
            .token_for_attempt(&settings, SyncDirection::ToExternal, Some(meeting.id))
            .await?;

        let (outcome, message) = match self
            .provider
            .delete_event(&token, &settings.calendar_id, &event_id)
            .await
        {
            Ok(()) => (SyncOutcome::Synced, Some("External event deleted".to_string())),
            Err(ProviderError::NotFound(_)) => {
                (SyncOutcome::Synced, Some("External event already removed".to_string()))
            }
            Err(e) => {
                tracing::warn!("Failed to delete event {} for meeting {}: {}", event_id, meeting.id, e);
                (SyncOutcome::Failed, Some(e.to_string()))
            }
        };

        let entry = log_entry(
            agent,
            SyncDirection::ToExternal,
            outcome,
            Some(meeting.id),
            Some(event_id),
            message,
        );
        Ok(Some(self.store.append_log(entry).await?))
    }

    /// Overwrite one side of a conflicting meeting/event pair with the other.
    pub async fn resolve_conflict(
        &self,
        agent: Uuid,
        meeting_id: Uuid,
        side: ConflictSide,
    ) -> Result<Meeting, SyncError> {
        let settings = self.connected_settings(agent).await?;
        let meeting = self
            .store
            .meeting(agent, meeting_id)
            .await?
            .ok_or(SyncError::MeetingNotFound)?;
        let event_id = meeting.external_event_id.clone().ok_or(SyncError::NotLinked)?;

        let direction = match side {
            ConflictSide::Local => SyncDirection::ToExternal,
            ConflictSide::External => SyncDirection::FromExternal,
        };
        let token = self
            .token_for_attempt(&settings, direction, Some(meeting.id))
            .await?;

        let mut ignored = Vec::new();
        let applied = match side {
            ConflictSide::Local => self
                .provider
                .update_event(&token, &settings.calendar_id, &event_id, &EventDraft::from(&meeting))
                .await
                .map(|_| Some(meeting.clone()))
                .map_err(SyncError::from),
            ConflictSide::External => match self
                .provider
                .get_event(&token, &settings.calendar_id, &event_id)
                .await
            {
                Ok(event) => {
                    let title = event
                        .summary
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty());
                    if title.is_none() {
                        ignored.push("blank title");
                    }
                    let window = event.start.zip(event.end).filter(|(start, end)| end > start);
                    if window.is_none() {
                        ignored.push("invalid time window");
                    }
                    self.store
                        .apply_external(agent, meeting.id, title, window, event.cancelled)
                        .await
                        .map_err(SyncError::from)
                }
                Err(e) => Err(SyncError::from(e)),
            },
        };

        match applied {
            Ok(Some(_)) => {
                self.store
                    .set_meeting_sync_state(agent, meeting.id, SyncState::Synced)
                    .await?;
                self.store
                    .append_log(log_entry(
                        agent,
                        direction,
                        SyncOutcome::Synced,
                        Some(meeting.id),
                        Some(event_id),
                        Some(if ignored.is_empty() {
                            format!("Conflict resolved keeping {} version", side)
                        } else {
                            format!(
                                "Conflict resolved keeping {} version; ignored external {}",
                                side,
                                ignored.join(" and ")
                            )
                        }),
                    ))
                    .await?;
                tracing::info!("Resolved conflict on meeting {} keeping {}", meeting.id, side);

                self.store
                    .meeting(agent, meeting.id)
                    .await?
                    .ok_or(SyncError::MeetingNotFound)
            }
            Ok(None) => Err(SyncError::MeetingNotFound),
            Err(e) => {
                self.store
                    .append_log(log_entry(
                        agent,
                        direction,
                        SyncOutcome::Failed,
                        Some(meeting.id),
                        Some(event_id),
                        Some(format!("Conflict resolution failed: {}", e)),
                    ))
                    .await?;
                Err(e)
            }
        }
    }

    /// Register a push channel for the agent's calendar.
    pub async fn create_channel(&self, agent: Uuid) -> Result<WatchChannel, SyncError> {
        let address = self
            .config
            .webhook_address
            .as_deref()
            .ok_or(SyncError::MissingWebhookAddress)?;
        let settings = self.connected_settings(agent).await?;
        let token = self.access_token(&settings).await?;

        let channel_id = Uuid::new_v4().to_string();
        let channel = self
            .provider
            .watch_events(&token, &settings.calendar_id, &channel_id, address)
            .await?;

        self.store
            .save_channel(
                agent,
                Some((channel.id.clone(), channel.resource_id.clone(), channel.expires_at)),
            )
            .await?;

        tracing::info!(
            "Created watch channel {} for agent {} (expires {:?})",
            channel.id,
            agent,
            channel.expires_at
        );
        Ok(channel)
    }

    /// Stop the current channel, if any, and create a fresh one.
    pub async fn renew_channel(&self, agent: Uuid) -> Result<WatchChannel, SyncError> {
        let settings = self.connected_settings(agent).await?;
        if settings.channel_id.is_some() {
            if let Err(e) = self.stop_current_channel(&settings).await {
                tracing::warn!("Failed to stop old channel for agent {}: {}", agent, e);
            }
        }
        self.create_channel(agent).await
    }

    /// Returns whether a channel existed.
    pub async fn delete_channel(&self, agent: Uuid) -> Result<bool, SyncError> {
        let settings = self.connected_settings(agent).await?;
        if settings.channel_id.is_none() {
            return Ok(false);
        }

        self.stop_current_channel(&settings).await?;
        self.store.save_channel(agent, None).await?;
        tracing::info!("Deleted watch channel for agent {}", agent);
        Ok(true)
    }

    async fn stop_current_channel(&self, settings: &CalendarSettings) -> Result<(), SyncError> {
        let (Some(channel_id), Some(resource_id)) = (
            settings.channel_id.as_deref(),
            settings.channel_resource_id.as_deref(),
        ) else {
            return Ok(());
        };

        let token = self.access_token(settings).await?;
        match self.provider.stop_channel(&token, channel_id, resource_id).await {
            Ok(()) | Err(ProviderError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// React to a provider push notification. Returns the pull report when
    /// work was done.
    pub async fn handle_notification(
        &self,
        channel_id: &str,
        resource_state: &str,
    ) -> Result<Option<PassReport>, SyncError> {
        if resource_state == "sync" {
            tracing::debug!("Channel {} handshake acknowledged", channel_id);
            return Ok(None);
        }

        let settings = match self.store.settings_by_channel(channel_id).await? {
            Some(settings) if settings.sync_enabled && settings.is_connected() => settings,
            Some(_) => return Ok(None),
            None => {
                tracing::debug!("Ignoring notification for unknown channel {}", channel_id);
                return Ok(None);
            }
        };
        let agent = settings.agent_id;

        let token = self
            .token_for_attempt(&settings, SyncDirection::FromExternal, None)
            .await?;
        let report = self.pull_pass(agent, &token, &settings.calendar_id).await;

        let empty = PassReport::default();
        let pulled = derive_status(&report, &empty);
        // Failed pushes are only retried by a full sync
        let (status, error) = if pulled != SyncState::SyncFailed && settings.sync_status == SyncState::SyncFailed {
            (SyncState::SyncFailed, settings.last_sync_error.clone())
        } else {
            (pulled, failure_summary(&report, &empty))
        };
        self.store.set_sync_state(agent, status, error, true).await?;

        tracing::info!("Notification on channel {} pulled {:?}", channel_id, report);
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::provider::TokenGrant;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use shared_types::{JsonWrapper, MeetingType};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // In-memory store
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MemoryState {
        settings: HashMap<Uuid, CalendarSettings>,
        meetings: HashMap<Uuid, Meeting>,
        logs: Vec<SyncLog>,
        fail_meeting_listing: bool,
        fail_log_writes: bool,
    }

    #[derive(Default)]
    struct MemoryStore {
        state: Mutex<MemoryState>,
    }

    impl MemoryStore {
        fn logs(&self) -> Vec<SyncLog> {
            self.state.lock().unwrap().logs.clone()
        }

        fn settings_of(&self, agent: Uuid) -> CalendarSettings {
            self.state.lock().unwrap().settings[&agent].clone()
        }

        fn meeting_of(&self, id: Uuid) -> Meeting {
            self.state.lock().unwrap().meetings[&id].clone()
        }

        fn insert_meeting(&self, meeting: Meeting) {
            self.state.lock().unwrap().meetings.insert(meeting.id, meeting);
        }
    }

    #[async_trait]
    impl SyncStore for MemoryStore {
        async fn settings(&self, agent: Uuid) -> anyhow::Result<Option<CalendarSettings>> {
            Ok(self.state.lock().unwrap().settings.get(&agent).cloned())
        }

        async fn settings_by_channel(&self, channel_id: &str) -> anyhow::Result<Option<CalendarSettings>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .settings
                .values()
                .find(|s| s.channel_id.as_deref() == Some(channel_id))
                .cloned())
        }

        async fn store_tokens(
            &self,
            agent: Uuid,
            access_token: &str,
            refresh_token: Option<&str>,
            expires_at: DateTime<Utc>,
        ) -> anyhow::Result<CalendarSettings> {
            let mut state = self.state.lock().unwrap();
            let entry = state
                .settings
                .entry(agent)
                .or_insert_with(|| settings(agent, None, None, None));
            entry.access_token = Some(access_token.to_string());
            if let Some(refresh) = refresh_token {
                entry.refresh_token = Some(refresh.to_string());
            }
            entry.token_expires_at = Some(expires_at);
            Ok(entry.clone())
        }

        async fn set_sync_enabled(&self, agent: Uuid, enabled: bool) -> anyhow::Result<Option<CalendarSettings>> {
            let mut state = self.state.lock().unwrap();
            Ok(state.settings.get_mut(&agent).map(|s| {
                s.sync_enabled = enabled;
                s.clone()
            }))
        }

        async fn set_sync_state(
            &self,
            agent: Uuid,
            state_value: SyncState,
            error: Option<String>,
            finished: bool,
        ) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(s) = state.settings.get_mut(&agent) {
                s.sync_status = state_value;
                s.last_sync_error = error;
                if finished {
                    s.last_synced_at = Some(Utc::now());
                }
            }
            Ok(())
        }

        async fn save_channel(
            &self,
            agent: Uuid,
            channel: Option<(String, String, Option<DateTime<Utc>>)>,
        ) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(s) = state.settings.get_mut(&agent) {
                match channel {
                    Some((id, resource, expiry)) => {
                        s.channel_id = Some(id);
                        s.channel_resource_id = Some(resource);
                        s.channel_expires_at = expiry;
                    }
                    None => {
                        s.channel_id = None;
                        s.channel_resource_id = None;
                        s.channel_expires_at = None;
                    }
                }
            }
            Ok(())
        }

        async fn clear_connection(&self, agent: Uuid) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(s) = state.settings.get_mut(&agent) {
                *s = settings(agent, None, None, None);
                s.sync_enabled = false;
            }
            Ok(())
        }

        async fn append_log(&self, entry: NewSyncLog) -> anyhow::Result<SyncLog> {
            let log = SyncLog {
                id: Uuid::new_v4(),
                agent_id: entry.agent_id,
                direction: entry.direction,
                outcome: entry.outcome,
                meeting_id: entry.meeting_id,
                external_event_id: entry.external_event_id,
                message: entry.message,
                created_at: Utc::now(),
            };
            let mut state = self.state.lock().unwrap();
            if state.fail_log_writes {
                anyhow::bail!("disk full");
            }
            state.logs.push(log.clone());
            Ok(log)
        }

        async fn meetings_missing_event(&self, agent: Uuid) -> anyhow::Result<Vec<Meeting>> {
            let state = self.state.lock().unwrap();
            if state.fail_meeting_listing {
                anyhow::bail!("connection reset");
            }
            let mut items: Vec<Meeting> = state
                .meetings
                .values()
                .filter(|m| m.agent_id == agent)
                .filter(|m| m.external_event_id.is_none())
                .filter(|m| m.status != MeetingStatus::Cancelled)
                .cloned()
                .collect();
            items.sort_by_key(|m| m.scheduled_at);
            Ok(items)
        }

        async fn linked_meetings(&self, agent: Uuid) -> anyhow::Result<Vec<Meeting>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .meetings
                .values()
                .filter(|m| m.agent_id == agent && m.external_event_id.is_some())
                .cloned()
                .collect())
        }

        async fn meeting(&self, agent: Uuid, meeting_id: Uuid) -> anyhow::Result<Option<Meeting>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .meetings
                .get(&meeting_id)
                .filter(|m| m.agent_id == agent)
                .cloned())
        }

        async fn link_event(&self, agent: Uuid, meeting_id: Uuid, event_id: Option<String>) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(m) = state.meetings.get_mut(&meeting_id).filter(|m| m.agent_id == agent) {
                m.external_event_id = event_id;
            }
            Ok(())
        }

        async fn set_meeting_sync_state(&self, agent: Uuid, meeting_id: Uuid, state_value: SyncState) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(m) = state.meetings.get_mut(&meeting_id).filter(|m| m.agent_id == agent) {
                m.sync_status = state_value;
            }
            Ok(())
        }

        async fn apply_external(
            &self,
            agent: Uuid,
            meeting_id: Uuid,
            title: Option<String>,
            window: Option<(DateTime<Utc>, DateTime<Utc>)>,
            cancelled: bool,
        ) -> anyhow::Result<Option<Meeting>> {
            let mut state = self.state.lock().unwrap();
            let Some(m) = state.meetings.get_mut(&meeting_id).filter(|m| m.agent_id == agent) else {
                return Ok(None);
            };
            if let Some(title) = title {
                m.title = title;
            }
            if let Some((start, end)) = window {
                m.scheduled_at = start;
                m.ends_at = end;
            }
            if cancelled {
                m.status = MeetingStatus::Cancelled;
            } else if m.status == MeetingStatus::Cancelled {
                m.status = MeetingStatus::Scheduled;
            }
            Ok(Some(m.clone()))
        }
    }

    // ------------------------------------------------------------------
    // Scripted provider
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct FakeProvider {
        events: Mutex<Vec<ExternalEvent>>,
        fail_listing: bool,
        fail_insert_titles: HashSet<String>,
        refresh_expires_in: i64,
        refresh_calls: AtomicUsize,
        next_event: AtomicUsize,
        updates: Mutex<Vec<(String, EventDraft)>>,
        deleted: Mutex<Vec<String>>,
        stopped: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn with_events(events: Vec<ExternalEvent>) -> Self {
            Self {
                events: Mutex::new(events),
                refresh_expires_in: 3600,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl CalendarProvider for FakeProvider {
        fn authorization_url(&self, state: &str) -> String {
            format!("https://auth.example/?state={}", state)
        }

        async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
            if code == "bad" {
                return Err(ProviderError::Unauthorized("invalid_grant".to_string()));
            }
            Ok(TokenGrant {
                access_token: "access-1".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                expires_in: 3600,
            })
        }

        async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenGrant, ProviderError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenGrant {
                access_token: "access-2".to_string(),
                refresh_token: None,
                expires_in: self.refresh_expires_in,
            })
        }

        async fn list_events(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            _window: TimeWindow,
        ) -> Result<Vec<ExternalEvent>, ProviderError> {
            if self.fail_listing {
                return Err(ProviderError::Api {
                    status: 500,
                    message: "backend error".to_string(),
                });
            }
            Ok(self.events.lock().unwrap().clone())
        }

        async fn get_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event_id: &str,
        ) -> Result<ExternalEvent, ProviderError> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.id == event_id)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(event_id.to_string()))
        }

        async fn insert_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            draft: &EventDraft,
        ) -> Result<ExternalEvent, ProviderError> {
            if self.fail_insert_titles.contains(&draft.summary) {
                return Err(ProviderError::Api {
                    status: 403,
                    message: "quota exceeded".to_string(),
                });
            }
            let n = self.next_event.fetch_add(1, Ordering::SeqCst);
            let event = event_from_draft(&format!("evt_{}", n), draft);
            self.events.lock().unwrap().push(event.clone());
            Ok(event)
        }

        async fn update_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event_id: &str,
            draft: &EventDraft,
        ) -> Result<ExternalEvent, ProviderError> {
            self.updates
                .lock()
                .unwrap()
                .push((event_id.to_string(), draft.clone()));
            Ok(event_from_draft(event_id, draft))
        }

        async fn delete_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event_id: &str,
        ) -> Result<(), ProviderError> {
            let mut events = self.events.lock().unwrap();
            let before = events.len();
            events.retain(|e| e.id != event_id);
            if events.len() == before {
                return Err(ProviderError::NotFound(event_id.to_string()));
            }
            self.deleted.lock().unwrap().push(event_id.to_string());
            Ok(())
        }

        async fn watch_events(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            channel_id: &str,
            _address: &str,
        ) -> Result<WatchChannel, ProviderError> {
            Ok(WatchChannel {
                id: channel_id.to_string(),
                resource_id: format!("res-{}", channel_id),
                expires_at: Some(Utc::now() + Duration::days(7)),
            })
        }

        async fn stop_channel(
            &self,
            _access_token: &str,
            channel_id: &str,
            _resource_id: &str,
        ) -> Result<(), ProviderError> {
            self.stopped.lock().unwrap().push(channel_id.to_string());
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, day, hour, 0, 0).unwrap()
    }

    fn settings(
        agent: Uuid,
        access: Option<&str>,
        refresh: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> CalendarSettings {
        let now = Utc::now();
        CalendarSettings {
            agent_id: agent,
            calendar_id: "primary".to_string(),
            access_token: access.map(tokens::encode),
            refresh_token: refresh.map(tokens::encode),
            token_expires_at: expires_at,
            sync_enabled: true,
            sync_status: SyncState::NotSynced,
            last_synced_at: None,
            last_sync_error: None,
            channel_id: None,
            channel_resource_id: None,
            channel_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn meeting(agent: Uuid, title: &str, start: DateTime<Utc>, event: Option<&str>) -> Meeting {
        Meeting {
            id: Uuid::new_v4(),
            agent_id: agent,
            client_id: Uuid::new_v4(),
            title: title.to_string(),
            meeting_type: MeetingType::PolicyReview,
            status: MeetingStatus::Scheduled,
            scheduled_at: start,
            ends_at: start + Duration::hours(1),
            location: None,
            description: None,
            metadata: JsonWrapper::new(serde_json::json!({})),
            external_event_id: event.map(str::to_string),
            sync_status: SyncState::NotSynced,
            created_at: start,
            updated_at: start,
        }
    }

    fn event_from_draft(id: &str, draft: &EventDraft) -> ExternalEvent {
        ExternalEvent {
            id: id.to_string(),
            summary: Some(draft.summary.clone()),
            description: draft.description.clone(),
            location: draft.location.clone(),
            start: Some(draft.start),
            end: Some(draft.end),
            cancelled: draft.cancelled,
            updated: None,
            meeting_id: Some(draft.meeting_id),
        }
    }

    fn event_for(meeting: &Meeting, id: &str) -> ExternalEvent {
        event_from_draft(id, &EventDraft::from(meeting))
    }

    fn connected_store(agent: Uuid) -> MemoryStore {
        let store = MemoryStore::default();
        store.state.lock().unwrap().settings.insert(
            agent,
            settings(agent, Some("access-0"), Some("refresh-0"), Some(Utc::now() + Duration::hours(1))),
        );
        store
    }

    fn engine(provider: FakeProvider, store: MemoryStore) -> CalendarSync<FakeProvider, MemoryStore> {
        CalendarSync::new(
            provider,
            store,
            SyncConfig {
                webhook_address: Some("https://crm.example/api/calendar/webhook".to_string()),
                ..Default::default()
            },
        )
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[test]
    fn test_derive_status() {
        let clean = PassReport { synced: 3, conflicts: 0, failed: 0 };
        let conflicted = PassReport { synced: 1, conflicts: 1, failed: 0 };
        let failed = PassReport { synced: 5, conflicts: 2, failed: 1 };

        assert_eq!(derive_status(&clean, &clean), SyncState::Synced);
        assert_eq!(derive_status(&PassReport::default(), &PassReport::default()), SyncState::Synced);
        assert_eq!(derive_status(&conflicted, &clean), SyncState::SyncConflict);
        assert_eq!(derive_status(&clean, &failed), SyncState::SyncFailed);
        assert_eq!(derive_status(&failed, &conflicted), SyncState::SyncFailed);
    }

    #[test]
    fn test_detect_conflict() {
        let agent = Uuid::new_v4();
        let local = meeting(agent, "Policy review", at(3, 10), Some("evt_a"));
        let mut event = event_for(&local, "evt_a");
        assert_eq!(detect_conflict(&local, &event), None);

        event.summary = Some("Policy review (moved)".to_string());
        event.start = Some(at(4, 10));
        let reason = detect_conflict(&local, &event).unwrap();
        assert!(reason.contains("start"));
        assert!(reason.contains("title"));
        assert!(!reason.contains("end"));

        let mut cancelled = event_for(&local, "evt_a");
        cancelled.cancelled = true;
        assert!(detect_conflict(&local, &cancelled).unwrap().contains("cancellation"));
    }

    #[tokio::test]
    async fn test_full_sync_writes_one_log_per_attempt() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        let linked = meeting(agent, "Contract signing", at(5, 9), Some("evt_linked"));
        let first = meeting(agent, "First consultation", at(6, 9), None);
        let second = meeting(agent, "Needs analysis", at(7, 9), None);
        let mut cancelled = meeting(agent, "Dropped", at(8, 9), None);
        cancelled.status = MeetingStatus::Cancelled;

        let provider = FakeProvider::with_events(vec![
            event_for(&linked, "evt_linked"),
            ExternalEvent {
                id: "evt_private".to_string(),
                summary: Some("Dentist".to_string()),
                description: None,
                location: None,
                start: Some(at(5, 14)),
                end: Some(at(5, 15)),
                cancelled: false,
                updated: None,
                meeting_id: None,
            },
        ]);
        for m in [&linked, &first, &second, &cancelled] {
            store.insert_meeting(m.clone());
        }

        let sync = engine(provider, store);
        let summary = sync.perform_full_sync(agent).await.unwrap();

        assert_eq!(summary.status, SyncState::Synced);
        assert_eq!(summary.pulled, PassReport { synced: 2, conflicts: 0, failed: 0 });
        assert_eq!(summary.pushed, PassReport { synced: 2, conflicts: 0, failed: 0 });

        let logs = sync.store.logs();
        assert_eq!(logs.len(), summary.pulled.attempts() + summary.pushed.attempts());
        assert_eq!(
            logs.iter().filter(|l| l.direction == SyncDirection::ToExternal).count(),
            2
        );

        let pushed = sync.store.meeting_of(first.id);
        assert!(pushed.external_event_id.is_some());
        assert_eq!(pushed.sync_status, SyncState::Synced);
        assert_eq!(sync.store.meeting_of(cancelled.id).external_event_id, None);

        let stored = sync.store.settings_of(agent);
        assert_eq!(stored.sync_status, SyncState::Synced);
        assert!(stored.last_synced_at.is_some());
        assert_eq!(stored.last_sync_error, None);
    }

    #[tokio::test]
    async fn test_partial_push_failure_is_never_synced() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        let ok = meeting(agent, "Follow-up", at(10, 9), None);
        let broken = meeting(agent, "Quota buster", at(11, 9), None);
        store.insert_meeting(ok.clone());
        store.insert_meeting(broken.clone());

        let mut provider = FakeProvider::with_events(vec![]);
        provider.fail_insert_titles.insert("Quota buster".to_string());

        let sync = engine(provider, store);
        let summary = sync.perform_full_sync(agent).await.unwrap();

        assert_eq!(summary.status, SyncState::SyncFailed);
        assert_eq!(summary.pushed, PassReport { synced: 1, conflicts: 0, failed: 1 });

        let logs = sync.store.logs();
        assert_eq!(logs.len(), 2);
        let failure = logs.iter().find(|l| l.outcome == SyncOutcome::Failed).unwrap();
        assert_eq!(failure.meeting_id, Some(broken.id));
        assert!(failure.message.as_deref().unwrap().contains("quota"));

        assert_eq!(sync.store.meeting_of(broken.id).sync_status, SyncState::SyncFailed);
        let stored = sync.store.settings_of(agent);
        assert_eq!(stored.sync_status, SyncState::SyncFailed);
        assert!(stored.last_sync_error.is_some());
    }

    #[tokio::test]
    async fn test_listing_failure_does_not_cancel_push() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        let local = meeting(agent, "Needs analysis", at(12, 9), None);
        store.insert_meeting(local.clone());

        let mut provider = FakeProvider::with_events(vec![]);
        provider.fail_listing = true;

        let sync = engine(provider, store);
        let summary = sync.perform_full_sync(agent).await.unwrap();

        assert_eq!(summary.pulled, PassReport { synced: 0, conflicts: 0, failed: 1 });
        assert_eq!(summary.pushed, PassReport { synced: 1, conflicts: 0, failed: 0 });
        assert_eq!(summary.status, SyncState::SyncFailed);

        let logs = sync.store.logs();
        assert_eq!(logs.len(), 2);
        let pull_failure = logs
            .iter()
            .find(|l| l.direction == SyncDirection::FromExternal)
            .unwrap();
        assert_eq!(pull_failure.outcome, SyncOutcome::Failed);
        assert_eq!(pull_failure.meeting_id, None);
    }

    #[tokio::test]
    async fn test_meeting_listing_failure_logs_once() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        store.state.lock().unwrap().fail_meeting_listing = true;

        let sync = engine(FakeProvider::with_events(vec![]), store);
        let summary = sync.perform_full_sync(agent).await.unwrap();

        assert_eq!(summary.pushed.failed, 1);
        assert_eq!(sync.store.logs().len(), 1);
    }

    #[tokio::test]
    async fn test_unwritten_log_counts_as_failure() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        store.insert_meeting(meeting(agent, "Follow-up", at(13, 9), None));
        store.state.lock().unwrap().fail_log_writes = true;

        let sync = engine(FakeProvider::with_events(vec![]), store);
        let summary = sync.perform_full_sync(agent).await.unwrap();

        assert_eq!(summary.pushed, PassReport { synced: 0, conflicts: 0, failed: 1 });
        assert_eq!(summary.status, SyncState::SyncFailed);
        assert!(sync.store.logs().is_empty());
        assert_eq!(sync.store.settings_of(agent).sync_status, SyncState::SyncFailed);
    }

    #[tokio::test]
    async fn test_notification_keeps_earlier_push_failure() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        let broken = meeting(agent, "Quota buster", at(11, 9), None);
        store.insert_meeting(broken.clone());

        let mut provider = FakeProvider::with_events(vec![]);
        provider.fail_insert_titles.insert("Quota buster".to_string());

        let sync = engine(provider, store);
        sync.perform_full_sync(agent).await.unwrap();
        let failed = sync.store.settings_of(agent);
        assert_eq!(failed.sync_status, SyncState::SyncFailed);

        let channel = sync.create_channel(agent).await.unwrap();
        let report = sync.handle_notification(&channel.id, "exists").await.unwrap().unwrap();
        assert_eq!(report.failed, 0);

        let stored = sync.store.settings_of(agent);
        assert_eq!(stored.sync_status, SyncState::SyncFailed);
        assert_eq!(stored.last_sync_error, failed.last_sync_error);
        assert_eq!(sync.store.meeting_of(broken.id).sync_status, SyncState::SyncFailed);
    }

    #[tokio::test]
    async fn test_conflict_marks_meeting() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        let local = meeting(agent, "Policy review", at(14, 10), Some("evt_c"));
        store.insert_meeting(local.clone());

        let mut moved = event_for(&local, "evt_c");
        moved.start = Some(at(14, 12));
        moved.end = Some(at(14, 13));

        let sync = engine(FakeProvider::with_events(vec![moved]), store);
        let summary = sync.perform_full_sync(agent).await.unwrap();

        assert_eq!(summary.status, SyncState::SyncConflict);
        assert_eq!(summary.pulled.conflicts, 1);
        assert_eq!(sync.store.meeting_of(local.id).sync_status, SyncState::SyncConflict);

        let logs = sync.store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].outcome, SyncOutcome::Conflict);
        assert_eq!(logs[0].external_event_id.as_deref(), Some("evt_c"));
    }

    #[tokio::test]
    async fn test_not_connected() {
        let agent = Uuid::new_v4();
        let sync = engine(FakeProvider::with_events(vec![]), MemoryStore::default());
        assert!(matches!(
            sync.perform_full_sync(agent).await,
            Err(SyncError::NotConnected)
        ));
        assert!(sync.store.logs().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_extends_expiry() {
        let agent = Uuid::new_v4();
        let previous = Utc::now() + Duration::minutes(2);
        let store = MemoryStore::default();
        store
            .state
            .lock()
            .unwrap()
            .settings
            .insert(agent, settings(agent, Some("access-0"), Some("refresh-0"), Some(previous)));

        let sync = engine(FakeProvider::with_events(vec![]), store);
        let current = sync.store.settings_of(agent);
        let token = sync.access_token(&current).await.unwrap();

        assert_eq!(token, "access-2");
        assert_eq!(sync.provider.refresh_calls.load(Ordering::SeqCst), 1);

        let stored = sync.store.settings_of(agent);
        assert!(stored.token_expires_at.unwrap() > previous);
        assert_eq!(tokens::decode(stored.access_token.as_deref().unwrap()).unwrap(), "access-2");
        // refresh token kept when the grant omits it
        assert_eq!(tokens::decode(stored.refresh_token.as_deref().unwrap()).unwrap(), "refresh-0");
    }

    #[tokio::test]
    async fn test_fresh_token_is_not_refreshed() {
        let agent = Uuid::new_v4();
        let sync = engine(FakeProvider::with_events(vec![]), connected_store(agent));
        let current = sync.store.settings_of(agent);

        assert_eq!(sync.access_token(&current).await.unwrap(), "access-0");
        assert_eq!(sync.provider.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_grant_fails_the_run() {
        let agent = Uuid::new_v4();
        let previous = Utc::now() + Duration::minutes(3);
        let store = MemoryStore::default();
        store
            .state
            .lock()
            .unwrap()
            .settings
            .insert(agent, settings(agent, Some("access-0"), Some("refresh-0"), Some(previous)));

        let mut provider = FakeProvider::with_events(vec![]);
        provider.refresh_expires_in = 60;

        let sync = engine(provider, store);
        let result = sync.perform_full_sync(agent).await;
        assert!(matches!(result, Err(SyncError::StaleGrant)));

        let stored = sync.store.settings_of(agent);
        assert_eq!(stored.sync_status, SyncState::SyncFailed);
        assert_eq!(stored.token_expires_at, Some(previous));

        let logs = sync.store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].outcome, SyncOutcome::Failed);
    }

    #[tokio::test]
    async fn test_resolve_conflict_external_overwrites_meeting() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        let mut local = meeting(agent, "Policy review", at(20, 10), Some("evt_r"));
        local.sync_status = SyncState::SyncConflict;
        store.insert_meeting(local.clone());

        let mut remote = event_for(&local, "evt_r");
        remote.summary = Some("Policy review at client office".to_string());
        remote.start = Some(at(21, 15));
        remote.end = Some(at(21, 16));

        let sync = engine(FakeProvider::with_events(vec![remote]), store);
        let resolved = sync
            .resolve_conflict(agent, local.id, ConflictSide::External)
            .await
            .unwrap();

        assert_eq!(resolved.title, "Policy review at client office");
        assert_eq!(resolved.scheduled_at, at(21, 15));
        assert_eq!(resolved.ends_at, at(21, 16));
        assert_eq!(resolved.sync_status, SyncState::Synced);
        assert!(sync.provider.updates.lock().unwrap().is_empty());

        let logs = sync.store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].direction, SyncDirection::FromExternal);
    }

    #[tokio::test]
    async fn test_resolve_conflict_external_skips_unusable_fields() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        let mut local = meeting(agent, "Annual review", at(20, 10), Some("evt_b"));
        local.sync_status = SyncState::SyncConflict;
        store.insert_meeting(local.clone());

        let mut remote = event_for(&local, "evt_b");
        remote.summary = Some("   ".to_string());
        remote.start = Some(at(21, 16));
        remote.end = Some(at(21, 15));

        let sync = engine(FakeProvider::with_events(vec![remote]), store);
        let resolved = sync
            .resolve_conflict(agent, local.id, ConflictSide::External)
            .await
            .unwrap();

        assert_eq!(resolved.title, "Annual review");
        assert_eq!(resolved.scheduled_at, local.scheduled_at);
        assert_eq!(resolved.ends_at, local.ends_at);
        assert_eq!(resolved.sync_status, SyncState::Synced);

        let logs = sync.store.logs();
        assert_eq!(logs.len(), 1);
        let message = logs[0].message.as_deref().unwrap();
        assert!(message.contains("ignored external blank title and invalid time window"));
    }

    #[tokio::test]
    async fn test_resolve_conflict_local_overwrites_event() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        let local = meeting(agent, "Contract signing", at(22, 10), Some("evt_l"));
        store.insert_meeting(local.clone());

        let mut remote = event_for(&local, "evt_l");
        remote.summary = Some("Something else".to_string());

        let sync = engine(FakeProvider::with_events(vec![remote]), store);
        let resolved = sync
            .resolve_conflict(agent, local.id, ConflictSide::Local)
            .await
            .unwrap();

        assert_eq!(resolved.title, "Contract signing");
        let updates = sync.provider.updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "evt_l");
        assert_eq!(updates[0].1.summary, "Contract signing");
        assert_eq!(sync.store.logs()[0].direction, SyncDirection::ToExternal);
    }

    #[tokio::test]
    async fn test_resolve_conflict_requires_link() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        let local = meeting(agent, "Unlinked", at(23, 10), None);
        store.insert_meeting(local.clone());

        let sync = engine(FakeProvider::with_events(vec![]), store);
        assert!(matches!(
            sync.resolve_conflict(agent, local.id, ConflictSide::Local).await,
            Err(SyncError::NotLinked)
        ));
    }

    #[tokio::test]
    async fn test_push_meeting_skipped_when_disabled() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        let local = meeting(agent, "Follow-up", at(24, 10), None);
        store.insert_meeting(local.clone());
        store.state.lock().unwrap().settings.get_mut(&agent).unwrap().sync_enabled = false;

        let sync = engine(FakeProvider::with_events(vec![]), store);
        assert!(sync.push_meeting(agent, local.id).await.unwrap().is_none());
        assert!(sync.store.logs().is_empty());
    }

    #[tokio::test]
    async fn test_push_meeting_updates_linked_event() {
        let agent = Uuid::new_v4();
        let store = connected_store(agent);
        let local = meeting(agent, "Rescheduled review", at(25, 10), Some("evt_u"));
        store.insert_meeting(local.clone());

        let sync = engine(FakeProvider::with_events(vec![]), store);
        let log = sync.push_meeting(agent, local.id).await.unwrap().unwrap();

        assert_eq!(log.outcome, SyncOutcome::Synced);
        assert_eq!(log.external_event_id.as_deref(), Some("evt_u"));
        assert_eq!(sync.provider.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_meeting_event_tolerates_missing_event() {
        let agent = Uuid::new_v4();
        let local = meeting(agent, "Gone", at(26, 10), Some("evt_gone"));
        let sync = engine(FakeProvider::with_events(vec![]), connected_store(agent));

        let log = sync.remove_meeting_event(agent, &local).await.unwrap().unwrap();
        assert_eq!(log.outcome, SyncOutcome::Synced);
        assert_eq!(log.meeting_id, Some(local.id));
    }

    #[tokio::test]
    async fn test_channel_lifecycle_and_notifications() {
        let agent = Uuid::new_v4();
        let local = meeting(agent, "Policy review", at(27, 10), Some("evt_n"));
        let store = connected_store(agent);
        store.insert_meeting(local.clone());

        let sync = engine(FakeProvider::with_events(vec![event_for(&local, "evt_n")]), store);

        let channel = sync.create_channel(agent).await.unwrap();
        assert_eq!(sync.store.settings_of(agent).channel_id, Some(channel.id.clone()));

        // handshake and unknown channels do no work
        assert!(sync.handle_notification(&channel.id, "sync").await.unwrap().is_none());
        assert!(sync.handle_notification("nope", "exists").await.unwrap().is_none());
        assert!(sync.store.logs().is_empty());

        let report = sync.handle_notification(&channel.id, "exists").await.unwrap().unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(sync.store.logs().len(), 1);

        let renewed = sync.renew_channel(agent).await.unwrap();
        assert_ne!(renewed.id, channel.id);
        assert_eq!(sync.provider.stopped.lock().unwrap().as_slice(), [channel.id.clone()]);

        assert!(sync.delete_channel(agent).await.unwrap());
        assert_eq!(sync.store.settings_of(agent).channel_id, None);
        assert!(!sync.delete_channel(agent).await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let agent = Uuid::new_v4();
        let sync = engine(FakeProvider::with_events(vec![]), MemoryStore::default());

        assert!(sync.connect(agent, "bad").await.is_err());

        let connected = sync.connect(agent, "code-123").await.unwrap();
        assert!(connected.is_connected());
        assert!(connected.sync_enabled);
        assert_eq!(
            tokens::decode(connected.refresh_token.as_deref().unwrap()).unwrap(),
            "refresh-1"
        );

        sync.disconnect(agent).await.unwrap();
        let cleared = sync.store.settings_of(agent);
        assert!(!cleared.is_connected());
        assert!(!cleared.sync_enabled);
    }
}
