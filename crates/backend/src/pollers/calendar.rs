//! Calendar sync background task.
//!
//! Every cycle walks the agents with sync switched on, renews push channels
//! that are about to expire and runs a full two-way sync.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::calendar::AppCalendarSync;
use crate::db::{self, calendar_settings, DbPool};
use crate::models::CalendarSettings;

/// Configuration for the calendar polling task
#[derive(Debug, Clone)]
pub struct CalendarPollerConfig {
    /// How often to run the sync cycle (default: 15 minutes)
    pub poll_interval: Duration,
    /// Channels expiring within this window are renewed
    pub channel_renew_window: chrono::Duration,
    /// Whether this deployment receives push notifications at all
    pub renew_channels: bool,
}

impl Default for CalendarPollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(900),
            channel_renew_window: chrono::Duration::hours(24),
            renew_channels: false,
        }
    }
}

impl CalendarPollerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let poll_interval_secs = std::env::var("CALENDAR_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(900);

        let renew_hours = std::env::var("CALENDAR_CHANNEL_RENEW_HOURS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(24);

        let renew_channels = std::env::var("WEBHOOK_ADDRESS")
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false);

        Self {
            poll_interval: Duration::from_secs(poll_interval_secs),
            channel_renew_window: chrono::Duration::hours(renew_hours),
            renew_channels,
        }
    }
}

/// True when the agent's channel is missing its expiry or expires inside the window.
fn channel_due(settings: &CalendarSettings, window: chrono::Duration, now: DateTime<Utc>) -> bool {
    if settings.channel_id.is_none() {
        return false;
    }
    match settings.channel_expires_at {
        Some(expires_at) => expires_at - window <= now,
        None => true,
    }
}

/// Start the calendar polling background task
pub async fn start_calendar_polling_task(pool: DbPool, calendar: Arc<AppCalendarSync>) {
    let config = CalendarPollerConfig::from_env();

    tracing::info!(
        "Starting calendar polling task (interval: {:?}, channel renewal: {})",
        config.poll_interval,
        if config.renew_channels { "on" } else { "off" }
    );

    loop {
        if let Err(e) = run_poll_cycle(&pool, &calendar, &config).await {
            tracing::error!("Calendar poll cycle failed: {}", e);
        }

        tokio::time::sleep(config.poll_interval).await;
    }
}

async fn run_poll_cycle(
    pool: &DbPool,
    calendar: &AppCalendarSync,
    config: &CalendarPollerConfig,
) -> anyhow::Result<()> {
    let agents = {
        let mut conn = db::get_conn(pool).await?;
        calendar_settings::list_sync_enabled(&mut conn).await?
    };

    if agents.is_empty() {
        tracing::debug!("No agents with calendar sync enabled");
        return Ok(());
    }

    tracing::debug!("Calendar poll cycle for {} agents", agents.len());
    let now = Utc::now();

    for settings in agents {
        let agent = settings.agent_id;

        if config.renew_channels && channel_due(&settings, config.channel_renew_window, now) {
            match calendar.renew_channel(agent).await {
                Ok(channel) => tracing::info!("Renewed channel for agent {} as {}", agent, channel.id),
                Err(e) => tracing::warn!("Failed to renew channel for agent {}: {}", agent, e),
            }
        }

        // One agent's failure must not stop the others
        match calendar.perform_full_sync(agent).await {
            Ok(summary) => tracing::info!(
                "Periodic sync for agent {}: {} (pulled {:?}, pushed {:?})",
                agent,
                summary.status,
                summary.pulled,
                summary.pushed
            ),
            Err(e) => tracing::warn!("Periodic sync for agent {} failed: {}", agent, e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shared_types::SyncState;
    use uuid::Uuid;

    fn settings(channel: Option<&str>, expires_at: Option<DateTime<Utc>>) -> CalendarSettings {
        let now = Utc::now();
        CalendarSettings {
            agent_id: Uuid::new_v4(),
            calendar_id: "primary".to_string(),
            access_token: Some("YQ==".to_string()),
            refresh_token: Some("cg==".to_string()),
            token_expires_at: None,
            sync_enabled: true,
            sync_status: SyncState::Synced,
            last_synced_at: None,
            last_sync_error: None,
            channel_id: channel.map(str::to_string),
            channel_resource_id: channel.map(|_| "res-1".to_string()),
            channel_expires_at: expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_channel_due_inside_window() {
        let now = Utc.with_ymd_and_hms(2024, 9, 2, 12, 0, 0).unwrap();
        let window = chrono::Duration::hours(24);

        let soon = settings(Some("chan"), Some(now + chrono::Duration::hours(6)));
        assert!(channel_due(&soon, window, now));

        let later = settings(Some("chan"), Some(now + chrono::Duration::days(5)));
        assert!(!channel_due(&later, window, now));

        let unknown_expiry = settings(Some("chan"), None);
        assert!(channel_due(&unknown_expiry, window, now));
    }

    #[test]
    fn test_no_channel_never_due() {
        let now = Utc::now();
        assert!(!channel_due(&settings(None, None), chrono::Duration::hours(24), now));
    }

    #[test]
    fn test_default_config() {
        let config = CalendarPollerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(900));
        assert!(!config.renew_channels);
    }
}
