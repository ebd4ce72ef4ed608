//! Google Calendar implementation of `CalendarProvider`.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use google_calendar3::api::{Channel, Event, EventDateTime, EventExtendedProperties};
use google_calendar3::hyper_rustls::HttpsConnector;
use google_calendar3::CalendarHub;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use uuid::Uuid;

use super::provider::{
    CalendarProvider, EventDraft, ExternalEvent, ProviderError, TimeWindow, TokenGrant, WatchChannel,
};

const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

/// Private extended property linking an event to a local meeting.
pub const MEETING_ID_PROPERTY: &str = "crm_meeting_id";

/// OAuth client used for calendar access
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl GoogleConfig {
    /// Required env vars: `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`,
    /// `CALENDAR_REDIRECT_URI`.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            client_id: std::env::var("GOOGLE_CLIENT_ID")
                .context("GOOGLE_CLIENT_ID environment variable must be set")?,
            client_secret: std::env::var("GOOGLE_CLIENT_SECRET")
                .context("GOOGLE_CLIENT_SECRET environment variable must be set")?,
            redirect_uri: std::env::var("CALENDAR_REDIRECT_URI")
                .context("CALENDAR_REDIRECT_URI environment variable must be set")?,
        })
    }
}

pub struct GoogleCalendar {
    config: GoogleConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl GoogleCalendar {
    pub fn new(config: GoogleConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Build a hub authorized with a single bearer token.
    fn hub(&self, access_token: &str) -> Result<CalendarHub<HttpsConnector<HttpConnector>>, ProviderError> {
        let connector = google_calendar3::hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| ProviderError::Transport(format!("Failed to load native TLS roots: {}", e)))?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Ok(CalendarHub::new(client, access_token.to_string()))
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, ProviderError> {
        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(form)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Token endpoint returned {}: {}", status, body);
            return Err(match status.as_u16() {
                400 | 401 => ProviderError::Unauthorized(body),
                code => ProviderError::Api { status: code, message: body },
            });
        }

        let tokens: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("Invalid token response: {}", e)))?;

        Ok(TokenGrant {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in.unwrap_or(3600),
        })
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            AUTH_ENDPOINT,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(CALENDAR_SCOPE),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        self.token_request(&[
            ("code", code),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("redirect_uri", &self.config.redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        self.token_request(&[
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<ExternalEvent>, ProviderError> {
        let hub = self.hub(access_token)?;
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut call = hub
                .events()
                .list(calendar_id)
                .time_min(window.start)
                .time_max(window.end)
                .single_events(true)
                .show_deleted(true)
                .max_results(250);
            if let Some(ref token) = page_token {
                call = call.page_token(token);
            }

            let (_, page) = call.doit().await.map_err(map_google_error)?;

            events.extend(page.items.unwrap_or_default().into_iter().filter_map(from_google_event));

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        tracing::debug!("Listed {} events from calendar {}", events.len(), calendar_id);
        Ok(events)
    }

    async fn get_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<ExternalEvent, ProviderError> {
        let (_, event) = self
            .hub(access_token)?
            .events()
            .get(calendar_id, event_id)
            .doit()
            .await
            .map_err(map_google_error)?;

        from_google_event(event).ok_or_else(|| ProviderError::NotFound(event_id.to_string()))
    }

    async fn insert_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        draft: &EventDraft,
    ) -> Result<ExternalEvent, ProviderError> {
        let (_, created) = self
            .hub(access_token)?
            .events()
            .insert(to_google_event(draft), calendar_id)
            .doit()
            .await
            .map_err(map_google_error)?;

        tracing::info!("Created calendar event for meeting {} (id: {:?})", draft.meeting_id, created.id);
        from_google_event(created)
            .ok_or_else(|| ProviderError::Transport("Created event has no id".to_string()))
    }

    async fn update_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        draft: &EventDraft,
    ) -> Result<ExternalEvent, ProviderError> {
        let (_, updated) = self
            .hub(access_token)?
            .events()
            .update(to_google_event(draft), calendar_id, event_id)
            .doit()
            .await
            .map_err(map_google_error)?;

        from_google_event(updated).ok_or_else(|| ProviderError::NotFound(event_id.to_string()))
    }

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), ProviderError> {
        self.hub(access_token)?
            .events()
            .delete(calendar_id, event_id)
            .doit()
            .await
            .map_err(map_google_error)?;

        Ok(())
    }

    async fn watch_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        channel_id: &str,
        address: &str,
    ) -> Result<WatchChannel, ProviderError> {
        let request = Channel {
            id: Some(channel_id.to_string()),
            type_: Some("web_hook".to_string()),
            address: Some(address.to_string()),
            ..Default::default()
        };

        let (_, channel) = self
            .hub(access_token)?
            .events()
            .watch(request, calendar_id)
            .doit()
            .await
            .map_err(map_google_error)?;

        let resource_id = channel
            .resource_id
            .ok_or_else(|| ProviderError::Transport("Watch response has no resource id".to_string()))?;

        Ok(WatchChannel {
            id: channel.id.unwrap_or_else(|| channel_id.to_string()),
            resource_id,
            expires_at: channel.expiration.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        })
    }

    async fn stop_channel(
        &self,
        access_token: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<(), ProviderError> {
        let request = Channel {
            id: Some(channel_id.to_string()),
            resource_id: Some(resource_id.to_string()),
            ..Default::default()
        };

        self.hub(access_token)?
            .channels()
            .stop(request)
            .doit()
            .await
            .map_err(map_google_error)?;

        Ok(())
    }
}

fn map_google_error(err: google_calendar3::Error) -> ProviderError {
    match err {
        google_calendar3::Error::BadRequest(body) => {
            let code = body
                .pointer("/error/code")
                .and_then(|c| c.as_u64())
                .unwrap_or(400) as u16;
            let message = body
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("Bad request")
                .to_string();
            from_status(code, message)
        }
        google_calendar3::Error::Failure(response) => {
            let code = response.status().as_u16();
            from_status(code, format!("Request failed with status {}", code))
        }
        google_calendar3::Error::MissingToken(e) => ProviderError::Unauthorized(e.to_string()),
        other => ProviderError::Transport(other.to_string()),
    }
}

fn from_status(code: u16, message: String) -> ProviderError {
    match code {
        401 | 403 => ProviderError::Unauthorized(message),
        404 | 410 => ProviderError::NotFound(message),
        status => ProviderError::Api { status, message },
    }
}

fn event_time(value: Option<&EventDateTime>) -> Option<DateTime<Utc>> {
    let value = value?;
    value
        .date_time
        .or_else(|| value.date.map(|d| d.and_time(NaiveTime::MIN).and_utc()))
}

/// Events without an id are skipped.
fn from_google_event(event: Event) -> Option<ExternalEvent> {
    let id = event.id?;
    let meeting_id = event
        .extended_properties
        .as_ref()
        .and_then(|p| p.private.as_ref())
        .and_then(|p| p.get(MEETING_ID_PROPERTY))
        .and_then(|v| Uuid::parse_str(v).ok());

    Some(ExternalEvent {
        id,
        start: event_time(event.start.as_ref()),
        end: event_time(event.end.as_ref()),
        cancelled: event.status.as_deref() == Some("cancelled"),
        summary: event.summary,
        description: event.description,
        location: event.location,
        updated: event.updated,
        meeting_id,
    })
}

fn to_google_event(draft: &EventDraft) -> Event {
    let mut private = HashMap::new();
    private.insert(MEETING_ID_PROPERTY.to_string(), draft.meeting_id.to_string());

    Event {
        summary: Some(draft.summary.clone()),
        description: draft.description.clone(),
        location: draft.location.clone(),
        start: Some(EventDateTime {
            date_time: Some(draft.start),
            ..Default::default()
        }),
        end: Some(EventDateTime {
            date_time: Some(draft.end),
            ..Default::default()
        }),
        status: Some(if draft.cancelled { "cancelled" } else { "confirmed" }.to_string()),
        extended_properties: Some(EventExtendedProperties {
            private: Some(private),
            ..Default::default()
        }),
        ..Default::default()
    }
}
