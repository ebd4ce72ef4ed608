//! Meeting lifecycle service.
//!
//! Local writes commit first; the calendar push that follows runs in the
//! background and never fails the request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection};
use futures::future::try_join_all;
use shared_types::{
    CreateMeetingRequest, Meeting, MeetingDetails, MeetingStatus, RescheduleMeetingRequest,
    SyncState, UpdateMeetingRequest,
};
use thiserror::Error;
use uuid::Uuid;

use crate::calendar::AppCalendarSync;
use crate::db::{self, checklist, clients, meetings, notes, sync_logs, DbPool};
use crate::models::{MeetingChanges, NewMeeting};

#[derive(Debug, Error)]
pub enum MeetingError {
    #[error("ends_at must be after scheduled_at")]
    InvalidWindow,

    #[error("Title must not be empty")]
    EmptyTitle,

    #[error("Client not found")]
    ClientNotFound,

    #[error("Meeting not found")]
    NotFound,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type MeetingResult<T> = Result<T, MeetingError>;

pub fn validate_window(scheduled_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> MeetingResult<()> {
    if ends_at <= scheduled_at {
        return Err(MeetingError::InvalidWindow);
    }
    Ok(())
}

fn validate_title(title: &str) -> MeetingResult<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(MeetingError::EmptyTitle);
    }
    Ok(trimmed.to_string())
}

pub fn new_meeting(agent: Uuid, req: CreateMeetingRequest) -> MeetingResult<NewMeeting> {
    validate_window(req.scheduled_at, req.ends_at)?;

    Ok(NewMeeting {
        agent_id: agent,
        client_id: req.client_id,
        title: validate_title(&req.title)?,
        meeting_type: req.meeting_type,
        status: MeetingStatus::Scheduled,
        scheduled_at: req.scheduled_at,
        ends_at: req.ends_at,
        location: req.location,
        description: req.description,
        metadata: shared_types::JsonWrapper::new(
            req.metadata.unwrap_or_else(|| serde_json::json!({})),
        ),
        sync_status: SyncState::NotSynced,
    })
}

fn meeting_changes(req: UpdateMeetingRequest) -> MeetingResult<MeetingChanges> {
    Ok(MeetingChanges {
        title: req.title.as_deref().map(validate_title).transpose()?,
        location: req.location,
        description: req.description,
        metadata: req.metadata.map(shared_types::JsonWrapper::new),
        ..Default::default()
    })
}

/// Service for meeting-related business logic
pub struct MeetingService {
    pool: DbPool,
    calendar: Arc<AppCalendarSync>,
}

impl MeetingService {
    pub fn new(pool: DbPool, calendar: Arc<AppCalendarSync>) -> Self {
        Self { pool, calendar }
    }

    /// Create a meeting with its default checklist.
    pub async fn create(&self, agent: Uuid, req: CreateMeetingRequest) -> MeetingResult<MeetingDetails> {
        let new = new_meeting(agent, req)?;

        let mut conn = db::get_conn(&self.pool).await?;
        if clients::get(&mut conn, agent, new.client_id).await?.is_none() {
            return Err(MeetingError::ClientNotFound);
        }

        let (meeting, checklist) = meetings::create_with_checklist(&mut conn, new).await?;
        tracing::info!(
            "Created meeting {} ({}) with {} checklist items",
            meeting.id,
            meeting.meeting_type,
            checklist.len()
        );

        self.push_in_background(agent, meeting.id);

        Ok(MeetingDetails {
            meeting,
            checklist,
            notes: Vec::new(),
            sync_logs: Vec::new(),
        })
    }

    pub async fn update(&self, agent: Uuid, id: Uuid, req: UpdateMeetingRequest) -> MeetingResult<Meeting> {
        let changes = meeting_changes(req)?;
        self.apply(agent, id, changes, true).await
    }

    /// Move the meeting to a new window; status becomes `rescheduled`.
    pub async fn reschedule(
        &self,
        agent: Uuid,
        id: Uuid,
        req: RescheduleMeetingRequest,
    ) -> MeetingResult<Meeting> {
        validate_window(req.scheduled_at, req.ends_at)?;

        let changes = MeetingChanges {
            status: Some(MeetingStatus::Rescheduled),
            scheduled_at: Some(req.scheduled_at),
            ends_at: Some(req.ends_at),
            ..Default::default()
        };
        self.apply(agent, id, changes, true).await
    }

    pub async fn cancel(&self, agent: Uuid, id: Uuid) -> MeetingResult<Meeting> {
        let changes = MeetingChanges {
            status: Some(MeetingStatus::Cancelled),
            ..Default::default()
        };
        self.apply(agent, id, changes, true).await
    }

    pub async fn complete(&self, agent: Uuid, id: Uuid) -> MeetingResult<Meeting> {
        let changes = MeetingChanges {
            status: Some(MeetingStatus::Completed),
            ..Default::default()
        };
        self.apply(agent, id, changes, false).await
    }

    async fn apply(&self, agent: Uuid, id: Uuid, changes: MeetingChanges, push: bool) -> MeetingResult<Meeting> {
        let mut conn = db::get_conn(&self.pool).await?;
        let meeting = meetings::update(&mut conn, agent, id, changes)
            .await?
            .ok_or(MeetingError::NotFound)?;

        if push {
            self.push_in_background(agent, meeting.id);
        }
        Ok(meeting)
    }

    /// Delete the meeting; its external event is removed in the background.
    pub async fn delete(&self, agent: Uuid, id: Uuid) -> MeetingResult<Meeting> {
        let mut conn = db::get_conn(&self.pool).await?;
        let meeting = meetings::delete(&mut conn, agent, id)
            .await?
            .ok_or(MeetingError::NotFound)?;

        tracing::info!("Deleted meeting {}", meeting.id);

        if meeting.external_event_id.is_some() {
            self.remove_in_background(agent, meeting.clone());
        }

        Ok(meeting)
    }

    /// Delete a client. Its meetings go with it, so their calendar events
    /// are removed in the background. Returns false when nothing matched.
    pub async fn delete_client(&self, agent: Uuid, client: Uuid) -> MeetingResult<bool> {
        let mut conn = db::get_conn(&self.pool).await?;
        let removed = conn
            .transaction::<_, anyhow::Error, _>(|conn| {
                async move {
                    let linked = meetings::list_linked_for_client(conn, agent, client).await?;
                    let deleted = clients::delete(conn, agent, client).await?;
                    Ok(deleted.then_some(linked))
                }
                .scope_boxed()
            })
            .await?;

        let Some(linked) = removed else {
            return Ok(false);
        };

        tracing::info!("Deleted client {} with {} linked meetings", client, linked.len());
        for meeting in linked {
            self.remove_in_background(agent, meeting);
        }
        Ok(true)
    }

    fn remove_in_background(&self, agent: Uuid, meeting: Meeting) {
        let calendar = Arc::clone(&self.calendar);
        tokio::spawn(async move {
            if let Err(e) = calendar.remove_meeting_event(agent, &meeting).await {
                tracing::warn!("Failed to remove calendar event for meeting {}: {}", meeting.id, e);
            }
        });
    }

    fn push_in_background(&self, agent: Uuid, meeting_id: Uuid) {
        let calendar = Arc::clone(&self.calendar);
        tokio::spawn(async move {
            match calendar.push_meeting(agent, meeting_id).await {
                Ok(Some(log)) => tracing::debug!("Pushed meeting {}: {}", meeting_id, log.outcome),
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to push meeting {}: {}", meeting_id, e),
            }
        });
    }

    pub async fn details(&self, agent: Uuid, id: Uuid) -> MeetingResult<MeetingDetails> {
        let meeting = {
            let mut conn = db::get_conn(&self.pool).await?;
            meetings::get(&mut conn, agent, id)
                .await?
                .ok_or(MeetingError::NotFound)?
        };
        Ok(load_details(&self.pool, agent, meeting).await?)
    }

    /// Every meeting of the month with checklist, notes and sync history,
    /// fetched concurrently per meeting.
    pub async fn details_for_month(&self, agent: Uuid, year: i32, month: u32) -> MeetingResult<Vec<MeetingDetails>> {
        let month_meetings = {
            let mut conn = db::get_conn(&self.pool).await?;
            meetings::list_by_month(&mut conn, agent, year, month).await?
        };

        let details = try_join_all(
            month_meetings
                .into_iter()
                .map(|meeting| load_details(&self.pool, agent, meeting)),
        )
        .await?;

        Ok(details)
    }
}

/// Checklist, notes and sync logs for one meeting, each on its own connection.
async fn load_details(pool: &DbPool, agent: Uuid, meeting: Meeting) -> anyhow::Result<MeetingDetails> {
    let id = meeting.id;

    let (checklist, notes, sync_logs) = tokio::try_join!(
        async {
            let mut conn = db::get_conn(pool).await?;
            checklist::list_for_meeting(&mut conn, agent, id).await
        },
        async {
            let mut conn = db::get_conn(pool).await?;
            notes::list_for_meeting(&mut conn, agent, id).await
        },
        async {
            let mut conn = db::get_conn(pool).await?;
            sync_logs::list_for_meeting(&mut conn, agent, id).await
        },
    )?;

    Ok(MeetingDetails {
        meeting,
        checklist,
        notes,
        sync_logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use shared_types::MeetingType;

    fn request(start: DateTime<Utc>, end: DateTime<Utc>) -> CreateMeetingRequest {
        CreateMeetingRequest {
            client_id: Uuid::new_v4(),
            title: "  First consultation  ".to_string(),
            meeting_type: MeetingType::FirstConsultation,
            scheduled_at: start,
            ends_at: end,
            location: Some("Office".to_string()),
            description: None,
            metadata: None,
        }
    }

    #[test]
    fn test_new_meeting_is_scheduled_and_unsynced() {
        let start = Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap();
        let agent = Uuid::new_v4();
        let row = new_meeting(agent, request(start, start + Duration::hours(1))).unwrap();

        assert_eq!(row.agent_id, agent);
        assert_eq!(row.title, "First consultation");
        assert_eq!(row.status, MeetingStatus::Scheduled);
        assert_eq!(row.sync_status, SyncState::NotSynced);
        assert_eq!(row.metadata.0, serde_json::json!({}));
    }

    #[test]
    fn test_window_must_be_positive() {
        let start = Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap();
        assert!(matches!(
            new_meeting(Uuid::new_v4(), request(start, start)),
            Err(MeetingError::InvalidWindow)
        ));
        assert!(matches!(
            validate_window(start, start - Duration::minutes(30)),
            Err(MeetingError::InvalidWindow)
        ));
        assert!(validate_window(start, start + Duration::minutes(1)).is_ok());
    }

    #[test]
    fn test_blank_title_rejected() {
        let start = Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap();
        let mut req = request(start, start + Duration::hours(1));
        req.title = "   ".to_string();
        assert!(matches!(new_meeting(Uuid::new_v4(), req), Err(MeetingError::EmptyTitle)));

        let patch = UpdateMeetingRequest {
            title: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(meeting_changes(patch), Err(MeetingError::EmptyTitle)));
    }

    #[test]
    fn test_update_leaves_status_and_window_alone() {
        let changes = meeting_changes(UpdateMeetingRequest {
            location: Some("Client office".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(changes.location.as_deref(), Some("Client office"));
        assert!(changes.status.is_none());
        assert!(changes.scheduled_at.is_none());
        assert!(changes.title.is_none());
    }
}
