use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

mod json_wrapper;

pub use json_wrapper::JsonWrapper;

/// Declares a string-backed enum stored as VARCHAR.
///
/// Generates `as_str`/`from_str` helpers, `Display`, serde in snake_case and,
/// with the `diesel` feature, `ToSql`/`FromSql` for `Text` columns.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        #[cfg_attr(feature = "diesel", derive(diesel::AsExpression, diesel::FromSqlRow))]
        #[cfg_attr(feature = "diesel", diesel(sql_type = diesel::sql_types::Text))]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            #[allow(clippy::should_implement_trait)]
            pub fn from_str(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        #[cfg(feature = "diesel")]
        impl diesel::serialize::ToSql<diesel::sql_types::Text, diesel::pg::Pg> for $name {
            fn to_sql<'b>(
                &'b self,
                out: &mut diesel::serialize::Output<'b, '_, diesel::pg::Pg>,
            ) -> diesel::serialize::Result {
                use std::io::Write;
                out.write_all(self.as_str().as_bytes())?;
                Ok(diesel::serialize::IsNull::No)
            }
        }

        #[cfg(feature = "diesel")]
        impl diesel::deserialize::FromSql<diesel::sql_types::Text, diesel::pg::Pg> for $name {
            fn from_sql(bytes: diesel::pg::PgValue<'_>) -> diesel::deserialize::Result<Self> {
                let s = <String as diesel::deserialize::FromSql<
                    diesel::sql_types::Text,
                    diesel::pg::Pg,
                >>::from_sql(bytes)?;
                $name::from_str(&s).ok_or_else(|| {
                    tracing::warn!("Unrecognized {} value in database: {}", stringify!($name), s);
                    format!("unrecognized {} value: {}", stringify!($name), s).into()
                })
            }
        }
    };
}

// ============================================================================
// Enumerations
// ============================================================================

text_enum! {
    /// Where a client sits in the agent's pipeline
    ClientStatus {
        Lead => "lead",
        Prospect => "prospect",
        Active => "active",
        Inactive => "inactive",
    }
}

text_enum! {
    /// Kind of client meeting; drives the default checklist
    MeetingType {
        FirstConsultation => "first_consultation",
        NeedsAnalysis => "needs_analysis",
        PolicyReview => "policy_review",
        ContractSigning => "contract_signing",
        FollowUp => "follow_up",
        Other => "other",
    }
}

text_enum! {
    MeetingStatus {
        Scheduled => "scheduled",
        Completed => "completed",
        Cancelled => "cancelled",
        Rescheduled => "rescheduled",
    }
}

text_enum! {
    /// Synchronization state, used both per meeting and for the agent as a whole
    SyncState {
        NotSynced => "not_synced",
        Syncing => "syncing",
        Synced => "synced",
        SyncFailed => "sync_failed",
        SyncConflict => "sync_conflict",
    }
}

text_enum! {
    SyncDirection {
        ToExternal => "to_external",
        FromExternal => "from_external",
    }
}

text_enum! {
    SyncOutcome {
        Synced => "synced",
        Failed => "failed",
        Conflict => "conflict",
    }
}

text_enum! {
    /// Which side wins when resolving a sync conflict
    ConflictSide {
        Local => "local",
        External => "external",
    }
}

impl MeetingType {
    /// Checklist items seeded when a meeting of this type is created.
    pub fn default_checklist(&self) -> &'static [&'static str] {
        match self {
            MeetingType::FirstConsultation => &[
                "Send welcome packet",
                "Collect current policy documents",
                "Complete needs assessment questionnaire",
                "Schedule follow-up meeting",
            ],
            MeetingType::NeedsAnalysis => &[
                "Review household income and expenses",
                "Identify coverage gaps",
                "Prepare product recommendations",
            ],
            MeetingType::PolicyReview => &[
                "Pull current policy summary",
                "Check beneficiary designations",
                "Discuss premium adjustments",
            ],
            MeetingType::ContractSigning => &[
                "Prepare application forms",
                "Verify client identification",
                "Collect signatures",
            ],
            MeetingType::FollowUp => &["Review open questions", "Confirm next steps"],
            MeetingType::Other => &[],
        }
    }
}

// ============================================================================
// Domain Types
// ============================================================================

/// Agent struct matching database column order exactly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct Agent {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub google_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct Client {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: ClientStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Meeting struct matching database column order exactly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct Meeting {
    pub id: Uuid,
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
    pub external_event_id: Option<String>,
    pub sync_status: SyncState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct ChecklistItem {
    pub id: Uuid,
    pub meeting_id: Uuid,
    pub label: String,
    pub position: i32,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct MeetingNote {
    pub id: Uuid,
    pub meeting_id: Uuid,
    pub agent_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// One synchronization attempt. Rows are only ever inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct SyncLog {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub direction: SyncDirection,
    pub outcome: SyncOutcome,
    pub meeting_id: Option<Uuid>,
    pub external_event_id: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Auth API Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginInitResponse {
    pub auth_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUserResponse {
    pub agent_id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

// ============================================================================
// Client API Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClientRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<ClientStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateClientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<ClientStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientListQuery {
    pub status: Option<ClientStatus>,
}

// ============================================================================
// Meeting API Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMeetingRequest {
    pub client_id: Uuid,
    pub title: String,
    pub meeting_type: MeetingType,
    pub scheduled_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMeetingRequest {
    pub title: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleMeetingRequest {
    pub scheduled_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Query parameters selecting a calendar month
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonthQuery {
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpcomingQuery {
    pub limit: Option<i64>,
}

/// A meeting together with everything hanging off it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingDetails {
    pub meeting: Meeting,
    pub checklist: Vec<ChecklistItem>,
    pub notes: Vec<MeetingNote>,
    pub sync_logs: Vec<SyncLog>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChecklistItemRequest {
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNoteRequest {
    pub body: String,
}

// ============================================================================
// Calendar Sync API Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectCalendarResponse {
    pub auth_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleSyncRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConflictRequest {
    pub side: ConflictSide,
}

/// Calendar settings as exposed over the API (tokens are never returned)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarSettingsResponse {
    pub connected: bool,
    pub calendar_id: String,
    pub sync_enabled: bool,
    pub sync_status: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub channel_id: Option<String>,
    pub channel_expires_at: Option<DateTime<Utc>>,
}

/// Outcome counts of a single sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub synced: usize,
    pub conflicts: usize,
    pub failed: usize,
}

impl PassReport {
    pub fn attempts(&self) -> usize {
        self.synced + self.conflicts + self.failed
    }

    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Synced => self.synced += 1,
            SyncOutcome::Conflict => self.conflicts += 1,
            SyncOutcome::Failed => self.failed += 1,
        }
    }
}

/// Result of a full two-way sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    pub status: SyncState,
    pub pulled: PassReport,
    pub pushed: PassReport,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusResponse {
    pub sync_enabled: bool,
    pub status: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
    pub recent_logs: Vec<SyncLog>,
}

// ============================================================================
// Reporting Types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeetingStats {
    pub year: i32,
    pub month: u32,
    pub total: i64,
    pub scheduled: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub rescheduled: i64,
    pub by_type: Vec<MeetingTypeCount>,
    pub checklist_items: i64,
    pub checklist_completed: i64,
    pub checklist_completion: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingTypeCount {
    pub meeting_type: MeetingType,
    pub count: i64,
}
