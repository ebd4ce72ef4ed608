//! Google Calendar synchronization.
//!
//! - `provider`: the external calendar interface and its error type
//! - `google`: Google Calendar implementation (google-calendar3 + OAuth over reqwest)
//! - `store`: persistence seam backed by Postgres
//! - `sync`: the reconciliation engine
//! - `tokens`: token encoding and expiry checks

pub mod google;
pub mod provider;
pub mod store;
pub mod sync;
pub mod tokens;

pub use google::{GoogleCalendar, GoogleConfig};
pub use store::PgSyncStore;
pub use sync::{CalendarSync, SyncConfig, SyncError};

/// The engine as wired into the running server.
pub type AppCalendarSync = CalendarSync<GoogleCalendar, PgSyncStore>;
