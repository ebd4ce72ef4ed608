//! Business logic shared by handlers and the background poller.

pub mod meetings;

pub use meetings::{MeetingError, MeetingService};
