//! Background tasks running inside the backend process.

pub mod calendar;

pub use calendar::start_calendar_polling_task;
