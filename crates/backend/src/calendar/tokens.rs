//! Token storage encoding and expiry checks.
//!
//! Tokens are stored base64-encoded. This is an encoding, not encryption.

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};

/// Refresh this long before the provider's stated expiry.
pub const REFRESH_MARGIN_MINUTES: i64 = 5;

pub fn encode(token: &str) -> String {
    STANDARD.encode(token.as_bytes())
}

pub fn decode(stored: &str) -> anyhow::Result<String> {
    let bytes = STANDARD
        .decode(stored)
        .context("Stored token is not valid base64")?;
    String::from_utf8(bytes).context("Stored token is not valid UTF-8")
}

/// True when the access token is missing an expiry or expires within the margin.
pub fn needs_refresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(at) => at - Duration::minutes(REFRESH_MARGIN_MINUTES) <= now,
        None => true,
    }
}

/// Absolute expiry for a grant's relative `expires_in` seconds.
pub fn expiry_from(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    now + Duration::seconds(expires_in)
}
