//! Authentication module for JWT-based auth with Google OAuth login.
//!
//! This module provides:
//! - JWT token creation and validation
//! - Google OAuth flow for agent login (agents are created on first sign-in)
//! - `require_auth` middleware injecting `AuthAgent` into requests

mod handlers;
pub(crate) mod jwt;
mod middleware;
pub mod types;

pub use handlers::{auth_callback, auth_login, auth_logout, auth_me};
pub use middleware::{build_auth_cookie, extract_auth_agent, require_auth};
pub use types::{AuthAgent, AuthConfig};
