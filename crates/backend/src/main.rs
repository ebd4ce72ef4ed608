use axum::{
    http::{header, Method, StatusCode},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod calendar;
mod config;
mod db;
pub mod error;
mod handlers;
mod mailer;
mod models;
mod pollers;
pub mod repository;
mod schema;
mod services;

use auth::AuthConfig;
use calendar::{AppCalendarSync, CalendarSync, GoogleCalendar, GoogleConfig, PgSyncStore, SyncConfig};
use config::AppConfig;
use db::DbPool;
use mailer::{Mailer, MailerConfig};
use services::MeetingService;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub auth_config: Arc<AuthConfig>,
    pub calendar: Arc<AppCalendarSync>,
    pub meetings: Arc<MeetingService>,
    pub mailer: Mailer,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("crm_backend=debug,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_config = AppConfig::from_env()?;
    let auth_config = Arc::new(AuthConfig::from_env()?);

    // Establish database connection pool
    let pool = db::establish_connection_pool(
        &app_config.database_url,
        app_config.db_pool_size,
        app_config.database_tls,
    )?;

    let calendar: Arc<AppCalendarSync> = Arc::new(CalendarSync::new(
        GoogleCalendar::new(GoogleConfig::from_env()?),
        PgSyncStore::new(pool.clone()),
        SyncConfig::from_env(),
    ));
    let meetings = Arc::new(MeetingService::new(pool.clone(), Arc::clone(&calendar)));

    let state = AppState {
        pool: pool.clone(),
        auth_config,
        calendar: Arc::clone(&calendar),
        meetings,
        mailer: Mailer::new(MailerConfig::from_env()),
    };

    // Start calendar sync background task
    let poll_pool = pool.clone();
    let poll_calendar = Arc::clone(&calendar);
    tokio::spawn(async move {
        pollers::start_calendar_polling_task(poll_pool, poll_calendar).await;
    });

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], app_config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        // Client routes
        .route("/api/clients", get(handlers::clients::list_clients))
        .route("/api/clients", post(handlers::clients::create_client))
        .route("/api/clients/:id", get(handlers::clients::get_client))
        .route("/api/clients/:id", put(handlers::clients::update_client))
        .route("/api/clients/:id", delete(handlers::clients::delete_client))
        // Meeting routes
        .route("/api/meetings", get(handlers::meetings::list_meetings))
        .route("/api/meetings", post(handlers::meetings::create_meeting))
        .route("/api/meetings/upcoming", get(handlers::meetings::list_upcoming))
        .route(
            "/api/meetings/details",
            get(handlers::meetings::list_meetings_with_details),
        )
        .route("/api/meetings/:id", get(handlers::meetings::get_meeting))
        .route("/api/meetings/:id", put(handlers::meetings::update_meeting))
        .route("/api/meetings/:id", delete(handlers::meetings::delete_meeting))
        .route(
            "/api/meetings/:id/reschedule",
            post(handlers::meetings::reschedule_meeting),
        )
        .route("/api/meetings/:id/cancel", post(handlers::meetings::cancel_meeting))
        .route(
            "/api/meetings/:id/complete",
            post(handlers::meetings::complete_meeting),
        )
        .route(
            "/api/meetings/:id/sync-logs",
            get(handlers::meetings::list_meeting_sync_logs),
        )
        // Checklist routes
        .route(
            "/api/meetings/:id/checklist",
            get(handlers::meetings::list_checklist),
        )
        .route(
            "/api/meetings/:id/checklist",
            post(handlers::meetings::add_checklist_item),
        )
        .route(
            "/api/checklist/:id/toggle",
            post(handlers::meetings::toggle_checklist_item),
        )
        // Note routes
        .route("/api/meetings/:id/notes", get(handlers::meetings::list_notes))
        .route("/api/meetings/:id/notes", post(handlers::meetings::add_note))
        .route("/api/notes/:id", delete(handlers::meetings::delete_note))
        // Calendar routes
        .route("/api/calendar/connect", post(handlers::calendar::connect_calendar))
        .route("/api/calendar/callback", get(handlers::calendar::calendar_callback))
        .route(
            "/api/calendar/disconnect",
            post(handlers::calendar::disconnect_calendar),
        )
        .route("/api/calendar/settings", get(handlers::calendar::get_settings))
        .route("/api/calendar/toggle", post(handlers::calendar::toggle_sync))
        .route("/api/calendar/sync", post(handlers::calendar::run_sync))
        .route("/api/calendar/status", get(handlers::calendar::sync_status))
        .route("/api/calendar/channel", post(handlers::calendar::upsert_channel))
        .route("/api/calendar/channel", delete(handlers::calendar::delete_channel))
        .route(
            "/api/calendar/conflicts/:meeting_id/resolve",
            post(handlers::calendar::resolve_conflict),
        )
        // Report routes
        .route("/api/reports/meetings", get(handlers::reports::meeting_report))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let public = Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/login", get(auth::auth_login))
        .route("/api/auth/callback", get(auth::auth_callback))
        .route("/api/auth/me", get(auth::auth_me))
        .route("/api/auth/logout", get(auth::auth_logout))
        .route("/api/calendar/webhook", post(handlers::calendar::calendar_webhook));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
        .with_state(state)
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Build CORS layer based on environment configuration.
///
/// If CORS_ALLOWED_ORIGINS is set, only those origins are allowed (with
/// credentials, so the auth cookie travels). Otherwise permissive.
fn build_cors_layer() -> CorsLayer {
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS").ok();

    match allowed_origins {
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                tracing::warn!("CORS_ALLOWED_ORIGINS is set but empty, using permissive CORS");
                CorsLayer::permissive()
            } else {
                tracing::info!("CORS configured for origins: {:?}", origins);
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods([
                        Method::GET,
                        Method::POST,
                        Method::PUT,
                        Method::DELETE,
                        Method::OPTIONS,
                    ])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                    .allow_credentials(true)
            }
        }
        None => {
            tracing::warn!("CORS_ALLOWED_ORIGINS not set, using permissive CORS (development only)");
            CorsLayer::permissive()
        }
    }
}
