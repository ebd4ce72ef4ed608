use anyhow::Context;
use chrono::{Datelike, Local};
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use shared_types::{
    ChecklistItem, Client as CrmClient, ClientListQuery, ClientStatus, Meeting, MeetingDetails,
    SyncStatusResponse, SyncSummary,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "crm-cli")]
#[command(about = "CLI for the agent CRM backend API")]
#[command(
    long_about = "A command-line interface for the agent CRM server.\n\n\
    Lists clients and meetings, ticks off checklist items and drives calendar sync.\n\
    Authenticates with the same JWT the web app uses, passed as a bearer token."
)]
struct Cli {
    /// Backend server URL to connect to.
    #[arg(
        short,
        long,
        default_value = "http://localhost:3000",
        env = "CRM_API_URL"
    )]
    base_url: String,

    /// Session token (the value of the `auth_token` cookie).
    #[arg(long, env = "CRM_API_TOKEN", hide_env_values = true)]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse and update meetings
    Meetings {
        #[command(subcommand)]
        action: MeetingAction,
    },
    /// Work through meeting checklists
    Checklist {
        #[command(subcommand)]
        action: ChecklistAction,
    },
    /// List clients
    Clients {
        #[command(subcommand)]
        action: ClientAction,
    },
    /// Google Calendar synchronization
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
}

#[derive(Subcommand)]
enum MeetingAction {
    /// List the meetings of one month (defaults to the current month)
    List {
        #[arg(short, long)]
        year: Option<i32>,

        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
    },

    /// Show a meeting with its checklist, notes and sync history
    Show { id: Uuid },

    /// Cancel a meeting; the calendar event is updated in the background
    Cancel { id: Uuid },
}

#[derive(Subcommand)]
enum ChecklistAction {
    /// Flip a checklist item between open and done
    Toggle { id: Uuid },
}

#[derive(Subcommand)]
enum ClientAction {
    /// List clients, optionally narrowed to one pipeline status
    List {
        #[arg(short, long, value_parser = parse_client_status)]
        status: Option<ClientStatus>,
    },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Run a full two-way sync now
    Run,
    /// Show the sync state and the most recent log entries
    Status,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

fn parse_client_status(value: &str) -> Result<ClientStatus, String> {
    ClientStatus::from_str(value).ok_or_else(|| {
        let known: Vec<_> = ClientStatus::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown status '{}', expected one of: {}", value, known.join(", "))
    })
}

fn short_id(id: &Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Send the request with the bearer token and decode a JSON body, turning
/// API errors into readable messages.
async fn send_json<T: DeserializeOwned>(request: RequestBuilder, token: &str) -> anyhow::Result<T> {
    let response = send(request, token).await?;
    response.json().await.context("Failed to decode response body")
}

async fn send(request: RequestBuilder, token: &str) -> anyhow::Result<Response> {
    let response = request
        .bearer_auth(token)
        .send()
        .await
        .context("Failed to reach the backend")?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    anyhow::bail!("{} ({})", message, status.as_u16())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let api = format!("{}/api", cli.base_url.trim_end_matches('/'));

    match cli.command {
        Commands::Meetings { action } => handle_meetings(&client, &api, &cli.token, action).await?,
        Commands::Checklist { action } => {
            handle_checklist(&client, &api, &cli.token, action).await?
        }
        Commands::Clients { action } => handle_clients(&client, &api, &cli.token, action).await?,
        Commands::Sync { action } => handle_sync(&client, &api, &cli.token, action).await?,
    }

    Ok(())
}

fn print_meeting(meeting: &Meeting) {
    println!(
        "[{}] {}-{}  {} ({}, {}, sync: {})",
        short_id(&meeting.id),
        meeting.scheduled_at.with_timezone(&Local).format("%a %d %b %H:%M"),
        meeting.ends_at.with_timezone(&Local).format("%H:%M"),
        meeting.title,
        meeting.meeting_type,
        meeting.status,
        meeting.sync_status
    );
}

async fn handle_meetings(
    client: &Client,
    api: &str,
    token: &str,
    action: MeetingAction,
) -> anyhow::Result<()> {
    let url = format!("{}/meetings", api);

    match action {
        MeetingAction::List { year, month } => {
            let today = Local::now();
            let year = year.unwrap_or(today.year());
            let month = month.unwrap_or(today.month());

            let meetings: Vec<Meeting> = send_json(
                client.get(&url).query(&[("year", year.to_string()), ("month", month.to_string())]),
                token,
            )
            .await?;

            if meetings.is_empty() {
                println!("No meetings in {}-{:02}.", year, month);
            } else {
                for meeting in &meetings {
                    print_meeting(meeting);
                }
            }
        }
        MeetingAction::Show { id } => {
            let details: MeetingDetails =
                send_json(client.get(format!("{}/{}", url, id)), token).await?;

            print_meeting(&details.meeting);
            if let Some(location) = &details.meeting.location {
                println!("    Location: {}", location);
            }
            if let Some(description) = &details.meeting.description {
                println!("    {}", description);
            }

            if !details.checklist.is_empty() {
                println!("\nChecklist:");
                for item in &details.checklist {
                    let mark = if item.completed { "✓" } else { "○" };
                    println!("  {} [{}] {}", mark, short_id(&item.id), item.label);
                }
            }

            if !details.notes.is_empty() {
                println!("\nNotes:");
                for note in &details.notes {
                    println!(
                        "  {}  {}",
                        note.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                        note.body
                    );
                }
            }

            if !details.sync_logs.is_empty() {
                println!("\nSync history:");
                for log in &details.sync_logs {
                    println!(
                        "  {}  {} {}  {}",
                        log.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                        log.direction,
                        log.outcome,
                        log.message.as_deref().unwrap_or("")
                    );
                }
            }
        }
        MeetingAction::Cancel { id } => {
            let meeting: Meeting =
                send_json(client.post(format!("{}/{}/cancel", url, id)), token).await?;
            println!("Cancelled meeting: [{}] {}", short_id(&meeting.id), meeting.title);
        }
    }

    Ok(())
}

async fn handle_checklist(
    client: &Client,
    api: &str,
    token: &str,
    action: ChecklistAction,
) -> anyhow::Result<()> {
    match action {
        ChecklistAction::Toggle { id } => {
            let item: ChecklistItem =
                send_json(client.post(format!("{}/checklist/{}/toggle", api, id)), token).await?;
            let state = if item.completed { "done" } else { "open" };
            println!("Marked as {}: [{}] {}", state, short_id(&item.id), item.label);
        }
    }

    Ok(())
}

async fn handle_clients(
    client: &Client,
    api: &str,
    token: &str,
    action: ClientAction,
) -> anyhow::Result<()> {
    match action {
        ClientAction::List { status } => {
            let clients: Vec<CrmClient> = send_json(
                client
                    .get(format!("{}/clients", api))
                    .query(&ClientListQuery { status }),
                token,
            )
            .await?;

            if clients.is_empty() {
                println!("No clients found.");
            } else {
                for c in clients {
                    println!(
                        "[{}] {} {} ({}){}",
                        short_id(&c.id),
                        c.first_name,
                        c.last_name,
                        c.status,
                        c.email.map(|e| format!("  <{}>", e)).unwrap_or_default()
                    );
                }
            }
        }
    }

    Ok(())
}

async fn handle_sync(client: &Client, api: &str, token: &str, action: SyncAction) -> anyhow::Result<()> {
    match action {
        SyncAction::Run => {
            let summary: SyncSummary =
                send_json(client.post(format!("{}/calendar/sync", api)), token).await?;
            println!("Sync finished: {}", summary.status);
            println!(
                "  pulled: {} synced, {} conflicts, {} failed",
                summary.pulled.synced, summary.pulled.conflicts, summary.pulled.failed
            );
            println!(
                "  pushed: {} synced, {} conflicts, {} failed",
                summary.pushed.synced, summary.pushed.conflicts, summary.pushed.failed
            );
        }
        SyncAction::Status => {
            let status: SyncStatusResponse =
                send_json(client.get(format!("{}/calendar/status", api)), token).await?;
            println!(
                "Sync {} ({})",
                if status.sync_enabled { "enabled" } else { "disabled" },
                status.status
            );
            if let Some(at) = status.last_synced_at {
                println!("  last sync: {}", at.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
            }
            if let Some(error) = &status.last_sync_error {
                println!("  last error: {}", error);
            }
            for log in &status.recent_logs {
                println!(
                    "  {}  {} {}  {}",
                    log.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    log.direction,
                    log.outcome,
                    log.message.as_deref().unwrap_or("")
                );
            }
        }
    }

    Ok(())
}
