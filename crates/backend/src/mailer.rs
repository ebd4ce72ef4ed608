//! Transactional email via the Resend HTTP API.

use serde::Serialize;
use shared_types::Agent;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub api_key: String,
    pub from: String,
}

impl MailerConfig {
    /// `None` unless both `RESEND_API_KEY` and `MAIL_FROM` are set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("RESEND_API_KEY").ok().filter(|s| !s.is_empty())?;
        let from = std::env::var("MAIL_FROM").ok().filter(|s| !s.is_empty())?;
        Some(Self { api_key, from })
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct OutgoingEmail {
    from: String,
    to: Vec<String>,
    subject: String,
    text: String,
}

/// Fire-and-forget sender; a missing config turns every send into a no-op.
#[derive(Clone)]
pub struct Mailer {
    config: Option<MailerConfig>,
    http: reqwest::Client,
}

impl Mailer {
    pub fn new(config: Option<MailerConfig>) -> Self {
        if config.is_none() {
            tracing::info!("RESEND_API_KEY/MAIL_FROM not set, outgoing email disabled");
        }
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Spawn the welcome email for a newly created agent.
    pub fn send_welcome(&self, agent: &Agent) {
        let Some(config) = self.config.clone() else {
            return;
        };

        let email = welcome_email(&config.from, agent);
        let http = self.http.clone();
        let recipient = agent.email.clone();

        tokio::spawn(async move {
            let result = http
                .post(RESEND_ENDPOINT)
                .bearer_auth(&config.api_key)
                .json(&email)
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match result {
                Ok(_) => tracing::info!("Sent welcome email to {}", recipient),
                Err(e) => tracing::warn!("Failed to send welcome email to {}: {}", recipient, e),
            }
        });
    }
}

fn welcome_email(from: &str, agent: &Agent) -> OutgoingEmail {
    let greeting = match agent.name.as_deref() {
        Some(name) if !name.trim().is_empty() => format!("Hi {},", name.trim()),
        _ => "Hi,".to_string(),
    };

    OutgoingEmail {
        from: from.to_string(),
        to: vec![agent.email.clone()],
        subject: "Welcome to your CRM".to_string(),
        text: format!(
            "{}\n\nYour account is ready. Connect your Google Calendar in the settings \
             to keep client meetings in sync.\n",
            greeting
        ),
    }
}
