//! Alert delivery. The stdout notifier always works; the webhook notifier
//! posts a JSON payload and reports delivery failure without crashing the
//! watch loop.

use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tracing::{error, info};

use crate::options::NormalizedOption;

pub enum Notifier {
    Stdout,
    Webhook { client: Client, url: String },
    /// Misconfigured at startup; alerts are dropped with an error log.
    Disabled(String),
}

impl Notifier {
    pub fn from_config(kind: &str, webhook_url: Option<&str>) -> Notifier {
        match kind.trim().to_lowercase().as_str() {
            "stdout" | "" => Notifier::Stdout,
            "webhook" => match webhook_url {
                Some(url) if url.starts_with("http") => Notifier::Webhook {
                    client: Client::builder()
                        .timeout(Duration::from_secs(15))
                        .build()
                        .unwrap_or_default(),
                    url: url.to_string(),
                },
                _ => Notifier::Disabled("webhook notifier needs a WEBHOOK_URL".to_string()),
            },
            other => Notifier::Disabled(format!("unknown notifier '{other}'")),
        }
    }

    /// Returns the configuration problem, if any, so the caller can log it
    /// once at startup instead of on every cycle.
    pub fn validate(&self) -> Option<&str> {
        match self {
            Notifier::Disabled(reason) => Some(reason),
            _ => None,
        }
    }

    /// Deliver one alert. The webhook payload carries the structured options
    /// next to the text so machine consumers skip re-parsing the message.
    /// Returns whether delivery succeeded, for logging; the scheduler records
    /// the keys either way.
    pub async fn send(&self, message: &str, options: &[NormalizedOption]) -> bool {
        match self {
            Notifier::Stdout => {
                println!("\n==============================");
                println!("{message}");
                println!("==============================\n");
                true
            }
            Notifier::Webhook { client, url } => {
                let payload = json!({
                    "content": message,
                    "text": message,
                    "options": options,
                });
                match client.post(url).json(&payload).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        info!(status = %resp.status(), "webhook alert delivered");
                        true
                    }
                    Ok(resp) => {
                        error!(status = %resp.status(), "webhook rejected alert");
                        false
                    }
                    Err(err) => {
                        error!(error = %err, "webhook delivery failed");
                        false
                    }
                }
            }
            Notifier::Disabled(reason) => {
                error!(reason, "notifier disabled, alert dropped");
                false
            }
        }
    }
}
