use std::time::Duration;

use reqwest::Client;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::ScanError;
use crate::portal::parser;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/122.0.0.0 Safari/537.36";

/// Pause between handshake steps so the portal sees a human-ish pace.
const STEP_DELAY: Duration = Duration::from_millis(300);

/// Connection details for one portal-backed source.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Entry page carrying the country-selection form.
    pub entry_url: String,
    /// Origin the form action and redirect paths are resolved against.
    pub origin: String,
    /// Base URL used for term probes once the session exists.
    pub portal_base: String,
    /// Value posted as the country selection.
    pub country_id: String,
}

/// An established portal session: a cookie-carrying client plus the probe
/// base URL. Reusable across all probes within one scan; never shared across
/// concurrent scans.
pub struct PortalSession {
    client: Client,
    portal_base: String,
}

impl PortalSession {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn portal_base(&self) -> &str {
        &self.portal_base
    }

    /// Fixed multi-step handshake: fetch the entry page, lift its hidden form
    /// fields, post the country selection, then follow the server's redirect.
    /// The redirect may arrive as an HTTP redirect or as a quoted path string
    /// in the response body; both are handled. Any step that misses an
    /// expected status or field fails the whole scan for this source.
    pub async fn establish(config: &PortalConfig) -> Result<PortalSession, ScanError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()?;

        let entry = client.get(&config.entry_url).send().await?;
        if !entry.status().is_success() {
            return Err(ScanError::Session(format!(
                "entry page HTTP {}",
                entry.status()
            )));
        }
        let entry_html = entry.text().await?;

        let (action, mut fields) = parser::hidden_form_fields(&entry_html)
            .ok_or_else(|| ScanError::Session("no form on entry page".to_string()))?;
        fields.insert("CheckOrderList".to_string(), config.country_id.clone());

        sleep(STEP_DELAY).await;

        let post_url = format!("{}{}", config.origin, action);
        let selected = client.post(&post_url).form(&fields).send().await?;
        if !selected.status().is_success() {
            return Err(ScanError::Session(format!(
                "country selection HTTP {}",
                selected.status()
            )));
        }

        // The portal answers the POST with the next path as a quoted string
        // (unless the client already followed a plain HTTP redirect).
        let landed_url = selected.url().to_string();
        let body = selected.text().await?;
        let redirect_path = body.trim().trim_matches('"').to_string();

        let final_url = if redirect_path.starts_with('/') {
            sleep(STEP_DELAY).await;
            let residence = client
                .get(format!("{}{}", config.origin, redirect_path))
                .send()
                .await?;
            if !residence.status().is_success() {
                return Err(ScanError::Session(format!(
                    "residence page HTTP {}",
                    residence.status()
                )));
            }
            residence.url().to_string()
        } else if landed_url != post_url {
            debug!(url = %landed_url, "portal issued a plain HTTP redirect");
            landed_url
        } else {
            return Err(ScanError::Session(format!(
                "unexpected redirect response: {}",
                body.chars().take(100).collect::<String>()
            )));
        };

        info!(country = %config.country_id, url = %final_url, "portal session established");
        Ok(PortalSession {
            client,
            portal_base: config.portal_base.clone(),
        })
    }
}
