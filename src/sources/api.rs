//! JSON-API source: a documented accommodation API traversed
//! country -> city -> residence -> room -> tenancy-option group. Unlike the
//! portal source, its HTTP helper retries internally with bounded attempts
//! and linear backoff on 5xx and transport errors.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::catalog::Entity;
use crate::error::ScanError;
use crate::filters::WEEKS_PER_MONTH;
use crate::matching::{is_window_match, AcademicYear, WindowPolicy};
use crate::options::NormalizedOption;

const RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub struct ApiSource {
    client: Client,
    name: String,
    base_url: String,
    country: String,
    collection: String,
}

impl ApiSource {
    pub fn new(name: String, base_url: String, country: String, collection: String) -> ApiSource {
        let client = Client::builder()
            .user_agent(concat!("roomwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build http client");
        ApiSource {
            client,
            name,
            base_url,
            country,
            collection,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, ScanError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self.client.get(&url).query(params).send().await;
            match result {
                Ok(resp) if resp.status().is_server_error() && attempt < RETRIES => {
                    warn!(path, status = %resp.status(), attempt, "API 5xx, retrying");
                }
                Ok(resp) => {
                    let resp = resp.error_for_status()?;
                    return Ok(resp.json().await?);
                }
                Err(err) if attempt < RETRIES => {
                    warn!(path, error = %err, attempt, "API request failed, retrying");
                }
                Err(err) => return Err(err.into()),
            }
            sleep(RETRY_BACKOFF * attempt).await;
        }
    }

    async fn list(&self, path: &str, key: &str, params: &[(&str, &str)]) -> Result<Vec<Value>, ScanError> {
        let data = self.get_json(path, params).await?;
        Ok(data
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn resolve_collection_id(&self) -> Result<Option<String>, ScanError> {
        let countries = self.list("countries", "countries", &[]).await?;
        let Some(country) = find_by_name(&countries, &self.country) else {
            error!(country = %self.country, "country not found in API");
            return Ok(None);
        };
        let Some(country_id) = id_string(country, &["countryId", "id"]) else {
            return Ok(None);
        };

        let cities = self
            .list("cities", "cities", &[("countryId", country_id.as_str())])
            .await?;
        let Some(city) = find_by_name(&cities, &self.collection) else {
            error!(city = %self.collection, "city not found in API");
            return Ok(None);
        };
        Ok(id_string(city, &["contentId", "id"]))
    }

    pub async fn discover(&self) -> Result<Vec<Entity>, ScanError> {
        let Some(city_id) = self.resolve_collection_id().await? else {
            return Ok(Vec::new());
        };
        let residences = self
            .list("residences", "residences", &[("cityId", city_id.as_str())])
            .await?;
        Ok(residences
            .iter()
            .filter_map(|r| {
                let id = id_string(r, &["id"])?;
                Some(Entity {
                    display_name: str_field(r, "name").unwrap_or_else(|| id.clone()),
                    location_hint: str_field(r, "locationInfo").unwrap_or_default(),
                    collection_key: self.collection.clone(),
                    page_url: str_field(r, "portalLink").unwrap_or_default(),
                    slug: id,
                })
            })
            .collect())
    }

    pub async fn scan(
        &self,
        policy: &WindowPolicy,
        year: &AcademicYear,
    ) -> Result<Vec<NormalizedOption>, ScanError> {
        let Some(city_id) = self.resolve_collection_id().await? else {
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        let residences = self
            .list("residences", "residences", &[("cityId", city_id.as_str())])
            .await?;

        for residence in &residences {
            let (Some(residence_id), Some(content_id)) = (
                id_string(residence, &["id"]),
                id_string(residence, &["contentId"]),
            ) else {
                continue;
            };

            let rooms = self
                .list("rooms", "rooms", &[("residenceId", residence_id.as_str())])
                .await?;
            for room in &rooms {
                // Anything but an explicit `false` counts as sold out.
                if room.get("soldOut").and_then(Value::as_bool) != Some(false) {
                    continue;
                }
                let Some(room_id) = id_string(room, &["id"]) else {
                    continue;
                };

                let groups = self
                    .list(
                        "tenancyOptionsBySSId",
                        "tenancy-options",
                        &[
                            ("residenceId", residence_id.as_str()),
                            ("residenceContentId", content_id.as_str()),
                            ("roomId", room_id.as_str()),
                        ],
                    )
                    .await?;

                for group in &groups {
                    if !group_matches_year(group, year) {
                        debug!(residence = %residence_id, "tenancy group outside academic year");
                        continue;
                    }
                    let options = group
                        .get("tenancyOption")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    for option in &options {
                        let label = option_label(option);
                        let start = str_field(option, "startDate");
                        let end = str_field(option, "endDate");
                        // Match against both label fields; the keyword may
                        // live in either one.
                        if !is_window_match(
                            &option_match_text(option),
                            start.as_deref(),
                            end.as_deref(),
                            None,
                            policy,
                        ) {
                            continue;
                        }

                        let weekly = weekly_price(room);
                        let price_label = match weekly {
                            Some(p) => format!("\u{20ac}{p:.0}/week"),
                            None => str_field(room, "priceLabel").unwrap_or_default(),
                        };
                        results.push(NormalizedOption {
                            source: self.name.clone(),
                            entity_id: residence_id.clone(),
                            room_type: str_field(room, "name").unwrap_or_default(),
                            price_weekly: weekly,
                            price_label,
                            available: true,
                            booking_url: str_field(option, "linkToRedirect")
                                .or_else(|| str_field(residence, "portalLink"))
                                .or_else(|| str_field(residence, "paymentLink")),
                            start_date: start,
                            end_date: end,
                            collection_key: self.collection.clone(),
                            option_label: label,
                            location: str_field(residence, "locationInfo"),
                            extra: room_extra(room, &residence_id, &content_id, &room_id),
                        });
                    }
                }
            }
        }

        Ok(results)
    }
}

fn option_label(option: &Value) -> String {
    str_field(option, "name")
        .or_else(|| str_field(option, "formattedLabel"))
        .unwrap_or_default()
}

/// Text the window keywords are checked against: `name` and `formattedLabel`
/// concatenated, since either field may carry the semester wording.
fn option_match_text(option: &Value) -> String {
    let name = str_field(option, "name").unwrap_or_default();
    let formatted = str_field(option, "formattedLabel").unwrap_or_default();
    format!("{name} {formatted}").trim().to_string()
}

fn room_extra(
    room: &Value,
    residence_id: &str,
    content_id: &str,
    room_id: &str,
) -> HashMap<String, Value> {
    let mut extra = HashMap::new();
    for key in ["bathroomArrangement", "kitchenArrangement"] {
        if let Some(v) = room.get(key) {
            extra.insert(key.to_string(), v.clone());
        }
    }
    extra.insert("residenceId".to_string(), Value::from(residence_id));
    extra.insert("residenceContentId".to_string(), Value::from(content_id));
    extra.insert("roomId".to_string(), Value::from(room_id));
    extra
}

/// Case-insensitive match on the `name` field.
fn find_by_name<'a>(items: &'a [Value], name: &str) -> Option<&'a Value> {
    let target = name.trim().to_lowercase();
    items.iter().find(|item| {
        str_field(item, "name")
            .map(|n| n.trim().to_lowercase() == target)
            .unwrap_or(false)
    })
}

/// Read an id that may be serialized as a string or a number.
fn id_string(item: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match item.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn str_field(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn num_field(item: &Value, key: &str) -> Option<f64> {
    match item.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Weekly price from the room's billing-cycle label, falling back to the
/// per-night rate times seven.
fn weekly_price(room: &Value) -> Option<f64> {
    if let Some(label) = str_field(room, "priceLabel") {
        let label = label.to_lowercase();
        if let Some(cycle) = num_field(room, "minPriceForBillingCycle") {
            if label.contains("week") {
                return Some(cycle);
            }
            if label.contains("month") {
                return Some(cycle / WEEKS_PER_MONTH);
            }
        }
    }
    num_field(room, "minPricePerNight").map(|n| n * 7.0)
}

/// Tenancy groups carry explicit from/to years; a group only matches when
/// every year it states agrees with the target.
fn group_matches_year(group: &Value, year: &AcademicYear) -> bool {
    if let Some(from) = group.get("fromYear").and_then(Value::as_i64) {
        if from as i32 != year.start_year {
            return false;
        }
    }
    if let Some(to) = group.get("toYear").and_then(Value::as_i64) {
        if to as i32 != year.end_year {
            return false;
        }
    }
    true
}
