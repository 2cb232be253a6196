//! Portal-backed source: discovers entities from the public site, then probes
//! the booking portal's term-id space through an established session. A
//! collection with no portal configured degrades to discover-only.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::catalog::{self, AliasTable, Entity};
use crate::error::ScanError;
use crate::matching::{attribute, is_window_match, matches_academic_year, AcademicYear, WindowPolicy};
use crate::options::NormalizedOption;
use crate::portal::parser::{self, PriceCandidate};
use crate::portal::scanner::CandidateTerm;
use crate::portal::{PortalConfig, PortalSession, TermScanner};

/// Pause between property-page fetches during price enrichment.
const ENRICH_DELAY: Duration = Duration::from_millis(500);

pub struct PortalSource {
    client: Client,
    name: String,
    site_base: String,
    collection: String,
    city_slug: String,
    portal: Option<PortalConfig>,
    scan_start: u32,
    scan_end: u32,
    max_misses: u32,
    probe_delay: Duration,
}

impl PortalSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        site_base: String,
        collection: String,
        portal: Option<PortalConfig>,
        scan_start: u32,
        scan_end: u32,
        max_misses: u32,
        probe_delay: Duration,
    ) -> PortalSource {
        let client = Client::builder()
            .user_agent(concat!("roomwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(20))
            .build()
            .expect("failed to build http client");
        let city_slug = collection.trim().to_lowercase().replace(' ', "-");
        PortalSource {
            client,
            name,
            site_base,
            collection,
            city_slug,
            portal,
            scan_start,
            scan_end,
            max_misses,
            probe_delay,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, url: &str) -> Option<String> {
        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
            Ok(resp) => {
                warn!(url, status = %resp.status(), "page fetch failed");
                None
            }
            Err(err) => {
                warn!(url, error = %err, "page fetch failed");
                None
            }
        }
    }

    /// Scrape the city landing page for known properties. Fails soft: an
    /// unreachable page yields an empty catalog, not an error.
    pub async fn discover(&self) -> Result<Vec<Entity>, ScanError> {
        let url = format!("{}/locations/{}", self.site_base, self.city_slug);
        let Some(html) = self.fetch_page(&url).await else {
            return Ok(Vec::new());
        };
        let entities =
            catalog::parse_entity_links(&html, &self.site_base, &self.city_slug, &self.collection);
        if entities.is_empty() {
            warn!(city = %self.city_slug, "no properties found on city page");
        }
        Ok(entities)
    }

    pub async fn scan(
        &self,
        policy: &WindowPolicy,
        year: &AcademicYear,
    ) -> Result<Vec<NormalizedOption>, ScanError> {
        let entities = self.discover().await?;
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let aliases = catalog::build_alias_table(&entities);
        info!(
            collection = %self.collection,
            count = entities.len(),
            "discovered entities"
        );

        let Some(portal) = &self.portal else {
            warn!(
                collection = %self.collection,
                "no portal configured; source is discover-only"
            );
            return Ok(Vec::new());
        };

        let session = PortalSession::establish(portal).await?;
        let scanner = TermScanner::new(&session, self.probe_delay);
        let terms = scanner
            .scan(self.scan_start, self.scan_end, self.max_misses)
            .await?;

        let matched = select_terms(&terms, &aliases, policy, year);
        info!(
            collection = %self.collection,
            terms = terms.len(),
            matched = matched.len(),
            "terms attributed and window-matched"
        );
        if matched.is_empty() {
            return Ok(Vec::new());
        }

        // Enrich only entities that actually own a matched term.
        let mut rooms_by_slug: HashMap<String, Vec<PriceCandidate>> = HashMap::new();
        for entity in &entities {
            if !matched.iter().any(|(_, slug)| slug == &entity.slug) {
                continue;
            }
            sleep(ENRICH_DELAY).await;
            if let Some(html) = self.fetch_page(&entity.page_url).await {
                let rooms = parser::extract_price_candidates(&html);
                if !rooms.is_empty() {
                    rooms_by_slug.insert(entity.slug.clone(), rooms);
                }
            }
        }

        let mut options = Vec::new();
        for (term, slug) in &matched {
            let entity = entities.iter().find(|e| &e.slug == slug);
            let location = entity
                .map(|e| e.location_hint.clone())
                .filter(|l| !l.is_empty());
            let rooms = rooms_by_slug.get(slug.as_str()).cloned().unwrap_or_default();
            options.extend(term_to_options(
                term,
                &self.name,
                slug,
                &self.collection,
                location,
                &rooms,
            ));
        }
        Ok(options)
    }
}

/// Attribute each term and keep those in the target collection, academic
/// year, and semester window. Unattributed terms are excluded, never guessed.
fn select_terms<'a>(
    terms: &'a [CandidateTerm],
    aliases: &AliasTable,
    policy: &WindowPolicy,
    year: &AcademicYear,
) -> Vec<(&'a CandidateTerm, String)> {
    let mut matched = Vec::new();
    for term in terms {
        let Some(slug) = attribute(&term.raw_name, aliases) else {
            continue;
        };
        if !matches_academic_year(
            &term.raw_name,
            term.start_iso.as_deref(),
            term.end_iso.as_deref(),
            year,
        ) {
            debug!(name = %term.raw_name, "term outside academic year");
            continue;
        }
        // Prefer the printed dates, fall back to the ISO attributes.
        let start = term.start_date.as_deref().or(term.start_iso.as_deref());
        let end = term.end_date.as_deref().or(term.end_iso.as_deref());
        if !is_window_match(&term.raw_name, start, end, term.duration_weeks, policy) {
            continue;
        }
        matched.push((term, slug.to_string()));
    }
    matched
}

/// Fan one matched term out into options, one per known room tier, with a
/// placeholder room when the property page gave us nothing.
fn term_to_options(
    term: &CandidateTerm,
    source: &str,
    entity_id: &str,
    collection: &str,
    location: Option<String>,
    rooms: &[PriceCandidate],
) -> Vec<NormalizedOption> {
    let placeholder;
    let rooms = if rooms.is_empty() {
        placeholder = [PriceCandidate {
            room_type: "Room (type TBC)".to_string(),
            price_label: "price TBC".to_string(),
            price_weekly: None,
        }];
        &placeholder[..]
    } else {
        rooms
    };

    rooms
        .iter()
        .map(|room| {
            let mut extra = HashMap::new();
            extra.insert("termId".to_string(), serde_json::Value::from(term.external_id));
            if let Some(weeks) = term.duration_weeks {
                extra.insert("durationWeeks".to_string(), serde_json::Value::from(weeks));
            }
            NormalizedOption {
                source: source.to_string(),
                entity_id: entity_id.to_string(),
                room_type: room.room_type.clone(),
                price_weekly: room.price_weekly,
                price_label: room.price_label.clone(),
                available: term.has_availability_marker,
                booking_url: Some(term.booking_url.clone()),
                start_date: term.start_iso.clone(),
                end_date: term.end_iso.clone(),
                collection_key: collection.to_string(),
                option_label: term.raw_name.clone(),
                location: location.clone(),
                extra,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::build_alias_table;

    fn entity(name: &str, collection: &str) -> Entity {
        Entity {
            slug: name.to_lowercase().replace(' ', "-"),
            display_name: name.to_string(),
            location_hint: String::new(),
            collection_key: collection.to_string(),
            page_url: String::new(),
        }
    }

    fn term(id: u32, name: &str, start_iso: &str, end_iso: &str, weeks: Option<u32>) -> CandidateTerm {
        CandidateTerm {
            external_id: id,
            raw_name: name.to_string(),
            start_date: None,
            end_date: None,
            start_iso: Some(start_iso.to_string()),
            end_iso: Some(end_iso.to_string()),
            duration_weeks: weeks,
            has_availability_marker: true,
            booking_url: format!("https://portal.test/term/{id}"),
        }
    }

    fn policy() -> WindowPolicy {
        WindowPolicy {
            keywords: vec!["semester 1".into()],
            require_keyword: true,
            max_duration_weeks: 25,
            start_months: [9, 10].into_iter().collect(),
            end_months: [1, 2].into_iter().collect(),
        }
    }

    #[test]
    fn selects_only_attributed_window_matched_terms() {
        let aliases = build_alias_table(&[entity("Binary Hub", "Dublin")]);
        let year = AcademicYear { start_year: 2026, end_year: 2027 };
        let terms = vec![
            term(1, "Binary Hub - 26/27 - Semester 1", "2026-09-01", "2027-01-31", Some(22)),
            // Full year: fails the window.
            term(2, "Binary Hub - 26/27 - 41 Weeks", "2026-08-29", "2027-06-12", Some(41)),
            // Wrong collection: fails attribution.
            term(3, "Pallars - 26/27 - Semester 1", "2026-09-01", "2027-01-31", Some(22)),
            // Wrong year.
            term(4, "Binary Hub - 25/26 - Semester 1", "2025-09-01", "2026-01-31", Some(22)),
        ];
        let matched = select_terms(&terms, &aliases, &policy(), &year);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].0.external_id, 1);
        assert_eq!(matched[0].1, "binary-hub");
    }

    #[test]
    fn term_fans_out_per_room_tier() {
        let t = term(9, "Binary Hub - 26/27 - Semester 1", "2026-09-01", "2027-01-31", Some(22));
        let rooms = vec![
            PriceCandidate {
                room_type: "Bronze Ensuite".into(),
                price_label: "\u{20ac}291/week".into(),
                price_weekly: Some(291.0),
            },
            PriceCandidate {
                room_type: "Gold Ensuite".into(),
                price_label: "\u{20ac}310/week".into(),
                price_weekly: Some(310.0),
            },
        ];
        let options = term_to_options(&t, "portal", "binary-hub", "Dublin", None, &rooms);
        assert_eq!(options.len(), 2);
        assert!(options.iter().all(|o| o.entity_id == "binary-hub"));
        assert!(options.iter().all(|o| o.collection_key == "Dublin"));
        assert!(options.iter().all(|o| o.available));
        assert_eq!(options[0].start_date.as_deref(), Some("2026-09-01"));
        // Distinct room types yield distinct dedup keys for the same term.
        assert_ne!(options[0].dedup_key(), options[1].dedup_key());
    }

    #[test]
    fn unpriced_term_gets_placeholder_room() {
        let t = term(9, "Binary Hub - 26/27 - Semester 1", "2026-09-01", "2027-01-31", None);
        let options = term_to_options(&t, "portal", "binary-hub", "Dublin", None, &[]);
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].room_type, "Room (type TBC)");
        assert_eq!(options[0].price_weekly, None);
    }
}
