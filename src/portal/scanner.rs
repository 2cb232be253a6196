use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::ScanError;
use crate::matching::parse_weeks_from_name;
use crate::portal::parser;
use crate::portal::session::PortalSession;

/// One discoverable booking term found by probing a portal identifier.
#[derive(Debug, Clone)]
pub struct CandidateTerm {
    pub external_id: u32,
    pub raw_name: String,
    /// DD/MM/YYYY, as printed on the term page.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// YYYY-MM-DD, from data attributes.
    pub start_iso: Option<String>,
    pub end_iso: Option<String>,
    pub duration_weeks: Option<u32>,
    pub has_availability_marker: bool,
    pub booking_url: String,
}

/// Early-stop bookkeeping for a scan. The two-part rule matters: a short
/// miss streak inside a dense cluster must not end the scan, so termination
/// requires both the streak to exceed the threshold AND the current id to be
/// more than the threshold past the last hit.
#[derive(Debug)]
pub struct ScanCursor {
    max_misses: u32,
    misses: u32,
    last_hit: u32,
}

impl ScanCursor {
    pub fn new(range_start: u32, max_misses: u32) -> Self {
        ScanCursor {
            max_misses,
            misses: 0,
            last_hit: range_start,
        }
    }

    pub fn record_hit(&mut self, id: u32) {
        self.misses = 0;
        self.last_hit = id;
    }

    /// Returns true when the scan should stop.
    pub fn record_miss(&mut self, id: u32) -> bool {
        self.misses += 1;
        self.misses > self.max_misses && id > self.last_hit + self.max_misses
    }

    pub fn last_hit(&self) -> u32 {
        self.last_hit
    }
}

/// Probes a bounded identifier space against an established portal session.
pub struct TermScanner<'a> {
    session: &'a PortalSession,
    probe_delay: Duration,
}

impl<'a> TermScanner<'a> {
    /// `probe_delay` is the mandatory politeness pause between probes; a zero
    /// duration is clamped to the default.
    pub fn new(session: &'a PortalSession, probe_delay: Duration) -> Self {
        let probe_delay = if probe_delay.is_zero() {
            Duration::from_millis(150)
        } else {
            probe_delay
        };
        TermScanner {
            session,
            probe_delay,
        }
    }

    /// Look up one identifier. `Ok(None)` means no term exists at this id
    /// (the response lacks the term-page marker); transport failures are
    /// errors and abort the scan.
    pub async fn probe(&self, id: u32) -> Result<Option<CandidateTerm>, ScanError> {
        let url = format!(
            "{}/General/RoomSearch/RoomSearch/RedirectToMainFilter\
             ?roomSelectionModelID=361&filterID=1&option=RoomLocationArea&termID={id}",
            self.session.portal_base(),
        );
        let response = self.session.client().get(&url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let booking_url = response.url().to_string();
        let html = response.text().await?;

        let Some(parsed) = parser::parse_term_page(&html) else {
            return Ok(None);
        };

        let raw_name = parsed
            .raw_name
            .unwrap_or_else(|| format!("Term {id}"));
        let duration_weeks = parse_weeks_from_name(&raw_name);

        Ok(Some(CandidateTerm {
            external_id: id,
            raw_name,
            start_date: parsed.start_date,
            end_date: parsed.end_date,
            start_iso: parsed.start_iso,
            end_iso: parsed.end_iso,
            duration_weeks,
            has_availability_marker: parsed.has_availability_marker,
            booking_url,
        }))
    }

    /// Iterate identifiers from `range_start` to `range_end` inclusive,
    /// stopping early per the cursor's two-part rule.
    pub async fn scan(
        &self,
        range_start: u32,
        range_end: u32,
        max_misses: u32,
    ) -> Result<Vec<CandidateTerm>, ScanError> {
        let mut terms = Vec::new();
        let mut cursor = ScanCursor::new(range_start, max_misses);
        let mut scanned = 0u32;

        for id in range_start..=range_end {
            scanned += 1;
            match self.probe(id).await? {
                Some(term) => {
                    cursor.record_hit(id);
                    debug!(
                        id,
                        name = %term.raw_name,
                        start = term.start_date.as_deref().unwrap_or("?"),
                        end = term.end_date.as_deref().unwrap_or("?"),
                        "term hit"
                    );
                    terms.push(term);
                }
                None => {
                    if cursor.record_miss(id) {
                        debug!(id, last_hit = cursor.last_hit(), "stopping scan early");
                        break;
                    }
                }
            }
            sleep(self.probe_delay).await;
        }

        info!(
            scanned,
            range = range_span(range_start, range_end),
            hits = terms.len(),
            "term scan complete"
        );
        Ok(terms)
    }
}

/// Size of the inclusive id range; an inverted range scans nothing.
fn range_span(range_start: u32, range_end: u32) -> u32 {
    if range_end < range_start {
        0
    } else {
        range_end - range_start + 1
    }
}
