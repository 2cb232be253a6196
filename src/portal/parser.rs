//! HTML extraction collaborators for the booking portal and the main site.
//! Everything here is pure text-in, structure-out so the session and scanner
//! stay free of markup details.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};

/// Marker text present on every valid term page.
const TERM_PAGE_MARKER: &str = "Choose your room";

const TIER_ORDER: [&str; 4] = ["Bronze", "Silver", "Gold", "Platinum"];

#[derive(Debug, Clone)]
pub struct ParsedTerm {
    pub raw_name: Option<String>,
    /// DD/MM/YYYY as printed in the info text.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// YYYY-MM-DD from the page's data attributes.
    pub start_iso: Option<String>,
    pub end_iso: Option<String>,
    pub has_availability_marker: bool,
}

#[derive(Debug, Clone)]
pub struct PriceCandidate {
    pub room_type: String,
    pub price_label: String,
    pub price_weekly: Option<f64>,
}

fn term_info_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)You have selected '([^']+)' booking term.*?begins on (\d{2}/\d{2}/\d{4}).*?ends on (\d{2}/\d{2}/\d{4})",
        )
        .unwrap()
    })
}

fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// First form on the page: its action attribute plus every named input's
/// value (hidden anti-forgery tokens included). `None` when there is no form.
pub fn hidden_form_fields(html: &str) -> Option<(String, HashMap<String, String>)> {
    let document = Html::parse_document(html);
    let form_sel = Selector::parse("form").unwrap();
    let input_sel = Selector::parse("input").unwrap();

    let form = document.select(&form_sel).next()?;
    let action = form.value().attr("action").unwrap_or_default().to_string();

    let mut fields = HashMap::new();
    for input in document.select(&input_sel) {
        if let Some(name) = input.value().attr("name") {
            fields.insert(
                name.to_string(),
                input.value().attr("value").unwrap_or_default().to_string(),
            );
        }
    }
    Some((action, fields))
}

/// Parse one probed term page. `None` means the page does not describe a term
/// (the well-known marker is absent). That is a miss, not an error.
pub fn parse_term_page(html: &str) -> Option<ParsedTerm> {
    if !html.contains(TERM_PAGE_MARKER) {
        return None;
    }

    let (raw_name, start_date, end_date) = match term_info_re().captures(html) {
        Some(caps) => (
            Some(caps[1].to_string()),
            Some(caps[2].to_string()),
            Some(caps[3].to_string()),
        ),
        None => (None, None, None),
    };

    let document = Html::parse_document(html);
    let container_sel = Selector::parse("[data-termid]").unwrap();
    let container = document.select(&container_sel).next();
    let iso = |attr: &str| {
        container
            .and_then(|el| el.value().attr(attr))
            .map(|v| v.chars().take(10).collect::<String>())
            .filter(|v| !v.is_empty())
    };

    let room_sel = Selector::parse("[data-roombaseid]").unwrap();
    let text = page_text(html);
    let has_availability_marker = html.to_lowercase().contains("room-result")
        || text.contains('\u{20ac}')
        || text.contains('\u{a3}')
        || document.select(&room_sel).next().is_some();

    Some(ParsedTerm {
        raw_name,
        start_date,
        end_date,
        start_iso: iso("data-datestart"),
        end_iso: iso("data-dateend"),
        has_availability_marker,
    })
}

fn tier_rank(room_type: &str) -> usize {
    let first = room_type.split_whitespace().next().unwrap_or("");
    TIER_ORDER
        .iter()
        .position(|t| t.eq_ignore_ascii_case(first))
        .unwrap_or(99)
}

fn parse_price(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse().ok()
}

/// Room tiers and weekly prices from a property page. Three passes, first
/// non-empty wins: tier name with a nearby weekly price, a monthly-only price
/// (converted), then separate tier and price lists zipped positionally.
pub fn extract_price_candidates(html: &str) -> Vec<PriceCandidate> {
    static PROXIMITY: OnceLock<Regex> = OnceLock::new();
    static MONTHLY: OnceLock<Regex> = OnceLock::new();
    static TIER: OnceLock<Regex> = OnceLock::new();
    static WEEKLY: OnceLock<Regex> = OnceLock::new();

    let proximity = PROXIMITY.get_or_init(|| {
        Regex::new(
            r"(?is)(Bronze|Silver|Gold|Platinum|Studio|Deluxe)[\s\-]*(Ensuite|En-suite|Studio|Room|Suite|Apartment)?.{0,200}?[\u{20ac}\u{a3}]\s*(\d+(?:[.,]\d+)?)\s*(?:p/?w|/week|per week|pw)",
        )
        .unwrap()
    });
    let monthly = MONTHLY.get_or_init(|| {
        Regex::new(r"(?i)[\u{20ac}\u{a3}]\s*(\d+(?:[.,]\d+)?)\s*(?:per month|/month|p/?m|pcm)")
            .unwrap()
    });
    let tier = TIER.get_or_init(|| {
        Regex::new(r"(?i)\b(Bronze|Silver|Gold|Platinum|Studio|Deluxe)\b[\s\-]*(Ensuite|En-suite|Room|Suite|Apartment)?")
            .unwrap()
    });
    let weekly = WEEKLY.get_or_init(|| {
        Regex::new(r"(?i)[\u{20ac}\u{a3}]\s*(\d+(?:[.,]\d+)?)\s*(?:p/?w|/week|per week|pw)")
            .unwrap()
    });

    let text = page_text(html);

    let mut rooms: Vec<PriceCandidate> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for caps in proximity.captures_iter(&text) {
        let tier_name = titlecase(caps[1].trim());
        let subtype = caps
            .get(2)
            .map(|m| titlecase(m.as_str().trim()))
            .unwrap_or_else(|| "Ensuite".to_string());
        let label = format!("{tier_name} {subtype}");
        if seen.contains(&label) {
            continue;
        }
        seen.push(label.clone());
        let price = parse_price(&caps[3]);
        rooms.push(PriceCandidate {
            price_label: price
                .map(|p| format!("\u{20ac}{p:.0}/week"))
                .unwrap_or_else(|| "price N/A".to_string()),
            room_type: label,
            price_weekly: price,
        });
    }
    if !rooms.is_empty() {
        rooms.sort_by_key(|r| tier_rank(&r.room_type));
        return rooms;
    }

    // Monthly-only pricing, common for continental properties.
    let mut monthly_prices: Vec<f64> = monthly
        .captures_iter(&text)
        .filter_map(|c| parse_price(&c[1]))
        .collect();
    if !monthly_prices.is_empty() {
        monthly_prices.sort_by(f64::total_cmp);
        let lowest = monthly_prices[0];
        return vec![PriceCandidate {
            room_type: "Room".to_string(),
            price_label: format!("from \u{20ac}{lowest:.0}/month"),
            price_weekly: Some((lowest / crate::filters::WEEKS_PER_MONTH * 100.0).round() / 100.0),
        }];
    }

    // Separate tier list and price list, paired by position.
    let mut found_tiers: Vec<String> = Vec::new();
    for caps in tier.captures_iter(&text) {
        let tier_name = titlecase(caps[1].trim());
        let subtype = caps
            .get(2)
            .map(|m| titlecase(m.as_str().trim()))
            .unwrap_or_else(|| "Ensuite".to_string());
        let label = format!("{tier_name} {subtype}");
        if !found_tiers.contains(&label) {
            found_tiers.push(label);
        }
    }
    let mut prices: Vec<f64> = weekly
        .captures_iter(&text)
        .filter_map(|c| parse_price(&c[1]))
        .collect();
    prices.sort_by(f64::total_cmp);
    prices.dedup();

    if found_tiers.is_empty() {
        let lowest = prices.first().copied();
        return vec![PriceCandidate {
            room_type: "Room (type TBC)".to_string(),
            price_label: lowest
                .map(|p| format!("from \u{20ac}{p:.0}/week"))
                .unwrap_or_else(|| "price N/A".to_string()),
            price_weekly: lowest,
        }];
    }

    found_tiers.sort_by_key(|label| tier_rank(label));
    found_tiers
        .into_iter()
        .enumerate()
        .map(|(idx, label)| {
            let price = prices.get(idx).or(prices.first()).copied();
            PriceCandidate {
                price_label: price
                    .map(|p| format!("\u{20ac}{p:.0}/week"))
                    .unwrap_or_else(|| "price N/A".to_string()),
                room_type: label,
                price_weekly: price,
            }
        })
        .collect()
}

fn titlecase(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}
