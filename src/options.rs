use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

/// Unified output record representing one bookable unit, uniform across all
/// sources. Two options with equal `dedup_key` are the same observed fact
/// across watch cycles, even if price or booking link drift.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedOption {
    pub source: String,
    pub entity_id: String,
    pub room_type: String,
    pub price_weekly: Option<f64>,
    pub price_label: String,
    pub available: bool,
    pub booking_url: Option<String>,
    /// ISO date YYYY-MM-DD when known.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub collection_key: String,
    pub option_label: String,
    pub location: Option<String>,
    /// Opaque source-specific attributes (room arrangement metadata, raw ids).
    pub extra: HashMap<String, Value>,
}

impl NormalizedOption {
    /// Stable identity used to detect "already notified" options.
    pub fn dedup_key(&self) -> String {
        [
            self.source.as_str(),
            self.entity_id.as_str(),
            &self.room_type.trim().to_lowercase(),
            self.collection_key.as_str(),
            self.option_label.as_str(),
        ]
        .join("|")
    }

    pub fn price_display(&self) -> String {
        match self.price_weekly {
            Some(p) => format!("\u{20ac}{p:.0}/week"),
            None if !self.price_label.is_empty() => self.price_label.clone(),
            None => "N/A".to_string(),
        }
    }

    /// Human-readable summary lines for alert messages.
    pub fn alert_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("{} ({})", self.entity_id, self.source.to_uppercase()),
            format!("Room: {}", self.room_type),
            format!("Price: {}", self.price_display()),
        ];
        if self.start_date.is_some() || self.end_date.is_some() {
            lines.push(format!(
                "Dates: {} -> {}",
                self.start_date.as_deref().unwrap_or("?"),
                self.end_date.as_deref().unwrap_or("?"),
            ));
        }
        if !self.option_label.is_empty() {
            lines.push(format!("Tenancy: {}", self.option_label));
        }
        if let Some(loc) = &self.location {
            lines.push(format!("Location: {loc}"));
        }
        if let Some(url) = &self.booking_url {
            lines.push(format!("Book: {url}"));
        }
        lines
    }
}

/// Rank options for alerting: available first, then cheapest, then by name
/// so the ordering is deterministic when prices tie or are unknown.
pub fn rank(options: &mut [NormalizedOption]) {
    options.sort_by(|a, b| {
        let avail = b.available.cmp(&a.available);
        if avail != Ordering::Equal {
            return avail;
        }
        let pa = a.price_weekly.unwrap_or(f64::INFINITY);
        let pb = b.price_weekly.unwrap_or(f64::INFINITY);
        pa.total_cmp(&pb)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
            .then_with(|| a.room_type.cmp(&b.room_type))
    });
}

#[cfg(test)]
pub(crate) fn sample_option() -> NormalizedOption {
    NormalizedOption {
        source: "portal".to_string(),
        entity_id: "binary-hub".to_string(),
        room_type: "Gold Ensuite".to_string(),
        price_weekly: Some(310.0),
        price_label: "\u{20ac}310/week".to_string(),
        available: true,
        booking_url: Some("https://example.test/term/9999".to_string()),
        start_date: Some("2026-09-01".to_string()),
        end_date: Some("2027-01-31".to_string()),
        collection_key: "Dublin".to_string(),
        option_label: "Binary Hub - 26/27 - Semester 1".to_string(),
        location: Some("Bonham St, Dublin 8".to_string()),
        extra: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_is_stable() {
        assert_eq!(sample_option().dedup_key(), sample_option().dedup_key());
    }

    #[test]
    fn dedup_key_changes_with_every_component() {
        let base = sample_option();
        let mutations: Vec<NormalizedOption> = vec![
            NormalizedOption { source: "api".into(), ..base.clone() },
            NormalizedOption { entity_id: "beckett-house".into(), ..base.clone() },
            NormalizedOption { room_type: "Bronze Ensuite".into(), ..base.clone() },
            NormalizedOption { collection_key: "Barcelona".into(), ..base.clone() },
            NormalizedOption { option_label: "Full Year".into(), ..base.clone() },
        ];
        for m in mutations {
            assert_ne!(m.dedup_key(), base.dedup_key());
        }
    }

    #[test]
    fn dedup_key_ignores_drifting_fields() {
        let a = sample_option();
        let b = NormalizedOption {
            price_weekly: Some(999.0),
            booking_url: None,
            ..a.clone()
        };
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn rank_prefers_available_then_price() {
        let mut opts = vec![
            NormalizedOption { available: false, price_weekly: Some(100.0), ..sample_option() },
            NormalizedOption { price_weekly: None, room_type: "Unknown".into(), ..sample_option() },
            NormalizedOption { price_weekly: Some(250.0), room_type: "Silver".into(), ..sample_option() },
        ];
        rank(&mut opts);
        assert_eq!(opts[0].room_type, "Silver");
        assert_eq!(opts[1].room_type, "Unknown");
        assert!(!opts[2].available);
    }

    #[test]
    fn alert_lines_mention_key_fields() {
        let lines = sample_option().alert_lines();
        let joined = lines.join("\n");
        assert!(joined.contains("binary-hub"));
        assert!(joined.contains("Gold Ensuite"));
        assert!(joined.contains("\u{20ac}310"));
        assert!(joined.contains("Dublin 8"));
    }
}
