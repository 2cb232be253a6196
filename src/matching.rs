use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tracing::debug;

use crate::catalog::{normalize_name, AliasTable};

/// Target academic year, e.g. 2026/2027.
#[derive(Debug, Clone, Copy)]
pub struct AcademicYear {
    pub start_year: i32,
    pub end_year: i32,
}

impl AcademicYear {
    /// Short form as it appears in term names, e.g. "26/27".
    pub fn short_label(&self) -> String {
        format!("{:02}/{:02}", self.start_year % 100, self.end_year % 100)
    }
}

/// Keyword/date/duration rules defining what counts as the target semester.
#[derive(Debug, Clone)]
pub struct WindowPolicy {
    /// Lowercase keywords, e.g. "semester 1", "sem 1".
    pub keywords: Vec<String>,
    pub require_keyword: bool,
    pub max_duration_weeks: u32,
    pub start_months: HashSet<u32>,
    pub end_months: HashSet<u32>,
}

fn year_glued_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s*-\s*\d{2}/\d{2}").unwrap())
}

fn weeks_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*[Ww]eek").unwrap())
}

/// Extract the property-name portion of a raw term name. Rules are ordered;
/// the first that applies wins:
///   1. standard " - " delimiter: "Binary Hub - 26/27 - 41 Weeks"
///   2. dash glued to a YY/YY token: "Cristobal de Moura -26/27-Semester 1"
///   3. source brand prefix: "aparto Cristobal de Moura-September 2024"
///   4. the whole name unchanged
pub fn extract_entity_name(raw_name: &str) -> String {
    if let Some((head, _)) = raw_name.split_once(" - ") {
        return head.trim().to_string();
    }
    if let Some(caps) = year_glued_re().captures(raw_name) {
        return caps[1].trim().to_string();
    }
    if let Some(rest) = raw_name.strip_prefix("aparto ").or_else(|| raw_name.strip_prefix("Aparto ")) {
        return match rest.split_once('-') {
            Some((head, _)) => head.trim().to_string(),
            None => rest.trim().to_string(),
        };
    }
    raw_name.trim().to_string()
}

/// Extract "NN Weeks" duration from a term name.
pub fn parse_weeks_from_name(raw_name: &str) -> Option<u32> {
    weeks_re()
        .captures(raw_name)
        .and_then(|c| c[1].parse().ok())
}

/// Resolve a raw term name to an entity slug in the given collection's alias
/// table, or `None` when no rule matches. Never guesses: an unattributed term
/// is excluded from collection-scoped output by the caller.
pub fn attribute<'a>(raw_name: &str, table: &'a AliasTable) -> Option<&'a str> {
    let extracted = extract_entity_name(raw_name);
    let prop_norm = normalize_name(&extracted);
    if prop_norm.is_empty() {
        return None;
    }

    // Direct substring containment against known entity names.
    for (known_norm, slug) in table.names() {
        if known_norm.contains(&prop_norm) || prop_norm.contains(known_norm) {
            return Some(slug);
        }
    }

    // Exact alias match or alias on the leading dash-separated token.
    if let Some(slug) = table.lookup_alias(&prop_norm) {
        return Some(slug);
    }
    for (alias, slug) in table.aliases() {
        if prop_norm.starts_with(&format!("{alias} ")) {
            return Some(slug);
        }
    }
    let leading = raw_name.split('-').next().unwrap_or(raw_name);
    if let Some(slug) = table.lookup_alias(&normalize_name(leading)) {
        return Some(slug);
    }

    debug!(raw_name, "term not attributed to any known entity");
    None
}

/// Try both accepted textual date formats: day/month/year, then year-month-day.
pub fn parse_flexible_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
}

/// Does a term belong to the target academic year? True when the short year
/// token appears in the name, or when the ISO dates span the right years.
pub fn matches_academic_year(
    raw_name: &str,
    start_iso: Option<&str>,
    end_iso: Option<&str>,
    year: &AcademicYear,
) -> bool {
    if raw_name.contains(&year.short_label()) {
        return true;
    }
    match (start_iso, end_iso) {
        (Some(start), Some(end)) => {
            start.starts_with(&year.start_year.to_string())
                && (end.starts_with(&year.end_year.to_string())
                    || end.starts_with(&year.start_year.to_string()))
        }
        _ => false,
    }
}

/// Classify a term against the semester window policy.
///
/// A keyword hit makes the term a candidate, but parseable dates outside the
/// allowed month sets still reject it: keyword presence does not override an
/// implausible window. Without a keyword (and `require_keyword` off), the
/// term may match on duration and date shape alone.
pub fn is_window_match(
    raw_name: &str,
    start_date: Option<&str>,
    end_date: Option<&str>,
    duration_weeks: Option<u32>,
    policy: &WindowPolicy,
) -> bool {
    let name_lower = raw_name.to_lowercase();
    let start = start_date.and_then(parse_date_opt);
    let end = end_date.and_then(parse_date_opt);

    if policy.keywords.iter().any(|kw| name_lower.contains(kw)) {
        if let Some(s) = start {
            if !policy.start_months.contains(&s.month()) {
                return false;
            }
        }
        if let Some(e) = end {
            if !policy.end_months.contains(&e.month()) {
                return false;
            }
        }
        return true;
    }

    if policy.require_keyword {
        return false;
    }

    // Duration/date-shape path needs both months to be checkable.
    let (Some(s), Some(e)) = (start, end) else {
        return false;
    };
    let weeks = match duration_weeks {
        Some(w) => w,
        None => {
            let days = (e - s).num_days();
            if days < 0 {
                return false;
            }
            (days / 7) as u32
        }
    };
    weeks <= policy.max_duration_weeks
        && policy.start_months.contains(&s.month())
        && policy.end_months.contains(&e.month())
}

fn parse_date_opt(value: &str) -> Option<NaiveDate> {
    parse_flexible_date(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{build_alias_table, Entity};

    fn entities(names: &[&str], collection: &str) -> Vec<Entity> {
        names
            .iter()
            .map(|n| Entity {
                slug: n.to_lowercase().replace(' ', "-"),
                display_name: n.to_string(),
                location_hint: String::new(),
                collection_key: collection.to_string(),
                page_url: String::new(),
            })
            .collect()
    }

    fn dublin_table() -> AliasTable {
        build_alias_table(&entities(
            &["Binary Hub", "Beckett House", "Dorset Point", "The Loom", "Montrose"],
            "Dublin",
        ))
    }

    fn barcelona_table() -> AliasTable {
        build_alias_table(&entities(
            &["Pallars", "Cristobal De Moura", "Diagonal Suites"],
            "Barcelona",
        ))
    }

    fn policy() -> WindowPolicy {
        WindowPolicy {
            keywords: vec!["semester 1".into(), "sem 1".into()],
            require_keyword: true,
            max_duration_weeks: 25,
            start_months: [9, 10].into_iter().collect(),
            end_months: [1, 2].into_iter().collect(),
        }
    }

    #[test]
    fn extracts_entity_name_by_rule_order() {
        assert_eq!(extract_entity_name("Binary Hub - 26/27 - 41 Weeks"), "Binary Hub");
        assert_eq!(
            extract_entity_name("Cristobal de Moura -26/27-Semester 1-10%"),
            "Cristobal de Moura"
        );
        assert_eq!(extract_entity_name("PA - 26/27 - Generic Group"), "PA");
        assert_eq!(
            extract_entity_name("aparto Cristobal de Moura-September 2024"),
            "Cristobal de Moura"
        );
        assert_eq!(extract_entity_name("Plain Name"), "Plain Name");
    }

    #[test]
    fn parses_weeks() {
        assert_eq!(parse_weeks_from_name("Binary Hub - 26/27 - 41 Weeks"), Some(41));
        assert_eq!(parse_weeks_from_name("The Loom - 25/26 - 10 Week Summer"), Some(10));
        assert_eq!(parse_weeks_from_name("Pallars - 26/27 - 12 months"), None);
    }

    #[test]
    fn attributes_dublin_terms_to_dublin_entities() {
        let table = dublin_table();
        assert_eq!(attribute("Binary Hub - 26/27 - 41 Weeks", &table), Some("binary-hub"));
        assert_eq!(attribute("The Loom - 26/27 - Semester 1", &table), Some("the-loom"));
    }

    #[test]
    fn attributes_abbreviations() {
        let table = barcelona_table();
        assert_eq!(attribute("PA - 26/27 - Semester 2 Discount", &table), Some("pallars"));
        assert_eq!(attribute("CdM - 26/27 - TEST", &table), Some("cristobal-de-moura"));
    }

    #[test]
    fn attribution_never_crosses_collections() {
        let barcelona = barcelona_table();
        assert_eq!(attribute("Binary Hub - 26/27 - 41 Weeks", &barcelona), None);
        assert_eq!(attribute("The Loom - 26/27 - Semester 1", &barcelona), None);
        let dublin = dublin_table();
        assert_eq!(attribute("Giovenale - 26/27 - 10 months", &dublin), None);
    }

    #[test]
    fn parses_both_date_formats() {
        let a = parse_flexible_date("01/09/2026").unwrap();
        let b = parse_flexible_date("2026-09-01").unwrap();
        assert_eq!(a, b);
        assert!(parse_flexible_date("September 1st").is_none());
    }

    #[test]
    fn keyword_match_with_plausible_dates() {
        assert!(is_window_match(
            "Binary Hub - 26/27 - Semester 1",
            Some("2026-09-01"),
            Some("2027-01-31"),
            Some(22),
            &policy(),
        ));
    }

    #[test]
    fn keyword_does_not_override_implausible_start_month() {
        assert!(!is_window_match(
            "Binary Hub - 26/27 - Semester 1",
            Some("2026-08-01"),
            Some("2027-01-31"),
            Some(22),
            &policy(),
        ));
    }

    #[test]
    fn keyword_without_dates_matches() {
        assert!(is_window_match("Sem 1", None, None, None, &policy()));
    }

    #[test]
    fn duration_path_requires_keyword_off() {
        let mut p = policy();
        assert!(!is_window_match(
            "Special 22 Weeks",
            Some("29/08/2026"),
            Some("31/01/2027"),
            Some(22),
            &p,
        ));
        p.require_keyword = false;
        p.start_months.insert(8);
        assert!(is_window_match(
            "Special 22 Weeks",
            Some("29/08/2026"),
            Some("31/01/2027"),
            Some(22),
            &p,
        ));
        // Full-year duration never matches the shape rule.
        assert!(!is_window_match(
            "Full Year 41 Weeks",
            Some("29/08/2026"),
            Some("12/06/2027"),
            Some(41),
            &p,
        ));
    }

    #[test]
    fn duration_path_computes_weeks_from_dates() {
        let p = WindowPolicy { require_keyword: false, ..policy() };
        assert!(is_window_match(
            "Short Stay",
            Some("2026-09-01"),
            Some("2027-01-31"),
            None,
            &p,
        ));
        assert!(!is_window_match(
            "Full Year",
            Some("2026-09-01"),
            Some("2027-06-12"),
            None,
            &p,
        ));
    }

    #[test]
    fn academic_year_label_and_match() {
        let year = AcademicYear { start_year: 2026, end_year: 2027 };
        assert_eq!(year.short_label(), "26/27");
        assert!(matches_academic_year("Binary Hub - 26/27 - Semester 1", None, None, &year));
        assert!(matches_academic_year(
            "Unlabelled",
            Some("2026-09-01"),
            Some("2027-01-31"),
            &year,
        ));
        assert!(!matches_academic_year("Binary Hub - 25/26 - Semester 1", None, None, &year));
    }
}
