use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::filters::FilterSet;
use crate::matching::{AcademicYear, WindowPolicy};
use crate::portal::PortalConfig;
use crate::sources::{ApiSource, PortalSource, Source};

pub struct Config {
    pub collection: String,
    pub country: String,
    pub start_year: i32,

    pub window_keywords: Vec<String>,
    pub require_keyword: bool,
    pub max_duration_weeks: u32,
    pub start_months: HashSet<u32>,
    pub end_months: HashSet<u32>,

    pub filters: FilterSet,

    pub interval_secs: u64,
    pub jitter_secs: u64,
    pub seen_path: PathBuf,

    pub notifier: String,
    pub webhook_url: Option<String>,

    pub api_enabled: bool,
    pub api_base_url: String,

    pub portal_enabled: bool,
    pub site_base_url: String,
    pub portal_entry_url: String,
    pub portal_origin: String,
    pub portal_base_url: String,
    pub portal_country_id: String,
    pub scan_start: u32,
    pub scan_end: u32,
    pub max_misses: u32,
    pub probe_delay_ms: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

fn env_months(key: &str, default: &[u32]) -> HashSet<u32> {
    match env::var(key) {
        Ok(raw) => raw
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect(),
        Err(_) => default.iter().copied().collect(),
    }
}

fn env_opt_bool(key: &str) -> Option<bool> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_opt_f64(key: &str) -> Option<f64> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Defaults target the September intake of the next academic year.
        let start_year = env_or("ACADEMIC_START_YEAR", 2026);

        Ok(Self {
            collection: env_string("COLLECTION", "Dublin"),
            country: env_string("COUNTRY", "Ireland"),
            start_year,

            window_keywords: env_list(
                "WINDOW_KEYWORDS",
                &["semester 1", "sem 1", "first semester", "autumn", "fall"],
            ),
            require_keyword: env_or("REQUIRE_KEYWORD", false),
            max_duration_weeks: env_or("MAX_DURATION_WEEKS", 26),
            start_months: env_months("WINDOW_START_MONTHS", &[8, 9, 10]),
            end_months: env_months("WINDOW_END_MONTHS", &[12, 1, 2]),

            filters: FilterSet {
                private_bathroom: env_opt_bool("FILTER_PRIVATE_BATHROOM"),
                private_kitchen: env_opt_bool("FILTER_PRIVATE_KITCHEN"),
                max_weekly_price: env_opt_f64("FILTER_MAX_WEEKLY_PRICE"),
                max_monthly_price: env_opt_f64("FILTER_MAX_MONTHLY_PRICE"),
            },

            interval_secs: env_or("CHECK_INTERVAL_SECS", 600),
            jitter_secs: env_or("CHECK_JITTER_SECS", 60),
            seen_path: PathBuf::from(env_string("SEEN_PATH", "data/seen.json")),

            notifier: env_string("NOTIFIER", "stdout"),
            webhook_url: env::var("WEBHOOK_URL").ok().filter(|v| !v.trim().is_empty()),

            api_enabled: env_or("API_ENABLED", true),
            api_base_url: env_string("API_BASE_URL", "https://api.yugo.com/v1/"),

            portal_enabled: env_or("PORTAL_ENABLED", true),
            site_base_url: env_string("SITE_BASE_URL", "https://apartostudent.com"),
            portal_entry_url: env_string(
                "PORTAL_ENTRY_URL",
                "https://portal.apartostudent.com/StarRezPortalX/",
            ),
            portal_origin: env_string("PORTAL_ORIGIN", "https://portal.apartostudent.com"),
            portal_base_url: env_string(
                "PORTAL_BASE_URL",
                "https://portal.apartostudent.com/StarRezPortalX",
            ),
            portal_country_id: env_string("PORTAL_COUNTRY_ID", "2"),
            scan_start: env_or("SCAN_START", 1),
            scan_end: env_or("SCAN_END", 4000),
            max_misses: env_or("SCAN_MAX_MISSES", 150),
            probe_delay_ms: env_or("PROBE_DELAY_MS", 150),
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(seen_path: PathBuf) -> Self {
        Config {
            collection: "Dublin".to_string(),
            country: "Ireland".to_string(),
            start_year: 2026,
            window_keywords: vec!["semester 1".to_string()],
            require_keyword: false,
            max_duration_weeks: 26,
            start_months: [9, 10].into_iter().collect(),
            end_months: [12, 1, 2].into_iter().collect(),
            filters: FilterSet::default(),
            interval_secs: 600,
            jitter_secs: 0,
            seen_path,
            notifier: "stdout".to_string(),
            webhook_url: None,
            api_enabled: false,
            api_base_url: String::new(),
            portal_enabled: false,
            site_base_url: String::new(),
            portal_entry_url: String::new(),
            portal_origin: String::new(),
            portal_base_url: String::new(),
            portal_country_id: String::new(),
            scan_start: 1,
            scan_end: 100,
            max_misses: 10,
            probe_delay_ms: 150,
        }
    }

    pub fn academic_year(&self) -> AcademicYear {
        AcademicYear {
            start_year: self.start_year,
            end_year: self.start_year + 1,
        }
    }

    pub fn window_policy(&self) -> WindowPolicy {
        WindowPolicy {
            keywords: self.window_keywords.clone(),
            require_keyword: self.require_keyword,
            max_duration_weeks: self.max_duration_weeks,
            start_months: self.start_months.clone(),
            end_months: self.end_months.clone(),
        }
    }

    pub fn sources(&self) -> Vec<Source> {
        let mut sources = Vec::new();
        if self.api_enabled {
            sources.push(Source::Api(ApiSource::new(
                "yugo".to_string(),
                self.api_base_url.clone(),
                self.country.clone(),
                self.collection.clone(),
            )));
        }
        if self.portal_enabled {
            let portal = PortalConfig {
                entry_url: self.portal_entry_url.clone(),
                origin: self.portal_origin.clone(),
                portal_base: self.portal_base_url.clone(),
                country_id: self.portal_country_id.clone(),
            };
            sources.push(Source::Portal(PortalSource::new(
                "aparto".to_string(),
                self.site_base_url.clone(),
                self.collection.clone(),
                Some(portal),
                self.scan_start,
                self.scan_end,
                self.max_misses,
                Duration::from_millis(self.probe_delay_ms),
            )));
        }
        sources
    }
}
