use std::collections::{HashMap, HashSet};

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

/// A known property/residence within one collection (city).
#[derive(Debug, Clone)]
pub struct Entity {
    pub slug: String,
    pub display_name: String,
    pub location_hint: String,
    pub collection_key: String,
    pub page_url: String,
}

/// Lowercase, strip everything but alphanumerics and spaces.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Alias lookup scoped to a single collection. Built once per scan from the
/// discovered entities; resolution never returns an entity from another
/// collection because each collection gets its own table.
#[derive(Debug, Default)]
pub struct AliasTable {
    /// Normalized full name -> entity slug.
    names: Vec<(String, String)>,
    /// Short alias (first word, initials) -> entity slug. First-registered
    /// wins on collision; the discarded mapping is logged.
    aliases: HashMap<String, String>,
}

impl AliasTable {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().map(|(n, s)| (n.as_str(), s.as_str()))
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(a, s)| (a.as_str(), s.as_str()))
    }

    pub fn lookup_alias(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    fn register(&mut self, alias: String, slug: &str) {
        if alias.len() < 2 {
            return;
        }
        if let Some(existing) = self.aliases.get(&alias) {
            if existing != slug {
                debug!(alias, kept = %existing, discarded = slug, "alias collision");
            }
            return;
        }
        self.aliases.insert(alias, slug.to_string());
    }
}

/// Build the alias table for one collection. Each entity contributes its
/// normalized full name, its first word, and an initials abbreviation when
/// that abbreviation is at least two characters.
pub fn build_alias_table(entities: &[Entity]) -> AliasTable {
    let mut table = AliasTable::default();

    for entity in entities {
        let norm = normalize_name(&entity.display_name);
        if norm.is_empty() {
            continue;
        }
        table.names.push((norm.clone(), entity.slug.clone()));
        table.register(norm, &entity.slug);

        let words: Vec<&str> = entity.display_name.split_whitespace().collect();
        if words.len() >= 2 {
            let initials: String = words
                .iter()
                .filter(|w| w.chars().next().is_some_and(|c| c.is_uppercase()) || w.len() > 2)
                .filter_map(|w| w.chars().next())
                .collect::<String>()
                .to_lowercase();
            if initials.len() >= 2 {
                table.register(initials, &entity.slug);
            }
        }
        if let Some(first) = words.first() {
            table.register(first.to_lowercase(), &entity.slug);
        }
    }

    table
}

/// Parse property links out of a city landing page. Links look like
/// `{site_base}/locations/{city_slug}/{property_slug}`; duplicates and the
/// short-stays pseudo-property are dropped.
pub fn parse_entity_links(
    html: &str,
    site_base: &str,
    city_slug: &str,
    collection_key: &str,
) -> Vec<Entity> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").unwrap();
    let pattern = Regex::new(&format!(
        r"^{}/locations/{}/([a-z0-9-]+)/?$",
        regex::escape(site_base),
        regex::escape(city_slug),
    ))
    .unwrap();
    let address_re = Regex::new(
        r"(?i)((?:Carrer|Calle|Via|Rue|Street|St|Rd|Road|Square|Place|Point|Tce|Terrace)\s+[^,\n]{3,50}(?:,\s*[^,\n]{3,30})?)",
    )
    .unwrap();

    let mut entities = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for el in document.select(&selector) {
        let Some(href) = el.value().attr("href") else { continue };
        let full = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{site_base}{href}")
        };
        let Some(caps) = pattern.captures(full.trim_end_matches('/')) else { continue };
        let slug = caps[1].to_string();
        if slug == "short-stays" || !seen.insert(slug.clone()) {
            continue;
        }

        let display_name = slug
            .split('-')
            .map(|w| {
                let mut c = w.chars();
                match c.next() {
                    Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        // Best-effort address from the link's own text span.
        let text = el.text().collect::<Vec<_>>().join(" ");
        let location_hint = address_re
            .captures(&text)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();

        entities.push(Entity {
            page_url: format!("{site_base}/locations/{city_slug}/{slug}"),
            slug,
            display_name,
            location_hint,
            collection_key: collection_key.to_string(),
        });
    }

    entities
}
