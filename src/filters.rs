use crate::options::NormalizedOption;

/// Average weeks per month, used to convert between weekly and monthly prices.
pub const WEEKS_PER_MONTH: f64 = 4.33;

/// Structural and price predicates applied to the normalized option list.
/// Filters are independent and combined with logical AND.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    pub private_bathroom: Option<bool>,
    pub private_kitchen: Option<bool>,
    pub max_weekly_price: Option<f64>,
    pub max_monthly_price: Option<f64>,
}

impl FilterSet {
    pub fn is_empty(&self) -> bool {
        self.private_bathroom.is_none()
            && self.private_kitchen.is_none()
            && self.max_weekly_price.is_none()
            && self.max_monthly_price.is_none()
    }
}

/// "private" anywhere in the arrangement string means a private fitting.
/// Absent metadata is `None`, which fails any structural constraint that is
/// actually set (options are excluded, never assumed to pass).
fn private_arrangement(option: &NormalizedOption, key: &str) -> Option<bool> {
    option
        .extra
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_lowercase().contains("private"))
}

fn weekly_price(option: &NormalizedOption) -> Option<f64> {
    option.price_weekly.or_else(|| {
        option
            .extra
            .get("priceMonthly")
            .and_then(|v| v.as_f64())
            .map(|m| m / WEEKS_PER_MONTH)
    })
}

fn monthly_price(option: &NormalizedOption) -> Option<f64> {
    option
        .extra
        .get("priceMonthly")
        .and_then(|v| v.as_f64())
        .or_else(|| option.price_weekly.map(|w| w * WEEKS_PER_MONTH))
}

pub fn apply_filters(options: Vec<NormalizedOption>, filters: &FilterSet) -> Vec<NormalizedOption> {
    if filters.is_empty() {
        return options;
    }

    options
        .into_iter()
        .filter(|option| {
            if let Some(required) = filters.private_bathroom {
                match private_arrangement(option, "bathroomArrangement") {
                    Some(actual) if actual == required => {}
                    _ => return false,
                }
            }
            if let Some(required) = filters.private_kitchen {
                match private_arrangement(option, "kitchenArrangement") {
                    Some(actual) if actual == required => {}
                    _ => return false,
                }
            }
            if let Some(cap) = filters.max_weekly_price {
                match weekly_price(option) {
                    Some(p) if p <= cap => {}
                    _ => return false,
                }
            }
            if let Some(cap) = filters.max_monthly_price {
                match monthly_price(option) {
                    Some(p) if p <= cap => {}
                    _ => return false,
                }
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::sample_option;
    use serde_json::json;

    fn with_bathroom(arrangement: &str) -> NormalizedOption {
        let mut opt = sample_option();
        opt.extra
            .insert("bathroomArrangement".into(), json!(arrangement));
        opt
    }

    #[test]
    fn empty_filter_set_passes_everything() {
        let out = apply_filters(vec![sample_option()], &FilterSet::default());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn bathroom_filter_matches_arrangement() {
        let filters = FilterSet { private_bathroom: Some(true), ..Default::default() };
        assert_eq!(apply_filters(vec![with_bathroom("Private bathroom")], &filters).len(), 1);
        assert_eq!(apply_filters(vec![with_bathroom("Shared bathroom")], &filters).len(), 0);
    }

    #[test]
    fn missing_structural_metadata_is_excluded() {
        let filters = FilterSet { private_bathroom: Some(true), ..Default::default() };
        // sample_option has no arrangement metadata at all.
        assert_eq!(apply_filters(vec![sample_option()], &filters).len(), 0);
    }

    #[test]
    fn shared_requirement_also_honoured() {
        let filters = FilterSet { private_bathroom: Some(false), ..Default::default() };
        assert_eq!(apply_filters(vec![with_bathroom("Shared bathroom")], &filters).len(), 1);
        assert_eq!(apply_filters(vec![with_bathroom("Private bathroom")], &filters).len(), 0);
    }

    #[test]
    fn weekly_price_cap() {
        let filters = FilterSet { max_weekly_price: Some(300.0), ..Default::default() };
        let cheap = NormalizedOption { price_weekly: Some(250.0), ..sample_option() };
        let dear = NormalizedOption { price_weekly: Some(310.0), ..sample_option() };
        let unknown = NormalizedOption { price_weekly: None, ..sample_option() };
        assert_eq!(apply_filters(vec![cheap], &filters).len(), 1);
        assert_eq!(apply_filters(vec![dear], &filters).len(), 0);
        // Unknown price cannot satisfy an active price cap.
        assert_eq!(apply_filters(vec![unknown], &filters).len(), 0);
    }

    #[test]
    fn monthly_cap_derived_from_weekly() {
        let filters = FilterSet { max_monthly_price: Some(1000.0), ..Default::default() };
        // 310/week * 4.33 = 1342.3/month, above cap.
        assert_eq!(apply_filters(vec![sample_option()], &filters).len(), 0);
        let cheap = NormalizedOption { price_weekly: Some(200.0), ..sample_option() };
        assert_eq!(apply_filters(vec![cheap], &filters).len(), 1);
    }

    #[test]
    fn weekly_cap_derived_from_monthly_metadata() {
        let filters = FilterSet { max_weekly_price: Some(250.0), ..Default::default() };
        let mut opt = NormalizedOption { price_weekly: None, ..sample_option() };
        opt.extra.insert("priceMonthly".into(), json!(959.0));
        // 959 / 4.33 = 221.5/week, under cap.
        assert_eq!(apply_filters(vec![opt], &filters).len(), 1);
    }

    #[test]
    fn filters_combine_with_and() {
        let filters = FilterSet {
            private_bathroom: Some(true),
            max_weekly_price: Some(300.0),
            ..Default::default()
        };
        let mut ok_bathroom_bad_price = with_bathroom("Private bathroom");
        ok_bathroom_bad_price.price_weekly = Some(400.0);
        assert_eq!(apply_filters(vec![ok_bathroom_bad_price], &filters).len(), 0);
    }
}
