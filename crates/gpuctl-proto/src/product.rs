//! Product and template data model (C3 / C4, spec §4.3, §4.4).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub region: String,
    pub spot_price: f64,
    pub on_demand_price: f64,
    pub gpu_type: String,
    pub gpu_memory: u32,
    pub availability: Availability,
}

/// Default region priority order, lowest number first (spec §4.3).
pub const DEFAULT_REGION_PRIORITY: [&str; 3] = ["AS-SGP-02", "CN-HK-01", "AS-IN-01"];

/// Builds the region search order for a fallback lookup: `preferred` first
/// (if given and not already head of the default list), then the remaining
/// default-priority regions in order, de-duplicated.
pub fn region_search_order(preferred: Option<&str>) -> Vec<String> {
    let mut order = Vec::with_capacity(DEFAULT_REGION_PRIORITY.len());
    if let Some(region) = preferred {
        order.push(region.to_string());
    }
    for region in DEFAULT_REGION_PRIORITY {
        if !order.iter().any(|r: &String| r == region) {
            order.push(region.to_string());
        }
    }
    order
}

/// Selects the optimal product among an already-region-filtered,
/// already-availability-filtered candidate set (spec §4.3 tie-break rules):
/// lowest `spot_price`, then lowest `on_demand_price`, then deterministic by
/// `id`.
pub fn select_optimal(candidates: &[Product]) -> Option<&Product> {
    candidates.iter().min_by(|a, b| {
        a.spot_price
            .partial_cmp(&b.spot_price)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.on_demand_price
                    .partial_cmp(&b.on_demand_price)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductFilters {
    pub product_name: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalProductResult {
    pub product: Product,
    pub region_used: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConfiguration {
    pub image_url: String,
    pub image_auth: Option<String>,
    pub ports: Vec<crate::instance::PortMapping>,
    pub envs: Vec<crate::instance::EnvVar>,
}

/// Normalizes a template id: trims whitespace, rejects empty or
/// non-positive-integer ids (spec §4.4).
pub fn normalize_template_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed: i64 = trimmed.parse().ok()?;
    if parsed <= 0 {
        return None;
    }
    Some(trimmed.to_string())
}
