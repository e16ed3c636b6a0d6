use crate::error::HarvestError;
use crate::harvest::config::GeocodeConfig;
use crate::harvest::feed::RawMessage;
use crate::harvest::xml;
use anyhow::Result;
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

/// Location fields consulted for the lookup query, most specific first.
pub const LOCATION_PREFERENCE: [&str; 3] = ["NEAR_LANDMARK_CN", "LOCATION_CN", "DIRECTION_CN"];

const DISTRICT_PATH: [&str; 6] = [
    "AddressLookupResult",
    "SuggestedAddress",
    "Address",
    "PremisesAddress",
    "ChiPremisesAddress",
    "ChiDistrict",
];
const DISTRICT_FIELD: &str = "DcDistrict";

pub trait DistrictLookup {
    /// District name of the best address match for free text `query`.
    fn lookup(&self, query: &str) -> Result<String, HarvestError>;

    /// A disabled resolver is never asked; incidents get no district.
    fn enabled(&self) -> bool {
        true
    }
}

/// First non-empty location text of a raw message, if any.
pub fn location_query(message: &RawMessage) -> Option<&str> {
    LOCATION_PREFERENCE.iter().find_map(|field| {
        message
            .get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    })
}

/// Resolve a district; no lookup is made without location text or while
/// lookups are switched off.
pub fn resolve(
    lookup: &dyn DistrictLookup,
    location: Option<&str>,
) -> Result<Option<String>, HarvestError> {
    if !lookup.enabled() {
        return Ok(None);
    }
    let Some(query) = location.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    lookup.lookup(query).map(Some)
}

/// Address lookup service returning XML address suggestions.
pub struct AddressLookup {
    client: Client,
    url: String,
    language: String,
    max_results: u32,
    result_type: u32,
}

impl AddressLookup {
    pub fn new(cfg: &GeocodeConfig, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: cfg.lookup_url.clone(),
            language: cfg.language.clone(),
            max_results: cfg.max_results,
            result_type: cfg.result_type,
        })
    }
}

impl DistrictLookup for AddressLookup {
    fn lookup(&self, query: &str) -> Result<String, HarvestError> {
        let max_results = self.max_results.to_string();
        let result_type = self.result_type.to_string();
        let response = self
            .client
            .post(&self.url)
            .header("Accept-Language", &self.language)
            .form(&[
                ("q", query),
                ("n", max_results.as_str()),
                ("t", result_type.as_str()),
            ])
            .send()
            .map_err(|err| HarvestError::lookup(query, err))?;
        if !response.status().is_success() {
            return Err(HarvestError::lookup(
                query,
                format!("lookup responded with status {}", response.status()),
            ));
        }
        let body = response
            .bytes()
            .map_err(|err| HarvestError::lookup(query, err))?;
        extract_district(query, &body)
    }
}

/// Used when district lookup is switched off in config.
pub struct NoLookup;

impl DistrictLookup for NoLookup {
    fn lookup(&self, query: &str) -> Result<String, HarvestError> {
        Err(HarvestError::lookup(query, "district lookup disabled"))
    }

    fn enabled(&self) -> bool {
        false
    }
}

pub fn extract_district(query: &str, body: &[u8]) -> Result<String, HarvestError> {
    let tree = xml::to_tree(&xml::repair(body)).map_err(|err| HarvestError::lookup(query, err))?;

    let mut node = &tree;
    for key in DISTRICT_PATH {
        node = first(node.get(key))
            .ok_or_else(|| HarvestError::lookup(query, format!("response missing {key}")))?;
    }
    node.get(DISTRICT_FIELD)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| HarvestError::lookup(query, format!("response missing {DISTRICT_FIELD}")))
}

fn first(node: Option<&Value>) -> Option<&Value> {
    match node? {
        Value::Array(items) => items.first(),
        Value::Null => None,
        other => Some(other),
    }
}
