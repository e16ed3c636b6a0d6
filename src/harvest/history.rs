//! Per-incident history built from successive feed snapshots.
//!
//! Snapshots overlap heavily, so every message is merged by its
//! announcement time: a time already stored for an incident is never
//! touched again, which makes re-delivery harmless and lets any tick be
//! re-run safely.

use crate::error::HarvestError;
use crate::harvest::clock::{format_timestamp, parse_timestamp};
use crate::harvest::district::{self, DistrictLookup};
use crate::harvest::feed::RawMessage;
use crate::harvest::util::write_atomic;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const INCIDENT_ID_FIELD: &str = "INCIDENT_NUMBER";
const ANNOUNCEMENT_FIELD: &str = "ANNOUNCEMENT_DATE";

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// One announcement of an incident. Field names match the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUpdate {
    #[serde(rename = "INCIDENT_STATUS_EN", default, deserialize_with = "null_as_empty")]
    pub status_en: String,
    #[serde(rename = "INCIDENT_STATUS_CN", default, deserialize_with = "null_as_empty")]
    pub status_cn: String,
    #[serde(rename = "ID", default, deserialize_with = "null_as_empty")]
    pub message_id: String,
    #[serde(rename = "CONTENT_EN", default, deserialize_with = "null_as_empty")]
    pub content_en: String,
    #[serde(rename = "CONTENT_CN", default, deserialize_with = "null_as_empty")]
    pub content_cn: String,
}

fn take_text(raw: &mut RawMessage, field: &str) -> String {
    match raw.remove(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

impl MessageUpdate {
    /// Pull the per-announcement fields out of `raw`; absent ones become "".
    fn take_from(raw: &mut RawMessage) -> Self {
        Self {
            status_en: take_text(raw, "INCIDENT_STATUS_EN"),
            status_cn: take_text(raw, "INCIDENT_STATUS_CN"),
            message_id: take_text(raw, "ID"),
            content_en: take_text(raw, "CONTENT_EN"),
            content_cn: take_text(raw, "CONTENT_CN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    /// Feed attributes other than the id and the per-announcement fields,
    /// as first seen.
    pub description: RawMessage,
    #[serde(rename = "message", default)]
    pub messages: BTreeMap<String, MessageUpdate>,
    #[serde(default)]
    pub district: Option<String>,
    pub last_update: String,
    #[serde(default)]
    pub last_announcement: String,
}

#[derive(Debug)]
pub enum MergeOutcome {
    /// First sighting. `lookup_error` is set when the district could not be
    /// resolved and the record was stored without one.
    Created { lookup_error: Option<HarvestError> },
    Appended,
    Duplicate,
}

#[derive(Debug, Clone, Default)]
pub struct ExpiryOutcome {
    pub removed: Vec<String>,
    pub unparseable: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryStore {
    records: BTreeMap<String, IncidentRecord>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, HarvestError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = fs::read_to_string(path).map_err(|err| HarvestError::persistence(path, err))?;
        serde_json::from_str(&raw).map_err(|err| HarvestError::persistence(path, err))
    }

    /// Pretty-printed with four-space indentation, non-ASCII kept as is.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    pub fn save(&self, path: &Path) -> Result<(), HarvestError> {
        let data = self
            .to_json()
            .map_err(|err| HarvestError::persistence(path, err))?;
        write_atomic(path, &data)
    }

    #[cfg(test)]
    pub fn get(&self, incident_id: &str) -> Option<&IncidentRecord> {
        self.records.get(incident_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IncidentRecord)> {
        self.records.iter()
    }

    /// Merge one raw feed message.
    ///
    /// Only a missing incident id is an error. The district is looked up
    /// for new incidents only; a failed lookup stores `None`.
    pub fn merge(
        &mut self,
        mut raw: RawMessage,
        lookup: &dyn DistrictLookup,
        now: NaiveDateTime,
    ) -> Result<MergeOutcome, HarvestError> {
        let incident_id = match raw.remove(INCIDENT_ID_FIELD) {
            Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
            _ => {
                return Err(HarvestError::MalformedMessage(format!(
                    "missing {INCIDENT_ID_FIELD}"
                )));
            }
        };

        let update = MessageUpdate::take_from(&mut raw);
        let announced_at = take_text(&mut raw, ANNOUNCEMENT_FIELD);
        let now_text = format_timestamp(now);

        if let Some(record) = self.records.get_mut(&incident_id) {
            if record.messages.contains_key(&announced_at) {
                return Ok(MergeOutcome::Duplicate);
            }
            if parse_timestamp(&record.last_update).is_none_or(|prev| prev <= now) {
                record.last_update = now_text;
            }
            if announced_at > record.last_announcement {
                record.last_announcement = announced_at.clone();
            }
            record.messages.insert(announced_at, update);
            return Ok(MergeOutcome::Appended);
        }

        let (district, lookup_error) =
            match district::resolve(lookup, district::location_query(&raw)) {
                Ok(district) => (district, None),
                Err(err) => (None, Some(err)),
            };

        let mut messages = BTreeMap::new();
        messages.insert(announced_at.clone(), update);
        self.records.insert(
            incident_id,
            IncidentRecord {
                description: raw,
                messages,
                district,
                last_update: now_text,
                last_announcement: announced_at,
            },
        );
        Ok(MergeOutcome::Created { lookup_error })
    }

    /// Drop every record whose `last_update` is older than `now - retention`.
    /// Records with an unreadable `last_update` are kept.
    pub fn remove_expired(&mut self, now: NaiveDateTime, retention: Duration) -> ExpiryOutcome {
        let cutoff = now - retention;
        let mut outcome = ExpiryOutcome::default();
        self.records.retain(|id, record| match parse_timestamp(&record.last_update) {
            Some(last) if last < cutoff => {
                outcome.removed.push(id.clone());
                false
            }
            Some(_) => true,
            None => {
                outcome.unparseable.push(id.clone());
                true
            }
        });
        outcome
    }
}
