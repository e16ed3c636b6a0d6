use crate::error::HarvestError;
use crate::harvest::config::FeedConfig;
use crate::harvest::xml;
use anyhow::Result;
use reqwest::blocking::Client;
use serde_json::{Map, Value};
use std::time::Duration;

/// One incident message exactly as the feed published it.
pub type RawMessage = Map<String, Value>;

pub trait FeedSource {
    /// Messages of the snapshot published for `bucket` (`YYYYMMDD-HHMM`).
    fn fetch(&self, bucket: &str) -> Result<Vec<RawMessage>, HarvestError>;
}

/// Historical-archive client for the traffic news XML.
pub struct ArchiveFeed {
    client: Client,
    archive_url: String,
    source_url: String,
}

impl ArchiveFeed {
    pub fn new(cfg: &FeedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            archive_url: cfg.archive_url.clone(),
            source_url: cfg.source_url.clone(),
        })
    }
}

impl FeedSource for ArchiveFeed {
    fn fetch(&self, bucket: &str) -> Result<Vec<RawMessage>, HarvestError> {
        let response = self
            .client
            .get(&self.archive_url)
            .query(&[("url", self.source_url.as_str()), ("time", bucket)])
            .send()
            .map_err(|err| HarvestError::fetch(bucket, err))?;
        if !response.status().is_success() {
            return Err(HarvestError::fetch(
                bucket,
                format!("archive responded with status {}", response.status()),
            ));
        }
        let body = response
            .bytes()
            .map_err(|err| HarvestError::fetch(bucket, err))?;
        parse_snapshot(bucket, &body)
    }
}

/// Repair and parse one snapshot body into its messages.
///
/// The feed encodes a single incident as one `<message>` object and
/// several as a list; both come back as a list here.
pub fn parse_snapshot(bucket: &str, body: &[u8]) -> Result<Vec<RawMessage>, HarvestError> {
    let repaired = xml::repair(body);
    let tree = xml::to_tree(&repaired).map_err(|err| HarvestError::fetch(bucket, err))?;
    let list = tree
        .get("list")
        .ok_or_else(|| HarvestError::fetch(bucket, "snapshot root is not <list>"))?;
    Ok(normalize_messages(bucket, list.get("message")))
}

fn normalize_messages(bucket: &str, node: Option<&Value>) -> Vec<RawMessage> {
    match node {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(message)) => vec![message.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(message) => Some(message.clone()),
                other => {
                    log::warn!("{bucket}: dropping non-object <message> entry: {other}");
                    None
                }
            })
            .collect(),
        Some(other) => {
            log::warn!("{bucket}: dropping non-object <message> entry: {other}");
            Vec::new()
        }
    }
}
