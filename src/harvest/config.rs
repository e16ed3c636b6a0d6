use crate::error::HarvestError;
use crate::harvest::paths::HarvestPaths;
use anyhow::{Result, anyhow};
use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub archive_url: String,
    pub source_url: String,
    pub request_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            archive_url: "https://api.data.gov.hk/v1/historical-archive/get-file".to_string(),
            source_url: "https://www.td.gov.hk/tc/special_news/trafficnews.xml".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeConfig {
    pub enabled: bool,
    pub lookup_url: String,
    pub language: String,
    pub max_results: u32,
    pub result_type: u32,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookup_url: "https://www.als.ogcio.gov.hk/lookup".to_string(),
            language: "zh-Hant".to_string(),
            max_results: 1,
            result_type: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub back_track_mins: u64,
    pub buffer_mins: u64,
    pub retention_hours: u64,
    pub timezone: String,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            back_track_mins: 60,
            buffer_mins: 1,
            retention_hours: 72,
            timezone: "Asia/Hong_Kong".to_string(),
        }
    }
}

impl PollConfig {
    pub fn back_track(&self) -> Duration {
        Duration::minutes(self.back_track_mins as i64)
    }

    pub fn buffer(&self) -> Duration {
        Duration::minutes(self.buffer_mins as i64)
    }

    pub fn retention(&self) -> Duration {
        Duration::hours(self.retention_hours as i64)
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|err| anyhow!("invalid poll timezone `{}`: {err}", self.timezone))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarvestConfig {
    pub feed: FeedConfig,
    pub geocode: GeocodeConfig,
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialHarvestConfig {
    feed: Option<FeedConfig>,
    geocode: Option<GeocodeConfig>,
    poll: Option<PollConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn validate(cfg: &HarvestConfig) -> Result<()> {
    let invalid = |msg: &str| anyhow!(HarvestError::InvalidConfig(msg.to_string()));

    if cfg.feed.archive_url.trim().is_empty() {
        return Err(invalid("feed archive url cannot be empty"));
    }
    if cfg.feed.source_url.trim().is_empty() {
        return Err(invalid("feed source url cannot be empty"));
    }
    if cfg.feed.request_timeout_secs == 0 {
        return Err(invalid("request timeout must be >= 1 second"));
    }
    if cfg.geocode.enabled && cfg.geocode.lookup_url.trim().is_empty() {
        return Err(invalid("geocode lookup url cannot be empty while enabled"));
    }
    if cfg.geocode.max_results == 0 {
        return Err(invalid("geocode max results must be >= 1"));
    }
    if cfg.poll.back_track_mins == 0 {
        return Err(invalid("poll back track must be >= 1 minute"));
    }
    if cfg.poll.retention_hours == 0 {
        return Err(invalid("retention must be >= 1 hour"));
    }
    if cfg.poll.tz().is_err() {
        return Err(invalid(&format!(
            "unknown poll timezone `{}`",
            cfg.poll.timezone
        )));
    }
    Ok(())
}

fn resolve_config_path(paths: &HarvestPaths) -> PathBuf {
    if let Ok(custom) = env::var("HARVEST_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    paths.harvest_home.join("harvest.toml")
}

fn merge_file_config(base: &mut HarvestConfig, paths: &HarvestPaths) -> Result<()> {
    let path = resolve_config_path(paths);
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialHarvestConfig = toml::from_str(&raw).map_err(|err| {
        anyhow!(HarvestError::InvalidConfig(format!(
            "failed to parse {}: {err}",
            path.display()
        )))
    })?;
    if let Some(feed) = parsed.feed {
        base.feed = feed;
    }
    if let Some(geocode) = parsed.geocode {
        base.geocode = geocode;
    }
    if let Some(poll) = parsed.poll {
        base.poll = poll;
    }
    Ok(())
}

pub fn load_config(paths: &HarvestPaths) -> Result<HarvestConfig> {
    let mut cfg = HarvestConfig::default();
    merge_file_config(&mut cfg, paths)?;

    cfg.feed.archive_url = env_or_string("HARVEST_FEED_ARCHIVE_URL", &cfg.feed.archive_url);
    cfg.feed.source_url = env_or_string("HARVEST_FEED_SOURCE_URL", &cfg.feed.source_url);
    cfg.feed.request_timeout_secs = env_or_u64(
        "HARVEST_REQUEST_TIMEOUT_SECS",
        cfg.feed.request_timeout_secs,
    );
    cfg.geocode.enabled = env_or_bool("HARVEST_GEOCODE_ENABLED", cfg.geocode.enabled);
    cfg.geocode.lookup_url = env_or_string("HARVEST_GEOCODE_URL", &cfg.geocode.lookup_url);
    cfg.geocode.language = env_or_string("HARVEST_GEOCODE_LANGUAGE", &cfg.geocode.language);
    cfg.poll.back_track_mins = env_or_u64("HARVEST_BACK_TRACK_MINS", cfg.poll.back_track_mins);
    cfg.poll.buffer_mins = env_or_u64("HARVEST_BUFFER_MINS", cfg.poll.buffer_mins);
    cfg.poll.retention_hours = env_or_u64("HARVEST_RETENTION_HOURS", cfg.poll.retention_hours);
    cfg.poll.timezone = env_or_string("HARVEST_TIMEZONE", &cfg.poll.timezone);

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_feed_publisher() {
        let cfg = HarvestConfig::default();
        assert_eq!(cfg.poll.back_track(), Duration::hours(1));
        assert_eq!(cfg.poll.buffer(), Duration::minutes(1));
        assert_eq!(cfg.poll.retention(), Duration::days(3));
        assert_eq!(cfg.poll.tz().expect("tz"), chrono_tz::Asia::Hong_Kong);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn validate_rejects_zero_retention_and_bad_timezone() {
        let mut cfg = HarvestConfig::default();
        cfg.poll.retention_hours = 0;
        assert!(validate(&cfg).is_err());

        let mut cfg = HarvestConfig::default();
        cfg.poll.timezone = "Mars/Olympus".to_string();
        let err = validate(&cfg).expect_err("bad tz");
        assert!(format!("{err}").contains("Mars/Olympus"));
    }

    #[test]
    fn disabled_geocode_tolerates_blank_url() {
        let mut cfg = HarvestConfig::default();
        cfg.geocode.enabled = false;
        cfg.geocode.lookup_url = String::new();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn partial_file_overrides_only_named_sections() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = HarvestPaths::under(tmp.path());
        fs::write(
            paths.harvest_home.join("harvest.toml"),
            "[poll]\nback_track_mins = 15\nbuffer_mins = 2\nretention_hours = 24\ntimezone = \"UTC\"\n",
        )
        .expect("write config");

        let mut cfg = HarvestConfig::default();
        merge_file_config(&mut cfg, &paths).expect("merge");
        assert_eq!(cfg.poll.back_track_mins, 15);
        assert_eq!(cfg.poll.retention_hours, 24);
        assert_eq!(cfg.feed.request_timeout_secs, 30);
        assert!(cfg.geocode.enabled);
    }

    #[test]
    fn partial_section_keeps_defaults_for_missing_keys() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = HarvestPaths::under(tmp.path());
        fs::write(
            paths.harvest_home.join("harvest.toml"),
            "[feed]\nrequest_timeout_secs = 10\n\n[geocode]\nenabled = false\n",
        )
        .expect("write config");

        let mut cfg = HarvestConfig::default();
        merge_file_config(&mut cfg, &paths).expect("merge");
        let defaults = HarvestConfig::default();
        assert_eq!(cfg.feed.request_timeout_secs, 10);
        assert_eq!(cfg.feed.archive_url, defaults.feed.archive_url);
        assert_eq!(cfg.feed.source_url, defaults.feed.source_url);
        assert!(!cfg.geocode.enabled);
        assert_eq!(cfg.geocode.lookup_url, defaults.geocode.lookup_url);
        assert_eq!(cfg.geocode.result_type, 80);
    }
}
