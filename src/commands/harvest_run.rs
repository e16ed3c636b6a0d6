use anyhow::Result;

use crate::commands::CommandReport;
use crate::env_loader::unknown_harvest_env_keys;
use crate::harvest::clock::local_now;
use crate::harvest::config::load_config;
use crate::harvest::district::{AddressLookup, DistrictLookup, NoLookup};
use crate::harvest::driver::run_harvest;
use crate::harvest::feed::ArchiveFeed;
use crate::harvest::paths::resolve_paths;

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("run");
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;

    for key in unknown_harvest_env_keys() {
        log::warn!("ignoring unknown environment variable {key}");
        report.warning(format!("unknown env {key}"));
    }

    let feed = ArchiveFeed::new(&cfg.feed)?;
    let lookup: Box<dyn DistrictLookup> = if cfg.geocode.enabled {
        Box::new(AddressLookup::new(
            &cfg.geocode,
            cfg.feed.request_timeout_secs,
        )?)
    } else {
        Box::new(NoLookup)
    };
    let now = local_now(cfg.poll.tz()?);

    let summary = run_harvest(&paths, &cfg, &feed, lookup.as_ref(), now)?;

    report.detail(format!("started_at={}", summary.started_at));
    report.detail(format!(
        "cursor={}..{}",
        summary.cursor_before, summary.cursor_after
    ));
    report.detail(format!("ticks.processed={}", summary.ticks.ticks_processed));
    report.detail(format!("ticks.failed={}", summary.ticks.ticks_failed));
    report.detail(format!("messages.seen={}", summary.ticks.messages_seen));
    report.detail(format!("messages.created={}", summary.ticks.created));
    report.detail(format!("messages.appended={}", summary.ticks.appended));
    report.detail(format!("messages.duplicates={}", summary.ticks.duplicates));
    report.detail(format!("messages.malformed={}", summary.ticks.malformed));
    report.detail(format!(
        "district.lookup_failures={}",
        summary.ticks.lookup_failures
    ));
    report.detail(format!("expired={}", summary.expired.join(",")));
    report.detail(format!("incidents={}", summary.incidents));
    report.detail(format!("history_file={}", summary.history_file));
    report.detail(format!("cursor_file={}", summary.cursor_file));

    Ok(report)
}
