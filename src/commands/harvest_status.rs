use anyhow::Result;

use crate::commands::CommandReport;
use crate::env_loader::unknown_harvest_env_keys;
use crate::harvest::clock::format_timestamp;
use crate::harvest::config::load_config;
use crate::harvest::cursor::CursorFile;
use crate::harvest::history::HistoryStore;
use crate::harvest::paths::resolve_paths;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("harvest_home={}", paths.harvest_home.display()));
    report.detail(format!("state_dir={}", paths.state_dir.display()));
    report.detail(format!("history_file={}", paths.history_file.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));

    match load_config(&paths) {
        Ok(cfg) => {
            report.detail(format!("feed.archive_url={}", cfg.feed.archive_url));
            report.detail(format!("feed.source_url={}", cfg.feed.source_url));
            report.detail(format!(
                "feed.request_timeout_secs={}",
                cfg.feed.request_timeout_secs
            ));
            report.detail(format!("geocode.enabled={}", cfg.geocode.enabled));
            report.detail(format!("geocode.lookup_url={}", cfg.geocode.lookup_url));
            report.detail(format!("poll.back_track_mins={}", cfg.poll.back_track_mins));
            report.detail(format!("poll.buffer_mins={}", cfg.poll.buffer_mins));
            report.detail(format!("poll.retention_hours={}", cfg.poll.retention_hours));
            report.detail(format!("poll.timezone={}", cfg.poll.timezone));
        }
        Err(err) => report.issue(format!("config: {err:#}")),
    }

    match CursorFile::new(paths.cursor_file()).read() {
        Ok(Some(cursor)) => report.detail(format!(
            "cursor.next_tick={}",
            format_timestamp(cursor.last_processed_time())
        )),
        Ok(None) => report.detail("cursor.next_tick=unset (first run back-tracks)"),
        Err(err) => report.issue(format!("cursor: {err}")),
    }

    match HistoryStore::load(&paths.history_file) {
        Ok(store) if store.is_empty() => {
            report.detail("incidents=0");
            report.detail("history.last_update=none");
        }
        Ok(store) => {
            report.detail(format!("incidents={}", store.len()));
            let with_district = store
                .iter()
                .filter(|(_, record)| record.district.is_some())
                .count();
            report.detail(format!("incidents.with_district={with_district}"));
            let latest = store
                .iter()
                .map(|(_, record)| record.last_update.as_str())
                .max()
                .unwrap_or_default();
            report.detail(format!("history.last_update={latest}"));
        }
        Err(err) => report.issue(format!("history: {err}")),
    }

    for key in unknown_harvest_env_keys() {
        report.issue(format!("unknown environment variable {key}"));
    }

    Ok(report)
}
