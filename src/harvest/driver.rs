use crate::error::HarvestError;
use crate::harvest::audit;
use crate::harvest::clock::{format_timestamp, time_bucket};
use crate::harvest::config::HarvestConfig;
use crate::harvest::cursor::{CursorFile, PollCursor};
use crate::harvest::district::DistrictLookup;
use crate::harvest::feed::FeedSource;
use crate::harvest::history::{HistoryStore, MergeOutcome};
use crate::harvest::lock::RunLock;
use crate::harvest::paths::HarvestPaths;
use crate::harvest::warn;
use anyhow::Result;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickStats {
    pub ticks_processed: u64,
    pub ticks_failed: u64,
    pub messages_seen: u64,
    pub created: u64,
    pub appended: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub lookup_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub cursor_before: String,
    pub cursor_after: String,
    pub ticks: TickStats,
    pub expired: Vec<String>,
    pub incidents: usize,
    pub history_file: String,
    pub cursor_file: String,
}

fn report_failure(err: &HarvestError, stage: &str, bucket: &str, incident: &str, reason: &str) {
    warn::emit(
        err.code().as_str(),
        stage,
        bucket,
        incident,
        reason,
        &err.to_string(),
    );
}

fn merge_tick(
    bucket: &str,
    messages: Vec<crate::harvest::feed::RawMessage>,
    store: &mut HistoryStore,
    lookup: &dyn DistrictLookup,
    now: NaiveDateTime,
    stats: &mut TickStats,
) {
    for raw in messages {
        stats.messages_seen += 1;
        let incident = raw
            .get("INCIDENT_NUMBER")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match store.merge(raw, lookup, now) {
            Ok(MergeOutcome::Created { lookup_error }) => {
                stats.created += 1;
                if let Some(err) = lookup_error {
                    stats.lookup_failures += 1;
                    report_failure(&err, "district", bucket, &incident, "stored-without-district");
                }
            }
            Ok(MergeOutcome::Appended) => stats.appended += 1,
            Ok(MergeOutcome::Duplicate) => stats.duplicates += 1,
            Err(err) => {
                stats.malformed += 1;
                report_failure(&err, "merge", bucket, &incident, "message-skipped");
            }
        }
    }
}

/// Process every tick from the cursor up to `now - buffer`, one minute at a
/// time. A tick whose fetch fails is skipped; the cursor passes it anyway.
pub fn run_ticks(
    cursor: &mut PollCursor,
    store: &mut HistoryStore,
    feed: &dyn FeedSource,
    lookup: &dyn DistrictLookup,
    now: NaiveDateTime,
    buffer: Duration,
) -> TickStats {
    let last_tick = now - buffer;
    let mut stats = TickStats::default();

    while cursor.last_processed_time() <= last_tick {
        let tick = cursor.last_processed_time();
        let bucket = time_bucket(tick);
        log::debug!("fetching snapshot {bucket}");

        match feed.fetch(&bucket) {
            Ok(messages) => merge_tick(&bucket, messages, store, lookup, now, &mut stats),
            Err(err) => {
                stats.ticks_failed += 1;
                report_failure(&err, "fetch", &bucket, "", "tick-skipped");
            }
        }

        stats.ticks_processed += 1;
        cursor.advance_to(tick + Duration::minutes(1));
    }

    stats
}

fn audit_best_effort(paths: &HarvestPaths, at: &str, phase: &str, status: &str, message: &str) {
    if let Err(err) = audit::append_event(paths, at, phase, status, message) {
        log::warn!("audit append failed: {err:#}");
    }
}

/// One full harvest: lock, load, catch up to `now`, persist cursor, expire,
/// persist history.
pub fn run_harvest(
    paths: &HarvestPaths,
    cfg: &HarvestConfig,
    feed: &dyn FeedSource,
    lookup: &dyn DistrictLookup,
    now: NaiveDateTime,
) -> Result<RunSummary> {
    let lock = RunLock::acquire(&paths.lock_file())?;
    log::debug!("holding run lock {}", lock.path().display());
    let started_at = format_timestamp(now);

    let cursor_file = CursorFile::new(paths.cursor_file());
    let mut cursor = cursor_file.load(now, cfg.poll.back_track())?;
    let mut store = HistoryStore::load(&paths.history_file)?;
    let cursor_before = format_timestamp(cursor.last_processed_time());

    log::info!(
        "harvest from {cursor_before} with {} known incidents",
        store.len()
    );
    audit_best_effort(
        paths,
        &started_at,
        "run",
        "started",
        &format!("cursor={cursor_before} incidents={}", store.len()),
    );

    let ticks = run_ticks(
        &mut cursor,
        &mut store,
        feed,
        lookup,
        now,
        cfg.poll.buffer(),
    );

    let cursor_result = cursor_file.persist(&cursor);
    let expiry = store.remove_expired(now, cfg.poll.retention());
    for id in &expiry.removed {
        log::info!("expired incident {id}");
    }
    if !expiry.removed.is_empty() {
        audit_best_effort(
            paths,
            &started_at,
            "expiry",
            "removed",
            &format!(
                "retention_hours={} incidents={}",
                cfg.poll.retention_hours,
                expiry.removed.join(",")
            ),
        );
    }
    for id in &expiry.unparseable {
        log::warn!("incident {id} has an unreadable last_update; kept");
    }
    let store_result = store.save(&paths.history_file);
    cursor_result?;
    store_result?;

    let summary = RunSummary {
        started_at,
        cursor_before,
        cursor_after: format_timestamp(cursor.last_processed_time()),
        ticks,
        expired: expiry.removed,
        incidents: store.len(),
        history_file: paths.history_file.display().to_string(),
        cursor_file: cursor_file.path().display().to_string(),
    };

    log::info!(
        "harvest done: ticks={} failed={} created={} appended={} expired={}",
        summary.ticks.ticks_processed,
        summary.ticks.ticks_failed,
        summary.ticks.created,
        summary.ticks.appended,
        summary.expired.len()
    );
    audit_best_effort(
        paths,
        &summary.started_at,
        "run",
        if summary.ticks.ticks_failed == 0 && summary.ticks.malformed == 0 {
            "ok"
        } else {
            "degraded"
        },
        &format!(
            "cursor={}..{} ticks={} failed={} created={} appended={} duplicates={} malformed={} lookup_failures={} expired={}",
            summary.cursor_before,
            summary.cursor_after,
            summary.ticks.ticks_processed,
            summary.ticks.ticks_failed,
            summary.ticks.created,
            summary.ticks.appended,
            summary.ticks.duplicates,
            summary.ticks.malformed,
            summary.ticks.lookup_failures,
            summary.expired.len()
        ),
    );

    Ok(summary)
}
