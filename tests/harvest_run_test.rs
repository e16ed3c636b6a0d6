mod support;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

use support::{LOOKUP_RESPONSE, StubRoutes, snapshot};

fn harvest_cmd(home: &Path, base_url: &str) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("trafficnews-harvest");
    cmd.current_dir(home)
        .env("HARVEST_HOME", home)
        .env("HARVEST_FEED_ARCHIVE_URL", format!("{base_url}/archive"))
        .env("HARVEST_GEOCODE_URL", format!("{base_url}/lookup"))
        .env("HARVEST_BACK_TRACK_MINS", "3")
        .env("HARVEST_REQUEST_TIMEOUT_SECS", "5")
        .env("RUST_LOG", "warn");
    cmd
}

fn read_json(path: &Path) -> Value {
    let raw = fs::read_to_string(path).expect("read json");
    serde_json::from_str(&raw).expect("parse json")
}

#[test]
fn harvest_run_merges_overlapping_snapshots_once() {
    let tmp = tempdir().expect("tempdir");
    let server = support::start(StubRoutes {
        snapshot: Some(snapshot(&[("I1", "2024-05-01T10:00:00")])),
        by_bucket: BTreeMap::new(),
        lookup: LOOKUP_RESPONSE.to_string(),
    });

    harvest_cmd(tmp.path(), &server.base_url)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("ticks.processed=3"))
        .stdout(predicate::str::contains("ticks.failed=0"))
        .stdout(predicate::str::contains("messages.created=1"))
        .stdout(predicate::str::contains("messages.duplicates=2"));

    let history = read_json(&tmp.path().join("json/api.json"));
    let record = &history["I1"];
    assert_eq!(record["district"], "油尖旺區");
    let messages = record["message"].as_object().expect("message map");
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages["2024-05-01T10:00:00"]["CONTENT_EN"],
        "Lane closed"
    );
    assert_eq!(record["last_announcement"], "2024-05-01T10:00:00");

    let cursor = read_json(&tmp.path().join("temp/poll_cursor.json"));
    assert_eq!(cursor["schema_version"], 1);
    assert!(cursor["last_processed_time"].is_string());

    let requests = server.requests.lock().expect("requests");
    let lookups = requests.iter().filter(|r| r.starts_with("/lookup")).count();
    assert_eq!(lookups, 1, "district resolved only when the incident is created");
}

#[test]
fn harvest_run_appends_new_announcements_on_later_runs() {
    let tmp = tempdir().expect("tempdir");
    let first = support::start(StubRoutes {
        snapshot: Some(snapshot(&[("I1", "2024-05-01T10:00:00")])),
        by_bucket: BTreeMap::new(),
        lookup: LOOKUP_RESPONSE.to_string(),
    });
    harvest_cmd(tmp.path(), &first.base_url)
        .assert()
        .success();

    // Cursor is caught up; pull it back so the next run sees fresh ticks.
    let cursor_path = tmp.path().join("temp/poll_cursor.json");
    let mut cursor = read_json(&cursor_path);
    let next = cursor["last_processed_time"]
        .as_str()
        .expect("cursor time")
        .to_string();
    let pulled_back = chrono::NaiveDateTime::parse_from_str(&next, "%Y-%m-%dT%H:%M:%S")
        .expect("cursor timestamp")
        - chrono::Duration::minutes(2);
    cursor["last_processed_time"] =
        Value::String(pulled_back.format("%Y-%m-%dT%H:%M:%S").to_string());
    fs::write(&cursor_path, cursor.to_string()).expect("rewrite cursor");

    let second = support::start(StubRoutes {
        snapshot: Some(snapshot(&[
            ("I1", "2024-05-01T10:00:00"),
            ("I1", "2024-05-01T10:05:00"),
        ])),
        by_bucket: BTreeMap::new(),
        lookup: LOOKUP_RESPONSE.to_string(),
    });
    harvest_cmd(tmp.path(), &second.base_url)
        .assert()
        .success()
        .stdout(predicate::str::contains("messages.appended=1"));

    let history = read_json(&tmp.path().join("json/api.json"));
    let record = &history["I1"];
    assert_eq!(record["message"].as_object().expect("messages").len(), 2);
    assert_eq!(record["last_announcement"], "2024-05-01T10:05:00");

    let requests = second.requests.lock().expect("requests");
    assert!(
        requests.iter().all(|r| !r.starts_with("/lookup")),
        "known incidents never trigger another lookup"
    );
}

#[test]
fn harvest_run_skips_failed_ticks_but_advances_cursor() {
    let tmp = tempdir().expect("tempdir");
    let server = support::start(StubRoutes {
        snapshot: None,
        by_bucket: BTreeMap::new(),
        lookup: LOOKUP_RESPONSE.to_string(),
    });

    harvest_cmd(tmp.path(), &server.base_url)
        .assert()
        .success()
        .stdout(predicate::str::contains("ticks.failed=3"))
        .stderr(predicate::str::contains("HARVEST_WARN code=E101_FETCH stage=fetch"));

    let cursor = read_json(&tmp.path().join("temp/poll_cursor.json"));
    assert!(cursor["last_processed_time"].is_string());

    // A second run right away has at most the minute that just closed left.
    harvest_cmd(tmp.path(), &server.base_url)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("ticks.processed=0")
                .or(predicate::str::contains("ticks.processed=1")),
        );
}

#[test]
fn harvest_run_stores_incident_without_district_when_lookup_fails() {
    let tmp = tempdir().expect("tempdir");
    let server = support::start(StubRoutes {
        snapshot: Some(snapshot(&[("I9", "2024-05-01T11:00:00")])),
        by_bucket: BTreeMap::new(),
        lookup: "<AddressLookupResult/>".to_string(),
    });

    harvest_cmd(tmp.path(), &server.base_url)
        .assert()
        .success()
        .stdout(predicate::str::contains("district.lookup_failures=1"))
        .stderr(predicate::str::contains("HARVEST_WARN code=E102_LOOKUP stage=district"));

    let history = read_json(&tmp.path().join("json/api.json"));
    assert!(history["I9"]["district"].is_null());
}

#[test]
fn harvest_run_with_geocoding_disabled_reports_no_lookup_failures() {
    let tmp = tempdir().expect("tempdir");
    let server = support::start(StubRoutes {
        snapshot: Some(snapshot(&[("I5", "2024-05-01T12:00:00")])),
        by_bucket: BTreeMap::new(),
        lookup: LOOKUP_RESPONSE.to_string(),
    });

    harvest_cmd(tmp.path(), &server.base_url)
        .env("HARVEST_GEOCODE_ENABLED", "false")
        .assert()
        .success()
        .stdout(predicate::str::contains("district.lookup_failures=0"))
        .stderr(predicate::str::contains("E102_LOOKUP").not());

    let history = read_json(&tmp.path().join("json/api.json"));
    assert!(history["I5"]["district"].is_null());
    let requests = server.requests.lock().expect("requests");
    assert!(requests.iter().all(|r| !r.starts_with("/lookup")));
}

#[test]
fn harvest_run_refuses_corrupt_cursor() {
    let tmp = tempdir().expect("tempdir");
    fs::create_dir_all(tmp.path().join("temp")).expect("mkdir temp");
    fs::write(tmp.path().join("temp/poll_cursor.json"), "not a cursor").expect("write cursor");

    let server = support::start(StubRoutes {
        snapshot: Some(snapshot(&[("I1", "2024-05-01T10:00:00")])),
        by_bucket: BTreeMap::new(),
        lookup: LOOKUP_RESPONSE.to_string(),
    });

    harvest_cmd(tmp.path(), &server.base_url)
        .assert()
        .failure()
        .stderr(predicate::str::contains("poll_cursor.json"));

    assert!(!tmp.path().join("json/api.json").exists());
    assert!(server.requests.lock().expect("requests").is_empty());
}

#[test]
fn harvest_run_rejects_invalid_config() {
    let tmp = tempdir().expect("tempdir");
    harvest_cmd(tmp.path(), "http://127.0.0.1:9")
        .env("HARVEST_TIMEZONE", "Mars/Olympus")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config"));
}
