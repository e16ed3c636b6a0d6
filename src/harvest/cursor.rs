use crate::error::HarvestError;
use crate::harvest::clock::{format_timestamp, parse_timestamp, truncate_to_minute};
use crate::harvest::util::write_atomic;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CURSOR_SCHEMA_VERSION: u32 = 1;

/// Next tick to process. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollCursor {
    last_processed_time: NaiveDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorRecord {
    schema_version: u32,
    last_processed_time: String,
}

impl PollCursor {
    pub fn starting_at(t: NaiveDateTime) -> Self {
        Self {
            last_processed_time: truncate_to_minute(t),
        }
    }

    pub fn last_processed_time(&self) -> NaiveDateTime {
        self.last_processed_time
    }

    pub fn advance_to(&mut self, t: NaiveDateTime) -> bool {
        if t < self.last_processed_time {
            return false;
        }
        self.last_processed_time = t;
        true
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let record = CursorRecord {
            schema_version: CURSOR_SCHEMA_VERSION,
            last_processed_time: format_timestamp(self.last_processed_time),
        };
        serde_json::to_string_pretty(&record)
    }

    pub fn decode(raw: &str) -> Result<Self, String> {
        let record: CursorRecord =
            serde_json::from_str(raw).map_err(|err| format!("unreadable cursor record: {err}"))?;
        if record.schema_version != CURSOR_SCHEMA_VERSION {
            return Err(format!(
                "unsupported cursor schema_version {} (expected {CURSOR_SCHEMA_VERSION})",
                record.schema_version
            ));
        }
        let t = parse_timestamp(&record.last_processed_time).ok_or_else(|| {
            format!(
                "invalid last_processed_time `{}`",
                record.last_processed_time
            )
        })?;
        Ok(Self {
            last_processed_time: t,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CursorFile {
    path: PathBuf,
}

impl CursorFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Option<PollCursor>, HarvestError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|err| HarvestError::persistence(&self.path, err))?;
        PollCursor::decode(&raw)
            .map(Some)
            .map_err(|reason| HarvestError::persistence(&self.path, reason))
    }

    /// Existing cursor, or one positioned `back_track` before `now`.
    /// A corrupt record is an error, never a silent reset.
    pub fn load(&self, now: NaiveDateTime, back_track: Duration) -> Result<PollCursor, HarvestError> {
        match self.read()? {
            Some(cursor) => Ok(cursor),
            None => Ok(PollCursor::starting_at(now - back_track)),
        }
    }

    pub fn persist(&self, cursor: &PollCursor) -> Result<(), HarvestError> {
        let data = cursor
            .encode()
            .map_err(|err| HarvestError::persistence(&self.path, err))?;
        write_atomic(&self.path, &format!("{data}\n"))
    }
}
