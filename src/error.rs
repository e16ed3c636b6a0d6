use crate::harvest::util::single_line;
use thiserror::Error;

const MAX_REASON_CHARS: usize = 240;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("another harvest run holds {0}")]
    Locked(String),
    #[error("config invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("fetch failed for {bucket}: {reason}")]
    Fetch { bucket: String, reason: String },
    #[error("district lookup failed for `{query}`: {reason}")]
    Lookup { query: String, reason: String },
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("persistence failure at {path}: {reason}")]
    Persistence { path: String, reason: String },
}

impl HarvestError {
    pub fn fetch(bucket: &str, reason: impl ToString) -> Self {
        Self::Fetch {
            bucket: bucket.to_string(),
            reason: single_line(&reason.to_string(), MAX_REASON_CHARS),
        }
    }

    pub fn lookup(query: &str, reason: impl ToString) -> Self {
        Self::Lookup {
            query: query.to_string(),
            reason: single_line(&reason.to_string(), MAX_REASON_CHARS),
        }
    }

    pub fn persistence(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::Persistence {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> HarvestErrorCode {
        match self {
            Self::Locked(_) => HarvestErrorCode::E001Locked,
            Self::InvalidConfig(_) => HarvestErrorCode::E002ConfigInvalid,
            Self::Fetch { .. } => HarvestErrorCode::E101Fetch,
            Self::Lookup { .. } => HarvestErrorCode::E102Lookup,
            Self::MalformedMessage(_) => HarvestErrorCode::E103Malformed,
            Self::Persistence { .. } => HarvestErrorCode::E104StateCorrupt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestErrorCode {
    E001Locked,
    E002ConfigInvalid,
    E101Fetch,
    E102Lookup,
    E103Malformed,
    E104StateCorrupt,
}

impl HarvestErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002ConfigInvalid => "E002_CONFIG_INVALID",
            Self::E101Fetch => "E101_FETCH",
            Self::E102Lookup => "E102_LOOKUP",
            Self::E103Malformed => "E103_MALFORMED",
            Self::E104StateCorrupt => "E104_STATE_CORRUPT",
        }
    }
}
