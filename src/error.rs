//! Error taxonomy for platform calls and run tracking.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::model::{FailureInfo, RunStatus};

/// Failure of a single call to the actor platform.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("credential rejected by the platform")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("platform returned HTTP {code}: {message}")]
    Status { code: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Discriminant of [`RunError`], carried in reports and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    Unauthorized,
    Launch,
    Poll,
    ResultFetch,
    WatchDeadline,
    Platform,
}

impl ErrorKind {
    /// Headline shown to users; each kind reads differently.
    pub fn headline(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "Invalid request",
            ErrorKind::Unauthorized => "Invalid API token",
            ErrorKind::Launch => "Run could not be started",
            ErrorKind::Poll => "Lost track of the run (the run itself may still be going)",
            ErrorKind::ResultFetch => "Run succeeded but its results could not be fetched",
            ErrorKind::WatchDeadline => "Stopped watching: client-side wait limit reached",
            ErrorKind::Platform => "Platform request failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("credential rejected")]
    Unauthorized,
    #[error("failed to start run: {0}")]
    Launch(#[source] ApiError),
    #[error("failed to fetch run status: {0}")]
    Poll(#[source] ApiError),
    #[error("failed to fetch run results: {0}")]
    ResultFetch(#[source] ApiError),
    #[error("run still {last_status} after waiting {}", fmt_waited(.waited))]
    WatchDeadline {
        last_status: RunStatus,
        waited: Duration,
    },
    #[error(transparent)]
    Platform(ApiError),
}

fn fmt_waited(waited: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*waited)
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            RunError::Unauthorized => ErrorKind::Unauthorized,
            RunError::Launch(_) => ErrorKind::Launch,
            RunError::Poll(_) => ErrorKind::Poll,
            RunError::ResultFetch(_) => ErrorKind::ResultFetch,
            RunError::WatchDeadline { .. } => ErrorKind::WatchDeadline,
            RunError::Platform(_) => ErrorKind::Platform,
        }
    }

    pub fn to_failure(&self) -> FailureInfo {
        FailureInfo {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<ApiError> for RunError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Unauthorized => RunError::Unauthorized,
            other => RunError::Platform(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_credential_is_its_own_kind() {
        let e: RunError = ApiError::Unauthorized.into();
        assert_eq!(e.kind(), ErrorKind::Unauthorized);

        let e: RunError = ApiError::NotFound("acts/x".into()).into();
        assert_eq!(e.kind(), ErrorKind::Platform);
    }

    #[test]
    fn poll_failure_is_not_phrased_as_a_run_failure() {
        let e = RunError::Poll(ApiError::Status {
            code: 502,
            message: "bad gateway".into(),
        });
        let info = e.to_failure();
        assert_eq!(info.kind, ErrorKind::Poll);
        assert!(info.message.contains("run status"));
        assert!(!ErrorKind::Poll.headline().contains("failed"));
    }

    #[test]
    fn deadline_message_names_last_status() {
        let e = RunError::WatchDeadline {
            last_status: RunStatus::Running,
            waited: Duration::from_secs(90),
        };
        assert_eq!(e.to_string(), "run still RUNNING after waiting 1m 30s");
    }
}
