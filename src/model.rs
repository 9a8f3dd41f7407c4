use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::ErrorKind;

/// Connection settings for the actor platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

/// How a monitor paces its status polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Client-side limit on how long to keep watching. `None` polls until the
    /// platform reports a terminal status.
    #[serde(default, with = "humantime_serde")]
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            max_wait: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl RunStatus {
    /// Map the platform's status vocabulary onto the six tracked states.
    ///
    /// Transitional states (`TIMING-OUT`, `ABORTING`) are still running from
    /// the point of view of a watcher.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "READY" | "PENDING" => Some(RunStatus::Pending),
            "RUNNING" | "TIMING-OUT" | "TIMING_OUT" | "ABORTING" => Some(RunStatus::Running),
            "SUCCEEDED" => Some(RunStatus::Succeeded),
            "FAILED" => Some(RunStatus::Failed),
            "TIMED-OUT" | "TIMED_OUT" => Some(RunStatus::TimedOut),
            "ABORTED" => Some(RunStatus::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::TimedOut | RunStatus::Aborted
        )
    }

    /// Position along the lifecycle; status never moves to a lower rank.
    pub fn rank(self) -> u8 {
        match self {
            RunStatus::Pending => 0,
            RunStatus::Running => 1,
            _ => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::TimedOut => "TIMED_OUT",
            RunStatus::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One remote execution, as returned by a launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub result_pointer: Option<String>,
}

impl RunHandle {
    /// Handle for a run known only by id, e.g. when attaching to an existing run.
    pub fn pending(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Pending,
            result_pointer: None,
        }
    }

    pub fn with_result_pointer(mut self, pointer: Option<String>) -> Self {
        self.result_pointer = pointer;
        self
    }
}

/// Live view of a run as reported by one status fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSnapshot {
    pub status: RunStatus,
    pub result_pointer: Option<String>,
}

/// One status check made by a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCycle {
    /// Status held after this poll was applied.
    pub observed: RunStatus,
    /// 1-based poll sequence number within the monitor.
    pub seq: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub items: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialCheck {
    pub valid: bool,
    #[serde(default)]
    pub identity: Option<Identity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Field of an actor's input form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaProperty {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

/// Actor input description, reduced to what a form renderer needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub properties: BTreeMap<String, SchemaProperty>,
    pub required: Vec<String>,
}

impl InputSchema {
    /// Build from the raw schema document stored on an actor build.
    ///
    /// `prefill` wins over `default` since that is what the platform console
    /// shows in a fresh form.
    pub fn from_document(doc: &serde_json::Value) -> Option<Self> {
        let obj = doc.as_object()?;
        let str_field = |v: &serde_json::Value, key: &str| {
            v.get(key).and_then(|x| x.as_str()).map(str::to_string)
        };

        let mut properties = BTreeMap::new();
        if let Some(props) = obj.get("properties").and_then(|p| p.as_object()) {
            for (name, prop) in props {
                let default = prop
                    .get("prefill")
                    .filter(|v| is_truthy(v))
                    .or_else(|| prop.get("default").filter(|v| !v.is_null()))
                    .cloned();
                properties.insert(
                    name.clone(),
                    SchemaProperty {
                        title: str_field(prop, "title"),
                        kind: str_field(prop, "type"),
                        description: str_field(prop, "description"),
                        default,
                    },
                );
            }
        }

        let required = obj
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| {
                r.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            title: str_field(doc, "title"),
            kind: str_field(doc, "type"),
            properties,
            required,
        })
    }

    /// Input object holding every declared default.
    pub fn default_input(&self) -> serde_json::Map<String, serde_json::Value> {
        self.properties
            .iter()
            .filter_map(|(name, p)| p.default.clone().map(|d| (name.clone(), d)))
            .collect()
    }

    pub fn is_required(&self, field: &str) -> bool {
        self.required.iter().any(|r| r == field)
    }
}

fn is_truthy(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Events published by monitors and the watch controller to presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MonitorEvent {
    Status {
        run_id: String,
        cycle: PollCycle,
    },
    Results {
        run_id: String,
        results: ResultSet,
    },
    /// The run succeeded but its output could not be fetched.
    ResultsUnavailable {
        run_id: String,
        message: String,
    },
    PollFailed {
        run_id: String,
        last_status: RunStatus,
        message: String,
    },
    DeadlineExceeded {
        run_id: String,
        last_status: RunStatus,
    },
    Info(String),
    Finished {
        // Boxed to keep the event small.
        report: Box<MonitorReport>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: ErrorKind,
    pub message: String,
}

/// Why a monitor stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MonitorEnd {
    Terminal,
    Cancelled,
    Failed(FailureInfo),
}

/// Final state of one monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorReport {
    #[serde(default)]
    pub finished_utc: String,
    pub run_id: String,
    pub status: RunStatus,
    pub result_pointer: Option<String>,
    pub results: Option<ResultSet>,
    pub polls: u32,
    pub end: MonitorEnd,
    /// Set when the output of a succeeded run could not be fetched.
    #[serde(default)]
    pub result_error: Option<FailureInfo>,
}

impl MonitorReport {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.end, MonitorEnd::Cancelled)
    }
}
