//! Scripted platform used by engine and orchestrator tests.

use crate::error::ApiError;
use crate::model::{ActorSummary, Identity, InputSchema, RunHandle, RunSnapshot, RunStatus};
use crate::platform::ActorPlatform;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Status(RunStatus),
    WithPointer(RunStatus, &'static str),
    Fail(u16),
}

fn scripted_error(code: u16) -> ApiError {
    match code {
        401 => ApiError::Unauthorized,
        _ => ApiError::Status {
            code,
            message: "scripted failure".into(),
        },
    }
}

#[derive(Default)]
pub(crate) struct ScriptedPlatform {
    polls: Mutex<HashMap<String, VecDeque<Step>>>,
    items: Mutex<HashMap<String, Result<Vec<serde_json::Value>, u16>>>,
    launch: Mutex<Option<Result<RunHandle, u16>>>,
    identity: Mutex<Option<Result<Identity, u16>>>,
    cancel_on_poll: Mutex<Vec<(String, usize, CancellationToken)>>,
    cancel_on_fetch: Mutex<Option<CancellationToken>>,
    status_calls: Mutex<Vec<String>>,
    result_calls: Mutex<Vec<String>>,
    start_calls: AtomicUsize,
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses for successive polls of `run_id`. Once exhausted the run
    /// keeps reporting `RUNNING`.
    pub fn script(self, run_id: &str, steps: Vec<Step>) -> Self {
        self.polls
            .lock()
            .unwrap()
            .insert(run_id.to_string(), steps.into());
        self
    }

    pub fn items(self, pointer: &str, items: Vec<serde_json::Value>) -> Self {
        self.items
            .lock()
            .unwrap()
            .insert(pointer.to_string(), Ok(items));
        self
    }

    pub fn items_fail(self, pointer: &str, code: u16) -> Self {
        self.items
            .lock()
            .unwrap()
            .insert(pointer.to_string(), Err(code));
        self
    }

    pub fn launch(self, outcome: Result<RunHandle, u16>) -> Self {
        *self.launch.lock().unwrap() = Some(outcome);
        self
    }

    pub fn identity(self, outcome: Result<Identity, u16>) -> Self {
        *self.identity.lock().unwrap() = Some(outcome);
        self
    }

    /// Cancel `token` while the `nth` (1-based) poll of `run_id` is in flight.
    pub fn cancel_during_poll(self, run_id: &str, nth: usize, token: CancellationToken) -> Self {
        self.cancel_on_poll
            .lock()
            .unwrap()
            .push((run_id.to_string(), nth, token));
        self
    }

    pub fn cancel_during_fetch(self, token: CancellationToken) -> Self {
        *self.cancel_on_fetch.lock().unwrap() = Some(token);
        self
    }

    pub fn polls_for(&self, run_id: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == run_id)
            .count()
    }

    pub fn result_fetches(&self) -> Vec<String> {
        self.result_calls.lock().unwrap().clone()
    }

    pub fn starts(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActorPlatform for ScriptedPlatform {
    async fn validate_credential(&self) -> Result<Identity, ApiError> {
        match self.identity.lock().unwrap().clone() {
            Some(Ok(identity)) => Ok(identity),
            Some(Err(code)) => Err(scripted_error(code)),
            None => Err(scripted_error(500)),
        }
    }

    async fn list_actors(&self) -> Result<Vec<ActorSummary>, ApiError> {
        Ok(Vec::new())
    }

    async fn actor_input_schema(&self, actor_id: &str) -> Result<InputSchema, ApiError> {
        Err(ApiError::NotFound(actor_id.to_string()))
    }

    async fn start_run(
        &self,
        _actor_id: &str,
        _input: &serde_json::Value,
    ) -> Result<RunHandle, ApiError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        match self.launch.lock().unwrap().clone() {
            Some(Ok(handle)) => Ok(handle),
            Some(Err(code)) => Err(scripted_error(code)),
            None => Err(scripted_error(500)),
        }
    }

    async fn run_status(&self, run_id: &str) -> Result<RunSnapshot, ApiError> {
        let nth = {
            let mut calls = self.status_calls.lock().unwrap();
            calls.push(run_id.to_string());
            calls.iter().filter(|id| *id == run_id).count()
        };
        tokio::task::yield_now().await;
        for (id, at, token) in self.cancel_on_poll.lock().unwrap().iter() {
            if id == run_id && *at == nth {
                token.cancel();
            }
        }
        let step = self
            .polls
            .lock()
            .unwrap()
            .get_mut(run_id)
            .and_then(|q| q.pop_front())
            .unwrap_or(Step::Status(RunStatus::Running));
        match step {
            Step::Status(status) => Ok(RunSnapshot {
                status,
                result_pointer: None,
            }),
            Step::WithPointer(status, pointer) => Ok(RunSnapshot {
                status,
                result_pointer: Some(pointer.to_string()),
            }),
            Step::Fail(code) => Err(scripted_error(code)),
        }
    }

    async fn result_items(
        &self,
        result_pointer: &str,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        self.result_calls
            .lock()
            .unwrap()
            .push(result_pointer.to_string());
        if let Some(token) = self.cancel_on_fetch.lock().unwrap().as_ref() {
            token.cancel();
        }
        match self.items.lock().unwrap().get(result_pointer).cloned() {
            Some(Ok(items)) => Ok(items),
            Some(Err(code)) => Err(scripted_error(code)),
            None => Err(ApiError::NotFound(result_pointer.to_string())),
        }
    }
}
