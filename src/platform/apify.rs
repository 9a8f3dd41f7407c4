use crate::error::{ApiError, RunError};
use crate::model::{ActorSummary, ClientConfig, Identity, InputSchema, RunHandle, RunSnapshot, RunStatus};
use crate::platform::ActorPlatform;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;

/// API token for the platform. Debug output never shows the secret.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Result<Self, RunError> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(RunError::InvalidRequest("API token is required".into()));
        }
        Ok(Self(token))
    }

    fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ItemList<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActorData {
    id: String,
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl From<UserData> for Identity {
    fn from(u: UserData) -> Self {
        Identity {
            user_id: u.id,
            username: u.username,
        }
    }
}

impl From<ActorData> for ActorSummary {
    fn from(a: ActorData) -> Self {
        ActorSummary {
            id: a.id,
            name: a.name,
            title: a.title,
            description: a.description,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildData {
    #[serde(default)]
    input_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunData {
    id: String,
    status: String,
    #[serde(default)]
    default_dataset_id: Option<String>,
}

impl RunData {
    fn status(&self) -> Result<RunStatus, ApiError> {
        RunStatus::from_wire(&self.status)
            .ok_or_else(|| ApiError::Decode(format!("unknown run status {:?}", self.status)))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the Apify REST API (v2).
#[derive(Clone)]
pub struct ApifyClient {
    http: reqwest::Client,
    base_url: Url,
    credential: Credential,
}

impl ApifyClient {
    pub fn new(cfg: &ClientConfig, credential: Credential) -> Result<Self, RunError> {
        let base_url = Url::parse(cfg.base_url.trim_end_matches('/')).map_err(|e| {
            RunError::InvalidRequest(format!("invalid base URL {:?}: {e}", cfg.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RunError::InvalidRequest(format!(
                "base URL {:?} cannot carry paths",
                cfg.base_url
            )));
        }
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| RunError::Platform(ApiError::Transport(e)))?;
        Ok(Self {
            http,
            base_url,
            credential,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        tracing::debug!(%url, "GET");
        let resp = self
            .http
            .get(url)
            .bearer_auth(self.credential.secret())
            .send()
            .await?;
        decode(resp).await
    }
}

/// Actor ids of the form `owner/name` are addressed as `owner~name`.
pub(crate) fn actor_path_id(actor_id: &str) -> String {
    actor_id.replace('/', "~")
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()));
    }
    let url = resp.url().path().to_string();
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status, &url, &body))
}

pub(crate) fn status_error(status: StatusCode, path: &str, body: &str) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
        StatusCode::NOT_FOUND => ApiError::NotFound(path.to_string()),
        _ => {
            let message = serde_json::from_str::<ErrorBody>(body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("unknown error")
                        .to_string()
                });
            ApiError::Status {
                code: status.as_u16(),
                message,
            }
        }
    }
}

/// The build stores the input schema as a JSON string; older builds carry an object.
fn parse_input_schema(raw: Option<serde_json::Value>) -> Result<InputSchema, ApiError> {
    let doc = match raw {
        Some(serde_json::Value::String(s)) => serde_json::from_str::<serde_json::Value>(&s)
            .map_err(|e| ApiError::Decode(format!("input schema is not valid JSON: {e}")))?,
        Some(v @ serde_json::Value::Object(_)) => v,
        _ => return Err(ApiError::Decode("build has no input schema".into())),
    };
    InputSchema::from_document(&doc)
        .ok_or_else(|| ApiError::Decode("input schema is not an object".into()))
}

#[async_trait]
impl ActorPlatform for ApifyClient {
    async fn validate_credential(&self) -> Result<Identity, ApiError> {
        let user: Envelope<UserData> = self.get_json(self.url(&["users", "me"])).await?;
        Ok(user.data.into())
    }

    async fn list_actors(&self) -> Result<Vec<ActorSummary>, ApiError> {
        let list: Envelope<ItemList<ActorData>> = self.get_json(self.url(&["acts"])).await?;
        Ok(list.data.items.into_iter().map(ActorSummary::from).collect())
    }

    async fn actor_input_schema(&self, actor_id: &str) -> Result<InputSchema, ApiError> {
        let path_id = actor_path_id(actor_id);
        let build: Envelope<BuildData> = self
            .get_json(self.url(&["acts", &path_id, "builds", "default"]))
            .await?;
        parse_input_schema(build.data.input_schema)
    }

    async fn start_run(
        &self,
        actor_id: &str,
        input: &serde_json::Value,
    ) -> Result<RunHandle, ApiError> {
        let path_id = actor_path_id(actor_id);
        let url = self.url(&["acts", &path_id, "runs"]);
        tracing::debug!(%url, "POST");
        let resp = self
            .http
            .post(url)
            .bearer_auth(self.credential.secret())
            .json(input)
            .send()
            .await?;
        let run: Envelope<RunData> = decode(resp).await?;
        Ok(RunHandle {
            status: run.data.status()?,
            run_id: run.data.id,
            result_pointer: run.data.default_dataset_id,
        })
    }

    async fn run_status(&self, run_id: &str) -> Result<RunSnapshot, ApiError> {
        let run: Envelope<RunData> = self.get_json(self.url(&["actor-runs", run_id])).await?;
        Ok(RunSnapshot {
            status: run.data.status()?,
            result_pointer: run.data.default_dataset_id,
        })
    }

    async fn result_items(
        &self,
        result_pointer: &str,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        let mut url = self.url(&["datasets", result_pointer, "items"]);
        url.query_pairs_mut().append_pair("format", "json");
        self.get_json(url).await
    }
}
