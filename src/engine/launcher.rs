use crate::error::RunError;
use crate::model::RunHandle;
use crate::platform::ActorPlatform;
use std::sync::Arc;

/// Issues the single "start run" request for an actor.
pub struct RunLauncher {
    platform: Arc<dyn ActorPlatform>,
}

impl RunLauncher {
    pub fn new(platform: Arc<dyn ActorPlatform>) -> Self {
        Self { platform }
    }

    /// Start one run of `actor_id`.
    ///
    /// Arguments are checked before anything goes over the wire. The start
    /// request is sent exactly once; a failure is returned, never retried.
    pub async fn launch(
        &self,
        actor_id: &str,
        input: Option<&serde_json::Value>,
    ) -> Result<RunHandle, RunError> {
        let actor_id = actor_id.trim();
        if actor_id.is_empty() {
            return Err(RunError::InvalidRequest("actor id is required".into()));
        }
        let Some(input) = input else {
            return Err(RunError::InvalidRequest("run input is required".into()));
        };

        match self.platform.start_run(actor_id, input).await {
            Ok(handle) => {
                tracing::info!(
                    actor_id,
                    run_id = %handle.run_id,
                    status = %handle.status,
                    result_pointer = handle.result_pointer.as_deref().unwrap_or("-"),
                    "run started"
                );
                Ok(handle)
            }
            Err(e) => {
                tracing::warn!(actor_id, error = %e, "run start failed");
                Err(RunError::Launch(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedPlatform;
    use crate::error::{ApiError, ErrorKind};
    use crate::model::RunStatus;
    use serde_json::json;

    fn launcher(platform: &Arc<ScriptedPlatform>) -> RunLauncher {
        RunLauncher::new(platform.clone())
    }

    #[tokio::test]
    async fn missing_arguments_are_rejected_without_network_calls() {
        let platform = Arc::new(ScriptedPlatform::new().launch(Ok(RunHandle::pending("r1"))));
        let l = launcher(&platform);

        let err = l.launch("", Some(&json!({}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = l.launch("   ", Some(&json!({}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = l.launch("apify/hello-world", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        assert_eq!(platform.starts(), 0);
    }

    #[tokio::test]
    async fn launch_returns_the_platform_handle() {
        let handle = RunHandle {
            run_id: "run-1".into(),
            status: RunStatus::Pending,
            result_pointer: Some("ds-1".into()),
        };
        let platform = Arc::new(ScriptedPlatform::new().launch(Ok(handle.clone())));

        let got = launcher(&platform)
            .launch("apify/hello-world", Some(&json!({"q": 1})))
            .await
            .unwrap();
        assert_eq!(got, handle);
        assert_eq!(platform.starts(), 1);
    }

    #[tokio::test]
    async fn start_failure_is_reported_once_without_retry() {
        let platform = Arc::new(ScriptedPlatform::new().launch(Err(503)));

        let err = launcher(&platform)
            .launch("apify/hello-world", Some(&json!({})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::Launch(ApiError::Status { code: 503, .. })
        ));
        assert_eq!(platform.starts(), 1);
    }

    #[tokio::test]
    async fn rejected_token_surfaces_as_launch_error() {
        let platform = Arc::new(ScriptedPlatform::new().launch(Err(401)));

        let err = launcher(&platform)
            .launch("apify/hello-world", Some(&json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Launch(ApiError::Unauthorized)));
    }
}
