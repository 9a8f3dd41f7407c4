mod clock;
mod launcher;
mod monitor;
#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, TokioClock};
pub use launcher::RunLauncher;
pub use monitor::RunMonitor;

use crate::error::{ApiError, RunError};
use crate::model::CredentialCheck;
use crate::platform::ActorPlatform;

/// Check the platform credential once. A rejection is `Unauthorized`; any
/// other failure is surfaced as-is.
pub async fn validate_credential(platform: &dyn ActorPlatform) -> Result<CredentialCheck, RunError> {
    match platform.validate_credential().await {
        Ok(identity) => {
            tracing::info!(user_id = %identity.user_id, "credential accepted");
            Ok(CredentialCheck {
                valid: true,
                identity: Some(identity),
            })
        }
        Err(ApiError::Unauthorized) => {
            tracing::warn!("credential rejected");
            Err(RunError::Unauthorized)
        }
        Err(e) => Err(RunError::Platform(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedPlatform;
    use crate::error::ErrorKind;
    use crate::model::Identity;

    #[tokio::test]
    async fn accepted_credential_reports_identity() {
        let platform = ScriptedPlatform::new().identity(Ok(Identity {
            user_id: "u1".into(),
            username: Some("jane".into()),
        }));
        let check = validate_credential(&platform).await.unwrap();
        assert!(check.valid);
        assert_eq!(check.identity.unwrap().username.as_deref(), Some("jane"));
    }

    #[tokio::test]
    async fn rejected_credential_is_unauthorized() {
        let platform = ScriptedPlatform::new().identity(Err(401));
        let err = validate_credential(&platform).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let platform = ScriptedPlatform::new().identity(Err(500));
        let err = validate_credential(&platform).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Platform);
    }
}
