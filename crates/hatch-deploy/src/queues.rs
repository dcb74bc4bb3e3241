//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use tracing::debug;

use crate::api::{api_path, HttpMethod, PlatformApi, RequestBody};
use crate::error::DeployError;

/// Platform error code for a queue that does not exist.
pub const QUEUE_NOT_FOUND_CODE: u32 = 11000;

/// Check every queue exists before uploading a worker bound to it.
///
/// A missing queue becomes [`DeployError::QueueNotFound`]; any other
/// failure is returned as is. Stops at the first failure.
pub async fn ensure_queues_exist(
    api: &dyn PlatformApi,
    account_id: &str,
    queues: &[String],
) -> Result<(), DeployError> {
    for name in queues {
        let path = api_path(&["accounts", account_id, "queues", name.as_str()])?;
        match api
            .fetch_result(HttpMethod::Get, &path, RequestBody::Empty, &[])
            .await
        {
            Ok(_) => debug!(queue = %name, "queue exists"),
            Err(err) if err.has_code(QUEUE_NOT_FOUND_CODE) => {
                return Err(DeployError::QueueNotFound { name: name.clone() });
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
