use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::AssistError;
use crate::protocol::{ActReply, Outbound};

/// Sends `err` to the client. Internal errors are logged in full under a
/// fresh support id and only the id reaches the client.
pub async fn report_error(outbound: &Outbound, err: &AssistError) -> String {
    let support_id = Uuid::new_v4().to_string();

    match err {
        AssistError::Internal(inner) => {
            error!(support_id = %support_id, error = ?inner, "assist session failed");
        }
        other => {
            warn!(support_id = %support_id, error = %other, "assist session aborted");
        }
    }

    let message = err.client_message(&support_id);
    if let Err(e) = outbound.send(ActReply::error(message)).await {
        debug!(error = %e, "could not deliver error reply");
    }

    support_id
}
