use crate::core::model::{JobCounts, QueueId};
use crate::plugins::registry::EvaluationBackend;

/// Current counts for a queue, or `None` when the request or its body
/// failed. Failures are logged here so callers can just skip the result.
pub async fn fetch_job_counts(backend: &dyn EvaluationBackend, queue_id: &QueueId) -> Option<JobCounts> {
    match backend.fetch_status(queue_id).await {
        Ok(payload) => Some(payload.into_counts(0)),
        Err(e) => {
            tracing::warn!(queue_id = %queue_id, error = %e, "failed to fetch job status");
            None
        }
    }
}
