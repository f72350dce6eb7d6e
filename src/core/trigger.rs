use crate::core::model::{RunRequest, RunResult};
use crate::plugins::registry::{ApiError, EvaluationBackend};

/// Asks the service to enqueue evaluation jobs for the requested queue.
pub async fn trigger_run(backend: &dyn EvaluationBackend, req: &RunRequest) -> Result<RunResult, ApiError> {
    let ack = backend.trigger_run(&req.queue_id).await.map_err(|e| {
        tracing::error!(queue_id = %req.queue_id, error = %e, "run trigger failed");
        e
    })?;
    let result = RunResult::from(ack);
    tracing::info!(
        queue_id = %req.queue_id,
        enqueued = result.enqueued,
        expected_evaluations = ?result.expected_evaluations,
        "run accepted"
    );
    Ok(result)
}
