use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("queue id must not be empty")]
pub struct InvalidQueueId;

/// Identifier of an evaluation queue on the remote service. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct QueueId(String);

impl QueueId {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidQueueId> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidQueueId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for QueueId {
    type Err = InvalidQueueId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Job states for one queue at one instant. `total == 0` means the server
/// has not reported a total yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct JobCounts {
    pub pending: u64,
    pub running: u64,
    pub done: u64,
    pub failed: u64,
    pub total: u64,
}

impl JobCounts {
    pub fn finished(&self) -> u64 {
        self.done.saturating_add(self.failed)
    }

    pub fn in_flight(&self) -> u64 {
        self.pending.saturating_add(self.running)
    }

    pub fn progress_percent(&self) -> u8 {
        crate::core::progress::progress_percent(self)
    }

    pub fn is_complete(&self) -> bool {
        crate::core::progress::is_complete(self)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CountsPayload {
    #[serde(default)]
    pub pending: Option<u64>,
    #[serde(default)]
    pub running: Option<u64>,
    #[serde(default)]
    pub done: Option<u64>,
    #[serde(default)]
    pub failed: Option<u64>,
}

/// Body of `job_status` responses and of each `live_job_status` message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub counts: Option<CountsPayload>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed_evaluations: Option<u64>,
}

impl StatusPayload {
    /// Missing counts become 0; a missing `total` becomes `fallback_total`.
    pub fn into_counts(self, fallback_total: u64) -> JobCounts {
        let counts = self.counts.unwrap_or_default();
        JobCounts {
            pending: counts.pending.unwrap_or(0),
            running: counts.running.unwrap_or(0),
            done: counts.done.unwrap_or(0),
            failed: counts.failed.unwrap_or(0),
            total: self.total.unwrap_or(fallback_total),
        }
    }
}

/// Body of the `queue/run` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunAck {
    #[serde(default)]
    pub enqueued: Option<u64>,
    #[serde(default)]
    pub expected_evaluations: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub queue_id: QueueId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub enqueued: u64,
    pub expected_evaluations: Option<u64>,
}

impl RunResult {
    /// Starting total handed to the monitor. A positive server-supplied
    /// `expected_evaluations` wins over `enqueued`.
    pub fn seed_total(&self) -> u64 {
        self.expected_evaluations
            .filter(|n| *n > 0)
            .unwrap_or(self.enqueued)
    }

    pub fn has_work(&self) -> bool {
        self.enqueued > 0
    }
}

impl From<RunAck> for RunResult {
    fn from(ack: RunAck) -> Self {
        Self {
            enqueued: ack.enqueued.unwrap_or(0),
            expected_evaluations: ack.expected_evaluations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    None,
    Streaming,
    Polling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Settlement {
    Complete,
    Error { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum MonitorState {
    #[default]
    Idle,
    Starting,
    Streaming,
    Polling,
    Settled(Settlement),
}

impl MonitorState {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Streaming | Self::Polling)
    }
}

/// Read-only view of the monitor's current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    pub session_id: Option<SessionId>,
    pub queue_id: Option<QueueId>,
    pub state: MonitorState,
    pub transport: TransportKind,
    pub counts: Option<JobCounts>,
    pub progress_percent: u8,
    pub complete: bool,
}

impl MonitorSnapshot {
    pub fn idle() -> Self {
        Self {
            session_id: None,
            queue_id: None,
            state: MonitorState::Idle,
            transport: TransportKind::None,
            counts: None,
            progress_percent: 0,
            complete: false,
        }
    }
}

impl Default for MonitorSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_id_rejects_blank_input() {
        assert_eq!(QueueId::new(""), Err(InvalidQueueId));
        assert_eq!(QueueId::new("   "), Err(InvalidQueueId));
        assert_eq!(QueueId::new(" q-1 ").unwrap().as_str(), "q-1");
    }

    #[test]
    fn status_payload_defaults_missing_fields_to_zero() {
        let payload: StatusPayload =
            serde_json::from_str(r#"{"counts":{"running":2,"done":null}}"#).unwrap();
        let counts = payload.into_counts(0);
        assert_eq!(
            counts,
            JobCounts { pending: 0, running: 2, done: 0, failed: 0, total: 0 }
        );
    }

    #[test]
    fn status_payload_without_counts_object_is_all_zero() {
        let payload: StatusPayload = serde_json::from_str(r#"{"total":4}"#).unwrap();
        assert_eq!(payload.into_counts(0), JobCounts { total: 4, ..JobCounts::default() });
    }

    #[test]
    fn fallback_total_only_applies_when_total_is_absent() {
        let absent: StatusPayload = serde_json::from_str(r#"{"counts":{"pending":1}}"#).unwrap();
        assert_eq!(absent.into_counts(10).total, 10);

        let explicit: StatusPayload =
            serde_json::from_str(r#"{"counts":{"pending":1},"total":0}"#).unwrap();
        assert_eq!(explicit.into_counts(10).total, 0);
    }

    #[test]
    fn seed_total_prefers_positive_expected_evaluations() {
        let plain = RunResult { enqueued: 4, expected_evaluations: None };
        assert_eq!(plain.seed_total(), 4);

        let precise = RunResult { enqueued: 4, expected_evaluations: Some(12) };
        assert_eq!(precise.seed_total(), 12);

        let zero_hint = RunResult { enqueued: 4, expected_evaluations: Some(0) };
        assert_eq!(zero_hint.seed_total(), 4);
    }

    #[test]
    fn only_settled_states_are_settled() {
        let error = MonitorState::Settled(Settlement::Error { reason: "x".into() });
        assert!(error.is_settled());
        assert!(MonitorState::Settled(Settlement::Complete).is_settled());
        assert!(!error.is_active());
        for state in [MonitorState::Starting, MonitorState::Streaming, MonitorState::Polling] {
            assert!(state.is_active());
            assert!(!state.is_settled());
        }
        assert!(!MonitorState::Idle.is_settled());
        assert!(!MonitorState::Idle.is_active());
    }

    #[test]
    fn run_ack_with_missing_enqueued_means_no_work() {
        let ack: RunAck = serde_json::from_str("{}").unwrap();
        let result = RunResult::from(ack);
        assert!(!result.has_work());
    }
}
