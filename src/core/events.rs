use crate::core::model::{JobCounts, MonitorState, QueueId, SessionId, TransportKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub session_id: SessionId,
    pub queue_id: QueueId,
    pub counts: JobCounts,
    pub progress_percent: u8,
    pub complete: bool,
    pub source: TransportKind,
    pub completed_evaluations: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    StateChanged { session_id: SessionId, queue_id: QueueId, state: MonitorState },
    Progress(ProgressUpdate),
    Error { scope: String, message: String },
    Info { scope: String, message: String },
}
