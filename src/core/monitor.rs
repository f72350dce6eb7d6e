use crate::core::events::{MonitorEvent, ProgressUpdate};
use crate::core::fetcher::fetch_job_counts;
use crate::core::model::*;
use crate::core::transport::Transport;
use crate::core::trigger::trigger_run;
use crate::plugins::registry::{ApiError, EvaluationBackend};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Fixed rate of status requests while polling.
    pub poll_interval: Duration,
    /// Consecutive polling failures after which the session settles with an
    /// error. `None` keeps polling until the monitor is stopped.
    pub max_poll_failures: Option<u32>,
    pub event_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_failures: None,
            event_capacity: 256,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    #[error("failed to start evaluations for queue {queue_id}")]
    Trigger {
        queue_id: QueueId,
        #[source]
        source: ApiError,
    },

    #[error("monitoring of queue {queue_id} was stopped before the run was accepted")]
    Superseded { queue_id: QueueId },
}

type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

struct Session {
    id: SessionId,
    queue_id: QueueId,
    seed_total: u64,
    consecutive_failures: u32,
}

#[derive(Default)]
struct Inner {
    session: Option<Session>,
    state: MonitorState,
    transport: Transport,
    counts: Option<JobCounts>,
    progress_percent: u8,
    complete: bool,
}

impl Inner {
    /// True while `session_id` is the current session and it has not settled.
    fn is_live(&self, session_id: SessionId) -> bool {
        self.state.is_active() && self.session.as_ref().is_some_and(|s| s.id == session_id)
    }

    fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            session_id: self.session.as_ref().map(|s| s.id),
            queue_id: self.session.as_ref().map(|s| s.queue_id.clone()),
            state: self.state.clone(),
            transport: self.transport.kind(),
            counts: self.counts,
            progress_percent: self.progress_percent,
            complete: self.complete,
        }
    }
}

enum Observation {
    Applied { settled: bool },
    Stale,
}

impl Observation {
    fn keeps_going(&self) -> bool {
        matches!(self, Self::Applied { settled: false })
    }
}

struct Shared {
    backend: Arc<dyn EvaluationBackend>,
    config: MonitorConfig,
    event_tx: broadcast::Sender<MonitorEvent>,
    state_tx: watch::Sender<MonitorSnapshot>,
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<(u64, ProgressCallback)>>,
    next_listener: AtomicU64,
}

/// Follows one evaluation queue at a time through the live status stream,
/// falling back to polling when the stream is unavailable.
///
/// Starting a new session always stops the previous one first. Dropping the
/// monitor stops the current session, so no stream or timer outlives it.
pub struct Monitor {
    shared: Arc<Shared>,
}

impl Monitor {
    pub fn new(backend: Arc<dyn EvaluationBackend>, config: MonitorConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (state_tx, _) = watch::channel(MonitorSnapshot::idle());

        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                event_tx,
                state_tx,
                inner: Mutex::new(Inner::default()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<MonitorSnapshot> {
        self.shared.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.shared.state_tx.borrow().clone()
    }

    /// Registers a callback for every applied snapshot. The callback runs on
    /// the task that received the snapshot and must not block.
    pub fn on_progress<F>(&self, callback: F) -> ProgressSubscription
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners().push((id, Arc::new(callback)));
        ProgressSubscription { id, shared: Arc::downgrade(&self.shared) }
    }

    /// Triggers an evaluation run for `queue_id` and starts following it.
    ///
    /// Suspends only for the trigger request; progress is delivered through
    /// events, callbacks and the state channel afterwards.
    pub async fn run(&self, queue_id: QueueId) -> Result<RunResult, MonitorError> {
        let shared = &self.shared;
        let session_id = shared.begin(queue_id.clone());

        let req = RunRequest { queue_id: queue_id.clone() };
        let outcome = trigger_run(shared.backend.as_ref(), &req).await;

        let mut inner = shared.lock();
        if !inner.is_live(session_id) {
            tracing::debug!(%session_id, queue_id = %queue_id, "run accepted for a stopped session");
            return Err(MonitorError::Superseded { queue_id });
        }

        match outcome {
            Err(source) => {
                shared.settle(&mut inner, Settlement::Error { reason: source.to_string() });
                Err(MonitorError::Trigger { queue_id, source })
            }
            Ok(result) if !result.has_work() => {
                inner.progress_percent = 100;
                inner.complete = true;
                shared.emit(MonitorEvent::Info {
                    scope: format!("queue({queue_id})"),
                    message: "nothing was enqueued".to_string(),
                });
                shared.settle(&mut inner, Settlement::Complete);
                Ok(result)
            }
            Ok(result) => {
                if let Some(session) = inner.session.as_mut() {
                    session.seed_total = result.seed_total();
                }
                shared.start_live(&mut inner, session_id);
                Ok(result)
            }
        }
    }

    /// Follows a queue whose jobs were enqueued elsewhere. Must be called
    /// from within a Tokio runtime.
    pub fn watch(&self, queue_id: QueueId) -> SessionId {
        let session_id = self.shared.begin(queue_id);
        let mut inner = self.shared.lock();
        self.shared.start_live(&mut inner, session_id);
        session_id
    }

    /// One immediate status request for the current queue, applied like a
    /// poll response. `None` when idle or settled, when the request failed,
    /// or when the session ended while the request was in flight.
    pub async fn refresh(&self) -> Option<JobCounts> {
        let (session_id, queue_id) = {
            let inner = self.shared.lock();
            let session = inner.session.as_ref()?;
            if inner.state.is_settled() {
                return None;
            }
            (session.id, session.queue_id.clone())
        };
        let counts = fetch_job_counts(self.shared.backend.as_ref(), &queue_id).await?;
        match self.shared.observe(session_id, counts, None, TransportKind::None) {
            Observation::Applied { .. } => Some(counts),
            Observation::Stale => None,
        }
    }

    /// Closes the active transport and returns to `Idle`. Idempotent.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        self.shared.stop_locked(&mut inner);
    }

    /// Resolves once the current session settles or is stopped. Returns
    /// immediately when nothing is active.
    pub async fn wait_settled(&self) -> MonitorSnapshot {
        let mut rx = self.shared.state_tx.subscribe();
        let snapshot = match rx.wait_for(|s| !s.state.is_active()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        snapshot
    }

    #[cfg(test)]
    fn observe_for(&self, session_id: SessionId, counts: JobCounts) -> bool {
        self.shared
            .observe(session_id, counts, None, TransportKind::Streaming)
            .keeps_going()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Keeps a progress callback registered until unsubscribed or dropped.
pub struct ProgressSubscription {
    id: u64,
    shared: Weak<Shared>,
}

impl ProgressSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners().retain(|(id, _)| *id != self.id);
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, ProgressCallback)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: MonitorEvent) {
        let _ = self.event_tx.send(event);
    }

    fn publish(&self, inner: &Inner) {
        self.state_tx.send_replace(inner.snapshot());
    }

    fn transition(&self, inner: &mut Inner, state: MonitorState) {
        inner.state = state.clone();
        if let Some(session) = &inner.session {
            tracing::debug!(session_id = %session.id, queue_id = %session.queue_id, ?state, "state changed");
            self.emit(MonitorEvent::StateChanged {
                session_id: session.id,
                queue_id: session.queue_id.clone(),
                state,
            });
        }
        self.publish(inner);
    }

    fn begin(&self, queue_id: QueueId) -> SessionId {
        let mut inner = self.lock();
        self.stop_locked(&mut inner);

        let id = Uuid::new_v4();
        tracing::info!(session_id = %id, queue_id = %queue_id, "monitoring started");
        inner.session = Some(Session { id, queue_id, seed_total: 0, consecutive_failures: 0 });
        self.transition(&mut inner, MonitorState::Starting);
        id
    }

    fn stop_locked(&self, inner: &mut Inner) -> bool {
        let Some(session) = inner.session.take() else {
            return false;
        };
        let closed = inner.transport.close();
        tracing::info!(session_id = %session.id, queue_id = %session.queue_id, ?closed, "monitoring stopped");

        *inner = Inner::default();
        self.emit(MonitorEvent::StateChanged {
            session_id: session.id,
            queue_id: session.queue_id,
            state: MonitorState::Idle,
        });
        self.publish(inner);
        true
    }

    fn settle(&self, inner: &mut Inner, settlement: Settlement) {
        inner.transport.close();
        if let Some(session) = &inner.session {
            match &settlement {
                Settlement::Complete => tracing::info!(queue_id = %session.queue_id, "queue finished"),
                Settlement::Error { reason } => {
                    tracing::error!(queue_id = %session.queue_id, %reason, "monitoring failed")
                }
            }
        }
        self.transition(inner, MonitorState::Settled(settlement));
    }

    /// Spawns the stream task for a session that is still `Starting`.
    fn start_live(self: &Arc<Self>, inner: &mut Inner, session_id: SessionId) {
        let Some(session) = inner.session.as_ref().filter(|s| s.id == session_id) else {
            return;
        };
        let queue_id = session.queue_id.clone();
        let seed_total = session.seed_total;
        debug_assert!(!inner.transport.is_active());

        let shared = Arc::clone(self);
        let task = tokio::spawn(async move {
            shared.stream_loop(session_id, queue_id, seed_total).await;
        });
        inner.transport = Transport::Streaming(task.abort_handle());
        self.publish(inner);
    }

    async fn stream_loop(self: Arc<Self>, session_id: SessionId, queue_id: QueueId, seed_total: u64) {
        let mut stream = match self.backend.open_status_stream(&queue_id).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(queue_id = %queue_id, error = %e, "live status stream unavailable");
                self.fall_back_to_polling(session_id, &queue_id, format!("stream unavailable: {e}"));
                return;
            }
        };

        if !self.mark_streaming(session_id) {
            return;
        }

        while let Some(item) = stream.next().await {
            match item {
                Ok(payload) => {
                    let completed = payload.completed_evaluations;
                    let counts = payload.into_counts(seed_total);
                    if !self.observe(session_id, counts, completed, TransportKind::Streaming).keeps_going() {
                        return;
                    }
                }
                Err(e) if e.is_decode() => {
                    tracing::warn!(queue_id = %queue_id, error = %e, "skipping malformed stream message");
                    self.emit_for(session_id, |q| MonitorEvent::Error {
                        scope: format!("stream(queue={q})"),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(queue_id = %queue_id, error = %e, "live status stream failed");
                    self.fall_back_to_polling(session_id, &queue_id, format!("stream failed: {e}"));
                    return;
                }
            }
        }

        tracing::warn!(queue_id = %queue_id, "live status stream ended before completion");
        self.fall_back_to_polling(session_id, &queue_id, "stream closed by server".to_string());
    }

    fn mark_streaming(&self, session_id: SessionId) -> bool {
        let mut inner = self.lock();
        if !inner.is_live(session_id) {
            return false;
        }
        if inner.state == MonitorState::Starting {
            self.transition(&mut inner, MonitorState::Streaming);
        }
        true
    }

    /// Replaces the stream with the polling timer. Called from the stream
    /// task, which must return right after.
    fn fall_back_to_polling(self: &Arc<Self>, session_id: SessionId, queue_id: &QueueId, reason: String) {
        let mut inner = self.lock();
        if !inner.is_live(session_id) {
            return;
        }
        inner.transport.close();

        let shared = Arc::clone(self);
        let q = queue_id.clone();
        let task = tokio::spawn(async move {
            shared.poll_loop(session_id, q).await;
        });
        inner.transport = Transport::Polling(task.abort_handle());

        tracing::info!(queue_id = %queue_id, %reason, "falling back to polling");
        self.emit(MonitorEvent::Info {
            scope: format!("queue({queue_id})"),
            message: format!("polling every {:?}: {reason}", self.config.poll_interval),
        });
        self.transition(&mut inner, MonitorState::Polling);
    }

    /// Fixed-rate polling. Each tick issues a request even if an earlier one
    /// is still in flight; responses are applied in arrival order.
    async fn poll_loop(self: Arc<Self>, session_id: SessionId, queue_id: QueueId) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = FuturesUnordered::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let backend = Arc::clone(&self.backend);
                    let q = queue_id.clone();
                    in_flight.push(async move { fetch_job_counts(backend.as_ref(), &q).await });
                }
                Some(res) = in_flight.next(), if !in_flight.is_empty() => {
                    let keep_going = match res {
                        Some(counts) => self
                            .observe(session_id, counts, None, TransportKind::Polling)
                            .keeps_going(),
                        None => self.record_poll_failure(session_id),
                    };
                    if !keep_going {
                        return;
                    }
                }
            }
        }
    }

    fn record_poll_failure(&self, session_id: SessionId) -> bool {
        let mut inner = self.lock();
        if !inner.is_live(session_id) {
            return false;
        }
        let Some(session) = inner.session.as_mut() else {
            return false;
        };
        session.consecutive_failures += 1;
        let failures = session.consecutive_failures;
        let queue_id = session.queue_id.clone();

        self.emit(MonitorEvent::Error {
            scope: format!("poll(queue={queue_id})"),
            message: format!("status request failed ({failures} in a row)"),
        });

        match self.config.max_poll_failures {
            Some(max) if failures >= max => {
                self.settle(
                    &mut inner,
                    Settlement::Error { reason: format!("status unavailable after {failures} attempts") },
                );
                false
            }
            _ => true,
        }
    }

    /// Applies a snapshot if it belongs to the live session; otherwise drops
    /// it. Settles the session when the snapshot completes the queue.
    fn observe(
        &self,
        session_id: SessionId,
        counts: JobCounts,
        completed_evaluations: Option<u64>,
        source: TransportKind,
    ) -> Observation {
        let update = {
            let mut inner = self.lock();
            if !inner.is_live(session_id) {
                tracing::debug!(%session_id, "discarding stale status snapshot");
                return Observation::Stale;
            }
            let Some(session) = inner.session.as_mut() else {
                return Observation::Stale;
            };
            session.consecutive_failures = 0;

            let update = ProgressUpdate {
                session_id,
                queue_id: session.queue_id.clone(),
                counts,
                progress_percent: counts.progress_percent(),
                complete: counts.is_complete(),
                source,
                completed_evaluations,
            };
            inner.counts = Some(counts);
            inner.progress_percent = update.progress_percent;
            inner.complete = update.complete;

            tracing::debug!(
                queue_id = %update.queue_id,
                pending = counts.pending,
                running = counts.running,
                done = counts.done,
                failed = counts.failed,
                total = counts.total,
                progress = update.progress_percent,
                "status snapshot"
            );
            self.emit(MonitorEvent::Progress(update.clone()));

            if update.complete {
                self.settle(&mut inner, Settlement::Complete);
            } else {
                self.publish(&inner);
            }
            update
        };

        let callbacks: Vec<ProgressCallback> =
            self.listeners().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for cb in callbacks {
            cb(&update);
        }

        Observation::Applied { settled: update.complete }
    }

    fn emit_for(&self, session_id: SessionId, build: impl FnOnce(&QueueId) -> MonitorEvent) {
        let inner = self.lock();
        if let Some(session) = inner.session.as_ref().filter(|s| s.id == session_id) {
            self.emit(build(&session.queue_id));
        }
    }
}
