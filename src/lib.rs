//! Live progress monitor for remote evaluation queues.
//!
//! [`core::monitor::Monitor`] follows one queue over the service's
//! server-sent event stream and falls back to fixed-rate polling when the
//! stream is unavailable. Backends are resolved through
//! [`plugins::registry::PluginRegistry`].

pub mod core;
pub mod i18n;
pub mod plugins;

pub use crate::core::model::{JobCounts, MonitorSnapshot, MonitorState, QueueId, RunResult, Settlement};
pub use crate::core::monitor::{Monitor, MonitorConfig, MonitorError};
pub use crate::plugins::registry::{ApiContext, ApiError, EvaluationBackend, PluginRegistry};
