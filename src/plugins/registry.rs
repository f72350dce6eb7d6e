use async_trait::async_trait;
use crate::core::model::{QueueId, RunAck, StatusPayload};
use clap::{ArgMatches, Command};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_USER_AGENT: &str = "judgewatch/0.1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 25;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("http status {status}{}", detail_suffix(.detail))]
    Status { status: reqwest::StatusCode, detail: Option<String> },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("event stream broken: {0}")]
    Stream(#[from] std::io::Error),

    #[error("invalid base url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header {0}")]
    InvalidHeader(String),

    #[error("no backend for base url scheme {0:?}")]
    UnsupportedScheme(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

impl ApiError {
    /// Decode errors on a single stream message do not break the stream.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Connection settings shared by every backend call.
#[derive(Debug, Clone)]
pub struct ApiContext {
    pub base_url: Url,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub headers: HashMap<String, String>,
}

impl ApiContext {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            headers: HashMap::new(),
        }
    }

    pub fn parse_base_url(raw: &str) -> Result<Url, ApiError> {
        Url::parse(raw.trim()).map_err(|e| ApiError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })
    }
}

pub type StatusStream = BoxStream<'static, Result<StatusPayload, ApiError>>;

/// The remote evaluation service as seen by the monitor.
#[async_trait]
pub trait EvaluationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// `POST /queue/run`: enqueue evaluation jobs for a queue.
    async fn trigger_run(&self, queue_id: &QueueId) -> Result<RunAck, ApiError>;

    /// `GET /diagnostics/job_status`: one status snapshot.
    async fn fetch_status(&self, queue_id: &QueueId) -> Result<StatusPayload, ApiError>;

    /// `GET /diagnostics/live_job_status`: push stream of snapshots. An error
    /// here means the connection could not be established.
    async fn open_status_stream(&self, queue_id: &QueueId) -> Result<StatusStream, ApiError>;
}

pub trait BackendFactory: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, base_url: &Url) -> bool;
    fn build(&self, ctx: &ApiContext) -> Result<Arc<dyn EvaluationBackend>, ApiError>;
}

pub trait CliPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn augment_command(&self, cmd: Command) -> Command;
    fn apply_matches(&self, matches: &ArgMatches, ctx: &mut ApiContext) -> anyhow::Result<()>;
}

pub struct PluginRegistry {
    backends: Vec<Box<dyn BackendFactory>>,
    cli_plugins: Vec<Box<dyn CliPlugin>>,
}

impl PluginRegistry {
    pub fn with_defaults() -> Self {
        let mut reg = Self { backends: vec![], cli_plugins: vec![] };

        reg.backends.push(Box::new(crate::plugins::http::backend::HttpBackendFactory));

        reg.cli_plugins.push(Box::new(crate::plugins::http::cli::HttpCliPlugin::new()));
        reg
    }

    pub fn augment_command(&self, cmd: Command) -> Command {
        self.cli_plugins
            .iter()
            .fold(cmd, |c, p| p.augment_command(c))
    }

    pub fn apply_matches(&self, matches: &ArgMatches, ctx: &mut ApiContext) -> anyhow::Result<()> {
        for p in &self.cli_plugins {
            p.apply_matches(matches, ctx)?;
        }
        Ok(())
    }

    pub fn backend_for(&self, ctx: &ApiContext) -> Result<Arc<dyn EvaluationBackend>, ApiError> {
        let factory = self
            .backends
            .iter()
            .find(|b| b.supports(&ctx.base_url))
            .ok_or_else(|| ApiError::UnsupportedScheme(ctx.base_url.scheme().to_string()))?;
        tracing::debug!(backend = factory.name(), base_url = %ctx.base_url, "selected backend");
        factory.build(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_picks_http_backend_for_http_urls() {
        let reg = PluginRegistry::with_defaults();
        let ctx = ApiContext::new(Url::parse("https://eval.example.com/api").unwrap());
        let backend = reg.backend_for(&ctx).unwrap();
        assert_eq!(backend.name(), "http-backend");
    }

    #[test]
    fn registry_rejects_unknown_schemes() {
        let reg = PluginRegistry::with_defaults();
        let ctx = ApiContext::new(Url::parse("ftp://eval.example.com").unwrap());
        let err = reg.backend_for(&ctx).err().unwrap();
        assert!(matches!(err, ApiError::UnsupportedScheme(s) if s == "ftp"));
    }

    #[test]
    fn status_error_includes_server_detail() {
        let err = ApiError::Status {
            status: reqwest::StatusCode::BAD_REQUEST,
            detail: Some("No assignments provided".into()),
        };
        assert_eq!(err.to_string(), "http status 400 Bad Request: No assignments provided");

        let bare = ApiError::Status { status: reqwest::StatusCode::BAD_GATEWAY, detail: None };
        assert_eq!(bare.to_string(), "http status 502 Bad Gateway");
    }
}
