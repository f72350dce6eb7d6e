use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::core::model::{QueueId, RunAck, StatusPayload};
use crate::plugins::http::sse;
use crate::plugins::registry::{ApiContext, ApiError, BackendFactory, EvaluationBackend, StatusStream};

const RUN_PATH: &str = "queue/run";
const JOB_STATUS_PATH: &str = "diagnostics/job_status";
const LIVE_JOB_STATUS_PATH: &str = "diagnostics/live_job_status";

pub struct HttpBackendFactory;

impl BackendFactory for HttpBackendFactory {
    fn name(&self) -> &'static str { "http" }

    fn supports(&self, base_url: &Url) -> bool {
        matches!(base_url.scheme(), "http" | "https")
    }

    fn build(&self, ctx: &ApiContext) -> Result<Arc<dyn EvaluationBackend>, ApiError> {
        Ok(Arc::new(HttpBackend::new(ctx.clone())?))
    }
}

/// reqwest client for the evaluation service.
///
/// One-shot calls use `client`, which carries the request timeout. The live
/// stream uses `stream_client`, which only bounds connecting: a total timeout
/// would cut a healthy stream.
pub struct HttpBackend {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    ctx: ApiContext,
}

impl HttpBackend {
    pub fn new(ctx: ApiContext) -> Result<Self, ApiError> {
        let headers = Self::build_headers(&ctx)?;
        let connect_timeout = Duration::from_secs(ctx.connect_timeout_secs.max(1));

        let client = reqwest::Client::builder()
            .user_agent(ctx.user_agent.clone())
            .default_headers(headers.clone())
            .connect_timeout(connect_timeout)
            .timeout(Duration::from_secs(ctx.request_timeout_secs.max(1)))
            .build()?;

        let stream_client = reqwest::Client::builder()
            .user_agent(ctx.user_agent.clone())
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self { client, stream_client, ctx })
    }

    fn build_headers(ctx: &ApiContext) -> Result<HeaderMap, ApiError> {
        let mut h = HeaderMap::new();
        for (k, v) in &ctx.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|_| ApiError::InvalidHeader(k.clone()))?;
            let value = HeaderValue::from_str(v)
                .map_err(|_| ApiError::InvalidHeader(format!("{k}: {v}")))?;
            h.insert(name, value);
        }
        Ok(h)
    }

    /// `{base}/{path}?queue_id={id}`, keeping any path prefix on the base url.
    pub fn endpoint(&self, path: &str, queue_id: &QueueId) -> Result<Url, ApiError> {
        let mut url = self.ctx.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl {
                url: self.ctx.base_url.to_string(),
                reason: "cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(path.split('/'));
        url.query_pairs_mut().append_pair("queue_id", queue_id.as_str());
        Ok(url)
    }

    /// Maps non-2xx responses to `ApiError::Status`, picking `detail` or
    /// `message` out of a JSON error body when there is one.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let detail = resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| {
                body.get("detail")
                    .or_else(|| body.get("message"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            });
        Err(ApiError::Status { status, detail })
    }

    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let resp = Self::check_status(resp).await?;
        let body = resp.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::from_str("{}")?);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl EvaluationBackend for HttpBackend {
    fn name(&self) -> &'static str { "http-backend" }

    async fn trigger_run(&self, queue_id: &QueueId) -> Result<RunAck, ApiError> {
        let url = self.endpoint(RUN_PATH, queue_id)?;
        tracing::debug!(%url, "triggering run");
        let resp = self.client.post(url).send().await?;
        Self::read_json(resp).await
    }

    async fn fetch_status(&self, queue_id: &QueueId) -> Result<StatusPayload, ApiError> {
        let url = self.endpoint(JOB_STATUS_PATH, queue_id)?;
        let resp = self.client.get(url).send().await?;
        Self::read_json(resp).await
    }

    async fn open_status_stream(&self, queue_id: &QueueId) -> Result<StatusStream, ApiError> {
        let url = self.endpoint(LIVE_JOB_STATUS_PATH, queue_id)?;
        tracing::debug!(%url, "opening live status stream");
        let resp = self
            .stream_client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;

        let body = resp.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other));
        let payloads = sse::decode(Box::pin(body)).filter_map(|event| async move {
            match event {
                Ok(event) if event.is_message() => {
                    Some(serde_json::from_str::<StatusPayload>(&event.data).map_err(ApiError::from))
                }
                Ok(_) => None,
                Err(e) => Some(Err(ApiError::Stream(e))),
            }
        });
        Ok(payloads.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(ApiContext::new(Url::parse(base).unwrap())).unwrap()
    }

    #[test]
    fn endpoint_appends_path_and_encodes_queue_id() {
        let q = QueueId::new("queue 1&x").unwrap();
        let url = backend("http://localhost:8000").endpoint(JOB_STATUS_PATH, &q).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/diagnostics/job_status?queue_id=queue+1%26x"
        );
    }

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        let q = QueueId::new("q1").unwrap();
        let with_slash = backend("https://eval.example.com/api/").endpoint(RUN_PATH, &q).unwrap();
        let without = backend("https://eval.example.com/api").endpoint(RUN_PATH, &q).unwrap();
        assert_eq!(with_slash.as_str(), "https://eval.example.com/api/queue/run?queue_id=q1");
        assert_eq!(with_slash, without);
    }

    #[test]
    fn invalid_header_is_rejected() {
        let mut ctx = ApiContext::new(Url::parse("http://localhost:8000").unwrap());
        ctx.headers.insert("bad header".into(), "x".into());
        assert!(matches!(HttpBackend::new(ctx), Err(ApiError::InvalidHeader(_))));
    }
}
