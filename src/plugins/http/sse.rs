//! Minimal `text/event-stream` decoder.
//!
//! Only the fields the status stream uses are kept: `event`, `data` and `id`.
//! `retry` and unknown fields are ignored, as are comment lines.

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::io;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Unnamed events are `message` events.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    /// Feeds one line (without its terminator). Returns an event when a blank
    /// line completes one that carried data.
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data, id: self.id.clone() })
    }
}

/// Turns a response body into SSE events. A partial event left at end of
/// stream is dropped.
pub fn decode<S>(body: S) -> BoxStream<'static, io::Result<SseEvent>>
where
    S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
{
    let lines = BufReader::new(StreamReader::new(body)).lines();

    stream::unfold(Some((lines, SseDecoder::default())), |state| async move {
        let (mut lines, mut decoder) = state?;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(event) = decoder.push_line(&line) {
                        return Some((Ok(event), Some((lines, decoder))));
                    }
                }
                Ok(None) => return None,
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut SseDecoder, text: &str) -> Vec<SseEvent> {
        text.split('\n').filter_map(|l| decoder.push_line(l)).collect()
    }

    #[test]
    fn dispatches_on_blank_line() {
        let mut d = SseDecoder::default();
        let events = feed(&mut d, "data: {\"total\":3}\n\ndata: second\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"total\":3}");
        assert!(events[0].is_message());
        assert_eq!(events[1].data, "second");
    }

    #[test]
    fn joins_multiline_data_and_keeps_event_name() {
        let mut d = SseDecoder::default();
        let events = feed(&mut d, "event: alert\ndata: a\ndata:b\nid: 7\n\n");
        assert_eq!(
            events,
            vec![SseEvent { event: Some("alert".into()), data: "a\nb".into(), id: Some("7".into()) }]
        );
        assert!(!events[0].is_message());
    }

    #[test]
    fn ignores_comments_and_empty_events() {
        let mut d = SseDecoder::default();
        let events = feed(&mut d, ": keep-alive\n\nevent: ping\n\nretry: 1000\ndata: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        // the `ping` event had no data, so its name does not leak into the next one
        assert_eq!(events[0].event, None);
        assert_eq!(events[0].data, "x");
    }

    #[tokio::test]
    async fn decode_splits_across_chunks_and_drops_trailing_partial() {
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"counts\"")),
            Ok(Bytes::from_static(b":{}}\n\nda")),
            Ok(Bytes::from_static(b"ta: tail\n")),
        ];
        let events: Vec<_> = decode(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "{\"counts\":{}}");
    }

    #[tokio::test]
    async fn decode_surfaces_body_errors() {
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let events: Vec<_> = decode(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert_eq!(events[1].as_ref().unwrap_err().kind(), io::ErrorKind::ConnectionReset);
    }
}
