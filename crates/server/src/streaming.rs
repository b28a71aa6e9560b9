use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use futures::stream::StreamExt;
use llm_relay_core::types::claude::ClaudeStreamEvent;
use std::convert::Infallible;
use std::time::Duration;

/// One frame on its way to the client: a typed Anthropic event, or a raw
/// passthrough frame forwarded without re-encoding.
#[derive(Debug, Clone)]
pub enum OutFrame {
    Event(ClaudeStreamEvent),
    Raw {
        event: Option<String>,
        data: String,
    },
}

impl From<ClaudeStreamEvent> for OutFrame {
    fn from(event: ClaudeStreamEvent) -> Self {
        Self::Event(event)
    }
}

/// Build the client-facing SSE response. Each frame is written as
/// `event: <name>\ndata: <json>\n\n` and flushed; the keep-alive comment
/// covers idle gaps between upstream frames.
pub fn sse_response(frames: impl Stream<Item = OutFrame> + Send + 'static) -> Response {
    let events = frames.map(|frame| {
        let event = match frame {
            OutFrame::Event(ev) => {
                let data = serde_json::to_string(&ev)
                    .unwrap_or_else(|_| "{\"type\":\"ping\"}".to_string());
                Event::default().event(ev.event_name()).data(data)
            }
            OutFrame::Raw { event, data } => {
                let mut out = Event::default();
                if let Some(name) = event {
                    out = out.event(name);
                }
                out.data(data)
            }
        };
        Ok::<_, Infallible>(event)
    });

    Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text(""),
        )
        .into_response()
}
