use bytes::Bytes;
use futures::Stream;
use llm_relay_core::error::RelayError;
use std::pin::Pin;
use tokio_stream::StreamExt;

/// One parsed SSE record: the optional `event:` name and the joined
/// `data:` payload. `[DONE]` sentinels surface as ordinary frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }
}

/// Incremental SSE parser over `\n\n`-separated records.
///
/// Comment lines (leading `:`) and `id:`/`retry:` fields are ignored;
/// multiple `data:` lines in one record are joined with newlines.
#[derive(Default)]
pub struct FrameParser {
    buffer: String,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every frame completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, RelayError> {
        let text = std::str::from_utf8(chunk)
            .map_err(|e| RelayError::Internal(format!("invalid UTF-8 in SSE stream: {e}")))?;
        self.buffer.push_str(text);

        let mut frames = Vec::new();
        while let Some((pos, sep_len)) = record_boundary(&self.buffer) {
            let record = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + sep_len);
            if let Some(frame) = parse_record(&record) {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// Flush a trailing record that was never terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if self.buffer.trim().is_empty() {
            return None;
        }
        let record = std::mem::take(&mut self.buffer);
        parse_record(&record)
    }
}

fn record_boundary(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|pos| (pos, 2));
    let crlf = buffer.find("\r\n\r\n").map(|pos| (pos, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn parse_record(record: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in record.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame, RelayError>> + Send>>;

/// Adapt an HTTP byte stream into a stream of SSE frames.
pub fn frame_stream(
    byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> FrameStream {
    struct Reader<S> {
        bytes: S,
        parser: FrameParser,
        pending: std::collections::VecDeque<SseFrame>,
        done: bool,
    }

    let reader = Reader {
        bytes: Box::pin(byte_stream),
        parser: FrameParser::new(),
        pending: std::collections::VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(frame) = reader.pending.pop_front() {
                return Some((Ok(frame), reader));
            }
            if reader.done {
                return None;
            }
            match reader.bytes.next().await {
                Some(Ok(chunk)) => match reader.parser.feed(&chunk) {
                    Ok(frames) => reader.pending.extend(frames),
                    Err(e) => {
                        reader.done = true;
                        return Some((Err(e), reader));
                    }
                },
                Some(Err(e)) => {
                    reader.done = true;
                    return Some((Err(RelayError::from(e)), reader));
                }
                None => {
                    reader.done = true;
                    if let Some(frame) = reader.parser.finish() {
                        return Some((Ok(frame), reader));
                    }
                    return None;
                }
            }
        }
    }))
}
