use super::{
    is_event_stream_content_type, ChannelEvent, ENDPOINT_EVENT, MCP_EVENT_STREAM_CONTENT_TYPE,
    MESSAGE_EVENT,
};
use crate::mcp::error::McpError;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Largest unterminated line, and largest accumulated event payload, the
/// reader accepts before giving up on the stream.
pub const MCP_SSE_MAX_EVENT_BYTES: usize = 4 * 1024 * 1024;

fn oversized(limit: usize) -> McpError {
    McpError::Transport(format!("Event stream line exceeded {limit} bytes"))
}

/// Splits a byte stream into lines. Blank lines are kept: they end SSE events.
pub struct SseLineBuffer {
    buffer: Vec<u8>,
    max_line: usize,
}

impl Default for SseLineBuffer {
    fn default() -> Self {
        Self::with_limit(MCP_SSE_MAX_EVENT_BYTES)
    }
}

impl SseLineBuffer {
    pub fn with_limit(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, McpError> {
        self.buffer.extend_from_slice(chunk);
        let lines = self.drain_lines(false);
        if self.buffer.len() > self.max_line {
            self.buffer.clear();
            return Err(oversized(self.max_line));
        }
        Ok(lines)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = self.buffer[search_index..].iter().position(|b| *b == b'\n')
        {
            let newline_index = search_index + relative_pos;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }

            let line_bytes = &self.buffer[search_index..line_end];
            lines.push(String::from_utf8_lossy(line_bytes).into_owned());
            search_index = newline_index + 1;
        }

        if flush {
            if search_index < self.buffer.len() {
                let rest = &self.buffer[search_index..];
                lines.push(String::from_utf8_lossy(rest).into_owned());
            }
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental SSE decoder: `event:` and `data:` fields, blank-line dispatch,
/// comment lines skipped.
pub struct SseDecoder {
    lines: SseLineBuffer,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    max_event: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MCP_SSE_MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    pub fn with_limit(max_event: usize) -> Self {
        Self {
            lines: SseLineBuffer::with_limit(max_event),
            event: None,
            data: Vec::new(),
            data_len: 0,
            max_event,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, McpError> {
        let lines = self.lines.push(chunk)?;
        self.feed(lines)
    }

    /// Flushes a trailing event the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Result<Vec<SseEvent>, McpError> {
        let lines = self.lines.finish();
        let mut events = self.feed(lines)?;
        events.extend(self.dispatch());
        Ok(events)
    }

    fn feed(&mut self, lines: Vec<String>) -> Result<Vec<SseEvent>, McpError> {
        let mut events = Vec::new();
        for line in lines {
            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => {
                    self.data_len += value.len() + 1;
                    if self.data_len > self.max_event {
                        self.data.clear();
                        self.data_len = 0;
                        return Err(oversized(self.max_event));
                    }
                    self.data.push(value.to_string());
                }
                _ => {}
            }
        }
        Ok(events)
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        self.data_len = 0;
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| MESSAGE_EVENT.to_string()),
            data,
        })
    }
}

/// The server-to-client half of the connection.
///
/// Dropping or closing the channel stops its reader task; `close` may be
/// called any number of times.
pub struct SseChannel {
    url: String,
    cancel: CancellationToken,
}

impl SseChannel {
    /// Opens the event stream and starts the reader task. Events arrive on the
    /// returned receiver, beginning with [`ChannelEvent::Opened`].
    pub async fn open(
        client: &reqwest::Client,
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>), McpError> {
        debug!(url = %url, "Opening MCP event stream");
        let response = client
            .get(url)
            .header(reqwest::header::ACCEPT, MCP_EVENT_STREAM_CONTENT_TYPE)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|err| McpError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Transport(format!("HTTP error: {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !is_event_stream_content_type(content_type) {
            return Err(McpError::Transport(format!(
                "Expected an event stream, got content type '{content_type}'"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(read_events(response, tx, cancel.clone()));

        Ok((
            Self {
                url: url.to_string(),
                cancel,
            },
            rx,
        ))
    }

    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!(url = %self.url, "Closing MCP event stream");
            self.cancel.cancel();
        }
    }
}

impl Drop for SseChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_events(
    response: reqwest::Response,
    tx: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
) {
    let _ = tx.send(ChannelEvent::Opened);

    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::default();

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = stream.next() => match chunk {
                Some(Ok(chunk)) => match decoder.push(&chunk) {
                    Ok(events) => {
                        for event in events {
                            forward(&tx, event);
                        }
                    }
                    Err(err) => break err.to_string(),
                },
                Some(Err(err)) => break format!("Event stream failed: {err}"),
                None => {
                    if let Ok(events) = decoder.finish() {
                        for event in events {
                            forward(&tx, event);
                        }
                    }
                    break "Event stream closed by server.".to_string();
                }
            },
        }
    };

    if !cancel.is_cancelled() {
        let _ = tx.send(ChannelEvent::Closed(reason));
    }
}

fn forward(tx: &mpsc::UnboundedSender<ChannelEvent>, event: SseEvent) {
    let channel_event = match event.event.as_str() {
        ENDPOINT_EVENT => ChannelEvent::Endpoint(event.data.trim().to_string()),
        MESSAGE_EVENT => ChannelEvent::Message(event.data),
        other => {
            warn!(event = %other, "Ignoring unknown MCP stream event type");
            return;
        }
    };
    let _ = tx.send(channel_event);
}
