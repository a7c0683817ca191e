use bytes::Bytes;
use futures_util::{Stream, StreamExt};

/// One decoded SSE frame: the `event:` name plus the joined `data:` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental SSE frame parser. Frames are delimited by a blank line; a
/// partial trailing frame is retained across feeds and completed by the
/// next chunk. Lines that are neither `event:` nor `data:` (comments,
/// `id:`, `retry:`) are ignored. Buffers bytes so multi-byte UTF-8
/// sequences split across chunks reassemble before decoding.
pub struct SseFrameParser {
    buf: Vec<u8>,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(idx) = crate::streaming::find_subslice(&self.buf, b"\n\n") {
            let raw: Vec<u8> = self.buf.drain(..idx + 2).collect();
            let text = String::from_utf8_lossy(&raw);
            if let Some(frame) = parse_frame(&text) {
                frames.push(frame);
            }
        }
        frames
    }
}

impl Default for SseFrameParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data_lines = Vec::new();
    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(name) = line.strip_prefix("event: ") {
            event = Some(name.to_string());
        } else if let Some(data) = line.strip_prefix("data: ") {
            data_lines.push(data);
        }
    }
    event.map(|event| SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Caller-supplied callbacks for a relay event stream. `on_log` fires for
/// every `logs` frame in arrival order; `on_result` fires exactly once, for
/// the terminal `result` or `error` frame, and always after every log.
pub trait EventSink {
    fn on_log(&mut self, entry: serde_json::Value);
    fn on_result(&mut self, payload: serde_json::Value);
}

/// Convenience sink that just collects everything it sees.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub logs: Vec<serde_json::Value>,
    pub result: Option<serde_json::Value>,
}

impl EventSink for CollectingSink {
    fn on_log(&mut self, entry: serde_json::Value) {
        self.logs.push(entry);
    }

    fn on_result(&mut self, payload: serde_json::Value) {
        self.result = Some(payload);
    }
}

/// Reads an SSE byte stream to completion or until the terminal event,
/// whichever comes first. Heartbeats are consumed and discarded. Payloads
/// that fail to parse never escape as errors: logs fall back to the raw
/// string, terminals to a structured parse-error object. Dropping the
/// returned future abandons the underlying read; no further callbacks fire.
pub async fn consume_event_stream<S, E>(mut stream: S, sink: &mut dyn EventSink)
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut parser = SseFrameParser::new();

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("[consumer] Stream read failed: {}", e);
                break;
            }
        };
        for frame in parser.feed(&bytes) {
            match frame.event.as_str() {
                "logs" => {
                    let entry = match serde_json::from_str(&frame.data) {
                        Ok(v) => v,
                        Err(_) => serde_json::Value::String(frame.data),
                    };
                    sink.on_log(entry);
                }
                "result" | "error" => {
                    let payload = match serde_json::from_str(&frame.data) {
                        Ok(v) => v,
                        Err(_) => serde_json::json!({
                            "error": "Parse error",
                            "raw": frame.data,
                        }),
                    };
                    sink.on_result(payload);
                    return;
                }
                "heartbeat" => {}
                other => {
                    tracing::debug!("[consumer] Ignoring unknown event type: {}", other);
                }
            }
        }
    }
}
