use crate::constants::RESULT_SEPARATOR;
use crate::types::{RelayError, RelayEvent};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;

/// Demultiplexer phase. The transition is one-way: once the separator has
/// been seen, every remaining byte belongs to the result region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    ScanningLogs,
    InResult,
}

/// Terminal payload produced when the upstream stream ends.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Result(serde_json::Value),
    Error(serde_json::Value),
}

impl TerminalOutcome {
    pub fn into_event(self) -> RelayEvent {
        match self {
            TerminalOutcome::Result(v) => RelayEvent::Result(v),
            TerminalOutcome::Error(v) => RelayEvent::Error(v),
        }
    }
}

/// What `finish` yields: at most one trailing log line, then the terminal.
#[derive(Debug, PartialEq)]
pub struct DemuxFinish {
    pub trailing_logs: Vec<String>,
    pub terminal: TerminalOutcome,
}

/// Splits the upstream byte stream into log lines and one result blob.
///
/// Buffers bytes, not decoded text, so the separator and multi-byte UTF-8
/// sequences survive arbitrary chunk boundaries. Log lines are flushed as
/// soon as they complete; the result region is accumulated whole because it
/// is a single JSON document, not line-oriented.
pub struct StreamDemux {
    state: StreamState,
    log_buf: Vec<u8>,
    result_buf: Vec<u8>,
}

impl StreamDemux {
    pub fn new() -> Self {
        Self {
            state: StreamState::ScanningLogs,
            log_buf: Vec::new(),
            result_buf: Vec::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Appends a chunk and returns every log line completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        if self.state == StreamState::InResult {
            self.result_buf.extend_from_slice(chunk);
            return Vec::new();
        }

        self.log_buf.extend_from_slice(chunk);

        if let Some(idx) = find_subslice(&self.log_buf, RESULT_SEPARATOR.as_bytes()) {
            let rest = self.log_buf.split_off(idx + RESULT_SEPARATOR.len());
            self.log_buf.truncate(idx);
            let lines = split_log_lines(&self.log_buf, true);
            self.log_buf.clear();
            self.result_buf = rest;
            self.state = StreamState::InResult;
            return lines;
        }

        // No separator yet: flush complete lines, keep the partial tail so
        // a line (or separator) split across chunks reassembles next feed.
        match self.log_buf.iter().rposition(|&b| b == b'\n') {
            Some(nl) => {
                let tail = self.log_buf.split_off(nl + 1);
                let lines = split_log_lines(&self.log_buf, false);
                self.log_buf = tail;
                lines
            }
            None => Vec::new(),
        }
    }

    /// Consumes the demux at stream end.
    pub fn finish(self) -> DemuxFinish {
        match self.state {
            StreamState::ScanningLogs => {
                let mut trailing = Vec::new();
                let text = String::from_utf8_lossy(&self.log_buf);
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    trailing.push(trimmed.to_string());
                }
                DemuxFinish {
                    trailing_logs: trailing,
                    terminal: TerminalOutcome::Error(serde_json::json!({
                        "error": "No result separator found"
                    })),
                }
            }
            StreamState::InResult => {
                let text = String::from_utf8_lossy(&self.result_buf);
                let trimmed = text.trim();
                let terminal = if trimmed.is_empty() {
                    TerminalOutcome::Result(serde_json::json!({
                        "error": "No result returned from backend",
                        "raw": "",
                    }))
                } else {
                    match serde_json::from_str::<serde_json::Value>(trimmed) {
                        Ok(v) => TerminalOutcome::Result(v),
                        Err(_) => TerminalOutcome::Result(serde_json::json!({
                            "error": "Failed to parse result JSON",
                            "raw": trimmed,
                        })),
                    }
                };
                DemuxFinish {
                    trailing_logs: Vec::new(),
                    terminal,
                }
            }
        }
    }
}

impl Default for StreamDemux {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Splits a completed log region into lines. Blank lines are dropped; a
/// trailing `\r` (CRLF streams) is stripped. When `include_tail` is set the
/// final unterminated segment is flushed too (used when the region is known
/// complete, i.e. right before the separator).
fn split_log_lines(region: &[u8], include_tail: bool) -> Vec<String> {
    let text = String::from_utf8_lossy(region);
    let mut lines: Vec<&str> = text.split('\n').collect();
    if !include_tail {
        // The caller retained the tail in its buffer; split always yields a
        // final (possibly empty) segment after the last newline.
        lines.pop();
    }
    lines
        .into_iter()
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.to_string())
        .collect()
}

/// Drives a `StreamDemux` against an upstream body and re-emits typed SSE
/// events, interleaving heartbeats so hosting layers do not kill the
/// connection while the analysis is still running.
pub struct RelayPump;

impl RelayPump {
    pub async fn handle_stream<S, E>(
        mut bytes_stream: S,
        tx: mpsc::Sender<std::result::Result<axum::response::sse::Event, RelayError>>,
        heartbeat: Duration,
        request_id: String,
    ) where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send,
        E: std::fmt::Display,
    {
        let mut demux = StreamDemux::new();
        let mut metrics = crate::logging::StreamMetric::new();
        let start = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval_at(start + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                chunk = bytes_stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        metrics.record_chunk(bytes.len());
                        for line in demux.feed(&bytes) {
                            metrics.record_log_line(&line);
                            if !Self::send(&tx, RelayEvent::Logs(line)).await {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!("[relay] Upstream read failed mid-stream: {}", e);
                        let _ = Self::send(
                            &tx,
                            RelayEvent::Error(serde_json::json!({
                                "error": format!("Upstream connection lost: {}", e),
                            })),
                        )
                        .await;
                        metrics.log_summary(&request_id);
                        return;
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !Self::send(&tx, RelayEvent::Heartbeat).await {
                        return;
                    }
                }
            }
        }

        let finish = demux.finish();
        for line in finish.trailing_logs {
            metrics.record_log_line(&line);
            if !Self::send(&tx, RelayEvent::Logs(line)).await {
                return;
            }
        }
        let _ = Self::send(&tx, finish.terminal.into_event()).await;
        metrics.log_summary(&request_id);
    }

    /// Returns false once the client has gone away; callers stop reading,
    /// which drops the upstream connection on the next poll.
    async fn send(
        tx: &mpsc::Sender<std::result::Result<axum::response::sse::Event, RelayError>>,
        event: RelayEvent,
    ) -> bool {
        match event.to_sse() {
            Ok(sse) => {
                if tx.send(Ok(sse)).await.is_err() {
                    tracing::trace!("Client disconnected, stopping stream");
                    return false;
                }
                true
            }
            Err(e) => {
                tracing::error!("[relay] Failed to encode SSE event: {}", e);
                let _ = tx.send(Err(e.inner)).await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_splits_logs_from_result() {
        let mut demux = StreamDemux::new();
        let lines =
            demux.feed(b"fetching data...\nanalyzing...\n===RESULT===\n{\"rating\": 72}");
        assert_eq!(lines, vec!["fetching data...", "analyzing..."]);
        assert_eq!(demux.state(), StreamState::InResult);
        let fin = demux.finish();
        assert!(fin.trailing_logs.is_empty());
        assert_eq!(
            fin.terminal,
            TerminalOutcome::Result(serde_json::json!({"rating": 72}))
        );
    }

    #[test]
    fn separator_split_across_chunks() {
        let mut demux = StreamDemux::new();
        let mut all = Vec::new();
        all.extend(demux.feed(b"working\n===RES"));
        all.extend(demux.feed(b"ULT==={\"ok\": true}"));
        assert_eq!(all, vec!["working"]);
        assert_eq!(
            demux.finish().terminal,
            TerminalOutcome::Result(serde_json::json!({"ok": true}))
        );
    }

    #[test]
    fn missing_separator_yields_error_terminal() {
        let mut demux = StreamDemux::new();
        let lines = demux.feed(b"only logs, no marker");
        assert!(lines.is_empty());
        let fin = demux.finish();
        assert_eq!(fin.trailing_logs, vec!["only logs, no marker"]);
        assert_eq!(
            fin.terminal,
            TerminalOutcome::Error(serde_json::json!({"error": "No result separator found"}))
        );
    }

    #[test]
    fn unparsable_result_degrades_to_raw() {
        let mut demux = StreamDemux::new();
        demux.feed(b"===RESULT===not json at all");
        let fin = demux.finish();
        assert_eq!(
            fin.terminal,
            TerminalOutcome::Result(serde_json::json!({
                "error": "Failed to parse result JSON",
                "raw": "not json at all",
            }))
        );
    }

    #[test]
    fn empty_result_region() {
        let mut demux = StreamDemux::new();
        demux.feed(b"===RESULT===   \n ");
        let fin = demux.finish();
        assert_eq!(
            fin.terminal,
            TerminalOutcome::Result(serde_json::json!({
                "error": "No result returned from backend",
                "raw": "",
            }))
        );
    }

    #[test]
    fn blank_and_crlf_lines_are_dropped() {
        let mut demux = StreamDemux::new();
        let lines = demux.feed(b"first\r\n\r\n\nsecond\r\nthird");
        assert_eq!(lines, vec!["first", "second"]);
        // "third" has no newline yet
        let more = demux.feed(b" part\n");
        assert_eq!(more, vec!["third part"]);
    }

    #[test]
    fn multibyte_utf8_survives_chunk_split() {
        let text = "mesur\u{e9}e\n===RESULT==={\"ok\":1}";
        let bytes = text.as_bytes();
        // Split inside the two-byte é sequence.
        let cut = text.find('\u{e9}').expect("char present") + 1;
        let mut demux = StreamDemux::new();
        let mut lines = demux.feed(&bytes[..cut]);
        lines.extend(demux.feed(&bytes[cut..]));
        assert_eq!(lines, vec!["mesur\u{e9}e"]);
    }
}
