use crate::ingress::QueryRequest;
use axum::{
    body::Body,
    http::{Request, Response},
    middleware::Next,
};
use std::panic;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-relay-request-id";

/// Sets up a global panic hook that logs panics through tracing before
/// delegating to the previously installed hook.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Tags every request with a fresh id and wraps handling in a span carrying it.
pub async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response<Body> {
    let request_id = Uuid::new_v4().to_string();
    if let Ok(val) = request_id.parse() {
        req.headers_mut().insert(REQUEST_ID_HEADER, val);
    }

    let span = info_span!("request", request_id = %request_id);
    next.run(req).instrument(span).await
}

pub fn log_query_summary(query: &QueryRequest) {
    let location = match (query.latitude, query.longitude) {
        (Some(lat), Some(lon)) => format!("({:.4}, {:.4})", lat, lon),
        _ => "none".to_string(),
    };
    info!(
        target: "flight_recorder",
        "[QUERY] Type: {} | Prompt: {} chars | Location: {}",
        query.kind.as_wire(),
        query.prompt.len(),
        location
    );
}

/// Per-stream counters, logged once when the stream settles.
#[derive(Default)]
pub struct StreamMetric {
    pub chunks: usize,
    pub bytes: usize,
    pub log_lines: usize,
    pub log_chars: usize,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&mut self, len: usize) {
        self.chunks += 1;
        self.bytes += len;
    }

    pub fn record_log_line(&mut self, line: &str) {
        self.log_lines += 1;
        self.log_chars += line.len();
    }

    pub fn log_summary(&self, request_id: &str) {
        info!(
            target: "flight_recorder",
            "[STREAM END] RequestID: {} | Chunks: {} | Bytes: {} | Log lines: {} ({} chars)",
            request_id, self.chunks, self.bytes, self.log_lines, self.log_chars
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_accumulates_chunks_and_lines() {
        let mut m = StreamMetric::new();
        m.record_chunk(10);
        m.record_chunk(32);
        m.record_log_line("Fetching product data");
        assert_eq!(m.chunks, 2);
        assert_eq!(m.bytes, 42);
        assert_eq!(m.log_lines, 1);
        assert_eq!(m.log_chars, 21);
    }
}
