use bytes::Bytes;
use ecorelay::consumer::{consume_event_stream, CollectingSink};
use ecorelay::normalize::normalize;
use ecorelay::{Card, Citation, Recommendation};
use futures_util::stream;
use serde_json::json;
use std::convert::Infallible;

fn wire(frames: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (event, data) in frames {
        out.extend_from_slice(format!("event: {}\ndata: {}\n\n", event, data).as_bytes());
    }
    out
}

fn byte_stream(
    bytes: Vec<u8>,
    chunk_size: usize,
) -> impl futures_util::Stream<Item = Result<Bytes, Infallible>> + Unpin {
    let chunks: Vec<Result<Bytes, Infallible>> = bytes
        .chunks(chunk_size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks)
}

#[tokio::test]
async fn logs_arrive_in_order_before_the_terminal() {
    let payload = wire(&[
        ("logs", "\"first\""),
        ("heartbeat", "{}"),
        ("logs", "\"second\""),
        ("result", "{\"rating\": 72}"),
        ("logs", "\"after terminal, must not fire\""),
    ]);

    let mut sink = CollectingSink::default();
    consume_event_stream(byte_stream(payload, 7), &mut sink).await;

    assert_eq!(sink.logs, vec![json!("first"), json!("second")]);
    assert_eq!(sink.result, Some(json!({"rating": 72})));
}

#[tokio::test]
async fn unparsable_terminal_degrades_to_structured_error() {
    let payload = wire(&[("result", "not json at all")]);

    let mut sink = CollectingSink::default();
    consume_event_stream(byte_stream(payload, 1024), &mut sink).await;

    assert_eq!(
        sink.result,
        Some(json!({"error": "Parse error", "raw": "not json at all"}))
    );
}

#[tokio::test]
async fn error_event_is_terminal_too() {
    let payload = wire(&[
        ("logs", "\"connecting\""),
        ("error", "{\"error\": \"Upstream connection lost: reset\"}"),
    ]);

    let mut sink = CollectingSink::default();
    consume_event_stream(byte_stream(payload, 3), &mut sink).await;

    assert_eq!(sink.logs.len(), 1);
    let result = sink.result.expect("terminal should fire");
    assert_eq!(result["error"], "Upstream connection lost: reset");
}

/// A card serialized onto the wire as a `result` payload must survive the
/// consumer and the normalizer with every field intact.
#[tokio::test]
async fn card_survives_the_wire_round_trip() {
    let card = Card {
        id: None,
        owner_email: None,
        product: Some("Bamboo Toothbrush".into()),
        rating: Some(84.5),
        text: "Low footprint overall".into(),
        citations: vec![Citation {
            label: "LCA study".into(),
            url: "https://example.org/lca".into(),
        }],
        recommendations: vec![Recommendation {
            label: "Compost the handle".into(),
        }],
        suggested_questions: vec!["How is it shipped?".into()],
        created_at: "2026-08-30T10:00:00+00:00".into(),
    };

    let data = serde_json::to_string(&card).expect("serialize card");
    let payload = wire(&[("result", &data)]);

    let mut sink = CollectingSink::default();
    consume_event_stream(byte_stream(payload, 5), &mut sink).await;

    let raw = sink.result.expect("terminal should fire");
    let normalized = normalize(&raw, None, None);

    assert_eq!(normalized.product, card.product);
    assert_eq!(normalized.rating, card.rating);
    assert_eq!(normalized.text, card.text);
    assert_eq!(normalized.citations, card.citations);
    assert_eq!(normalized.recommendations, card.recommendations);
    assert_eq!(normalized.suggested_questions, card.suggested_questions);
    assert_eq!(normalized.created_at, card.created_at);
}
