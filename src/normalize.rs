//! Result normalization: shapes the upstream backend's heterogeneous result
//! payload into the canonical card record. Total by construction: every
//! malformed field falls back to a documented default, nothing here performs
//! I/O, and nothing here can fail.

use crate::constants::DEFAULT_PRODUCT_NAME;
use crate::types::{Card, Citation, Recommendation};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    /// First fenced JSON object inside a ```/```json block.
    static ref FENCED_JSON: Regex =
        Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").expect("static regex");
    static ref FENCE_MARKERS: Regex = Regex::new(r"^```json|^```|```$").expect("static regex");
    static ref MARKDOWN_LINK: Regex = Regex::new(r"^\[(.*)\]\((.*)\)$").expect("static regex");
}

/// Normalizes a raw result payload into a `Card`.
///
/// `owner` and `product` override whatever the payload carries; the payload's
/// own `email` / `product` / `productName` fields are fallbacks. The card is
/// purely in-memory at this point; persistence (and id assignment) is the
/// gateway's job.
pub fn normalize(raw: &Value, owner: Option<&str>, product: Option<&str>) -> Card {
    let data = unwrap_final_response(raw);

    let rating = data.get("rating").and_then(Value::as_f64);
    let citations = as_array(&data, "citations")
        .iter()
        .map(normalize_citation)
        .collect();
    let recommendations = as_array(&data, "recommendations")
        .iter()
        .map(normalize_recommendation)
        .collect();
    let suggested_questions = suggested_questions(&data);
    let text = assemble_text(&data);

    let owner_email = owner
        .map(str::to_string)
        .or_else(|| data.get("email").and_then(Value::as_str).map(str::to_string));
    let product = product
        .map(str::to_string)
        .or_else(|| data.get("product").and_then(Value::as_str).map(str::to_string))
        .or_else(|| {
            data.get("productName")
                .and_then(Value::as_str)
                .map(str::to_string)
        });

    Card {
        id: data
            .get("id")
            .or_else(|| data.get("_id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        owner_email,
        product,
        rating,
        text,
        citations,
        recommendations,
        suggested_questions,
        created_at: created_at(raw, &data),
    }
}

/// Product label with the storage default applied.
pub fn product_or_default(product: Option<&str>) -> String {
    match product {
        Some(p) if !p.trim().is_empty() => p.to_string(),
        _ => DEFAULT_PRODUCT_NAME.to_string(),
    }
}

/// If `final_response` is a fenced code block, extract and parse the embedded
/// JSON and shallow-merge its fields over the payload. A successful unwrap
/// consumes `final_response` so the fenced text never leaks into the card's
/// main text; on failure the payload passes through untouched.
fn unwrap_final_response(raw: &Value) -> Value {
    let fenced = match raw.get("final_response").and_then(Value::as_str) {
        Some(s) if s.trim_start().starts_with("```") => s,
        _ => return raw.clone(),
    };

    let parsed = parse_fenced_json(fenced);
    match parsed {
        Some(Value::Object(fields)) => {
            let mut merged = raw.clone();
            if let Value::Object(base) = &mut merged {
                base.remove("final_response");
                for (k, v) in fields {
                    base.insert(k, v);
                }
            }
            merged
        }
        _ => raw.clone(),
    }
}

fn parse_fenced_json(fenced: &str) -> Option<Value> {
    if let Some(caps) = FENCED_JSON.captures(fenced) {
        if let Some(block) = caps.get(1) {
            if let Ok(v) = serde_json::from_str::<Value>(block.as_str()) {
                return Some(v);
            }
        }
    }

    // Fallback: strip the fence markers and parse whatever remains.
    let stripped = FENCE_MARKERS.replace_all(fenced.trim(), "");
    serde_json::from_str::<Value>(stripped.trim()).ok()
}

fn as_array<'a>(data: &'a Value, key: &str) -> Vec<&'a Value> {
    match data.get(key).and_then(Value::as_array) {
        Some(arr) => arr.iter().collect(),
        None => Vec::new(),
    }
}

fn suggested_questions(data: &Value) -> Vec<String> {
    let arr = data
        .get("suggestedQuestions")
        .and_then(Value::as_array)
        .or_else(|| data.get("suggested_questions").and_then(Value::as_array));
    match arr {
        Some(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}

/// Total case table over the citation shapes the backend has been seen to
/// produce: `{label, url}` objects, markdown links, bare URLs, and noise.
fn normalize_citation(value: &&Value) -> Citation {
    if let Some(obj) = value.as_object() {
        if let (Some(label), Some(url)) = (
            obj.get("label").and_then(Value::as_str),
            obj.get("url").and_then(Value::as_str),
        ) {
            return Citation {
                label: label.to_string(),
                url: url.to_string(),
            };
        }
    }

    if let Some(s) = value.as_str() {
        if let Some(caps) = MARKDOWN_LINK.captures(s) {
            return Citation {
                label: caps[1].to_string(),
                url: caps[2].to_string(),
            };
        }
        if s.starts_with("http") {
            return Citation {
                label: "Source".to_string(),
                url: s.to_string(),
            };
        }
        return Citation {
            label: s.to_string(),
            url: "#".to_string(),
        };
    }

    Citation {
        label: stringify_or(value, "Source"),
        url: "#".to_string(),
    }
}

fn normalize_recommendation(value: &&Value) -> Recommendation {
    if let Some(obj) = value.as_object() {
        if let Some(label) = obj.get("label").and_then(Value::as_str) {
            return Recommendation {
                label: label.to_string(),
            };
        }
        if let Some(text) = obj.get("text").and_then(Value::as_str) {
            return Recommendation {
                label: text.to_string(),
            };
        }
    }
    if let Some(s) = value.as_str() {
        return Recommendation {
            label: s.to_string(),
        };
    }
    Recommendation {
        label: "Recommendation".to_string(),
    }
}

fn stringify_or(value: &Value, fallback: &str) -> String {
    match value {
        Value::Null => fallback.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Main text precedence: explicit `text`, else `final_response`, else joined
/// `sub_answers`; when `text` and `final_response` both exist and differ,
/// both are shown, text first.
fn assemble_text(data: &Value) -> String {
    let text = data.get("text").and_then(Value::as_str).unwrap_or("");
    let final_response = data
        .get("final_response")
        .and_then(Value::as_str)
        .unwrap_or("");

    let mut main = text.to_string();
    if main.trim().is_empty() && !final_response.trim().is_empty() {
        main = final_response.to_string();
    }
    if main.trim().is_empty() {
        let subs: Vec<&str> = as_array(data, "sub_answers")
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        if !subs.is_empty() {
            main = subs.join("\n\n---\n\n");
        }
    }
    if !text.is_empty()
        && !final_response.trim().is_empty()
        && text.trim() != final_response.trim()
    {
        main = format!("{}\n\n{}", text, final_response);
    }
    main
}

fn created_at(raw: &Value, data: &Value) -> String {
    let card_level = raw.get("createdAt").and_then(Value::as_str);
    let data_level = data
        .get("createdAt")
        .or_else(|| data.get("date"))
        .or_else(|| data.get("timestamp"))
        .and_then(Value::as_str);
    match card_level.or(data_level) {
        Some(ts) if !ts.is_empty() => ts.to_string(),
        _ => chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_is_total_on_empty_input() {
        let card = normalize(&json!({}), None, None);
        assert_eq!(card.rating, None);
        assert_eq!(card.text, "");
        assert!(card.citations.is_empty());
        assert!(card.recommendations.is_empty());
        assert!(card.suggested_questions.is_empty());
        assert!(!card.created_at.is_empty());
    }

    #[test]
    fn normalize_is_total_on_junk_fields() {
        let card = normalize(
            &json!({
                "rating": "not a number",
                "citations": {"oops": true},
                "recommendations": 42,
                "sub_answers": "not an array",
                "suggestedQuestions": null,
            }),
            None,
            None,
        );
        assert_eq!(card.rating, None);
        assert!(card.citations.is_empty());
        assert!(card.recommendations.is_empty());
    }

    #[test]
    fn fenced_final_response_fields_dominate() {
        let raw = json!({
            "final_response": "```json\n{\"rating\": 55, \"citations\": [\"https://example.com\"]}\n```"
        });
        let card = normalize(&raw, None, None);
        assert_eq!(card.rating, Some(55.0));
        assert_eq!(
            card.citations,
            vec![Citation {
                label: "Source".into(),
                url: "https://example.com".into()
            }]
        );
        // The fenced text was consumed by the unwrap; nothing falls back to it.
        assert_eq!(card.text, "");
    }

    #[test]
    fn unparsable_fence_falls_back_to_raw_final_response() {
        let raw = json!({"final_response": "```\nthis is not json\n```"});
        let card = normalize(&raw, None, None);
        assert_eq!(card.text, "```\nthis is not json\n```");
    }

    #[test]
    fn citation_case_table() {
        let cases = json!({"citations": [
            {"label": "EPA", "url": "https://epa.gov"},
            "[Study](https://doi.org/x)",
            "https://bare.example",
            "loose text",
            42,
        ]});
        let card = normalize(&cases, None, None);
        assert_eq!(
            card.citations,
            vec![
                Citation { label: "EPA".into(), url: "https://epa.gov".into() },
                Citation { label: "Study".into(), url: "https://doi.org/x".into() },
                Citation { label: "Source".into(), url: "https://bare.example".into() },
                Citation { label: "loose text".into(), url: "#".into() },
                Citation { label: "42".into(), url: "#".into() },
            ]
        );
    }

    #[test]
    fn citation_normalization_is_idempotent() {
        let once = normalize(
            &json!({"citations": ["[A](https://a)", "https://b"]}),
            None,
            None,
        );
        let again = normalize(&serde_json::to_value(&once).expect("card"), None, None);
        assert_eq!(once.citations, again.citations);
    }

    #[test]
    fn recommendation_case_table() {
        let card = normalize(
            &json!({"recommendations": [
                {"label": "Buy less"},
                {"text": "Repair more"},
                "Reuse",
                null,
            ]}),
            None,
            None,
        );
        let labels: Vec<&str> = card
            .recommendations
            .iter()
            .map(|r| r.label.as_str())
            .collect();
        assert_eq!(labels, vec!["Buy less", "Repair more", "Reuse", "Recommendation"]);
    }

    #[test]
    fn text_precedence_and_concatenation() {
        let card = normalize(&json!({"text": "summary"}), None, None);
        assert_eq!(card.text, "summary");

        let card = normalize(&json!({"final_response": "only final"}), None, None);
        assert_eq!(card.text, "only final");

        let card = normalize(&json!({"sub_answers": ["one", "two"]}), None, None);
        assert_eq!(card.text, "one\n\n---\n\ntwo");

        let card = normalize(
            &json!({"text": "summary", "final_response": "elaboration"}),
            None,
            None,
        );
        assert_eq!(card.text, "summary\n\nelaboration");

        // Identical text and final_response collapse to one copy.
        let card = normalize(
            &json!({"text": "same", "final_response": "same"}),
            None,
            None,
        );
        assert_eq!(card.text, "same");
    }

    #[test]
    fn owner_and_product_overrides_win() {
        let raw = json!({"email": "payload@x.y", "product": "Payload Product"});
        let card = normalize(&raw, Some("caller@x.y"), Some("Caller Product"));
        assert_eq!(card.owner_email.as_deref(), Some("caller@x.y"));
        assert_eq!(card.product.as_deref(), Some("Caller Product"));

        let card = normalize(&raw, None, None);
        assert_eq!(card.owner_email.as_deref(), Some("payload@x.y"));
        assert_eq!(card.product.as_deref(), Some("Payload Product"));
    }

    #[test]
    fn timestamp_sources_in_order() {
        let card = normalize(&json!({"date": "2025-06-01T00:00:00Z"}), None, None);
        assert_eq!(card.created_at, "2025-06-01T00:00:00Z");

        let card = normalize(
            &json!({"createdAt": "2025-01-01T00:00:00Z", "date": "2025-06-01T00:00:00Z"}),
            None,
            None,
        );
        assert_eq!(card.created_at, "2025-01-01T00:00:00Z");
    }

    #[test]
    fn product_default_applied_only_when_missing() {
        assert_eq!(product_or_default(Some("Solar Panel")), "Solar Panel");
        assert_eq!(product_or_default(Some("  ")), DEFAULT_PRODUCT_NAME);
        assert_eq!(product_or_default(None), DEFAULT_PRODUCT_NAME);
    }
}
