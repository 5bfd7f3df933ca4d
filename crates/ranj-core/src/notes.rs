//! Plain-text projection of rich-text notes.

use serde_json::Value as JsonValue;

/// Flatten a rich-text document into plain text.
///
/// Walks the document depth first, collecting every `text` field before the
/// node's `content` children, and joins the pieces with single spaces.
/// `null` (or a document without text) yields an empty string.
pub fn extract_text_from_notes(notes: &JsonValue) -> String {
    let mut parts = Vec::new();
    collect_text(notes, &mut parts);
    parts.join(" ")
}

fn collect_text<'a>(node: &'a JsonValue, parts: &mut Vec<&'a str>) {
    match node {
        JsonValue::Object(map) => {
            if let Some(JsonValue::String(text)) = map.get("text") {
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            if let Some(content) = map.get("content") {
                collect_text(content, parts);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                collect_text(item, parts);
            }
        }
        _ => {}
    }
}
