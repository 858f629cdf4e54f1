//! Canonical JSON serialization.
//!
//! Signatures are computed over an exact byte sequence, so the serialized
//! form must be deterministic across runs: object keys sorted recursively,
//! arrays left in original order, compact separators, and number formatting
//! fixed by serde_json's IEEE-754 round-trip rendering. Insertion order and
//! locale never influence the output.

use serde_json::Value;

use crate::error::BazaarError;
use crate::message::Message;

/// Serialize a JSON value canonically: recursively key-sorted and compact.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json's Display for strings handles escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars already render compactly and deterministically.
        other => out.push_str(&other.to_string()),
    }
}

/// The canonical bytes of a message, excluding the `signature` field.
///
/// This is the exact byte sequence signed and verified.
pub fn canonical_message_bytes(message: &Message) -> Result<Vec<u8>, BazaarError> {
    let mut value = serde_json::to_value(message)?;
    if let Value::Object(ref mut map) = value {
        map.remove("signature");
    }
    Ok(canonical_json(&value).into_bytes())
}
