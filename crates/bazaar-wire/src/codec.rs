//! Wire codec — UTF-8 JSON of the message envelope.
//!
//! The consensus topic frames messages itself, so no length prefix is
//! needed; the payload bytes are exactly the JSON envelope.

use bazaar_types::Message;

/// Encode a message envelope to wire bytes.
pub fn encode_message(message: &Message) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(message)
}

/// Parse wire bytes into a message envelope.
pub fn decode_message(bytes: &[u8]) -> Result<Message, serde_json::Error> {
    serde_json::from_slice(bytes)
}
