//! # WebSocket Message Format
//!
//! JSON events exchanged with the browser. Audio travels base64 encoded
//! inside JSON; a client may also send the recorder blob as a raw binary
//! frame, which needs no envelope at all.
//!
//! ## Client → Server:
//! - `{"type":"audio_data","audio_data":"<base64>"}`
//!
//! ## Server → Client:
//! - `{"type":"audio_response","user_text":"…","assistant_text":"…","audio_data":"<base64>"}`
//! - `{"type":"error","error":"…"}`

use serde::{Deserialize, Serialize};

/// Messages accepted from the browser in text frames.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// One complete recording
    #[serde(rename = "audio_data")]
    AudioData {
        #[serde(with = "base64_bytes")]
        audio_data: Vec<u8>,
    },
}

/// Exactly one of these is sent back for every inbound recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The exchange succeeded
    #[serde(rename = "audio_response")]
    AudioResponse {
        /// What the user said, before content filtering
        user_text: String,
        assistant_text: String,
        /// Synthesized reply audio
        #[serde(with = "base64_bytes")]
        audio_data: Vec<u8>,
    },

    /// The exchange failed; `error` is safe to show to the user
    #[serde(rename = "error")]
    Error { error: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ServerEvent::Error { .. })
    }
}

/// Standard base64 for byte payloads. Decoding also accepts a
/// `data:<mime>;base64,` prefix as produced by `FileReader.readAsDataURL`.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let payload = match encoded.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => encoded.as_str(),
        };
        STANDARD.decode(payload.trim()).map_err(de::Error::custom)
    }
}
