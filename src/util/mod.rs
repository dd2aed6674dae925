//! Utility functions shared by the host bridge
//!
//! Includes serialization helpers for byte payloads crossing the JSON boundary

/// Serde adapter encoding `Vec<u8>` fields as standard base64 strings
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Common utility functions
pub mod common {
    /// Printable preview of a payload for log lines
    pub fn preview(payload: &[u8], max: usize) -> String {
        let text = String::from_utf8_lossy(&payload[..payload.len().min(max)]).into_owned();
        if payload.len() > max {
            format!("{}...", text)
        } else {
            text
        }
    }
}
