use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single search result. Fields other than `id` and `text` are kept as
/// received so the written line carries the whole record.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Status {
    pub id: u64,
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Status {
    pub fn new(id: u64, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: i64,
    pub remaining: i64,
    /// Unix timestamp at which the current window resets
    pub reset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_survive_serialization() {
        let raw = r#"{"id":1050118621198921728,"id_str":"1050118621198921728","text":"cats","lang":"en","user":{"screen_name":"someone"}}"#;
        let status: Status = serde_json::from_str(raw).unwrap();
        assert_eq!(status.id, 1050118621198921728);
        assert_eq!(status.text, "cats");
        assert_eq!(status.extra["lang"], "en");

        let line = serde_json::to_string(&status).unwrap();
        let back: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(back["user"]["screen_name"], "someone");
        assert_eq!(back["id_str"], "1050118621198921728");
    }
}
