use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::Result;
use crate::response::Response;

/// Protocol version stamped on every outgoing frame.
pub const PROTOCOL_VERSION: u32 = 1;

/// The wire envelope: routing metadata plus a command or a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    #[serde(default = "default_version")]
    pub v: u32,
    /// Identity of the sender.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub src: String,
    /// Identity of the recipient.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dst: String,
    /// Auxiliary routing/authentication key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp: Option<Response>,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

impl Frame {
    /// Build a request frame from `src` to `dst` carrying `cmd`.
    pub fn request(
        src: impl Into<String>,
        dst: impl Into<String>,
        key: impl Into<String>,
        cmd: Command,
    ) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            src: src.into(),
            dst: dst.into(),
            key: key.into(),
            cmd: Some(cmd),
            resp: None,
        }
    }

    /// Build a response frame from `src` to `dst` carrying `resp`.
    pub fn response(src: impl Into<String>, dst: impl Into<String>, resp: Response) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            src: src.into(),
            dst: dst.into(),
            key: String::new(),
            cmd: None,
            resp: Some(resp),
        }
    }

    /// Extract the response, if this frame carries one.
    pub fn into_response(self) -> Option<Response> {
        self.resp
    }

    /// Encode as compact JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Encode as a compact JSON string (for text-message transports).
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Debug rendering capped at `limit` characters, for log lines.
    pub fn preview(&self, limit: usize) -> String {
        let rendered = format!("{self:?}");
        let total = rendered.chars().count();
        if total <= limit {
            rendered
        } else {
            let head: String = rendered.chars().take(limit).collect();
            format!("{head}... ({total})")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_wire_shape() {
        let frame = Frame::request("laptop", "device-1", "", Command::new("/v1/Ping").with_id(42));
        let json: serde_json::Value = serde_json::from_slice(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "v": 1,
                "src": "laptop",
                "dst": "device-1",
                "cmd": { "id": 42, "cmd": "/v1/Ping" }
            })
        );
    }

    #[test]
    fn response_extracted_from_peer_frame() {
        let frame = Frame::from_json(
            br#"{"v":1,"src":"device-1","dst":"laptop","resp":{"id":42,"status":0,"resp":{"ok":true}}}"#,
        )
        .unwrap();
        let resp = frame.into_response().expect("frame should carry a response");
        assert_eq!(resp.id, 42);
        assert_eq!(resp.resp, Some(serde_json::json!({ "ok": true })));
    }

    #[test]
    fn frame_without_response() {
        let frame = Frame::from_json(br#"{"src":"x","cmd":{"id":1,"cmd":"/v1/Hello"}}"#).unwrap();
        assert_eq!(frame.v, PROTOCOL_VERSION);
        assert!(frame.into_response().is_none());
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(Frame::from_json(b"{not json").is_err());
    }

    #[test]
    fn preview_truncates_long_frames() {
        let frame = Frame::request(
            "a",
            "b",
            "",
            Command::new("/v1/Put").with_args(serde_json::json!({ "data": "x".repeat(4096) })),
        );
        let preview = frame.preview(64);
        assert!(preview.starts_with("Frame {"));
        assert!(preview.contains("... ("));
        assert!(preview.chars().count() < 100);
    }
}
