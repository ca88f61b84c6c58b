use std::fmt;

use serde::{Deserialize, Serialize};

/// Status code of a successful response.
pub const STATUS_OK: i32 = 0;

/// The reply to a [`Command`](crate::Command), correlated by `id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Response {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp: Option<serde_json::Value>,
}

impl Response {
    /// A successful response carrying `body`.
    pub fn ok(id: i64, body: Option<serde_json::Value>) -> Self {
        Self {
            id,
            status: STATUS_OK,
            status_msg: None,
            resp: body,
        }
    }

    /// A failed response with a status code and message.
    pub fn error(id: i64, status: i32, msg: impl Into<String>) -> Self {
        Self {
            id,
            status,
            status_msg: Some(msg.into()),
            resp: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Split an application-level failure out of the response.
    ///
    /// Returns the body on success, or an [`ErrorResponse`] when `status` is
    /// nonzero. This never reflects transport failures; those are reported by
    /// the client before a response exists.
    pub fn into_result(self) -> std::result::Result<Option<serde_json::Value>, ErrorResponse> {
        if self.is_ok() {
            Ok(self.resp)
        } else {
            Err(ErrorResponse {
                status: self.status,
                msg: self.status_msg.unwrap_or_default(),
            })
        }
    }
}

/// Application-level failure carried by a response with nonzero status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Numerical status code.
    pub status: i32,
    /// Human-readable description.
    pub msg: String,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.status, self.msg)
    }
}

impl std::error::Error for ErrorResponse {}
