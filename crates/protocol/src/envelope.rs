use serde::{Deserialize, Serialize};

/// Response envelope returned by every backend endpoint.
///
/// `data` is kept as raw JSON by default so callers can splice the returned
/// record into their own lists without knowing its schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T = serde_json::Value> {
    pub success: bool,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl<T> ApiEnvelope<T> {
    /// Creates a successful envelope around `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: String::new(),
        }
    }

    /// Creates a failed envelope with a server message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
        }
    }

    /// Returns the payload if the server confirmed success and sent one.
    pub fn into_resource(self) -> Option<T> {
        if self.success { self.data } else { None }
    }
}

impl ApiEnvelope<serde_json::Value> {
    /// Interprets an arbitrary JSON body as an envelope.
    ///
    /// Returns `None` when the body does not look like an envelope at all.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}
