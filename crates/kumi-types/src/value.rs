//! Formatted values — the currency of value sharing and display output.

use serde::{Deserialize, Serialize};

/// Well-known MIME types used across the platform.
pub mod mime {
    /// Plain text rendering.
    pub const PLAIN_TEXT: &str = "text/plain";
    /// JSON serialization, the default for cross-kernel value passage.
    pub const JSON: &str = "application/json";
    /// HTML rendering (front-end concern; the core only carries it).
    pub const HTML: &str = "text/html";
}

/// A value rendered into a specific MIME type.
///
/// Kernels exchange values in formatted form only — the core never sees a
/// language's native object representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedValue {
    /// MIME type of `value`.
    pub mime_type: String,
    /// The rendered payload.
    pub value: String,
}

impl FormattedValue {
    /// Create a formatted value.
    pub fn new(mime_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            value: value.into(),
        }
    }

    /// Plain-text formatted value.
    pub fn plain(value: impl Into<String>) -> Self {
        Self::new(mime::PLAIN_TEXT, value)
    }

    /// JSON formatted value from any serializable payload.
    ///
    /// Falls back to plain text if serialization fails (it cannot for the
    /// types we serialize, but the contract avoids panicking).
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(json) => Self::new(mime::JSON, json),
            Err(_) => Self::plain(""),
        }
    }
}

/// Summary of a value held by a kernel, as reported by `RequestValueInfos`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueInfo {
    /// Variable name inside the owning kernel.
    pub name: String,
    /// Language-level type name, if the kernel knows one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Short preview of the value for display listings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<FormattedValue>,
}

impl ValueInfo {
    /// Create a value info with just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
            preview: None,
        }
    }

    /// Attach a type name.
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Attach a preview.
    pub fn with_preview(mut self, preview: FormattedValue) -> Self {
        self.preview = Some(preview);
        self
    }
}
