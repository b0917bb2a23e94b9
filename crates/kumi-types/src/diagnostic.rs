//! Diagnostics — parse and directive-usage problems with precise source spans.
//!
//! Malformed input never aborts parsing; it becomes a `Diagnostic` attached to
//! the smallest syntax node that covers the offending text, so front-ends can
//! render squiggles while the user is still typing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A half-open byte range into the submission source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    /// Byte offset of the first character.
    pub start: usize,
    /// Length in bytes.
    pub length: usize,
}

impl SourceSpan {
    /// Create a span from a start offset and length.
    pub fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }

    /// Byte offset one past the last character.
    pub fn end(&self) -> usize {
        self.start + self.length
    }

    /// True if `offset` falls inside this span.
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end()
    }

    /// True if `other` lies entirely within this span.
    pub fn encloses(&self, other: &SourceSpan) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }

    /// The smallest span covering both `self` and `other`.
    pub fn union(&self, other: &SourceSpan) -> SourceSpan {
        let start = self.start.min(other.start);
        let end = self.end().max(other.end());
        SourceSpan::new(start, end - start)
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}]", self.start, self.end())
    }
}

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Hint,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Hint => write!(f, "hint"),
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Machine-readable diagnostic codes.
///
/// `KUM1xx` are parse-time errors, `KUM2xx` are directive usage errors.
pub mod codes {
    pub const UNKNOWN_DIRECTIVE: &str = "KUM101";
    pub const UNKNOWN_PARAMETER_NAME: &str = "KUM103";
    pub const MISSING_REQUIRED_PARAMETER: &str = "KUM104";
    pub const TOO_MANY_OCCURRENCES_OF_PARAMETER: &str = "KUM105";
    pub const MISSING_PARAMETER_VALUE: &str = "KUM106";
    pub const UNTERMINATED_VALUE: &str = "KUM107";

    pub const UNSUPPORTED_MIME_TYPE: &str = "KUM201";
    pub const VALUE_NOT_FOUND_IN_KERNEL: &str = "KUM202";
    pub const INPUT_NOT_PROVIDED: &str = "KUM204";
}

/// A problem attached to a span of the submission source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// Source range the problem applies to.
    pub span: SourceSpan,
    /// Severity.
    pub severity: Severity,
    /// Machine-readable code (see [`codes`]).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(span: SourceSpan, code: &str, message: impl Into<String>) -> Self {
        Self {
            span,
            severity: Severity::Error,
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(span: SourceSpan, code: &str, message: impl Into<String>) -> Self {
        Self {
            span,
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}: {}",
            self.span, self.severity, self.code, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_containment() {
        let outer = SourceSpan::new(0, 10);
        let inner = SourceSpan::new(3, 4);
        assert!(outer.encloses(&inner));
        assert!(!inner.encloses(&outer));
        assert!(outer.contains(9));
        assert!(!outer.contains(10));
    }

    #[test]
    fn span_union_covers_both() {
        let a = SourceSpan::new(2, 3);
        let b = SourceSpan::new(8, 4);
        let u = a.union(&b);
        assert_eq!(u, SourceSpan::new(2, 10));
        assert!(u.encloses(&a));
        assert!(u.encloses(&b));
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
