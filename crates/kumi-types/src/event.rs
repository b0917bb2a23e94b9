//! The event model — everything a kernel reports back about a command.
//!
//! Events are correlated 1:1 with the command whose execution produced them.
//! Exactly one terminal event (`CommandSucceeded` or `CommandFailed`) is
//! published per command; everything else is progress.

use serde::{Deserialize, Serialize};

use crate::diagnostic::Diagnostic;
use crate::token::CommandToken;
use crate::value::{FormattedValue, ValueInfo};

/// Message used when a command is terminated by cancellation.
pub const CANCELLED_MESSAGE: &str = "Command cancelled";

/// A completion item produced by `RequestCompletions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    /// Text shown in the completion list.
    pub display_text: String,
    /// Text inserted on acceptance.
    pub insert_text: String,
    /// Item kind hint ("method", "keyword", ...), front-end defined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// The payload of a [`KernelEvent`].
///
/// Serialized adjacently tagged so the wire shape is
/// `{ "eventType": "ValueProduced", "event": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "event", rename_all_fields = "camelCase")]
pub enum EventBody {
    /// A code submission was received and parsed.
    CodeSubmissionReceived { code: String },
    /// The submission is syntactically complete and will execute.
    CompleteCodeSubmissionReceived { code: String },
    /// The submission is incomplete (e.g. unbalanced braces); the front-end
    /// should keep accepting input.
    IncompleteCodeSubmissionReceived { code: String },
    /// Terminal: the command finished without error.
    CommandSucceeded,
    /// Terminal: the command failed. `cancelled` distinguishes cooperative
    /// cancellation from genuine failure without message string-matching.
    CommandFailed {
        message: String,
        #[serde(default)]
        cancelled: bool,
    },
    /// A value was displayed as a side effect of execution.
    DisplayedValueProduced {
        formatted_value: FormattedValue,
        #[serde(skip_serializing_if = "Option::is_none")]
        value_id: Option<String>,
    },
    /// A previously displayed value was updated in place.
    DisplayedValueUpdated {
        formatted_value: FormattedValue,
        value_id: String,
    },
    /// The trailing expression of a submission produced a value.
    ReturnValueProduced { formatted_value: FormattedValue },
    /// A kernel answered `RequestValue`.
    ValueProduced {
        name: String,
        formatted_value: FormattedValue,
    },
    /// A kernel answered `RequestValueInfos`.
    ValueInfosProduced { value_infos: Vec<ValueInfo> },
    /// Diagnostics for a submission (parse problems, directive misuse).
    DiagnosticsProduced { diagnostics: Vec<Diagnostic> },
    /// A kernel answered `RequestCompletions`.
    CompletionsProduced { completions: Vec<CompletionItem> },
    /// A kernel answered `RequestHoverText`.
    HoverTextProduced { content: FormattedValue },
    /// A kernel host finished starting and can accept commands.
    KernelReady { kernel_names: Vec<String> },
    /// A package reference was added.
    PackageAdded {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
}

impl EventBody {
    /// True for the events that close out a command's invocation context.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventBody::CommandSucceeded | EventBody::CommandFailed { .. }
        )
    }

    /// The event-type tag as it appears on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventBody::CodeSubmissionReceived { .. } => "CodeSubmissionReceived",
            EventBody::CompleteCodeSubmissionReceived { .. } => "CompleteCodeSubmissionReceived",
            EventBody::IncompleteCodeSubmissionReceived { .. } => "IncompleteCodeSubmissionReceived",
            EventBody::CommandSucceeded => "CommandSucceeded",
            EventBody::CommandFailed { .. } => "CommandFailed",
            EventBody::DisplayedValueProduced { .. } => "DisplayedValueProduced",
            EventBody::DisplayedValueUpdated { .. } => "DisplayedValueUpdated",
            EventBody::ReturnValueProduced { .. } => "ReturnValueProduced",
            EventBody::ValueProduced { .. } => "ValueProduced",
            EventBody::ValueInfosProduced { .. } => "ValueInfosProduced",
            EventBody::DiagnosticsProduced { .. } => "DiagnosticsProduced",
            EventBody::CompletionsProduced { .. } => "CompletionsProduced",
            EventBody::HoverTextProduced { .. } => "HoverTextProduced",
            EventBody::KernelReady { .. } => "KernelReady",
            EventBody::PackageAdded { .. } => "PackageAdded",
        }
    }

    /// A `CommandFailed` body for cooperative cancellation.
    pub fn cancelled() -> Self {
        EventBody::CommandFailed {
            message: CANCELLED_MESSAGE.to_string(),
            cancelled: true,
        }
    }

    /// A `CommandFailed` body for a genuine failure.
    pub fn failed(message: impl Into<String>) -> Self {
        EventBody::CommandFailed {
            message: message.into(),
            cancelled: false,
        }
    }
}

/// An event emitted during a command's execution.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelEvent {
    /// Token of the command that produced this event.
    pub command: CommandToken,
    /// The event payload.
    pub body: EventBody,
}

impl KernelEvent {
    /// Create an event correlated with `command`.
    pub fn new(command: CommandToken, body: EventBody) -> Self {
        Self { command, body }
    }

    /// True for terminal events.
    pub fn is_terminal(&self) -> bool {
        self.body.is_terminal()
    }
}
