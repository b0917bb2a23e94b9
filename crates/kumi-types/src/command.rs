//! The command model — the closed set of operations a kernel can be asked
//! to perform.
//!
//! Commands are a tagged union rather than one type per operation: each kernel
//! declares the set of [`CommandKind`] tags it accepts, and dispatch is a
//! single match over the tag. The set is closed — extending it means
//! recompiling, which is the intended extensibility contract.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::token::CommandToken;
use crate::value::FormattedValue;

/// Property key: when set to `false` on a nested command, events published
/// during its execution stay internal and only the terminal outcome is
/// reflected in the parent context.
pub const PUBLISH_INTERNAL_EVENTS: &str = "publish-internal-events";

/// The payload of a [`KernelCommand`].
///
/// Serialized adjacently tagged so the wire shape is
/// `{ "commandType": "SubmitCode", "command": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "commandType", content = "command", rename_all_fields = "camelCase")]
pub enum CommandBody {
    /// Execute a cell of code.
    SubmitCode {
        code: String,
    },
    /// Request completion items at a position in a cell.
    RequestCompletions {
        code: String,
        position: usize,
    },
    /// Request diagnostics for a cell without executing it.
    RequestDiagnostics {
        code: String,
    },
    /// Request hover text at a position in a cell.
    RequestHoverText {
        code: String,
        position: usize,
    },
    /// Request a named value from a kernel's state.
    RequestValue {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// Request a listing of the values a kernel holds.
    RequestValueInfos,
    /// Declare a value inside a kernel's state.
    SendValue {
        name: String,
        formatted_value: FormattedValue,
    },
    /// Cancel the currently executing command.
    Cancel,
    /// Add a package/library reference to a kernel.
    AddPackage {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    /// Change a kernel's working directory.
    ChangeWorkingDirectory {
        path: String,
    },
    /// Display a value without binding it.
    DisplayValue {
        formatted_value: FormattedValue,
    },
    /// Display an error message.
    DisplayError {
        message: String,
    },
    /// Shut the kernel down.
    Quit,
}

impl CommandBody {
    /// The kind tag for capability checks and dispatch.
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandBody::SubmitCode { .. } => CommandKind::SubmitCode,
            CommandBody::RequestCompletions { .. } => CommandKind::RequestCompletions,
            CommandBody::RequestDiagnostics { .. } => CommandKind::RequestDiagnostics,
            CommandBody::RequestHoverText { .. } => CommandKind::RequestHoverText,
            CommandBody::RequestValue { .. } => CommandKind::RequestValue,
            CommandBody::RequestValueInfos => CommandKind::RequestValueInfos,
            CommandBody::SendValue { .. } => CommandKind::SendValue,
            CommandBody::Cancel => CommandKind::Cancel,
            CommandBody::AddPackage { .. } => CommandKind::AddPackage,
            CommandBody::ChangeWorkingDirectory { .. } => CommandKind::ChangeWorkingDirectory,
            CommandBody::DisplayValue { .. } => CommandKind::DisplayValue,
            CommandBody::DisplayError { .. } => CommandKind::DisplayError,
            CommandBody::Quit => CommandKind::Quit,
        }
    }
}

/// Unit tags naming each command variant.
///
/// Kernels advertise the set of kinds they handle; the composite refuses
/// commands outside that set before they reach the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    SubmitCode,
    RequestCompletions,
    RequestDiagnostics,
    RequestHoverText,
    RequestValue,
    RequestValueInfos,
    SendValue,
    Cancel,
    AddPackage,
    ChangeWorkingDirectory,
    DisplayValue,
    DisplayError,
    Quit,
}

impl CommandKind {
    /// Every command kind, in declaration order. Proxy kernels forward
    /// anything, so they advertise the full set.
    pub fn all() -> impl Iterator<Item = CommandKind> {
        [
            CommandKind::SubmitCode,
            CommandKind::RequestCompletions,
            CommandKind::RequestDiagnostics,
            CommandKind::RequestHoverText,
            CommandKind::RequestValue,
            CommandKind::RequestValueInfos,
            CommandKind::SendValue,
            CommandKind::Cancel,
            CommandKind::AddPackage,
            CommandKind::ChangeWorkingDirectory,
            CommandKind::DisplayValue,
            CommandKind::DisplayError,
            CommandKind::Quit,
        ]
        .into_iter()
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A command addressed to a kernel, with its routing and correlation context.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelCommand {
    /// Correlation token; all events for this command carry it.
    pub token: CommandToken,
    /// Explicit destination kernel name, if the sender chose one.
    pub target_kernel: Option<String>,
    /// The command this one was expanded from, if any.
    pub parent: Option<CommandToken>,
    /// Out-of-band metadata (see [`PUBLISH_INTERNAL_EVENTS`]).
    pub properties: HashMap<String, serde_json::Value>,
    /// The operation itself.
    pub body: CommandBody,
}

impl KernelCommand {
    /// Create a command with a fresh token and no target.
    pub fn new(body: CommandBody) -> Self {
        Self {
            token: CommandToken::new(),
            target_kernel: None,
            parent: None,
            properties: HashMap::new(),
            body,
        }
    }

    /// Create a `SubmitCode` command.
    pub fn submit_code(code: impl Into<String>) -> Self {
        Self::new(CommandBody::SubmitCode { code: code.into() })
    }

    /// Set the target kernel name.
    pub fn with_target(mut self, kernel_name: impl Into<String>) -> Self {
        self.target_kernel = Some(kernel_name.into());
        self
    }

    /// Derive a child command: token nested under this command's token,
    /// parent pointing back here, properties inherited.
    pub fn spawn_child(&self, n: usize, body: CommandBody) -> KernelCommand {
        KernelCommand {
            token: self.token.child(n),
            target_kernel: None,
            parent: Some(self.token.clone()),
            properties: self.properties.clone(),
            body,
        }
    }

    /// The command's kind tag.
    pub fn kind(&self) -> CommandKind {
        self.body.kind()
    }

    /// Whether events published while executing this command should reach
    /// outer subscribers. Defaults to true; suppressed by setting the
    /// [`PUBLISH_INTERNAL_EVENTS`] property to `false`.
    pub fn publishes_internal_events(&self) -> bool {
        self.properties
            .get(PUBLISH_INTERNAL_EVENTS)
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }

    /// Mark this command's events as internal-only.
    pub fn suppress_internal_events(mut self) -> Self {
        self.properties
            .insert(PUBLISH_INTERNAL_EVENTS.to_string(), serde_json::json!(false));
        self
    }
}
