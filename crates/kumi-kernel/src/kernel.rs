//! The `Kernel` trait and the error taxonomy of the dispatch layer.
//!
//! A kernel is a named execution engine for one language or service. It
//! declares the command kinds it can handle; dispatch is a single match over
//! the kind tag inside `handle`, not an interface per command type. Handlers
//! publish progress through the invocation context and report the terminal
//! outcome through their `Result` — the dispatch layer turns that into
//! exactly one `CommandSucceeded`/`CommandFailed` event.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use kumi_types::{CommandKind, KernelCommand};

use crate::context::KernelInvocationContext;
use crate::values::ValueDeclarer;

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors of the dispatch layer.
///
/// These never cross the dispatch boundary as errors: the composite converts
/// them into `CommandFailed` events on the originating command. Only
/// configuration-time operations (starting a proxy twice, connecting to a
/// process that dies before ready) surface them directly.
#[derive(Debug, Error)]
pub enum KernelError {
    /// No kernel in the tree matches the requested target.
    #[error("unknown target kernel '{0}'")]
    UnknownTargetKernel(String),

    /// The routed kernel does not handle this command kind.
    #[error("command '{command}' is not supported by kernel '{kernel}'")]
    CommandNotSupported {
        command: CommandKind,
        kernel: String,
    },

    /// A proxy kernel has exactly one lifetime.
    #[error("ProxyKernel '{0}' is already started.")]
    AlreadyStarted(String),

    /// A requested value does not exist in the source kernel.
    #[error("value '{name}' not found in kernel '{kernel}'")]
    ValueNotFound { name: String, kernel: String },

    /// A directive was invoked in a way its action cannot satisfy.
    #[error("{0}")]
    Directive(String),

    /// The transport behind a proxy kernel went away.
    #[error("connection to remote kernel closed")]
    ConnectionClosed,

    /// The command was terminated by cooperative cancellation.
    #[error("Command cancelled")]
    Cancelled,

    /// A handler failed while executing.
    #[error("{0}")]
    Execution(String),

    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KernelError {
    /// True for cancellation-shaped failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, KernelError::Cancelled)
    }
}

/// A named execution engine in the kernel tree.
#[async_trait]
pub trait Kernel: Send + Sync {
    /// The kernel's unique name among its siblings.
    fn name(&self) -> &str;

    /// The command kinds this kernel handles. Commands outside the set are
    /// refused by the composite before they reach `handle`.
    fn supported_commands(&self) -> HashSet<CommandKind>;

    /// Execute one command, publishing progress through `ctx`.
    ///
    /// Long-running handlers should observe `ctx.cancellation_token()` at
    /// suspension points; the dispatch layer additionally abandons the
    /// handler future at its next await once cancellation fires.
    async fn handle(
        &self,
        command: KernelCommand,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()>;

    /// The kernel's value declarer, used to satisfy `SendValue` by
    /// synthesizing declaration code. `None` means the kernel cannot receive
    /// shared values.
    fn value_declarer(&self) -> Option<&dyn ValueDeclarer> {
        None
    }
}
