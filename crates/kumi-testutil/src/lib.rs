//! Test scaffolding shared across the kumi workspace.
//!
//! `FakeKernel` is a scriptable stand-in for a language kernel: tests choose
//! its capability set, plug in a handler closure, and inspect the commands it
//! received. The event helpers cut down on match boilerplate in assertions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;

use kumi_kernel::values::{JsonValueDeclarer, ValueDeclarer};
use kumi_kernel::{Kernel, KernelInvocationContext, KernelResult};
use kumi_types::{CommandKind, CommandToken, EventBody, KernelCommand, KernelEvent};

type Handler = Arc<
    dyn Fn(KernelCommand, KernelInvocationContext) -> BoxFuture<'static, KernelResult<()>>
        + Send
        + Sync,
>;

/// A scriptable kernel for tests.
pub struct FakeKernel {
    name: String,
    supported: HashSet<CommandKind>,
    handler: Option<Handler>,
    declarer: Option<JsonValueDeclarer>,
    received: Mutex<Vec<KernelCommand>>,
}

impl FakeKernel {
    /// A fake kernel handling only `SubmitCode`, succeeding silently.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supported: [CommandKind::SubmitCode].into_iter().collect(),
            handler: None,
            declarer: None,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Replace the capability set.
    pub fn with_supported(mut self, kinds: impl IntoIterator<Item = CommandKind>) -> Self {
        self.supported = kinds.into_iter().collect();
        self
    }

    /// Install a handler closure.
    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(KernelCommand, KernelInvocationContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = KernelResult<()>> + Send + 'static,
    {
        self.handler = Some(Arc::new(
            move |command: KernelCommand,
                  ctx: KernelInvocationContext|
                  -> BoxFuture<'static, KernelResult<()>> {
                Box::pin(handler(command, ctx))
            },
        ));
        self
    }

    /// Give the kernel a JSON value declarer (enables `SendValue`).
    pub fn with_json_declarer(mut self) -> Self {
        self.declarer = Some(JsonValueDeclarer);
        self.supported.insert(CommandKind::SendValue);
        self
    }

    /// Commands received so far, in arrival order.
    pub fn received(&self) -> Vec<KernelCommand> {
        self.received.lock().expect("received log poisoned").clone()
    }
}

#[async_trait]
impl Kernel for FakeKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_commands(&self) -> HashSet<CommandKind> {
        self.supported.clone()
    }

    async fn handle(
        &self,
        command: KernelCommand,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        self.received
            .lock()
            .expect("received log poisoned")
            .push(command.clone());
        match &self.handler {
            Some(handler) => handler(command, ctx.clone()).await,
            None => Ok(()),
        }
    }

    fn value_declarer(&self) -> Option<&dyn ValueDeclarer> {
        self.declarer.as_ref().map(|d| d as &dyn ValueDeclarer)
    }
}

/// The single terminal event published for `token`.
///
/// Panics if there is not exactly one — that itself is a property under
/// test: every command (root or expanded) gets exactly one terminal.
pub fn terminal_event<'e>(events: &'e [KernelEvent], token: &CommandToken) -> &'e KernelEvent {
    let terminals: Vec<&KernelEvent> = events
        .iter()
        .filter(|e| e.is_terminal() && e.command == *token)
        .collect();
    assert_eq!(
        terminals.len(),
        1,
        "expected exactly one terminal event for {token}, got {terminals:?}"
    );
    terminals[0]
}

/// All `DisplayedValueProduced` payload strings, in order.
pub fn displayed_values(events: &[KernelEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.body {
            EventBody::DisplayedValueProduced {
                formatted_value, ..
            } => Some(formatted_value.value.clone()),
            _ => None,
        })
        .collect()
}

/// True if the events contain a `CommandFailed` whose message contains `needle`.
pub fn failed_with(events: &[KernelEvent], needle: &str) -> bool {
    events.iter().any(|e| match &e.body {
        EventBody::CommandFailed { message, .. } => message.contains(needle),
        _ => false,
    })
}
