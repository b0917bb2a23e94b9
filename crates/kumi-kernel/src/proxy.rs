//! The proxy kernel — a local stand-in for a kernel hosted elsewhere.
//!
//! Commands sent to the proxy are serialized through its connector; events
//! received from the remote side are matched to in-flight commands by
//! correlation token and replayed into the local invocation context in
//! arrival order. Per-token ordering is preserved; commands with distinct
//! tokens may be in flight concurrently.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use kumi_types::{
    CommandKind, CommandToken, EventBody, KernelCommand, KernelCommandEnvelope,
    KernelEventEnvelope,
};

use crate::connection::Connector;
use crate::context::KernelInvocationContext;
use crate::kernel::{Kernel, KernelError, KernelResult};

type PendingMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<KernelEventEnvelope>>>>;

/// A local façade forwarding commands to a remote kernel.
///
/// Created on `#!connect`; started exactly once; torn down when the owning
/// composite drops it.
pub struct ProxyKernel {
    name: String,
    commands: mpsc::Sender<KernelCommandEnvelope>,
    receiver: Mutex<Option<mpsc::Receiver<KernelEventEnvelope>>>,
    started: AtomicBool,
    pending: PendingMap,
    /// Resources (e.g. the child-process guard) that must live as long as
    /// the proxy does.
    resources: Mutex<Vec<Box<dyn Any + Send>>>,
}

impl ProxyKernel {
    /// Wrap a connector under the given local kernel name.
    pub fn new(name: impl Into<String>, connector: Connector) -> Self {
        Self {
            name: name.into(),
            commands: connector.commands,
            receiver: Mutex::new(Some(connector.events)),
            started: AtomicBool::new(false),
            pending: Arc::new(Mutex::new(HashMap::new())),
            resources: Mutex::new(Vec::new()),
        }
    }

    /// Bind the receiver loop. A proxy kernel has exactly one lifetime:
    /// calling this twice is an error.
    pub fn start(&self) -> KernelResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(KernelError::AlreadyStarted(self.name.clone()));
        }

        let mut receiver = self
            .receiver
            .lock()
            .expect("proxy receiver poisoned")
            .take()
            .ok_or_else(|| KernelError::AlreadyStarted(self.name.clone()))?;

        let pending = self.pending.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                let Some(token) = envelope.command_token().cloned() else {
                    tracing::debug!(proxy = %name, "dropping event without a command token");
                    continue;
                };

                let target = {
                    let pending = pending.lock().expect("proxy pending poisoned");
                    pending
                        .iter()
                        .find(|(sent, _)| {
                            CommandToken::from_wire(sent.as_str()).contains(&token)
                        })
                        .map(|(_, tx)| tx.clone())
                };

                match target {
                    Some(tx) => {
                        let _ = tx.send(envelope);
                    }
                    None => {
                        tracing::debug!(proxy = %name, %token, "dropping event for unknown token");
                    }
                }
            }
            tracing::debug!(proxy = %name, "remote event stream closed");
        });

        Ok(())
    }

    /// Keep a resource alive for the proxy's lifetime.
    pub fn retain_resource(&self, resource: Box<dyn Any + Send>) {
        self.resources
            .lock()
            .expect("proxy resources poisoned")
            .push(resource);
    }
}

#[async_trait]
impl Kernel for ProxyKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_commands(&self) -> std::collections::HashSet<CommandKind> {
        // A proxy forwards anything; what the remote side supports is its
        // own business.
        CommandKind::all().collect()
    }

    async fn handle(
        &self,
        command: KernelCommand,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(KernelError::Execution(format!(
                "ProxyKernel '{}' has not been started",
                self.name
            )));
        }

        let key = command.token.as_str().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.pending
            .lock()
            .expect("proxy pending poisoned")
            .insert(key.clone(), tx);

        // Remove the pending entry however we leave this function.
        struct PendingGuard(PendingMap, String);
        impl Drop for PendingGuard {
            fn drop(&mut self) {
                self.0
                    .lock()
                    .expect("proxy pending poisoned")
                    .remove(&self.1);
            }
        }
        let _guard = PendingGuard(self.pending.clone(), key);

        // If the caller targeted the proxy by its local name, strip the
        // target so the remote tree applies its own routing.
        let mut outbound = command.clone();
        if outbound.target_kernel.as_deref() == Some(self.name.as_str()) {
            outbound.target_kernel = None;
        }

        self.commands
            .send(KernelCommandEnvelope::from(&outbound))
            .await
            .map_err(|_| KernelError::ConnectionClosed)?;

        // Replay remote events locally until this command's own terminal
        // event arrives. Terminals of commands the remote side expanded on
        // our behalf are ordinary progress here — the local dispatch layer
        // publishes this command's terminal from the returned result.
        loop {
            let Some(envelope) = rx.recv().await else {
                return Err(KernelError::ConnectionClosed);
            };
            let is_own = envelope.command_token() == Some(&command.token);
            match &envelope.body {
                EventBody::CommandSucceeded if is_own => return Ok(()),
                EventBody::CommandFailed { message, cancelled } if is_own => {
                    return if *cancelled {
                        Err(KernelError::Cancelled)
                    } else {
                        Err(KernelError::Execution(message.clone()))
                    };
                }
                _ => {
                    ctx.publish_event(envelope.into_event(&command.token));
                }
            }
        }
    }
}
