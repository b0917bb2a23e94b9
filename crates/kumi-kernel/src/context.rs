//! Per-command invocation context.
//!
//! One context exists per root command. It carries the ordered event log, the
//! subscriber channel, the cancellation token, and the terminal state
//! machine: **Created → Running → (Succeeded | Failed)**. Nested command
//! executions get a view of the same context bound to their own command, so
//! their events land in the root submission's log — unless the nested command
//! suppresses internal events, in which case they are recorded but not
//! published to subscribers.
//!
//! Nothing here is ambient: handlers receive their context as a parameter and
//! pass it down explicitly when they issue nested commands.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use kumi_types::{CommandToken, EventBody, KernelCommand, KernelEvent};

/// Lifecycle of a command's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Created,
    Running,
    Succeeded,
    Failed,
}

/// How a command's execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded,
    Failed { message: String, cancelled: bool },
}

impl CommandOutcome {
    /// True if the command succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Succeeded)
    }
}

struct LogEntry {
    event: KernelEvent,
    published: bool,
}

struct ContextInner {
    root_command: KernelCommand,
    state: Mutex<ContextState>,
    log: Mutex<Vec<LogEntry>>,
    subscribers: broadcast::Sender<KernelEvent>,
    completion_tx: watch::Sender<Option<CommandOutcome>>,
    completion_rx: watch::Receiver<Option<CommandOutcome>>,
    cancellation: CancellationToken,
    disposables: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    child_counter: AtomicUsize,
}

/// The execution context of one command (or a nested view of it).
///
/// Cloning is cheap; all clones share the same log, subscribers, and
/// cancellation token. A clone produced by [`for_command`] publishes under
/// the nested command's token and honors its internal-event suppression.
///
/// [`for_command`]: KernelInvocationContext::for_command
#[derive(Clone)]
pub struct KernelInvocationContext {
    inner: Arc<ContextInner>,
    /// The command this view publishes for.
    command: KernelCommand,
    /// False when an enclosing nested command suppressed internal events.
    publish_externally: bool,
}

impl KernelInvocationContext {
    /// Create a fresh context for a root command.
    pub fn new(command: KernelCommand) -> Self {
        let (completion_tx, completion_rx) = watch::channel(None);
        let (subscribers, _) = broadcast::channel(1024);
        let publish_externally = command.publishes_internal_events();
        Self {
            inner: Arc::new(ContextInner {
                root_command: command.clone(),
                state: Mutex::new(ContextState::Created),
                log: Mutex::new(Vec::new()),
                subscribers,
                completion_tx,
                completion_rx,
                cancellation: CancellationToken::new(),
                disposables: Mutex::new(Vec::new()),
                child_counter: AtomicUsize::new(0),
            }),
            command,
            publish_externally,
        }
    }

    /// The root command this context was created for.
    pub fn root_command(&self) -> &KernelCommand {
        &self.inner.root_command
    }

    /// The command this view is bound to.
    pub fn command(&self) -> &KernelCommand {
        &self.command
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContextState {
        *self.inner.state.lock().expect("context state poisoned")
    }

    /// A view of this context bound to a nested command. Events published
    /// through the view carry the nested command's token; if the nested
    /// command suppresses internal events they stay out of the subscriber
    /// stream (but remain in the internal record for inspection).
    pub fn for_command(&self, command: &KernelCommand) -> KernelInvocationContext {
        KernelInvocationContext {
            inner: self.inner.clone(),
            command: command.clone(),
            publish_externally: self.publish_externally && command.publishes_internal_events(),
        }
    }

    /// Hand out the next child-command sequence number for this submission.
    pub fn next_child_index(&self) -> usize {
        self.inner.child_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Mark the context running. Idempotent.
    pub fn begin(&self) {
        let mut state = self.inner.state.lock().expect("context state poisoned");
        if *state == ContextState::Created {
            *state = ContextState::Running;
        }
    }

    /// Publish an event body under this view's command token.
    pub fn publish(&self, body: EventBody) {
        self.publish_event(KernelEvent::new(self.command.token.clone(), body));
    }

    /// Publish a fully-formed event (used when replaying proxied events that
    /// carry their own tokens).
    pub fn publish_event(&self, event: KernelEvent) {
        let published = self.publish_externally;
        {
            let mut log = self.inner.log.lock().expect("context log poisoned");
            log.push(LogEntry {
                event: event.clone(),
                published,
            });
        }
        if published {
            // Send fails only when there are no subscribers; that is fine.
            let _ = self.inner.subscribers.send(event);
        } else {
            tracing::trace!(token = %event.command, "suppressed internal event");
        }
    }

    /// Transition to Succeeded and publish the terminal event. A no-op if a
    /// terminal state was already reached.
    pub fn succeed(&self) {
        if !self.try_transition(ContextState::Succeeded) {
            return;
        }
        self.publish_terminal(EventBody::CommandSucceeded, CommandOutcome::Succeeded);
    }

    /// Transition to Failed and publish the terminal event. Idempotent —
    /// later calls are no-ops, so exactly one terminal event is emitted.
    pub fn fail(&self, message: impl Into<String>, cancelled: bool) {
        if !self.try_transition(ContextState::Failed) {
            return;
        }
        let message = message.into();
        self.publish_terminal(
            EventBody::CommandFailed {
                message: message.clone(),
                cancelled,
            },
            CommandOutcome::Failed { message, cancelled },
        );
    }

    fn try_transition(&self, to: ContextState) -> bool {
        let mut state = self.inner.state.lock().expect("context state poisoned");
        match *state {
            ContextState::Succeeded | ContextState::Failed => false,
            _ => {
                *state = to;
                true
            }
        }
    }

    fn publish_terminal(&self, body: EventBody, outcome: CommandOutcome) {
        // Terminal events are always published, under the root token.
        let event = KernelEvent::new(self.inner.root_command.token.clone(), body);
        {
            let mut log = self.inner.log.lock().expect("context log poisoned");
            log.push(LogEntry {
                event: event.clone(),
                published: true,
            });
        }
        let _ = self.inner.subscribers.send(event);
        let _ = self.inner.completion_tx.send(Some(outcome));
        self.run_disposals();
    }

    /// The cancellation token observed by handlers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancellation.clone()
    }

    /// Trip the cancellation token.
    pub fn cancel(&self) {
        self.inner.cancellation.cancel();
    }

    /// True once cancellation has been requested.
    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Register a cleanup to run when the context reaches a terminal state.
    /// Disposals run in LIFO order.
    pub fn register_for_disposal(&self, f: impl FnOnce() + Send + 'static) {
        self.inner
            .disposables
            .lock()
            .expect("context disposables poisoned")
            .push(Box::new(f));
    }

    fn run_disposals(&self) {
        let mut disposables = self
            .inner
            .disposables
            .lock()
            .expect("context disposables poisoned");
        while let Some(f) = disposables.pop() {
            f();
        }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.inner.subscribers.subscribe()
    }

    /// The published events so far, in publication order.
    pub fn events(&self) -> Vec<KernelEvent> {
        self.inner
            .log
            .lock()
            .expect("context log poisoned")
            .iter()
            .filter(|e| e.published)
            .map(|e| e.event.clone())
            .collect()
    }

    /// Every recorded event for commands under `token`, including suppressed
    /// internal ones. Used by directive actions to extract results of nested
    /// commands.
    pub(crate) fn events_for(&self, token: &CommandToken) -> Vec<KernelEvent> {
        self.inner
            .log
            .lock()
            .expect("context log poisoned")
            .iter()
            .filter(|e| token.contains(&e.event.command))
            .map(|e| e.event.clone())
            .collect()
    }

    /// Wait for the terminal event and return the outcome.
    pub async fn wait_for_completion(&self) -> CommandOutcome {
        let mut rx = self.inner.completion_rx.clone();
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without a terminal event; treat as failure.
                return CommandOutcome::Failed {
                    message: "invocation context dropped before completion".into(),
                    cancelled: false,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumi_types::CommandBody;

    fn context() -> KernelInvocationContext {
        KernelInvocationContext::new(KernelCommand::submit_code("1 + 1"))
    }

    #[test]
    fn exactly_one_terminal_event() {
        let ctx = context();
        ctx.begin();
        ctx.fail("boom", false);
        ctx.fail("boom again", false);
        ctx.succeed();

        let terminal: Vec<_> = ctx.events().into_iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(
            terminal[0].body,
            EventBody::CommandFailed {
                message: "boom".into(),
                cancelled: false
            }
        );
        assert_eq!(ctx.state(), ContextState::Failed);
    }

    #[test]
    fn succeed_after_fail_is_a_no_op() {
        let ctx = context();
        ctx.begin();
        ctx.succeed();
        ctx.fail("too late", false);
        assert_eq!(ctx.state(), ContextState::Succeeded);
    }

    #[test]
    fn disposals_run_lifo() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let ctx = context();
        for i in 0..3 {
            let order = order.clone();
            ctx.register_for_disposal(move || order.lock().unwrap().push(i));
        }
        ctx.succeed();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn suppressed_child_events_stay_out_of_published_stream() {
        let ctx = context();
        let child = ctx
            .root_command()
            .spawn_child(1, CommandBody::RequestValueInfos)
            .suppress_internal_events();
        let child_view = ctx.for_command(&child);
        child_view.publish(EventBody::ValueInfosProduced {
            value_infos: vec![],
        });

        assert!(ctx.events().is_empty());
        assert_eq!(ctx.events_for(&child.token).len(), 1);
    }

    #[tokio::test]
    async fn wait_for_completion_returns_outcome() {
        let ctx = context();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_completion().await });
        ctx.succeed();
        assert!(handle.await.unwrap().is_success());
    }
}
