//! The composite kernel — a tree of named kernels behind one dispatch front.
//!
//! The composite owns its children, their per-kernel command queues, and the
//! directive grammar. Routing is deterministic: an explicit target name (or
//! alias) wins, then the language resolved from the submission's syntax tree,
//! then the default kernel; anything else fails the command. Failures never
//! cross the dispatch boundary as errors — they become `CommandFailed` events
//! on the originating command.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      CompositeKernel                       │
//! │  ┌──────────────┐  ┌───────────────┐  ┌────────────────┐   │
//! │  │ children     │  │ directive     │  │ per-child      │   │
//! │  │ (name→kernel)│  │ registries    │  │ command queues │   │
//! │  └──────────────┘  └───────────────┘  └────────────────┘   │
//! │          SubmitCode → parse → chunks → route → queue       │
//! └────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex, RwLock};

use futures::future::BoxFuture;

use kumi_types::{
    CommandBody, CommandKind, EventBody, FormattedValue, KernelCommand, Severity, ValueInfo,
};

use crate::context::KernelInvocationContext;
use crate::directives::{DirectiveDefinition, DirectiveRegistry};
use crate::kernel::{Kernel, KernelError, KernelResult};
use crate::parsing::{parse, split_submission, ParserConfiguration, SubmissionChunk};
use crate::scheduler::CommandQueue;

/// Front-end hook for `@input:` expressions. Receives the prompt, returns
/// the user's input or a refusal message.
pub type InputHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<String, String>> + Send + Sync>;

struct ChildEntry {
    kernel: Arc<dyn Kernel>,
    aliases: Vec<String>,
    queue: CommandQueue,
    directives: DirectiveRegistry,
}

struct CompositeState {
    children: Vec<ChildEntry>,
    default_kernel_name: Option<String>,
    root_directives: DirectiveRegistry,
}

struct CompositeInner {
    name: String,
    state: RwLock<CompositeState>,
    /// The context of the command currently being driven; `Cancel` targets it.
    current: Mutex<Option<KernelInvocationContext>>,
    input_handler: RwLock<Option<InputHandler>>,
}

/// A kernel that contains and routes to child kernels.
///
/// Cloning is cheap and shares the tree — handles can be passed to driver
/// tasks, directive actions, and clients alike.
#[derive(Clone)]
pub struct CompositeKernel {
    inner: Arc<CompositeInner>,
}

impl CompositeKernel {
    /// Create an empty composite. Kernels and directives are added during
    /// setup; a kernel added while traffic is live only becomes routable for
    /// commands dispatched after the add completes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(CompositeInner {
                name: name.into(),
                state: RwLock::new(CompositeState {
                    children: Vec::new(),
                    default_kernel_name: None,
                    root_directives: DirectiveRegistry::new(),
                }),
                current: Mutex::new(None),
                input_handler: RwLock::new(None),
            }),
        }
    }

    /// The composite's own name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Add a child kernel under its name plus the given aliases.
    ///
    /// Spawns the child's command queue, so this must run inside a tokio
    /// runtime. Sibling names and aliases must be unique.
    pub fn add_kernel(&self, kernel: Arc<dyn Kernel>, aliases: &[&str]) -> KernelResult<()> {
        let mut state = self.inner.state.write().expect("composite state poisoned");
        let name = kernel.name().to_string();

        let clash = state.children.iter().any(|c| {
            std::iter::once(c.kernel.name())
                .chain(c.aliases.iter().map(String::as_str))
                .any(|existing| existing == name || aliases.contains(&existing))
        });
        if clash {
            return Err(KernelError::Execution(format!(
                "a kernel named '{name}' (or one of its aliases) is already present"
            )));
        }

        let queue = CommandQueue::start(kernel.clone());
        state.children.push(ChildEntry {
            kernel,
            aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
            queue,
            directives: DirectiveRegistry::new(),
        });

        // The first child becomes the default until one is chosen explicitly.
        if state.default_kernel_name.is_none() {
            state.default_kernel_name = Some(name);
        }
        Ok(())
    }

    /// Choose the default kernel for untargeted commands.
    pub fn set_default_kernel_name(&self, name: &str) -> KernelResult<()> {
        let mut state = self.inner.state.write().expect("composite state poisoned");
        if !state.children.iter().any(|c| c.kernel.name() == name) {
            return Err(KernelError::UnknownTargetKernel(name.to_string()));
        }
        state.default_kernel_name = Some(name.to_string());
        Ok(())
    }

    /// The current default kernel name.
    pub fn default_kernel_name(&self) -> Option<String> {
        self.inner
            .state
            .read()
            .expect("composite state poisoned")
            .default_kernel_name
            .clone()
    }

    /// Names of all child kernels, in add order.
    pub fn kernel_names(&self) -> Vec<String> {
        self.inner
            .state
            .read()
            .expect("composite state poisoned")
            .children
            .iter()
            .map(|c| c.kernel.name().to_string())
            .collect()
    }

    /// Register a directive on the composite root, visible from any language.
    pub fn add_directive(&self, definition: DirectiveDefinition) {
        self.inner
            .state
            .write()
            .expect("composite state poisoned")
            .root_directives
            .register(definition);
    }

    /// Register a directive in one child kernel's grammar.
    pub fn add_directive_for(
        &self,
        kernel_name: &str,
        definition: DirectiveDefinition,
    ) -> KernelResult<()> {
        let mut state = self.inner.state.write().expect("composite state poisoned");
        let child = state
            .children
            .iter_mut()
            .find(|c| c.kernel.name() == kernel_name)
            .ok_or_else(|| KernelError::UnknownTargetKernel(kernel_name.to_string()))?;
        child.directives.register(definition);
        Ok(())
    }

    /// Install the front-end input hook used by `@input:` expressions.
    pub fn set_input_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
    {
        let wrapped: InputHandler = Arc::new(
            move |prompt: String| -> BoxFuture<'static, Result<String, String>> {
                Box::pin(handler(prompt))
            },
        );
        *self
            .inner
            .input_handler
            .write()
            .expect("input handler poisoned") = Some(wrapped);
    }

    pub(crate) async fn request_input(&self, prompt: &str) -> KernelResult<String> {
        let handler = self
            .inner
            .input_handler
            .read()
            .expect("input handler poisoned")
            .clone();
        match handler {
            Some(handler) => handler(prompt.to_string())
                .await
                .map_err(KernelError::Directive),
            None => Err(KernelError::Directive(format!(
                "input requested ('{prompt}') but no input handler is configured"
            ))),
        }
    }

    /// A parse-time snapshot of the kernel tree: selector identifiers and the
    /// directive grammar visible from each kernel.
    pub fn parser_configuration(&self) -> ParserConfiguration {
        let state = self.inner.state.read().expect("composite state poisoned");
        let default_language = state.default_kernel_name.clone().unwrap_or_default();
        let mut config = ParserConfiguration::new(default_language);
        for child in &state.children {
            let aliases: Vec<&str> = child.aliases.iter().map(String::as_str).collect();
            config = config.with_kernel(child.kernel.name(), &aliases);
            config = config.with_kernel_registry(child.kernel.name(), child.directives.clone());
        }
        config.with_root_registry(state.root_directives.clone())
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    /// Send a command into the tree. Returns the invocation context
    /// immediately; execution proceeds on a driver task. Subscribe to the
    /// context or await [`KernelInvocationContext::wait_for_completion`] to
    /// observe progress.
    pub fn send(&self, command: KernelCommand) -> KernelInvocationContext {
        let ctx = KernelInvocationContext::new(command.clone());
        ctx.begin();
        let this = self.clone();
        let driver_ctx = ctx.clone();
        tokio::spawn(async move {
            this.execute_root(command, driver_ctx).await;
        });
        ctx
    }

    /// Send a command and wait for its terminal event.
    pub async fn send_and_wait(&self, command: KernelCommand) -> KernelInvocationContext {
        let ctx = self.send(command);
        ctx.wait_for_completion().await;
        ctx
    }

    #[tracing::instrument(level = "debug", skip(self, command, ctx), fields(kind = %command.kind(), token = %command.token))]
    async fn execute_root(&self, command: KernelCommand, ctx: KernelInvocationContext) {
        if command.kind() == CommandKind::Cancel {
            let current = self
                .inner
                .current
                .lock()
                .expect("current context poisoned")
                .clone();
            if let Some(running) = current {
                running.cancel();
            }
            ctx.succeed();
            return;
        }

        {
            let mut current = self.inner.current.lock().expect("current context poisoned");
            *current = Some(ctx.clone());
        }

        let result = self.execute_command(&command, &ctx).await;

        {
            let mut current = self.inner.current.lock().expect("current context poisoned");
            if let Some(running) = current.as_ref() {
                if running.root_command().token == ctx.root_command().token {
                    *current = None;
                }
            }
        }

        match result {
            Ok(()) => ctx.succeed(),
            Err(e) => ctx.fail(e.to_string(), e.is_cancelled()),
        }
    }

    async fn execute_command(
        &self,
        command: &KernelCommand,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        match &command.body {
            CommandBody::SubmitCode { code } => self.execute_submission(command, code, ctx).await,
            CommandBody::RequestDiagnostics { code } => {
                let config = self.parser_configuration();
                let default = self.effective_language(command)?;
                let tree = parse(code, Some(&default), &config);
                ctx.publish(EventBody::DiagnosticsProduced {
                    diagnostics: tree.diagnostics(),
                });
                Ok(())
            }
            CommandBody::DisplayValue { formatted_value } => {
                ctx.publish(EventBody::DisplayedValueProduced {
                    formatted_value: formatted_value.clone(),
                    value_id: None,
                });
                Ok(())
            }
            CommandBody::DisplayError { message } => {
                ctx.publish(EventBody::DisplayedValueProduced {
                    formatted_value: FormattedValue::plain(format!("error: {message}")),
                    value_id: None,
                });
                Ok(())
            }
            CommandBody::ChangeWorkingDirectory { path } => std::env::set_current_dir(path)
                .map_err(|e| KernelError::Execution(format!("cannot change directory: {e}"))),
            CommandBody::Quit => Ok(()),
            _ => {
                // Everything else routes to a single child kernel.
                let target = command.target_kernel.clone();
                self.route_and_run(target.as_deref(), command.clone(), ctx)
                    .await
            }
        }
    }

    /// The canonical language a command's submission parses under: the
    /// explicit target if present, the default kernel otherwise.
    fn effective_language(&self, command: &KernelCommand) -> KernelResult<String> {
        let config = self.parser_configuration();
        match command.target_kernel.as_deref() {
            Some(target) => config
                .kernel_for_alias(target)
                .map(str::to_string)
                .ok_or_else(|| KernelError::UnknownTargetKernel(target.to_string())),
            None => Ok(config.default_language().to_string()),
        }
    }

    async fn execute_submission(
        &self,
        command: &KernelCommand,
        code: &str,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        ctx.publish(EventBody::CodeSubmissionReceived {
            code: code.to_string(),
        });

        let config = self.parser_configuration();
        let default = self.effective_language(command)?;
        let tree = parse(code, Some(&default), &config);
        let diagnostics = tree.diagnostics();

        if diagnostics
            .iter()
            .any(|d| d.code == kumi_types::codes::UNTERMINATED_VALUE)
        {
            ctx.publish(EventBody::IncompleteCodeSubmissionReceived {
                code: code.to_string(),
            });
            return Ok(());
        }

        ctx.publish(EventBody::CompleteCodeSubmissionReceived {
            code: code.to_string(),
        });

        let errors: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect();
        if !errors.is_empty() {
            ctx.publish(EventBody::DiagnosticsProduced {
                diagnostics: diagnostics.clone(),
            });
            return Err(KernelError::Execution(errors[0].message.clone()));
        }

        // One command per contiguous language/directive span. Directive
        // chunks run inline against the context; code chunks go through the
        // target kernel's queue. A failure short-circuits the rest.
        for chunk in split_submission(&tree, &config) {
            if ctx.is_cancellation_requested() {
                return Err(KernelError::Cancelled);
            }
            match chunk {
                SubmissionChunk::Directive(invocation) => {
                    let definition = config
                        .directive_for(&invocation.owning_kernel, &invocation.directive_name)
                        .ok_or_else(|| {
                            KernelError::Directive(format!(
                                "unknown directive '#!{}'",
                                invocation.directive_name
                            ))
                        })?;
                    let action = definition.action().ok_or_else(|| {
                        KernelError::Directive(format!(
                            "directive '#!{}' has no handler",
                            invocation.directive_name
                        ))
                    })?;
                    action.run(&invocation, self, ctx).await?;
                }
                SubmissionChunk::Code { language, code } => {
                    let child = command
                        .spawn_child(ctx.next_child_index(), CommandBody::SubmitCode { code })
                        .with_target(language);
                    let target = child.target_kernel.clone();
                    self.route_and_run(target.as_deref(), child, ctx).await?;
                }
            }
        }

        Ok(())
    }

    /// Resolve a target and run one command on the resolved kernel's queue,
    /// publishing the child's terminal event into the context.
    pub(crate) async fn route_and_run(
        &self,
        target: Option<&str>,
        command: KernelCommand,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        let (kernel, queue) = match target {
            Some(name) => self.resolve_name(name)?,
            None => {
                let default = self
                    .default_kernel_name()
                    .ok_or_else(|| KernelError::UnknownTargetKernel(String::new()))?;
                self.resolve_name(&default)?
            }
        };

        let kind = command.kind();
        if !kernel.supported_commands().contains(&kind) {
            return Err(KernelError::CommandNotSupported {
                command: kind,
                kernel: kernel.name().to_string(),
            });
        }

        // `SendValue` goes through the destination's value declarer when it
        // has one: the declaration is synthesized as code and executed as an
        // internal submission. Kernels without a declarer that still list
        // SendValue (proxies, natively-handling kernels) take the normal
        // queue path.
        if let CommandBody::SendValue {
            name,
            formatted_value,
        } = &command.body
        {
            if kernel.value_declarer().is_some() {
                return self
                    .declare_value(&kernel, &queue, &command, name, formatted_value, ctx)
                    .await;
            }
        }

        // Expanded commands get their own terminal event here; for the root
        // command the driver publishes the terminal from the final result.
        let is_root = command.token == ctx.root_command().token;
        let view = ctx.for_command(&command);
        let result = queue.run(command, view.clone()).await;
        if !is_root {
            match &result {
                Ok(()) => view.publish(EventBody::CommandSucceeded),
                Err(e) => view.publish(EventBody::CommandFailed {
                    message: e.to_string(),
                    cancelled: e.is_cancelled(),
                }),
            }
        }
        result
    }

    async fn declare_value(
        &self,
        kernel: &Arc<dyn Kernel>,
        queue: &CommandQueue,
        command: &KernelCommand,
        name: &str,
        formatted_value: &FormattedValue,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        let unsupported = || KernelError::CommandNotSupported {
            command: CommandKind::SendValue,
            kernel: kernel.name().to_string(),
        };

        let declarer = kernel.value_declarer().ok_or_else(unsupported)?;
        let code = declarer
            .try_declare(name, formatted_value)
            .ok_or_else(unsupported)?;

        let submission = command
            .spawn_child(ctx.next_child_index(), CommandBody::SubmitCode { code })
            .suppress_internal_events();
        let view = ctx.for_command(&submission);
        queue.run(submission, view).await
    }

    fn resolve_name(&self, name: &str) -> KernelResult<(Arc<dyn Kernel>, CommandQueue)> {
        let state = self.inner.state.read().expect("composite state poisoned");
        state
            .children
            .iter()
            .find(|c| c.kernel.name() == name || c.aliases.iter().any(|a| a == name))
            .map(|c| (c.kernel.clone(), c.queue.clone()))
            .ok_or_else(|| KernelError::UnknownTargetKernel(name.to_string()))
    }

    // ── Helpers for directive actions ───────────────────────────────────

    /// Request a value from a source kernel and return its formatted form.
    /// The nested command's events stay internal.
    pub async fn request_value(
        &self,
        kernel_name: &str,
        name: &str,
        mime_type: Option<String>,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<FormattedValue> {
        let child = ctx
            .root_command()
            .spawn_child(
                ctx.next_child_index(),
                CommandBody::RequestValue {
                    name: name.to_string(),
                    mime_type,
                },
            )
            .suppress_internal_events();
        let token = child.token.clone();
        self.route_and_run(Some(kernel_name), child, ctx).await?;

        ctx.events_for(&token)
            .into_iter()
            .find_map(|event| match event.body {
                EventBody::ValueProduced {
                    formatted_value, ..
                } => Some(formatted_value),
                _ => None,
            })
            .ok_or_else(|| KernelError::ValueNotFound {
                name: name.to_string(),
                kernel: kernel_name.to_string(),
            })
    }

    /// Declare a value in a destination kernel via its value declarer.
    pub async fn send_value(
        &self,
        kernel_name: &str,
        name: &str,
        formatted_value: FormattedValue,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        let child = ctx
            .root_command()
            .spawn_child(
                ctx.next_child_index(),
                CommandBody::SendValue {
                    name: name.to_string(),
                    formatted_value,
                },
            )
            .suppress_internal_events();
        self.route_and_run(Some(kernel_name), child, ctx).await
    }

    /// List the values a kernel holds. The nested command's events stay
    /// internal; callers render the result themselves.
    pub async fn request_value_infos(
        &self,
        kernel_name: &str,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<Vec<ValueInfo>> {
        let child = ctx
            .root_command()
            .spawn_child(ctx.next_child_index(), CommandBody::RequestValueInfos)
            .suppress_internal_events();
        let token = child.token.clone();
        self.route_and_run(Some(kernel_name), child, ctx).await?;

        let infos = ctx
            .events_for(&token)
            .into_iter()
            .find_map(|event| match event.body {
                EventBody::ValueInfosProduced { value_infos } => Some(value_infos),
                _ => None,
            })
            .unwrap_or_default();
        Ok(infos)
    }
}

#[async_trait::async_trait]
impl Kernel for CompositeKernel {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn supported_commands(&self) -> std::collections::HashSet<CommandKind> {
        // The composite accepts everything and routes; what its children
        // support is checked per command at routing time.
        CommandKind::all().collect()
    }

    async fn handle(
        &self,
        command: KernelCommand,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        self.execute_command(&command, ctx).await
    }
}
