//! Transport plumbing for proxy kernels.
//!
//! A [`Connector`] is the local end of a command/event pipe: commands go out
//! as [`KernelCommandEnvelope`]s, events come back as
//! [`KernelEventEnvelope`]s. Two connectors exist here — an in-process pair
//! for tests and embeddings, and a stdio connector that spawns a child
//! process speaking newline-delimited JSON envelopes (what `kumi serve`
//! provides on the other side).

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};

use kumi_types::{
    CommandKind, EventBody, FormattedValue, KernelCommandEnvelope, KernelEvent,
    KernelEventEnvelope,
};

use crate::composite::CompositeKernel;
use crate::context::KernelInvocationContext;
use crate::directives::{
    DirectiveAction, DirectiveDefinition, DirectiveInvocation, DirectiveParameter,
};
use crate::kernel::{KernelError, KernelResult};
use crate::proxy::ProxyKernel;

/// The local end of a remote kernel connection.
pub struct Connector {
    /// Outbound command envelopes.
    pub commands: mpsc::Sender<KernelCommandEnvelope>,
    /// Inbound event envelopes.
    pub events: mpsc::Receiver<KernelEventEnvelope>,
}

/// The remote end of an in-process connection: what a hosted kernel tree
/// reads commands from and writes events to.
pub struct RemoteEndpoint {
    /// Inbound command envelopes.
    pub commands: mpsc::Receiver<KernelCommandEnvelope>,
    /// Outbound event envelopes.
    pub events: mpsc::Sender<KernelEventEnvelope>,
}

/// Create a connected in-process connector/endpoint pair.
pub fn in_process_pair() -> (Connector, RemoteEndpoint) {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(256);
    (
        Connector {
            commands: command_tx,
            events: event_rx,
        },
        RemoteEndpoint {
            commands: command_rx,
            events: event_tx,
        },
    )
}

/// Serve a composite kernel over an endpoint: announce readiness, then
/// execute one command at a time, echoing each command's events back in
/// order. Returns when the peer closes the command stream or sends `Quit`.
pub async fn serve_endpoint(
    composite: Arc<CompositeKernel>,
    mut endpoint: RemoteEndpoint,
) -> Result<()> {
    let ready = KernelEvent::new(
        kumi_types::CommandToken::new(),
        EventBody::KernelReady {
            kernel_names: composite.kernel_names(),
        },
    );
    endpoint
        .events
        .send(KernelEventEnvelope::new(&ready, None))
        .await
        .context("peer closed before ready")?;

    while let Some(envelope) = endpoint.commands.recv().await {
        let command = envelope.into_command();
        let is_quit = command.kind() == CommandKind::Quit;

        let ctx = composite.send_and_wait(command.clone()).await;
        for event in ctx.events() {
            // Echo the command envelope with the event's own token, so the
            // peer can tell expanded-command events (and their terminals)
            // apart from the root command's.
            let mut echo = KernelCommandEnvelope::from(&command);
            echo.token = Some(event.command.clone());
            let envelope = KernelEventEnvelope {
                body: event.body.clone(),
                command: Some(echo),
            };
            if endpoint.events.send(envelope).await.is_err() {
                return Ok(());
            }
        }

        if is_quit {
            break;
        }
    }

    Ok(())
}

/// Guard owning a connected child process. The child is killed when the
/// guard drops (the spawned command is configured with kill-on-drop).
pub struct StdioChildGuard {
    _child: Child,
}

/// Spawn `program args...` and connect to it over stdio.
///
/// The child must emit a `KernelReady` event envelope before anything else;
/// a child that exits first aborts the connect with an error (this is the
/// one fatal path — after ready, transport problems degrade to failed
/// commands).
pub async fn connect_stdio(program: &str, args: &[String]) -> Result<(Connector, StdioChildGuard)> {
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning '{program}'"))?;

    let mut stdin = child.stdin.take().context("child stdin unavailable")?;
    let stdout = child.stdout.take().context("child stdout unavailable")?;

    let (command_tx, mut command_rx) = mpsc::channel::<KernelCommandEnvelope>(64);
    let (event_tx, event_rx) = mpsc::channel::<KernelEventEnvelope>(256);
    let (ready_tx, ready_rx) = oneshot::channel::<()>();

    // Writer: serialize outbound commands, one JSON envelope per line.
    tokio::spawn(async move {
        while let Some(envelope) = command_rx.recv().await {
            let mut line = envelope.to_json();
            line.push('\n');
            if stdin.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdin.flush().await.is_err() {
                break;
            }
        }
    });

    // Reader: decode inbound events; the first KernelReady releases the
    // connect call, everything after is forwarded.
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut ready = Some(ready_tx);
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            match KernelEventEnvelope::from_json(&line) {
                Ok(envelope) => {
                    if matches!(envelope.body, EventBody::KernelReady { .. }) {
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(());
                            continue;
                        }
                    }
                    if event_tx.send(envelope).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("discarding undecodable event line: {e}");
                }
            }
        }
    });

    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => bail!("'{program}' exited before reporting ready ({status})"),
                Err(e) => bail!("'{program}' failed before reporting ready: {e}"),
            }
        }
        ready = ready_rx => {
            ready.context("connection closed before reporting ready")?;
        }
    }

    Ok((
        Connector {
            commands: command_tx,
            events: event_rx,
        },
        StdioChildGuard { _child: child },
    ))
}

/// `#!connect --kernel-name <n> --command "<program args...>"`
///
/// Spawns the program, waits for its ready event, wraps it in a
/// [`ProxyKernel`], and adds it to the composite. The new kernel is routable
/// only for commands dispatched after the add completes.
pub struct ConnectDirective;

#[async_trait]
impl DirectiveAction for ConnectDirective {
    async fn run(
        &self,
        invocation: &DirectiveInvocation,
        composite: &CompositeKernel,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        let kernel_name = invocation
            .arguments
            .get_literal("kernel-name")
            .ok_or_else(|| KernelError::Directive("'#!connect' requires --kernel-name".into()))?
            .to_string();
        let command_line = invocation
            .arguments
            .get_literal("command")
            .ok_or_else(|| KernelError::Directive("'#!connect' requires --command".into()))?;

        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| KernelError::Directive("'#!connect' --command is empty".into()))?
            .to_string();
        let args: Vec<String> = parts.map(str::to_string).collect();

        let (connector, guard) = connect_stdio(&program, &args)
            .await
            .map_err(KernelError::Other)?;

        let proxy = ProxyKernel::new(&kernel_name, connector);
        proxy.start()?;
        proxy.retain_resource(Box::new(guard));
        composite.add_kernel(Arc::new(proxy), &[])?;

        ctx.publish(EventBody::DisplayedValueProduced {
            formatted_value: FormattedValue::plain(format!(
                "Kernel '{kernel_name}' connected"
            )),
            value_id: None,
        });
        Ok(())
    }
}

/// The `#!connect` grammar entry.
pub fn connect_directive() -> DirectiveDefinition {
    DirectiveDefinition::new("connect", "connect a remote kernel over stdio")
        .with_parameter(
            DirectiveParameter::required("kernel-name", "name for the proxied kernel")
                .with_implicit_name(),
        )
        .with_parameter(DirectiveParameter::required(
            "command",
            "program (and arguments) hosting the remote kernel",
        ))
        .with_action(Arc::new(ConnectDirective))
}
