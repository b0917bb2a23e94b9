//! kumi REPL — interactive front-end and stdio host for a composite kernel.
//!
//! The REPL reads cells (a line, or a `#!`-introduced multi-line block
//! finished with an empty line), sends them through the composite, and
//! renders the resulting events. Meta-commands: `/help`, `/quit`,
//! `/kernels`, `/tree`.

pub mod format;

use std::sync::Arc;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use kumi_kernel::connection::{serve_endpoint, RemoteEndpoint};
use kumi_kernel::parsing::sexpr::format_tree;
use kumi_kernel::{install_standard_directives, CompositeKernel, ValueStoreKernel};
use kumi_types::{KernelCommand, KernelCommandEnvelope, KernelEventEnvelope};

use crate::format::format_events;

/// Build the default kernel tree: a composite with the `value` store kernel
/// and the standard directives. Language kernels attach via `#!connect`.
///
/// Must be called inside a tokio runtime (child queues are spawned tasks).
pub fn build_default_composite() -> Result<Arc<CompositeKernel>> {
    let composite = Arc::new(CompositeKernel::new("kumi"));
    composite
        .add_kernel(Arc::new(ValueStoreKernel::new()), &["val"])
        .context("adding the value kernel")?;
    composite
        .set_default_kernel_name("value")
        .context("choosing the default kernel")?;
    install_standard_directives(&composite);
    Ok(composite)
}

/// Result from meta-command handling.
enum MetaResult {
    /// Continue with optional output.
    Continue(Option<String>),
    /// Exit the REPL.
    Exit,
}

/// REPL state: the kernel tree and the runtime that drives it.
pub struct Repl {
    composite: Arc<CompositeKernel>,
    runtime: Runtime,
    show_tree: bool,
}

impl Repl {
    /// Create a REPL over the default kernel tree.
    pub fn new() -> Result<Self> {
        let runtime = Runtime::new().context("creating tokio runtime")?;
        let composite = runtime.block_on(async { build_default_composite() })?;

        // `@input:` prompts read a line from the terminal.
        composite.set_input_handler(|prompt: String| async move {
            tokio::task::spawn_blocking(move || {
                use std::io::Write;
                let mut stdout = std::io::stdout();
                let _ = write!(stdout, "{prompt}: ");
                let _ = stdout.flush();
                let mut line = String::new();
                std::io::stdin()
                    .read_line(&mut line)
                    .map_err(|e| e.to_string())?;
                Ok(line.trim_end_matches(['\r', '\n']).to_string())
            })
            .await
            .map_err(|e| e.to_string())?
        });

        Ok(Self {
            composite,
            runtime,
            show_tree: false,
        })
    }

    /// Process one submitted cell; returns output to display, if any.
    pub fn process_cell(&mut self, cell: &str) -> Result<Option<String>> {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        if trimmed.starts_with('/') {
            return match self.handle_meta_command(trimmed) {
                MetaResult::Continue(output) => Ok(output),
                MetaResult::Exit => Err(anyhow::anyhow!("__REPL_EXIT__")),
            };
        }

        if self.show_tree {
            let config = self.composite.parser_configuration();
            let tree = kumi_kernel::parsing::parse(cell, None, &config);
            return Ok(Some(format_tree(&tree)));
        }

        let events = self.runtime.block_on(async {
            let ctx = self
                .composite
                .send_and_wait(KernelCommand::submit_code(cell))
                .await;
            ctx.events()
        });

        let rendered = format_events(&events);
        Ok(if rendered.is_empty() { None } else { Some(rendered) })
    }

    fn handle_meta_command(&mut self, command: &str) -> MetaResult {
        match command.split_whitespace().next().unwrap_or("") {
            "/quit" | "/q" | "/exit" => MetaResult::Exit,
            "/help" | "/h" | "/?" => MetaResult::Continue(Some(HELP_TEXT.to_string())),
            "/kernels" => {
                let names = self.composite.kernel_names();
                let default = self.composite.default_kernel_name().unwrap_or_default();
                let listing = names
                    .iter()
                    .map(|n| {
                        if *n == default {
                            format!("{n} (default)")
                        } else {
                            n.clone()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                MetaResult::Continue(Some(format!("Kernels: {listing}")))
            }
            "/tree" => {
                self.show_tree = !self.show_tree;
                MetaResult::Continue(Some(format!(
                    "tree mode: {}",
                    if self.show_tree { "ON" } else { "OFF" }
                )))
            }
            unknown => MetaResult::Continue(Some(format!(
                "Unknown meta-command: {unknown} (try /help)"
            ))),
        }
    }
}

const HELP_TEXT: &str = r#"kumi — polyglot kernel REPL

Cells:
  <code>                      Submit to the default kernel
  #!<kernel>                  Switch language for the rest of the cell
  #!set --name X --value V    Declare a value in the current kernel
  #!share --from K X          Share a value from kernel K
  #!who | #!whos              List values in the current kernel
  #!connect N --command "C"   Attach a remote kernel over stdio

A cell starting with #! continues until an empty line.

Meta-commands:
  /help     This help
  /kernels  List attached kernels
  /tree     Toggle parse-tree display
  /quit     Exit
"#;

/// Run the interactive REPL until exit.
pub fn run() -> Result<()> {
    let mut repl = Repl::new()?;
    let mut editor: Editor<(), DefaultHistory> =
        Editor::new().context("initializing line editor")?;

    println!("kumi {} — /help for help", env!("CARGO_PKG_VERSION"));

    loop {
        match editor.readline("kumi> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());

                // Multi-line cell: a directive opener keeps reading until an
                // empty line, so `#!value` + assignments arrive as one cell.
                let mut cell = line.clone();
                if line.trim_start().starts_with("#!") {
                    loop {
                        match editor.readline("  ... ") {
                            Ok(next) if next.trim().is_empty() => break,
                            Ok(next) => {
                                cell.push('\n');
                                cell.push_str(&next);
                            }
                            Err(_) => break,
                        }
                    }
                }

                match repl.process_cell(&cell) {
                    Ok(Some(output)) => println!("{output}"),
                    Ok(None) => {}
                    Err(e) if e.to_string() == "__REPL_EXIT__" => break,
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {e}");
                break;
            }
        }
    }

    Ok(())
}

/// Host the default kernel tree on stdin/stdout: one JSON command envelope
/// per input line, one JSON event envelope per output line. This is the
/// other side of `#!connect ... --command "kumi serve"`.
pub async fn serve() -> Result<()> {
    let composite = build_default_composite()?;

    let (command_tx, command_rx) = mpsc::channel::<KernelCommandEnvelope>(64);
    let (event_tx, mut event_rx) = mpsc::channel::<KernelEventEnvelope>(256);

    // stdin → command envelopes
    tokio::spawn(async move {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            match KernelCommandEnvelope::from_json(&line) {
                Ok(envelope) => {
                    if command_tx.send(envelope).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("discarding undecodable command line: {e}"),
            }
        }
    });

    // event envelopes → stdout
    let writer = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        let mut stdout = tokio::io::stdout();
        while let Some(envelope) = event_rx.recv().await {
            let mut line = envelope.to_json();
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    serve_endpoint(
        composite,
        RemoteEndpoint {
            commands: command_rx,
            events: event_tx,
        },
    )
    .await?;

    // The endpoint (and its event sender) is gone; the writer drains what is
    // left and exits on channel close.
    let _ = writer.await;
    Ok(())
}
