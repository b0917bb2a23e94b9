//! kumi CLI entry point.
//!
//! Usage:
//!   kumi                       # Interactive REPL
//!   kumi -c <cell>             # Execute one cell and exit
//!   kumi <file>                # Run a file as one submission
//!   kumi serve                 # Host a kernel tree over stdio envelopes

use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kumi_repl::format::format_events;
use kumi_types::KernelCommand;

fn main() -> ExitCode {
    // Initialize tracing (respects RUST_LOG env var). Diagnostics go to
    // stderr so the stdout envelope stream of `serve` stays clean.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        None => {
            kumi_repl::run()?;
            Ok(ExitCode::SUCCESS)
        }

        Some("--help" | "-h") => {
            print_help();
            Ok(ExitCode::SUCCESS)
        }

        Some("--version" | "-V") => {
            println!("kumi {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }

        Some("-c") => {
            let cell = args.get(2).context("-c requires a cell argument")?;
            run_cell(cell)
        }

        Some("serve") => {
            let runtime = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
            runtime.block_on(kumi_repl::serve())?;
            Ok(ExitCode::SUCCESS)
        }

        Some(path) if !path.starts_with('-') => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("reading '{path}'"))?;
            run_cell(&source)
        }

        Some(unknown) => {
            eprintln!("Unknown option: {unknown}");
            eprintln!("Run 'kumi --help' for usage.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_cell(cell: &str) -> Result<ExitCode> {
    let runtime = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
    runtime.block_on(async {
        let composite = kumi_repl::build_default_composite()?;
        let ctx = composite
            .send_and_wait(KernelCommand::submit_code(cell))
            .await;
        let events = ctx.events();
        let rendered = format_events(&events);
        if !rendered.is_empty() {
            println!("{rendered}");
        }
        let failed = events.iter().any(|e| {
            matches!(e.body, kumi_types::EventBody::CommandFailed { .. })
        });
        Ok(if failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        })
    })
}

fn print_help() {
    println!(
        r#"kumi v{} — polyglot notebook kernel host

Usage:
  kumi                         Interactive REPL
  kumi -c <cell>               Execute one cell and exit
  kumi <file>                  Run a file as one submission
  kumi serve                   Host a kernel tree over stdio envelopes

Options:
  -h, --help                   Show this help
  -V, --version                Show version

Examples:
  kumi -c 'x = 42'             # store a value in the value kernel
  kumi serve                   # envelope host for #!connect / StdioClient
"#,
        env!("CARGO_PKG_VERSION")
    );
}
