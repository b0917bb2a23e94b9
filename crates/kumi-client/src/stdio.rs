//! Client for a kernel host reachable over stdio.
//!
//! Spawns `kumi serve` (or any compatible host), speaks newline-delimited
//! JSON envelopes, and matches events back to commands by correlation token.

use tokio::sync::{mpsc, Mutex};

use kumi_kernel::connection::{connect_stdio, StdioChildGuard};
use kumi_types::{
    CommandBody, EventBody, FormattedValue, KernelCommand, KernelCommandEnvelope, KernelEvent,
    KernelEventEnvelope, ValueInfo,
};

use async_trait::async_trait;

use crate::embedded::first_failure;
use crate::traits::{ClientError, ClientResult, KernelClient};

/// A client connected to a child-process kernel host.
pub struct StdioClient {
    commands: mpsc::Sender<KernelCommandEnvelope>,
    events: Mutex<mpsc::Receiver<KernelEventEnvelope>>,
    _guard: StdioChildGuard,
}

impl StdioClient {
    /// Spawn `program args...` and wait for its ready event.
    pub async fn connect(program: &str, args: &[String]) -> ClientResult<Self> {
        let (connector, guard) = connect_stdio(program, args).await?;
        Ok(Self {
            commands: connector.commands,
            events: Mutex::new(connector.events),
            _guard: guard,
        })
    }

    /// Send one command and collect its events through the terminal one.
    ///
    /// The receiver lock is taken before sending, so concurrent callers
    /// fully serialize and never steal each other's events.
    async fn run(&self, command: KernelCommand) -> ClientResult<Vec<KernelEvent>> {
        let mut receiver = self.events.lock().await;
        self.commands
            .send(KernelCommandEnvelope::from(&command))
            .await
            .map_err(|_| ClientError::Connection("host closed its command stream".into()))?;

        let mut events = Vec::new();
        loop {
            let Some(envelope) = receiver.recv().await else {
                return Err(ClientError::Connection("host closed its event stream".into()));
            };
            let event = envelope.into_event(&command.token);
            let terminal = event.is_terminal() && event.command == command.token;
            events.push(event);
            if terminal {
                return Ok(events);
            }
        }
    }
}

#[async_trait]
impl KernelClient for StdioClient {
    async fn submit(&self, code: &str) -> ClientResult<Vec<KernelEvent>> {
        self.run(KernelCommand::submit_code(code)).await
    }

    async fn request_value(&self, kernel: &str, name: &str) -> ClientResult<FormattedValue> {
        let command = KernelCommand::new(CommandBody::RequestValue {
            name: name.to_string(),
            mime_type: None,
        })
        .with_target(kernel);
        let events = self.run(command).await?;

        for event in &events {
            if let EventBody::ValueProduced {
                formatted_value, ..
            } = &event.body
            {
                return Ok(formatted_value.clone());
            }
        }
        Err(first_failure(&events))
    }

    async fn request_value_infos(&self, kernel: &str) -> ClientResult<Vec<ValueInfo>> {
        let command = KernelCommand::new(CommandBody::RequestValueInfos).with_target(kernel);
        let events = self.run(command).await?;

        for event in &events {
            if let EventBody::ValueInfosProduced { value_infos } = &event.body {
                return Ok(value_infos.clone());
            }
        }
        Err(first_failure(&events))
    }

    async fn cancel(&self) -> ClientResult<()> {
        self.run(KernelCommand::new(CommandBody::Cancel)).await?;
        Ok(())
    }

    async fn quit(&self) -> ClientResult<()> {
        self.run(KernelCommand::new(CommandBody::Quit)).await?;
        Ok(())
    }
}
