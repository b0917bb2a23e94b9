//! Embedded client for direct in-process kernel access.
//!
//! Wraps a `CompositeKernel` and implements `KernelClient`, giving embedders
//! and tests the same surface a remote front-end gets, without a transport.

use std::sync::Arc;

use async_trait::async_trait;

use kumi_kernel::CompositeKernel;
use kumi_types::{CommandBody, EventBody, FormattedValue, KernelCommand, KernelEvent, ValueInfo};

use crate::traits::{ClientError, ClientResult, KernelClient};

/// A client that drives a composite kernel in the same process.
pub struct EmbeddedClient {
    composite: Arc<CompositeKernel>,
}

impl EmbeddedClient {
    /// Wrap an existing composite.
    pub fn new(composite: Arc<CompositeKernel>) -> Self {
        Self { composite }
    }

    /// The underlying composite.
    pub fn composite(&self) -> &Arc<CompositeKernel> {
        &self.composite
    }

    async fn run(&self, command: KernelCommand) -> Vec<KernelEvent> {
        let ctx = self.composite.send_and_wait(command).await;
        ctx.events()
    }
}

#[async_trait]
impl KernelClient for EmbeddedClient {
    async fn submit(&self, code: &str) -> ClientResult<Vec<KernelEvent>> {
        Ok(self.run(KernelCommand::submit_code(code)).await)
    }

    async fn request_value(&self, kernel: &str, name: &str) -> ClientResult<FormattedValue> {
        let command = KernelCommand::new(CommandBody::RequestValue {
            name: name.to_string(),
            mime_type: None,
        })
        .with_target(kernel);
        let events = self.run(command).await;

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
        let events = self.run(command).await;

        for event in &events {
            if let EventBody::ValueInfosProduced { value_infos } = &event.body {
                return Ok(value_infos.clone());
            }
        }
        Err(first_failure(&events))
    }

    async fn cancel(&self) -> ClientResult<()> {
        self.run(KernelCommand::new(CommandBody::Cancel)).await;
        Ok(())
    }

    async fn quit(&self) -> ClientResult<()> {
        self.run(KernelCommand::new(CommandBody::Quit)).await;
        Ok(())
    }
}

/// The failure to report when an expected payload event never arrived.
pub(crate) fn first_failure(events: &[KernelEvent]) -> ClientError {
    for event in events {
        if let EventBody::CommandFailed { message, .. } = &event.body {
            return ClientError::CommandFailed(message.clone());
        }
    }
    ClientError::CommandFailed("kernel produced no result".into())
}
