//! Per-kernel command queues.
//!
//! Each child kernel gets a dedicated worker task fed by an unbounded
//! channel. The worker runs one command at a time, which is the ordering
//! guarantee: handlers for the same kernel never interleave, while workers
//! for different kernels run concurrently. The queue is the de facto lock
//! around a kernel's state — there is no other mutex.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use kumi_types::KernelCommand;

use crate::context::KernelInvocationContext;
use crate::kernel::{Kernel, KernelError, KernelResult};

struct Work {
    command: KernelCommand,
    ctx: KernelInvocationContext,
    done: oneshot::Sender<KernelResult<()>>,
}

/// Handle to one kernel's worker task.
#[derive(Clone)]
pub(crate) struct CommandQueue {
    tx: mpsc::UnboundedSender<Work>,
}

impl CommandQueue {
    /// Spawn the worker for `kernel` and return its queue handle.
    pub fn start(kernel: Arc<dyn Kernel>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Work>();

        tokio::spawn(async move {
            while let Some(work) = rx.recv().await {
                let Work { command, ctx, done } = work;
                let token = ctx.cancellation_token();

                let result = if token.is_cancelled() {
                    Err(KernelError::Cancelled)
                } else {
                    // The handler future is abandoned at its next suspension
                    // point once cancellation fires; handlers that never
                    // yield run to completion (best-effort, not preemptive).
                    tokio::select! {
                        biased;
                        result = kernel.handle(command, &ctx) => result,
                        _ = token.cancelled() => Err(KernelError::Cancelled),
                    }
                };

                // Receiver gone means the submission was abandoned; nothing
                // left to notify.
                let _ = done.send(result);
            }
        });

        Self { tx }
    }

    /// Enqueue one command and wait for the handler's result.
    ///
    /// Waiting here is what serializes commands per kernel: the caller only
    /// observes completion when the worker has finished this command, and
    /// the worker takes the next one only after that.
    pub async fn run(
        &self,
        command: KernelCommand,
        ctx: KernelInvocationContext,
    ) -> KernelResult<()> {
        let (done, result) = oneshot::channel();
        self.tx
            .send(Work { command, ctx, done })
            .map_err(|_| KernelError::Execution("kernel worker stopped".into()))?;
        result
            .await
            .map_err(|_| KernelError::Execution("kernel worker dropped the command".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kumi_types::{CommandKind, EventBody};
    use std::collections::HashSet;
    use std::time::Duration;

    struct SlowFirstKernel;

    #[async_trait]
    impl Kernel for SlowFirstKernel {
        fn name(&self) -> &str {
            "slow"
        }

        fn supported_commands(&self) -> HashSet<CommandKind> {
            [CommandKind::SubmitCode].into_iter().collect()
        }

        async fn handle(
            &self,
            command: KernelCommand,
            ctx: &KernelInvocationContext,
        ) -> KernelResult<()> {
            if let kumi_types::CommandBody::SubmitCode { code } = &command.body {
                if code == "slow" {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                ctx.publish(EventBody::DisplayedValueProduced {
                    formatted_value: kumi_types::FormattedValue::plain(code.clone()),
                    value_id: None,
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn commands_for_one_kernel_run_in_order() {
        let queue = CommandQueue::start(Arc::new(SlowFirstKernel));
        let first = KernelCommand::submit_code("slow");
        let second = KernelCommand::submit_code("fast");
        let ctx = KernelInvocationContext::new(first.clone());

        let q1 = queue.clone();
        let ctx1 = ctx.for_command(&first);
        let t1 = tokio::spawn(async move { q1.run(first, ctx1).await });
        // Give the first command a head start into its sleep.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let q2 = queue.clone();
        let ctx2 = ctx.for_command(&second);
        let t2 = tokio::spawn(async move { q2.run(second, ctx2).await });

        t1.await.unwrap().unwrap();
        t2.await.unwrap().unwrap();

        let outputs: Vec<_> = ctx
            .events()
            .into_iter()
            .filter_map(|e| match e.body {
                EventBody::DisplayedValueProduced { formatted_value, .. } => {
                    Some(formatted_value.value)
                }
                _ => None,
            })
            .collect();
        assert_eq!(outputs, vec!["slow".to_string(), "fast".to_string()]);
    }
}
