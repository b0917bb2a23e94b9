//! Endpoint hosting tests: ready announcement, envelope echo, quit.

use std::sync::Arc;

use kumi_kernel::connection::{in_process_pair, serve_endpoint};
use kumi_kernel::{install_standard_directives, CompositeKernel, ValueStoreKernel};
use kumi_types::{CommandBody, EventBody, KernelCommand, KernelCommandEnvelope};

fn hosted() -> (
    tokio::sync::mpsc::Sender<KernelCommandEnvelope>,
    tokio::sync::mpsc::Receiver<kumi_types::KernelEventEnvelope>,
    tokio::task::JoinHandle<()>,
) {
    let (connector, endpoint) = in_process_pair();
    let handle = tokio::spawn(async move {
        let composite = Arc::new(CompositeKernel::new("host"));
        composite
            .add_kernel(Arc::new(ValueStoreKernel::new()), &[])
            .unwrap();
        install_standard_directives(&composite);
        serve_endpoint(composite, endpoint).await.unwrap();
    });
    (connector.commands, connector.events, handle)
}

#[tokio::test]
async fn ready_is_announced_before_anything_else() {
    let (_commands, mut events, _handle) = hosted();
    let first = events.recv().await.unwrap();
    assert!(matches!(
        first.body,
        EventBody::KernelReady { ref kernel_names } if kernel_names == &vec!["value".to_string()]
    ));
}

#[tokio::test]
async fn events_echo_the_originating_command() {
    let (commands, mut events, _handle) = hosted();
    // Skip the ready event.
    events.recv().await.unwrap();

    let command = KernelCommand::submit_code("x = 1");
    commands
        .send(KernelCommandEnvelope::from(&command))
        .await
        .unwrap();

    // Every echoed envelope carries a token under the root command's.
    loop {
        let envelope = events.recv().await.unwrap();
        let token = envelope.command_token().unwrap().clone();
        assert!(command.token.contains(&token));
        if envelope.body.is_terminal() && token == command.token {
            assert!(matches!(envelope.body, EventBody::CommandSucceeded));
            break;
        }
    }
}

#[tokio::test]
async fn quit_ends_the_serve_loop() {
    let (commands, mut events, handle) = hosted();
    events.recv().await.unwrap();

    let quit = KernelCommand::new(CommandBody::Quit);
    commands.send(KernelCommandEnvelope::from(&quit)).await.unwrap();

    // Drain until the host hangs up.
    while events.recv().await.is_some() {}
    handle.await.unwrap();
}
