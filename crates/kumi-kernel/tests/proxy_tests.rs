//! Proxy kernel tests: single-start, forwarding, event replay, token
//! matching, and cross-token interleaving.

use std::sync::Arc;

use kumi_kernel::connection::{in_process_pair, serve_endpoint, RemoteEndpoint};
use kumi_kernel::{
    install_standard_directives, CompositeKernel, KernelError, KernelInvocationContext,
    ProxyKernel, ValueStoreKernel,
};
use kumi_kernel::Kernel;
use kumi_types::{
    CommandBody, EventBody, KernelCommand, KernelCommandEnvelope, KernelEventEnvelope,
};

/// Host a fresh value-kernel composite behind an in-process endpoint.
fn host_remote(endpoint: RemoteEndpoint) {
    tokio::spawn(async move {
        let composite = Arc::new(CompositeKernel::new("remote-host"));
        composite
            .add_kernel(Arc::new(ValueStoreKernel::new()), &[])
            .unwrap();
        install_standard_directives(&composite);
        serve_endpoint(composite, endpoint).await.unwrap();
    });
}

#[tokio::test]
async fn starting_twice_is_an_error() {
    let (connector, _endpoint) = in_process_pair();
    let proxy = ProxyKernel::new("remote", connector);

    proxy.start().unwrap();
    let err = proxy.start().unwrap_err();

    assert!(matches!(err, KernelError::AlreadyStarted(_)));
    assert!(err.to_string().contains("already started"));
    assert!(err.to_string().contains("remote"));
}

#[tokio::test]
async fn commands_forward_and_events_replay_in_order() {
    let (connector, endpoint) = in_process_pair();
    host_remote(endpoint);

    let local = Arc::new(CompositeKernel::new("local"));
    let proxy = ProxyKernel::new("remote", connector);
    proxy.start().unwrap();
    local.add_kernel(Arc::new(proxy), &[]).unwrap();

    // Store a value through the proxy...
    let ctx = local
        .send_and_wait(KernelCommand::submit_code("x = [1, 2]").with_target("remote"))
        .await;
    assert!(ctx.wait_for_completion().await.is_success());

    // ...and read it back; the remote ValueProduced must replay locally.
    let ctx = local
        .send_and_wait(
            KernelCommand::new(CommandBody::RequestValue {
                name: "x".into(),
                mime_type: None,
            })
            .with_target("remote"),
        )
        .await;

    assert!(ctx.wait_for_completion().await.is_success());
    let produced = ctx.events().into_iter().find_map(|e| match e.body {
        EventBody::ValueProduced {
            name,
            formatted_value,
        } => Some((name, formatted_value.value)),
        _ => None,
    });
    assert_eq!(produced, Some(("x".to_string(), "[1, 2]".to_string())));
}

#[tokio::test]
async fn selector_directive_routes_through_the_proxy() {
    let (connector, endpoint) = in_process_pair();
    host_remote(endpoint);

    let local = Arc::new(CompositeKernel::new("local"));
    let scratch = Arc::new(ValueStoreKernel::named("scratch"));
    local.add_kernel(scratch, &[]).unwrap();
    let proxy = ProxyKernel::new("remote", connector);
    proxy.start().unwrap();
    local.add_kernel(Arc::new(proxy), &[]).unwrap();

    let ctx = local
        .send_and_wait(KernelCommand::submit_code("#!remote\ngreeting = hello\ngreeting"))
        .await;

    assert!(ctx.wait_for_completion().await.is_success());
    // The remote kernel's return value replayed into the local stream.
    assert!(ctx.events().iter().any(|e| matches!(
        &e.body,
        EventBody::ReturnValueProduced { formatted_value } if formatted_value.value == "hello"
    )));
}

#[tokio::test]
async fn remote_failures_become_local_command_failed() {
    let (connector, endpoint) = in_process_pair();
    host_remote(endpoint);

    let local = Arc::new(CompositeKernel::new("local"));
    let proxy = ProxyKernel::new("remote", connector);
    proxy.start().unwrap();
    local.add_kernel(Arc::new(proxy), &[]).unwrap();

    let ctx = local
        .send_and_wait(
            KernelCommand::new(CommandBody::RequestValue {
                name: "missing".into(),
                mime_type: None,
            })
            .with_target("remote"),
        )
        .await;

    match ctx.wait_for_completion().await {
        kumi_kernel::CommandOutcome::Failed { message, cancelled } => {
            assert!(!cancelled);
            assert!(message.contains("missing"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn events_with_unknown_tokens_are_dropped_not_fatal() {
    let (connector, mut endpoint) = in_process_pair();
    let proxy = Arc::new(ProxyKernel::new("remote", connector));
    proxy.start().unwrap();

    // A hand-rolled remote: sends a stray event for a token nobody sent,
    // then answers the real command.
    tokio::spawn(async move {
        let envelope = endpoint.commands.recv().await.unwrap();
        let real = envelope.into_command();

        let stray_command = KernelCommand::submit_code("phantom");
        let stray = KernelEventEnvelope {
            body: EventBody::DisplayedValueProduced {
                formatted_value: kumi_types::FormattedValue::plain("stray"),
                value_id: None,
            },
            command: Some(KernelCommandEnvelope::from(&stray_command)),
        };
        endpoint.events.send(stray).await.unwrap();

        let reply = KernelEventEnvelope {
            body: EventBody::DisplayedValueProduced {
                formatted_value: kumi_types::FormattedValue::plain("real"),
                value_id: None,
            },
            command: Some(KernelCommandEnvelope::from(&real)),
        };
        endpoint.events.send(reply).await.unwrap();

        let done = KernelEventEnvelope {
            body: EventBody::CommandSucceeded,
            command: Some(KernelCommandEnvelope::from(&real)),
        };
        endpoint.events.send(done).await.unwrap();
    });

    let command = KernelCommand::submit_code("hello");
    let ctx = KernelInvocationContext::new(command.clone());
    proxy.handle(command, &ctx).await.unwrap();

    let displayed: Vec<_> = ctx
        .events()
        .into_iter()
        .filter_map(|e| match e.body {
            EventBody::DisplayedValueProduced { formatted_value, .. } => Some(formatted_value.value),
            _ => None,
        })
        .collect();
    assert_eq!(displayed, vec!["real".to_string()]);
}

#[tokio::test]
async fn commands_with_distinct_tokens_interleave() {
    let (connector, mut endpoint) = in_process_pair();
    let proxy = Arc::new(ProxyKernel::new("remote", connector));
    proxy.start().unwrap();

    // Remote that answers the SECOND command first.
    tokio::spawn(async move {
        let first = endpoint.commands.recv().await.unwrap().into_command();
        let second = endpoint.commands.recv().await.unwrap().into_command();

        for command in [&second, &first] {
            let done = KernelEventEnvelope {
                body: EventBody::CommandSucceeded,
                command: Some(KernelCommandEnvelope::from(command)),
            };
            endpoint.events.send(done).await.unwrap();
        }
    });

    let a = KernelCommand::submit_code("a");
    let b = KernelCommand::submit_code("b");
    let ctx_a = KernelInvocationContext::new(a.clone());
    let ctx_b = KernelInvocationContext::new(b.clone());

    let proxy_a = proxy.clone();
    let task_a = tokio::spawn(async move { proxy_a.handle(a, &ctx_a).await });
    // Make sure `a` is sent first.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let proxy_b = proxy.clone();
    let task_b = tokio::spawn(async move { proxy_b.handle(b, &ctx_b).await });

    task_a.await.unwrap().unwrap();
    task_b.await.unwrap().unwrap();
}
