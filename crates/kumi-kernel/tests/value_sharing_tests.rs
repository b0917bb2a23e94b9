//! Value sharing tests: `#!set`, `#!share`, `#!who`, declarer-mediated
//! `SendValue`, and the failure paths.

use std::sync::Arc;

use kumi_kernel::{install_standard_directives, CompositeKernel, ValueStoreKernel};
use kumi_testutil::{displayed_values, failed_with, FakeKernel};
use kumi_types::{mime, CommandBody, EventBody, FormattedValue, KernelCommand};

/// A composite with two value-store kernels, default `value`.
fn stores() -> (
    Arc<CompositeKernel>,
    Arc<ValueStoreKernel>,
    Arc<ValueStoreKernel>,
) {
    let composite = Arc::new(CompositeKernel::new("kumi"));
    let value = Arc::new(ValueStoreKernel::new());
    let scratch = Arc::new(ValueStoreKernel::named("scratch"));
    composite.add_kernel(value.clone(), &[]).unwrap();
    composite.add_kernel(scratch.clone(), &[]).unwrap();
    composite.set_default_kernel_name("value").unwrap();
    install_standard_directives(&composite);
    (composite, value, scratch)
}

#[tokio::test]
async fn set_declares_a_literal_in_the_current_kernel() {
    let (composite, value, _) = stores();

    let ctx = composite
        .send_and_wait(KernelCommand::submit_code("#!set --name count --value 42"))
        .await;
    assert!(ctx.wait_for_completion().await.is_success());

    let stored = value.get("count").await.unwrap();
    assert_eq!(stored.mime_type, mime::JSON);
    assert_eq!(stored.value, "42");
}

#[tokio::test]
async fn set_reads_from_another_kernel_via_expression() {
    let (composite, value, _) = stores();

    composite
        .send_and_wait(KernelCommand::submit_code("#!scratch\ntotal = [1, 2, 3]"))
        .await;

    let ctx = composite
        .send_and_wait(KernelCommand::submit_code(
            "#!set --name copy --value @scratch:total",
        ))
        .await;
    assert!(ctx.wait_for_completion().await.is_success());

    let stored = value.get("copy").await.unwrap();
    assert_eq!(stored.value, "[1, 2, 3]");
}

#[tokio::test]
async fn set_with_input_expression_uses_the_input_handler() {
    let (composite, value, _) = stores();
    composite.set_input_handler(|prompt: String| async move {
        assert_eq!(prompt, "Favorite color");
        Ok("blue".to_string())
    });

    let ctx = composite
        .send_and_wait(KernelCommand::submit_code(
            "#!set --name color --value @input:\"Favorite color\"",
        ))
        .await;
    assert!(ctx.wait_for_completion().await.is_success());

    assert_eq!(value.get("color").await.unwrap().value, "blue");
}

#[tokio::test]
async fn set_without_input_handler_fails() {
    let (composite, _, _) = stores();
    let ctx = composite
        .send_and_wait(KernelCommand::submit_code(
            "#!set --name color --value @input:anything",
        ))
        .await;
    assert!(failed_with(&ctx.events(), "no input handler"));
}

#[tokio::test]
async fn share_moves_a_value_between_kernels() {
    let (composite, value, _) = stores();

    composite
        .send_and_wait(KernelCommand::submit_code("#!scratch\nx = 5"))
        .await;
    let ctx = composite
        .send_and_wait(KernelCommand::submit_code("#!share --from scratch x"))
        .await;
    assert!(ctx.wait_for_completion().await.is_success());

    assert_eq!(value.get("x").await.unwrap().value, "5");
}

#[tokio::test]
async fn share_renames_with_as() {
    let (composite, value, _) = stores();

    composite
        .send_and_wait(KernelCommand::submit_code("#!scratch\nx = 5"))
        .await;
    composite
        .send_and_wait(KernelCommand::submit_code(
            "#!share --from scratch x --as imported",
        ))
        .await;

    assert!(value.get("x").await.is_none());
    assert_eq!(value.get("imported").await.unwrap().value, "5");
}

#[tokio::test]
async fn share_of_a_missing_value_fails_the_submission() {
    let (composite, value, _) = stores();

    let ctx = composite
        .send_and_wait(KernelCommand::submit_code("#!share --from scratch nope"))
        .await;

    assert!(failed_with(&ctx.events(), "nope"));
    assert!(value.get("nope").await.is_none());
}

#[tokio::test]
async fn send_value_to_a_kernel_without_declarer_is_unsupported() {
    let composite = Arc::new(CompositeKernel::new("kumi"));
    composite
        .add_kernel(Arc::new(FakeKernel::new("mute")), &[])
        .unwrap();

    let command = KernelCommand::new(CommandBody::SendValue {
        name: "x".into(),
        formatted_value: FormattedValue::plain("1"),
    })
    .with_target("mute");
    let ctx = composite.send_and_wait(command).await;

    let events = ctx.events();
    assert!(failed_with(&events, "SendValue"));
    assert!(failed_with(&events, "kernel 'mute'"));
}

#[tokio::test]
async fn send_value_through_declarer_synthesizes_a_submission() {
    let composite = Arc::new(CompositeKernel::new("kumi"));
    let dest = Arc::new(FakeKernel::new("dest").with_json_declarer());
    composite.add_kernel(dest.clone(), &[]).unwrap();

    let command = KernelCommand::new(CommandBody::SendValue {
        name: "x".into(),
        formatted_value: FormattedValue::new(mime::JSON, "[1,2]"),
    })
    .with_target("dest");
    let ctx = composite.send_and_wait(command).await;
    assert!(ctx.wait_for_completion().await.is_success());

    // The declarer turned the value into code and ran it as a submission.
    let received = dest.received();
    assert_eq!(received.len(), 1);
    assert!(matches!(
        &received[0].body,
        CommandBody::SubmitCode { code } if code == "x = [1,2]"
    ));
    // The synthesized submission is internal.
    assert!(!received[0].publishes_internal_events());
}

#[tokio::test]
async fn who_lists_value_names() {
    let (composite, _, _) = stores();

    composite
        .send_and_wait(KernelCommand::submit_code("a = 1\nb = 2"))
        .await;
    let ctx = composite
        .send_and_wait(KernelCommand::submit_code("#!who"))
        .await;

    let displayed = displayed_values(&ctx.events());
    assert_eq!(displayed, vec!["a, b".to_string()]);
}

#[tokio::test]
async fn whos_lists_values_with_previews() {
    let (composite, _, _) = stores();

    composite
        .send_and_wait(KernelCommand::submit_code("greeting = hello"))
        .await;
    let ctx = composite
        .send_and_wait(KernelCommand::submit_code("#!whos"))
        .await;

    let displayed = displayed_values(&ctx.events());
    assert_eq!(displayed.len(), 1);
    assert!(displayed[0].contains("greeting"));
    assert!(displayed[0].contains("string"));
    assert!(displayed[0].contains("hello"));
}

#[tokio::test]
async fn request_value_round_trips_through_events() {
    let (composite, _, _) = stores();

    composite
        .send_and_wait(KernelCommand::submit_code("x = {\"a\": 1}"))
        .await;

    let command = KernelCommand::new(CommandBody::RequestValue {
        name: "x".into(),
        mime_type: Some(mime::JSON.into()),
    });
    let ctx = composite.send_and_wait(command).await;

    let produced = ctx.events().into_iter().find_map(|e| match e.body {
        EventBody::ValueProduced {
            name,
            formatted_value,
        } => Some((name, formatted_value)),
        _ => None,
    });
    let (name, formatted) = produced.unwrap();
    assert_eq!(name, "x");
    assert_eq!(formatted.mime_type, mime::JSON);
    assert_eq!(formatted.value, "{\"a\": 1}");
}
