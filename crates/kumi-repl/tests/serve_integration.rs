//! End-to-end tests driving the real `kumi serve` binary over stdio.

use kumi_client::{KernelClient, StdioClient};
use kumi_kernel::CompositeKernel;
use kumi_types::{EventBody, KernelCommand};
use std::sync::Arc;

fn kumi_bin() -> String {
    env!("CARGO_BIN_EXE_kumi").to_string()
}

#[tokio::test]
async fn stdio_client_round_trips_a_value() {
    let client = StdioClient::connect(&kumi_bin(), &["serve".to_string()])
        .await
        .expect("connecting to kumi serve");

    let events = client.submit("x = 99").await.unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e.body, EventBody::CommandSucceeded)));

    let value = client.request_value("value", "x").await.unwrap();
    assert_eq!(value.value, "99");

    client.quit().await.ok();
}

#[tokio::test]
async fn connect_directive_attaches_a_remote_kernel() {
    let composite = Arc::new(CompositeKernel::new("local"));
    composite
        .add_kernel(Arc::new(kumi_kernel::ValueStoreKernel::named("scratch")), &[])
        .unwrap();
    kumi_kernel::install_standard_directives(&composite);

    let connect = format!("#!connect remote --command \"{} serve\"", kumi_bin());
    let ctx = composite.send_and_wait(KernelCommand::submit_code(&connect)).await;
    assert!(
        ctx.wait_for_completion().await.is_success(),
        "connect failed: {:?}",
        ctx.events()
    );
    assert!(composite.kernel_names().contains(&"remote".to_string()));

    // Route a submission to the freshly attached proxy and read it back.
    let ctx = composite
        .send_and_wait(KernelCommand::submit_code("#!remote\nshared = 7\nshared"))
        .await;
    assert!(ctx.wait_for_completion().await.is_success());
    assert!(ctx.events().iter().any(|e| matches!(
        &e.body,
        EventBody::ReturnValueProduced { formatted_value } if formatted_value.value == "7"
    )));
}

#[tokio::test]
async fn child_death_before_ready_aborts_the_connect() {
    let err = StdioClient::connect("false", &[]).await.err().expect(
        "connecting to a program that exits immediately must fail",
    );
    assert!(err.to_string().contains("before reporting ready"));
}
