//! Composite routing tests: target resolution, submission splitting,
//! capability checks, cancellation, and terminal-event discipline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use kumi_kernel::directives::{
    DirectiveAction, DirectiveDefinition, DirectiveInvocation,
};
use kumi_kernel::{
    CompositeKernel, KernelError, KernelInvocationContext, KernelResult,
};
use kumi_testutil::{failed_with, terminal_event, FakeKernel};
use kumi_types::{CommandBody, CommandKind, EventBody, KernelCommand};

/// csharp/fsharp/powershell fakes behind one composite, default csharp.
fn polyglot() -> (Arc<CompositeKernel>, Arc<FakeKernel>, Arc<FakeKernel>) {
    let composite = Arc::new(CompositeKernel::new("kumi"));
    let csharp = Arc::new(FakeKernel::new("csharp"));
    let fsharp = Arc::new(FakeKernel::new("fsharp"));
    let powershell = Arc::new(FakeKernel::new("powershell"));
    composite.add_kernel(csharp.clone(), &["c#"]).unwrap();
    composite.add_kernel(fsharp.clone(), &["f#"]).unwrap();
    composite.add_kernel(powershell, &["pwsh"]).unwrap();
    composite.set_default_kernel_name("csharp").unwrap();
    (composite, csharp, fsharp)
}

fn submitted_code(kernel: &FakeKernel) -> Vec<String> {
    kernel
        .received()
        .into_iter()
        .filter_map(|c| match c.body {
            CommandBody::SubmitCode { code } => Some(code),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn explicit_target_wins_over_default() {
    let (composite, csharp, fsharp) = polyglot();

    let command = KernelCommand::submit_code("let x = 1").with_target("fsharp");
    let ctx = composite.send_and_wait(command).await;

    assert!(ctx.wait_for_completion().await.is_success());
    assert_eq!(submitted_code(&fsharp), vec!["let x = 1".to_string()]);
    assert!(submitted_code(&csharp).is_empty());
}

#[tokio::test]
async fn alias_targets_resolve() {
    let (composite, _, fsharp) = polyglot();
    let command = KernelCommand::submit_code("let x = 1").with_target("f#");
    composite.send_and_wait(command).await;
    assert_eq!(submitted_code(&fsharp).len(), 1);
}

#[tokio::test]
async fn untargeted_commands_go_to_the_default_kernel() {
    let (composite, csharp, fsharp) = polyglot();
    composite
        .send_and_wait(KernelCommand::submit_code("var x = 1;"))
        .await;
    assert_eq!(submitted_code(&csharp).len(), 1);
    assert!(submitted_code(&fsharp).is_empty());
}

#[tokio::test]
async fn unknown_target_fails_the_command_without_throwing() {
    let (composite, _, _) = polyglot();
    let command = KernelCommand::submit_code("x").with_target("ruby");
    let ctx = composite.send_and_wait(command).await;

    let events = ctx.events();
    let terminal = terminal_event(&events, &ctx.root_command().token);
    assert!(matches!(
        &terminal.body,
        EventBody::CommandFailed { message, cancelled: false }
            if message.contains("unknown target kernel 'ruby'")
    ));
}

#[tokio::test]
async fn unsupported_command_kind_fails_with_kernel_name() {
    let (composite, _, _) = polyglot();
    // The csharp fake only handles SubmitCode.
    let command = KernelCommand::new(CommandBody::RequestValueInfos).with_target("csharp");
    let ctx = composite.send_and_wait(command).await;

    let events = ctx.events();
    assert!(failed_with(&events, "RequestValueInfos"));
    assert!(failed_with(&events, "kernel 'csharp'"));
}

#[tokio::test]
async fn multi_language_submission_splits_per_span() {
    let (composite, csharp, fsharp) = polyglot();

    let command =
        KernelCommand::submit_code("#!fsharp\nlet x = 1\n#!csharp\nvar x = 123;");
    let root_token = command.token.clone();
    let ctx = composite.send_and_wait(command).await;

    assert!(ctx.wait_for_completion().await.is_success());
    assert_eq!(submitted_code(&fsharp), vec!["let x = 1\n".to_string()]);
    assert_eq!(submitted_code(&csharp), vec!["var x = 123;".to_string()]);

    // Expanded commands share the submission's correlation.
    for child in fsharp.received().into_iter().chain(csharp.received()) {
        assert_eq!(child.parent.as_ref(), Some(&root_token));
        assert!(root_token.contains(&child.token));
    }
}

#[tokio::test]
async fn submission_chunks_run_in_source_order() {
    let (composite, csharp, _) = polyglot();
    composite
        .send_and_wait(KernelCommand::submit_code("var a = 1;\n#!csharp\nvar b = 2;"))
        .await;
    assert_eq!(
        submitted_code(&csharp),
        vec!["var a = 1;\n".to_string(), "var b = 2;".to_string()]
    );
}

#[tokio::test]
async fn commands_to_one_kernel_execute_in_send_order() {
    let composite = Arc::new(CompositeKernel::new("kumi"));
    let slow = Arc::new(FakeKernel::new("slow").with_handler(|command, ctx| async move {
        if let CommandBody::SubmitCode { code } = &command.body {
            if code.contains("sleep") {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            ctx.publish(EventBody::DisplayedValueProduced {
                formatted_value: kumi_types::FormattedValue::plain(code.clone()),
                value_id: None,
            });
        }
        Ok(())
    }));
    composite.add_kernel(slow.clone(), &[]).unwrap();

    let first = composite.send(KernelCommand::submit_code("sleep then print"));
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = composite.send(KernelCommand::submit_code("print"));

    first.wait_for_completion().await;
    second.wait_for_completion().await;

    assert_eq!(
        submitted_code(&slow),
        vec!["sleep then print".to_string(), "print".to_string()]
    );
}

#[tokio::test]
async fn cancel_terminates_the_running_command() {
    let composite = Arc::new(CompositeKernel::new("kumi"));
    let stuck = Arc::new(FakeKernel::new("stuck").with_handler(|_, _| async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }));
    composite.add_kernel(stuck, &[]).unwrap();

    let running = composite.send(KernelCommand::submit_code("loop forever"));
    tokio::time::sleep(Duration::from_millis(30)).await;

    let cancel = composite.send_and_wait(KernelCommand::new(CommandBody::Cancel)).await;
    assert!(cancel.wait_for_completion().await.is_success());

    let outcome = running.wait_for_completion().await;
    match outcome {
        kumi_kernel::CommandOutcome::Failed { message, cancelled } => {
            assert!(cancelled, "failure must carry the cancelled bit");
            assert_eq!(message, "Command cancelled");
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
}

#[tokio::test]
async fn exactly_one_terminal_event_per_command() {
    let (composite, _, _) = polyglot();
    let ctx = composite
        .send_and_wait(KernelCommand::submit_code("#!fsharp\nlet x = 1\n#!csharp\nvar x = 1;"))
        .await;
    let events = ctx.events();

    // The root terminal is a success...
    assert!(matches!(
        terminal_event(&events, &ctx.root_command().token).body,
        EventBody::CommandSucceeded
    ));
    // ...and no command (root or expanded) got more than one terminal.
    let mut seen = std::collections::HashSet::new();
    for event in events.iter().filter(|e| e.is_terminal()) {
        assert!(
            seen.insert(event.command.clone()),
            "duplicate terminal for {}",
            event.command
        );
    }
}

#[tokio::test]
async fn parse_errors_fail_the_submission_with_diagnostics() {
    let (composite, csharp, _) = polyglot();
    let ctx = composite
        .send_and_wait(KernelCommand::submit_code("#!csharp --bad\nvar x = 1;"))
        .await;

    let events = ctx.events();
    assert!(events
        .iter()
        .any(|e| matches!(e.body, EventBody::DiagnosticsProduced { .. })));
    assert!(matches!(
        terminal_event(&events, &ctx.root_command().token).body,
        EventBody::CommandFailed { .. }
    ));
    // Nothing executed.
    assert!(submitted_code(&csharp).is_empty());
}

#[tokio::test]
async fn unterminated_submission_reports_incomplete_and_stops() {
    let (composite, csharp, _) = polyglot();
    composite
        .add_directive(
            DirectiveDefinition::new("tag", "tag the cell").with_parameter(
                kumi_kernel::directives::DirectiveParameter::required("name", "tag name"),
            ),
        );
    let ctx = composite
        .send_and_wait(KernelCommand::submit_code("#!tag --name \"unfinished\nvar x;"))
        .await;

    let events = ctx.events();
    assert!(events
        .iter()
        .any(|e| matches!(e.body, EventBody::IncompleteCodeSubmissionReceived { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e.body, EventBody::CompleteCodeSubmissionReceived { .. })));
    assert!(submitted_code(&csharp).is_empty());
}

struct ExplodingDirective;

#[async_trait]
impl DirectiveAction for ExplodingDirective {
    async fn run(
        &self,
        _invocation: &DirectiveInvocation,
        _composite: &CompositeKernel,
        _ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        Err(KernelError::Directive("refused".into()))
    }
}

#[tokio::test]
async fn kernel_scoped_directives_only_bind_under_their_kernel() {
    let (composite, _, _) = polyglot();
    composite
        .add_directive_for(
            "csharp",
            DirectiveDefinition::new("explode", "always fails")
                .with_action(Arc::new(ExplodingDirective)),
        )
        .unwrap();

    // Under the default (csharp) the directive resolves and its action runs.
    let ctx = composite
        .send_and_wait(KernelCommand::submit_code("#!explode"))
        .await;
    assert!(failed_with(&ctx.events(), "refused"));

    // Under fsharp the same name is an unknown directive.
    let ctx = composite
        .send_and_wait(KernelCommand::submit_code("#!fsharp\n#!explode"))
        .await;
    assert!(failed_with(&ctx.events(), "unknown directive"));
}

#[tokio::test]
async fn directive_failure_short_circuits_later_chunks() {
    let (composite, csharp, _) = polyglot();
    composite.add_directive(
        DirectiveDefinition::new("explode", "always fails")
            .with_action(Arc::new(ExplodingDirective)),
    );

    let ctx = composite
        .send_and_wait(KernelCommand::submit_code("#!explode\nvar x = 1;"))
        .await;

    let events = ctx.events();
    assert!(failed_with(&events, "refused"));
    assert!(submitted_code(&csharp).is_empty());
}

#[tokio::test]
async fn request_diagnostics_does_not_execute() {
    let (composite, csharp, _) = polyglot();
    let command = KernelCommand::new(CommandBody::RequestDiagnostics {
        code: "#!csharp --bad\nvar x = 1;".into(),
    });
    let ctx = composite.send_and_wait(command).await;

    let events = ctx.events();
    let diagnostics = events.iter().find_map(|e| match &e.body {
        EventBody::DiagnosticsProduced { diagnostics } => Some(diagnostics.clone()),
        _ => None,
    });
    assert!(!diagnostics.unwrap().is_empty());
    assert!(matches!(
        terminal_event(&events, &ctx.root_command().token).body,
        EventBody::CommandSucceeded
    ));
    assert!(submitted_code(&csharp).is_empty());
}

#[tokio::test]
async fn add_package_routes_to_the_target_kernel() {
    let composite = Arc::new(CompositeKernel::new("kumi"));
    let kernel = Arc::new(
        FakeKernel::new("csharp")
            .with_supported([CommandKind::SubmitCode, CommandKind::AddPackage])
            .with_handler(|command, ctx| async move {
                if let CommandBody::AddPackage { name, version } = &command.body {
                    ctx.publish(EventBody::PackageAdded {
                        name: name.clone(),
                        version: version.clone(),
                    });
                }
                Ok(())
            }),
    );
    composite.add_kernel(kernel, &[]).unwrap();

    let command = KernelCommand::new(CommandBody::AddPackage {
        name: "Newtonsoft.Json".into(),
        version: Some("13.0.1".into()),
    })
    .with_target("csharp");
    let ctx = composite.send_and_wait(command).await;

    assert!(ctx.wait_for_completion().await.is_success());
    assert!(ctx.events().iter().any(|e| matches!(
        &e.body,
        EventBody::PackageAdded { name, .. } if name == "Newtonsoft.Json"
    )));
}

#[tokio::test]
async fn kernels_added_later_become_routable() {
    let (composite, _, _) = polyglot();

    let command = KernelCommand::submit_code("print 1").with_target("python");
    let ctx = composite.send_and_wait(command).await;
    assert!(failed_with(&ctx.events(), "unknown target kernel 'python'"));

    let python = Arc::new(FakeKernel::new("python"));
    composite.add_kernel(python.clone(), &[]).unwrap();

    let command = KernelCommand::submit_code("print 1").with_target("python");
    let ctx = composite.send_and_wait(command).await;
    assert!(ctx.wait_for_completion().await.is_success());
    assert_eq!(submitted_code(&python).len(), 1);
}
