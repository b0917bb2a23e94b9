//! Terminal rendering of kernel events.

use kumi_types::{EventBody, KernelEvent, Severity};

/// Render the interesting events of one submission for the terminal.
///
/// Protocol chatter (submission-received events, success terminals) is
/// dropped; values, display output, diagnostics, and failures are shown.
pub fn format_events(events: &[KernelEvent]) -> String {
    let mut out = String::new();

    for event in events {
        match &event.body {
            EventBody::ReturnValueProduced { formatted_value } => {
                out.push_str(&formatted_value.value);
                out.push('\n');
            }
            EventBody::DisplayedValueProduced {
                formatted_value, ..
            }
            | EventBody::DisplayedValueUpdated {
                formatted_value, ..
            } => {
                out.push_str(&formatted_value.value);
                out.push('\n');
            }
            EventBody::ValueProduced {
                name,
                formatted_value,
            } => {
                out.push_str(&format!("{name} = {}\n", formatted_value.value));
            }
            EventBody::ValueInfosProduced { value_infos } => {
                for info in value_infos {
                    out.push_str(&info.name);
                    out.push('\n');
                }
            }
            EventBody::DiagnosticsProduced { diagnostics } => {
                for diagnostic in diagnostics {
                    let marker = match diagnostic.severity {
                        Severity::Error => "error",
                        Severity::Warning => "warning",
                        _ => "note",
                    };
                    out.push_str(&format!(
                        "{marker}[{}] {} at {}\n",
                        diagnostic.code, diagnostic.message, diagnostic.span
                    ));
                }
            }
            EventBody::CommandFailed { message, cancelled } => {
                if *cancelled {
                    out.push_str("cancelled\n");
                } else {
                    out.push_str(&format!("error: {message}\n"));
                }
            }
            EventBody::IncompleteCodeSubmissionReceived { .. } => {
                out.push_str("(submission incomplete)\n");
            }
            EventBody::PackageAdded { name, version } => match version {
                Some(version) => out.push_str(&format!("added package {name} {version}\n")),
                None => out.push_str(&format!("added package {name}\n")),
            },
            _ => {}
        }
    }

    out.trim_end().to_string()
}
