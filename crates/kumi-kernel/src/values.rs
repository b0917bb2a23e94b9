//! Cross-kernel value sharing.
//!
//! A value leaves its source kernel as a `FormattedValue` (via
//! `RequestValue`) and enters the destination kernel as synthesized
//! declaration code (via `SendValue` and the destination's
//! [`ValueDeclarer`]). The `#!set` and `#!share` directives drive that pair
//! of nested commands; `#!who`/`#!whos` list what a kernel holds.

use std::sync::Arc;

use async_trait::async_trait;

use kumi_types::{mime, EventBody, FormattedValue, ValueInfo};

use crate::composite::CompositeKernel;
use crate::context::KernelInvocationContext;
use crate::directives::{
    DirectiveAction, DirectiveDefinition, DirectiveInvocation, DirectiveParameter, DirectiveValue,
};
use crate::kernel::{KernelError, KernelResult};

/// Turns a formatted value into declaration code for one kernel's language.
///
/// Returning `None` means the kernel cannot declare this value; the
/// surrounding `SendValue` then fails as unsupported.
pub trait ValueDeclarer: Send + Sync {
    fn try_declare(&self, name: &str, value: &FormattedValue) -> Option<String>;
}

/// A declarer for languages whose assignment form is `name = <json literal>`.
///
/// JSON payloads are embedded verbatim; anything else becomes a JSON string
/// literal, so the destination always receives valid JSON on the right-hand
/// side.
pub struct JsonValueDeclarer;

impl ValueDeclarer for JsonValueDeclarer {
    fn try_declare(&self, name: &str, value: &FormattedValue) -> Option<String> {
        if name.is_empty() || !is_identifier(name) {
            return None;
        }
        let literal = if value.mime_type == mime::JSON {
            value.value.clone()
        } else {
            serde_json::Value::String(value.value.clone()).to_string()
        };
        Some(format!("{name} = {literal}"))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Resolve a directive argument into a formatted value, performing any
/// deferred binding (`@kernel:name`, `@input:prompt`) against the live
/// context.
async fn resolve_value(
    value: &DirectiveValue,
    mime_type: Option<&str>,
    composite: &CompositeKernel,
    ctx: &KernelInvocationContext,
) -> KernelResult<FormattedValue> {
    match value {
        DirectiveValue::Literal(text) => {
            let mime_type = mime_type.map(str::to_string).unwrap_or_else(|| {
                if serde_json::from_str::<serde_json::Value>(text).is_ok() {
                    mime::JSON.to_string()
                } else {
                    mime::PLAIN_TEXT.to_string()
                }
            });
            Ok(FormattedValue::new(mime_type, text.clone()))
        }
        DirectiveValue::ValueFrom { kernel, name } => {
            composite
                .request_value(kernel, name, mime_type.map(str::to_string), ctx)
                .await
        }
        DirectiveValue::Input { prompt } => {
            let input = composite.request_input(prompt).await?;
            Ok(FormattedValue::plain(input))
        }
    }
}

/// `#!set --name <n> --value <literal | @kernel:name | @input:prompt>`
///
/// Declares a value in the kernel whose language is active at the directive
/// site.
pub struct SetDirective;

#[async_trait]
impl DirectiveAction for SetDirective {
    async fn run(
        &self,
        invocation: &DirectiveInvocation,
        composite: &CompositeKernel,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        let name = invocation
            .arguments
            .get_literal("name")
            .ok_or_else(|| KernelError::Directive("'#!set' requires --name".into()))?
            .to_string();
        let value = invocation
            .arguments
            .get("value")
            .ok_or_else(|| KernelError::Directive("'#!set' requires --value".into()))?;
        let mime_type = invocation.arguments.get_literal("mime-type");

        let formatted = resolve_value(value, mime_type, composite, ctx).await?;
        composite
            .send_value(&invocation.owning_kernel, &name, formatted, ctx)
            .await
    }
}

/// `#!share --from <kernel> <name> [--as <n>] [--mime-type <m>]`
///
/// Sugar over the same request/declare pair as `#!set`, reading the value
/// from an explicit source kernel.
pub struct ShareDirective;

#[async_trait]
impl DirectiveAction for ShareDirective {
    async fn run(
        &self,
        invocation: &DirectiveInvocation,
        composite: &CompositeKernel,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        let name = invocation
            .arguments
            .get_literal("name")
            .ok_or_else(|| KernelError::Directive("'#!share' requires a value name".into()))?
            .to_string();
        let from = invocation
            .arguments
            .get_literal("from")
            .ok_or_else(|| KernelError::Directive("'#!share' requires --from".into()))?
            .to_string();
        let mime_type = invocation.arguments.get_literal("mime-type").map(str::to_string);
        let declared_name = invocation
            .arguments
            .get_literal("as")
            .map(str::to_string)
            .unwrap_or_else(|| name.clone());

        let formatted = composite
            .request_value(&from, &name, mime_type, ctx)
            .await?;
        composite
            .send_value(&invocation.owning_kernel, &declared_name, formatted, ctx)
            .await
    }
}

/// `#!who` / `#!whos` — list the values held by the current kernel.
///
/// `#!whos` includes type names and previews.
pub struct WhosDirective {
    verbose: bool,
}

impl WhosDirective {
    pub fn terse() -> Self {
        Self { verbose: false }
    }

    pub fn verbose() -> Self {
        Self { verbose: true }
    }

    fn render(&self, kernel: &str, infos: &[ValueInfo]) -> String {
        if infos.is_empty() {
            return format!("(no values in kernel '{kernel}')");
        }
        if !self.verbose {
            let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
            return names.join(", ");
        }
        let mut out = String::new();
        for info in infos {
            let type_name = info.type_name.as_deref().unwrap_or("?");
            let preview = info
                .preview
                .as_ref()
                .map(|p| p.value.as_str())
                .unwrap_or("");
            out.push_str(&format!("{:<16} {:<12} {}\n", info.name, type_name, preview));
        }
        out.trim_end().to_string()
    }
}

#[async_trait]
impl DirectiveAction for WhosDirective {
    async fn run(
        &self,
        invocation: &DirectiveInvocation,
        composite: &CompositeKernel,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        let infos = composite
            .request_value_infos(&invocation.owning_kernel, ctx)
            .await?;
        ctx.publish(EventBody::DisplayedValueProduced {
            formatted_value: FormattedValue::plain(self.render(&invocation.owning_kernel, &infos)),
            value_id: None,
        });
        Ok(())
    }
}

/// The `#!set` grammar entry.
pub fn set_directive() -> DirectiveDefinition {
    DirectiveDefinition::new("set", "declare a value in the current kernel")
        .with_parameter(DirectiveParameter::required("name", "name to declare"))
        .with_parameter(DirectiveParameter::required(
            "value",
            "literal value, @kernel:name, or @input:prompt",
        ))
        .with_parameter(DirectiveParameter::optional("mime-type", "value MIME type"))
        .with_action(Arc::new(SetDirective))
}

/// The `#!share` grammar entry.
pub fn share_directive() -> DirectiveDefinition {
    DirectiveDefinition::new("share", "share a value from another kernel")
        .with_parameter(
            DirectiveParameter::required("name", "value name in the source kernel")
                .with_implicit_name(),
        )
        .with_parameter(DirectiveParameter::required("from", "source kernel name"))
        .with_parameter(DirectiveParameter::optional("as", "name to declare as"))
        .with_parameter(DirectiveParameter::optional("mime-type", "value MIME type"))
        .with_action(Arc::new(ShareDirective))
}

/// The `#!who` grammar entry.
pub fn who_directive() -> DirectiveDefinition {
    DirectiveDefinition::new("who", "list value names in the current kernel")
        .with_action(Arc::new(WhosDirective::terse()))
}

/// The `#!whos` grammar entry.
pub fn whos_directive() -> DirectiveDefinition {
    DirectiveDefinition::new("whos", "list values in the current kernel, with previews")
        .with_action(Arc::new(WhosDirective::verbose()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_declarer_embeds_json_verbatim() {
        let declarer = JsonValueDeclarer;
        let code = declarer
            .try_declare("total", &FormattedValue::new(mime::JSON, "[1,2,3]"))
            .unwrap();
        assert_eq!(code, "total = [1,2,3]");
    }

    #[test]
    fn json_declarer_quotes_plain_text() {
        let declarer = JsonValueDeclarer;
        let code = declarer
            .try_declare("greeting", &FormattedValue::plain("hi there"))
            .unwrap();
        assert_eq!(code, r#"greeting = "hi there""#);
    }

    #[test]
    fn json_declarer_rejects_invalid_names() {
        let declarer = JsonValueDeclarer;
        assert!(declarer
            .try_declare("not a name", &FormattedValue::plain("x"))
            .is_none());
        assert!(declarer
            .try_declare("", &FormattedValue::plain("x"))
            .is_none());
    }
}
