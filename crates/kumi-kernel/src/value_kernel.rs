//! The built-in `value` kernel — a language-free store for named values.
//!
//! Submissions are simple assignments, one per line (`name = <json or
//! text>`); a bare name returns the stored value. The store gives the
//! platform a concrete kernel for round-tripping shared values without any
//! language engine attached.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use kumi_types::{
    mime, CommandBody, CommandKind, CompletionItem, EventBody, FormattedValue, KernelCommand,
    ValueInfo,
};

use crate::context::KernelInvocationContext;
use crate::kernel::{Kernel, KernelError, KernelResult};
use crate::values::{JsonValueDeclarer, ValueDeclarer};

const PREVIEW_LIMIT: usize = 50;

/// A kernel storing named formatted values.
pub struct ValueStoreKernel {
    name: String,
    values: RwLock<BTreeMap<String, FormattedValue>>,
    declarer: JsonValueDeclarer,
}

impl ValueStoreKernel {
    /// Create a store kernel with the conventional name `value`.
    pub fn new() -> Self {
        Self::named("value")
    }

    /// Create a store kernel with a custom name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: RwLock::new(BTreeMap::new()),
            declarer: JsonValueDeclarer,
        }
    }

    /// Read a stored value (test and embedding convenience).
    pub async fn get(&self, name: &str) -> Option<FormattedValue> {
        self.values.read().await.get(name).cloned()
    }

    async fn execute_lines(&self, code: &str, ctx: &KernelInvocationContext) -> KernelResult<()> {
        let mut last_return: Option<FormattedValue> = None;

        for line in code.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((lhs, rhs)) = line.split_once('=') {
                let name = lhs.trim();
                let raw = rhs.trim();
                if name.is_empty() {
                    return Err(KernelError::Execution(format!(
                        "cannot parse assignment: '{line}'"
                    )));
                }
                let mime_type = if serde_json::from_str::<serde_json::Value>(raw).is_ok() {
                    mime::JSON
                } else {
                    mime::PLAIN_TEXT
                };
                self.values
                    .write()
                    .await
                    .insert(name.to_string(), FormattedValue::new(mime_type, raw));
                last_return = None;
                continue;
            }

            // A bare name reads the value back.
            match self.values.read().await.get(line) {
                Some(value) => last_return = Some(value.clone()),
                None => {
                    return Err(KernelError::ValueNotFound {
                        name: line.to_string(),
                        kernel: self.name.clone(),
                    })
                }
            }
        }

        if let Some(value) = last_return {
            ctx.publish(EventBody::ReturnValueProduced {
                formatted_value: value,
            });
        }
        Ok(())
    }

    fn preview(value: &FormattedValue) -> FormattedValue {
        let mut text = value.value.clone();
        if text.len() > PREVIEW_LIMIT {
            let mut cut = PREVIEW_LIMIT;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push('…');
        }
        FormattedValue::plain(text)
    }

    fn type_name(value: &FormattedValue) -> &'static str {
        if value.mime_type == mime::JSON {
            "json"
        } else {
            "string"
        }
    }
}

impl Default for ValueStoreKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Kernel for ValueStoreKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_commands(&self) -> HashSet<CommandKind> {
        [
            CommandKind::SubmitCode,
            CommandKind::RequestValue,
            CommandKind::RequestValueInfos,
            CommandKind::SendValue,
            CommandKind::RequestCompletions,
        ]
        .into_iter()
        .collect()
    }

    async fn handle(
        &self,
        command: KernelCommand,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()> {
        match &command.body {
            CommandBody::SubmitCode { code } => self.execute_lines(code, ctx).await,

            CommandBody::RequestValue { name, mime_type } => {
                let stored =
                    self.values.read().await.get(name).cloned().ok_or_else(|| {
                        KernelError::ValueNotFound {
                            name: name.clone(),
                            kernel: self.name.clone(),
                        }
                    })?;

                let formatted = match mime_type.as_deref() {
                    None => stored,
                    Some(requested) if requested == stored.mime_type => stored,
                    Some(mime::PLAIN_TEXT) => FormattedValue::plain(stored.value),
                    Some(mime::JSON) => FormattedValue::json(&stored.value),
                    Some(other) => {
                        return Err(KernelError::Directive(format!(
                            "unsupported MIME type '{other}' for value '{name}'"
                        )))
                    }
                };

                ctx.publish(EventBody::ValueProduced {
                    name: name.clone(),
                    formatted_value: formatted,
                });
                Ok(())
            }

            CommandBody::RequestValueInfos => {
                let values = self.values.read().await;
                let value_infos = values
                    .iter()
                    .map(|(name, value)| {
                        ValueInfo::named(name)
                            .with_type(Self::type_name(value))
                            .with_preview(Self::preview(value))
                    })
                    .collect();
                ctx.publish(EventBody::ValueInfosProduced { value_infos });
                Ok(())
            }

            CommandBody::SendValue {
                name,
                formatted_value,
            } => {
                // Direct path, used when the kernel is driven without the
                // composite's declarer machinery.
                self.values
                    .write()
                    .await
                    .insert(name.clone(), formatted_value.clone());
                Ok(())
            }

            CommandBody::RequestCompletions { code, position } => {
                let mut end = (*position).min(code.len());
                while end > 0 && !code.is_char_boundary(end) {
                    end -= 1;
                }
                let prefix: String = code[..end]
                    .chars()
                    .rev()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                let values = self.values.read().await;
                let completions = values
                    .keys()
                    .filter(|name| name.starts_with(&prefix))
                    .map(|name| CompletionItem {
                        display_text: name.clone(),
                        insert_text: name.clone(),
                        kind: Some("value".to_string()),
                    })
                    .collect();
                ctx.publish(EventBody::CompletionsProduced { completions });
                Ok(())
            }

            other => Err(KernelError::CommandNotSupported {
                command: other.kind(),
                kernel: self.name.clone(),
            }),
        }
    }

    fn value_declarer(&self) -> Option<&dyn ValueDeclarer> {
        Some(&self.declarer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_for(code: &str) -> (KernelCommand, KernelInvocationContext) {
        let command = KernelCommand::submit_code(code);
        let ctx = KernelInvocationContext::new(command.clone());
        (command, ctx)
    }

    #[tokio::test]
    async fn assignment_then_read_back() {
        let kernel = ValueStoreKernel::new();
        let (command, ctx) = ctx_for("x = [1, 2, 3]\nx");
        kernel.handle(command, &ctx).await.unwrap();

        let returned = ctx.events().into_iter().find_map(|e| match e.body {
            EventBody::ReturnValueProduced { formatted_value } => Some(formatted_value),
            _ => None,
        });
        let returned = returned.unwrap();
        assert_eq!(returned.mime_type, mime::JSON);
        assert_eq!(returned.value, "[1, 2, 3]");
    }

    #[tokio::test]
    async fn unknown_name_fails() {
        let kernel = ValueStoreKernel::new();
        let (command, ctx) = ctx_for("missing");
        let err = kernel.handle(command, &ctx).await.unwrap_err();
        assert!(matches!(err, KernelError::ValueNotFound { .. }));
    }

    #[tokio::test]
    async fn value_infos_include_previews() {
        let kernel = ValueStoreKernel::new();
        let (command, ctx) = ctx_for("greeting = hello world");
        kernel.handle(command, &ctx).await.unwrap();

        let (command, ctx) = {
            let command = KernelCommand::new(CommandBody::RequestValueInfos);
            let ctx = KernelInvocationContext::new(command.clone());
            (command, ctx)
        };
        kernel.handle(command, &ctx).await.unwrap();

        let infos = ctx.events().into_iter().find_map(|e| match e.body {
            EventBody::ValueInfosProduced { value_infos } => Some(value_infos),
            _ => None,
        });
        let infos = infos.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "greeting");
        assert_eq!(infos[0].type_name.as_deref(), Some("string"));
    }
}
