//! The directive grammar — magic commands and their parameter schemas.
//!
//! Directives are registered per kernel at configuration time. The parser
//! consults the registries to tell directives apart from plain language text
//! and to bind parameters; dispatch runs the registered action against the
//! live invocation context. There is no hardcoded directive switch anywhere —
//! adding a directive is a registry insert.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use kumi_types::SourceSpan;

use crate::composite::CompositeKernel;
use crate::context::KernelInvocationContext;
use crate::kernel::KernelResult;
use crate::parsing::DirectiveExpressionKind;

/// Schema for one directive parameter.
#[derive(Debug, Clone)]
pub struct DirectiveParameter {
    /// Parameter name, without the leading `--`.
    pub name: String,
    /// Description for help listings.
    pub description: String,
    /// Whether the parameter must be present.
    pub required: bool,
    /// Whether the parameter is a boolean flag (takes no value).
    pub flag: bool,
    /// Whether a bare value can bind to this parameter without `--name`.
    /// At most one parameter per directive should allow this.
    pub implicit: bool,
    /// Default value when absent.
    pub default: Option<String>,
}

impl DirectiveParameter {
    /// Create a required value parameter.
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
            flag: false,
            implicit: false,
            default: None,
        }
    }

    /// Create an optional value parameter.
    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            flag: false,
            implicit: false,
            default: None,
        }
    }

    /// Create a boolean flag parameter.
    pub fn flag(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            flag: true,
            implicit: false,
            default: None,
        }
    }

    /// Allow binding a bare value to this parameter without `--name`.
    pub fn with_implicit_name(mut self) -> Self {
        self.implicit = true;
        self
    }

    /// Set the default value used when the parameter is absent.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// A bound directive argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveValue {
    /// A literal string (quotes already stripped).
    Literal(String),
    /// `@kernel:name` — resolved against the source kernel at execution time.
    ValueFrom { kernel: String, name: String },
    /// `@input:prompt` — resolved through the composite's input handler.
    Input { prompt: String },
}

impl DirectiveValue {
    pub(crate) fn from_expression(kind: &DirectiveExpressionKind) -> Self {
        match kind {
            DirectiveExpressionKind::ValueFrom { kernel, name } => DirectiveValue::ValueFrom {
                kernel: kernel.clone(),
                name: name.clone(),
            },
            DirectiveExpressionKind::Input { prompt } => DirectiveValue::Input {
                prompt: prompt.clone(),
            },
        }
    }
}

impl fmt::Display for DirectiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveValue::Literal(s) => f.write_str(s),
            DirectiveValue::ValueFrom { kernel, name } => write!(f, "@{kernel}:{name}"),
            DirectiveValue::Input { prompt } => write!(f, "@input:{prompt}"),
        }
    }
}

/// Arguments bound against a directive's parameter schema.
#[derive(Debug, Clone, Default)]
pub struct DirectiveArguments {
    /// Value parameters by canonical name. Defaults are filled in.
    pub named: HashMap<String, DirectiveValue>,
    /// Flags that were present.
    pub flags: HashSet<String>,
}

impl DirectiveArguments {
    /// Get a bound value by parameter name.
    pub fn get(&self, name: &str) -> Option<&DirectiveValue> {
        self.named.get(name)
    }

    /// Get a bound literal by parameter name; `None` for expressions.
    pub fn get_literal(&self, name: &str) -> Option<&str> {
        match self.named.get(name) {
            Some(DirectiveValue::Literal(s)) => Some(s),
            _ => None,
        }
    }

    /// Whether a flag was present.
    pub fn has_flag(&self, name: &str) -> bool {
        self.flags.contains(name)
    }
}

/// One parsed occurrence of an action directive, ready to execute.
#[derive(Debug, Clone)]
pub struct DirectiveInvocation {
    /// Directive name as registered (not the alias that was typed).
    pub directive_name: String,
    /// The kernel whose language was active at the directive site.
    pub owning_kernel: String,
    /// Span of the whole directive line.
    pub span: SourceSpan,
    /// Bound arguments.
    pub arguments: DirectiveArguments,
}

/// The behavior behind an action directive.
///
/// Actions receive the composite and the invocation context explicitly —
/// nested commands they issue (value requests, internal submissions) pass the
/// context down rather than relying on any ambient state.
#[async_trait]
pub trait DirectiveAction: Send + Sync {
    async fn run(
        &self,
        invocation: &DirectiveInvocation,
        composite: &CompositeKernel,
        ctx: &KernelInvocationContext,
    ) -> KernelResult<()>;
}

/// A registered directive: grammar plus behavior.
#[derive(Clone)]
pub struct DirectiveDefinition {
    name: String,
    aliases: Vec<String>,
    description: String,
    parameters: Vec<DirectiveParameter>,
    action: Option<Arc<dyn DirectiveAction>>,
}

impl DirectiveDefinition {
    /// Create a directive with no parameters and no action (grammar only).
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            description: description.into(),
            parameters: Vec::new(),
            action: None,
        }
    }

    /// Add an alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Add a parameter.
    pub fn with_parameter(mut self, parameter: DirectiveParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Attach the action.
    pub fn with_action(mut self, action: Arc<dyn DirectiveAction>) -> Self {
        self.action = Some(action);
        self
    }

    /// The canonical directive name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered aliases.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Description for help listings.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Parameter schemas.
    pub fn parameters(&self) -> &[DirectiveParameter] {
        &self.parameters
    }

    /// Look up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&DirectiveParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// The parameter a bare value binds to, if any.
    pub fn implicit_parameter(&self) -> Option<&DirectiveParameter> {
        self.parameters.iter().find(|p| p.implicit)
    }

    /// The registered action.
    pub fn action(&self) -> Option<&Arc<dyn DirectiveAction>> {
        self.action.as_ref()
    }
}

impl fmt::Debug for DirectiveDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectiveDefinition")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("parameters", &self.parameters.len())
            .field("has_action", &self.action.is_some())
            .finish()
    }
}

/// The set of directives one kernel understands.
#[derive(Debug, Clone, Default)]
pub struct DirectiveRegistry {
    by_name: HashMap<String, Arc<DirectiveDefinition>>,
}

impl DirectiveRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a directive under its name and all aliases.
    /// Re-registering a name replaces the earlier definition.
    pub fn register(&mut self, definition: DirectiveDefinition) {
        let definition = Arc::new(definition);
        for alias in definition.aliases() {
            self.by_name.insert(alias.clone(), definition.clone());
        }
        self.by_name
            .insert(definition.name().to_string(), definition);
    }

    /// Look up a directive by name or alias.
    pub fn lookup(&self, name: &str) -> Option<Arc<DirectiveDefinition>> {
        self.by_name.get(name).cloned()
    }

    /// All distinct definitions, sorted by canonical name.
    pub fn definitions(&self) -> Vec<Arc<DirectiveDefinition>> {
        let mut seen = HashSet::new();
        let mut out: Vec<_> = self
            .by_name
            .values()
            .filter(|d| seen.insert(d.name().to_string()))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_aliases() {
        let mut registry = DirectiveRegistry::new();
        registry.register(
            DirectiveDefinition::new("whos", "list values").with_alias("who"),
        );
        assert!(registry.lookup("whos").is_some());
        assert_eq!(registry.lookup("who").unwrap().name(), "whos");
        assert!(registry.lookup("nope").is_none());
        assert_eq!(registry.definitions().len(), 1);
    }

    #[test]
    fn implicit_parameter_lookup() {
        let def = DirectiveDefinition::new("share", "share a value")
            .with_parameter(DirectiveParameter::required("name", "value name").with_implicit_name())
            .with_parameter(DirectiveParameter::optional("as", "rename"));
        assert_eq!(def.implicit_parameter().unwrap().name, "name");
        assert!(def.parameter("as").is_some());
    }
}
