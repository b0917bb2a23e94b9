//! The submission parser.
//!
//! Takes a raw notebook cell and splits it into per-language and
//! per-directive spans. The grammar is line-oriented: `#!<ident>` at the very
//! start of a line is a directive (kernel selector or action); everything
//! else extends the current language run. A `#!` anywhere else on a line is
//! ordinary language text — a C# string containing `"#!"` never splits a
//! cell.
//!
//! Parsing never fails. Malformed directives become Error diagnostics
//! attached to the offending node and the tree is still returned, because
//! front-ends must render partial cells while the user is typing.

use std::collections::HashMap;
use std::sync::Arc;

use kumi_types::{codes, Diagnostic, SourceSpan};

use super::lexer::{
    directive_ident, split_lines, tokenize_directive_line, unquote, DirectiveToken,
    DirectiveTokenKind,
};
use super::tree::{DirectiveExpressionKind, NodeId, NodeKind, SyntaxNode, SyntaxTree};
use crate::directives::{
    DirectiveArguments, DirectiveDefinition, DirectiveInvocation, DirectiveRegistry,
    DirectiveValue,
};

/// Everything the parser needs to know about the kernel tree: which
/// identifiers are kernel selectors and which directives each kernel's
/// grammar contains.
///
/// A configuration is a snapshot — a kernel added to the composite after the
/// snapshot was taken is not visible to parses using it.
#[derive(Debug, Clone, Default)]
pub struct ParserConfiguration {
    default_language: String,
    /// alias or name → canonical kernel name
    kernel_names: HashMap<String, String>,
    /// canonical kernel name → that kernel's directive registry
    directives: HashMap<String, DirectiveRegistry>,
    /// directives defined on the composite itself, visible from any language
    root_directives: DirectiveRegistry,
}

impl ParserConfiguration {
    /// Create a configuration with only a default language.
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            default_language: default_language.into(),
            ..Self::default()
        }
    }

    /// The language assumed before any selector directive.
    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Register a kernel name and its aliases as selector identifiers.
    pub fn with_kernel(mut self, name: impl Into<String>, aliases: &[&str]) -> Self {
        let name = name.into();
        for alias in aliases {
            self.kernel_names.insert((*alias).to_string(), name.clone());
        }
        self.kernel_names.insert(name.clone(), name);
        self
    }

    /// Register a directive in one kernel's grammar.
    pub fn with_directive(mut self, kernel: impl Into<String>, definition: DirectiveDefinition) -> Self {
        self.directives
            .entry(kernel.into())
            .or_default()
            .register(definition);
        self
    }

    /// Register a directive on the composite root, visible from any language.
    pub fn with_root_directive(mut self, definition: DirectiveDefinition) -> Self {
        self.root_directives.register(definition);
        self
    }

    /// Install a whole registry as one kernel's grammar.
    pub fn with_kernel_registry(
        mut self,
        kernel: impl Into<String>,
        registry: DirectiveRegistry,
    ) -> Self {
        self.directives.insert(kernel.into(), registry);
        self
    }

    /// Install a whole registry as the composite root's grammar.
    pub fn with_root_registry(mut self, registry: DirectiveRegistry) -> Self {
        self.root_directives = registry;
        self
    }

    /// Resolve a selector identifier to a canonical kernel name.
    pub fn kernel_for_alias(&self, ident: &str) -> Option<&str> {
        self.kernel_names.get(ident).map(String::as_str)
    }

    /// Resolve a directive name in the grammar visible from `kernel`:
    /// the kernel's own registry first, then the composite root's.
    pub fn directive_for(&self, kernel: &str, name: &str) -> Option<Arc<DirectiveDefinition>> {
        self.directives
            .get(kernel)
            .and_then(|r| r.lookup(name))
            .or_else(|| self.root_directives.lookup(name))
    }
}

/// Parse a submission into a syntax tree.
///
/// `default_language` overrides the configuration's default when the
/// submission was explicitly targeted at a kernel.
pub fn parse(
    source: &str,
    default_language: Option<&str>,
    config: &ParserConfiguration,
) -> SyntaxTree {
    let default_language = default_language.unwrap_or(config.default_language());
    let mut tree = SyntaxTree::new(source, default_language);
    let root = tree.root_id();

    let mut current_language = default_language.to_string();
    let mut open_language_node: Option<NodeId> = None;

    for line in split_lines(source) {
        let text = &source[line.content.start..line.content.end()];

        let Some(ident) = directive_ident(text) else {
            // Language text: extend the open run or start a new one.
            match open_language_node {
                Some(id) => tree.grow_span(id, line.span),
                None => {
                    let id = tree.add_node(
                        root,
                        NodeKind::Language {
                            language: current_language.clone(),
                        },
                        line.span,
                    );
                    open_language_node = Some(id);
                }
            }
            continue;
        };

        open_language_node = None;
        let tokens = tokenize_directive_line(source, line.content);

        if let Some(kernel_name) = config.kernel_for_alias(ident) {
            let kernel_name = kernel_name.to_string();
            let node = tree.add_node(
                root,
                NodeKind::KernelNameDirective {
                    kernel_name: kernel_name.clone(),
                },
                line.span,
            );
            add_name_node(&mut tree, node, &tokens);
            if tokens.len() > 1 {
                // Kernel selectors take no arguments.
                let span = tree.span_of(node);
                tree.add_diagnostic(
                    node,
                    Diagnostic::error(
                        span,
                        codes::UNKNOWN_PARAMETER_NAME,
                        format!("'#!{ident}' does not take arguments"),
                    ),
                );
            }
            current_language = kernel_name;
            continue;
        }

        let node = tree.add_node(
            root,
            NodeKind::ActionDirective {
                directive_name: ident.to_string(),
                owning_kernel: current_language.clone(),
            },
            line.span,
        );
        let name_span = add_name_node(&mut tree, node, &tokens);

        match config.directive_for(&current_language, ident) {
            Some(definition) => {
                bind_parameters(&mut tree, node, &definition, &tokens[1..]);
            }
            None => {
                tree.add_diagnostic(
                    node,
                    Diagnostic::error(
                        name_span,
                        codes::UNKNOWN_DIRECTIVE,
                        format!("unknown directive '#!{ident}'"),
                    ),
                );
            }
        }
    }

    debug_assert_eq!(tree.check_invariants(), Ok(()));
    tree
}

/// Add the `#!name` child node; returns its span (falls back to the
/// directive node's span if the token list is somehow empty).
fn add_name_node(tree: &mut SyntaxTree, parent: NodeId, tokens: &[DirectiveToken]) -> SourceSpan {
    match tokens.first() {
        Some(token) if token.kind == DirectiveTokenKind::Name => {
            tree.add_node(parent, NodeKind::DirectiveName, token.span);
            token.span
        }
        _ => tree.span_of(parent),
    }
}

/// Bind a directive line's tokens against its parameter schema, attaching
/// diagnostics to the smallest node that covers each problem.
fn bind_parameters(
    tree: &mut SyntaxTree,
    directive: NodeId,
    definition: &DirectiveDefinition,
    tokens: &[DirectiveToken],
) {
    let mut bound: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i];
        i += 1;

        match token.kind {
            DirectiveTokenKind::ParameterName => {
                let flag_text = span_text(tree, token.span);
                let name = flag_text.trim_start_matches("--").to_string();

                let Some(parameter) = definition.parameter(&name) else {
                    let node = tree.add_node(
                        directive,
                        NodeKind::DirectiveParameter { name: Some(name.clone()) },
                        token.span,
                    );
                    tree.add_diagnostic(
                        node,
                        Diagnostic::error(
                            token.span,
                            codes::UNKNOWN_PARAMETER_NAME,
                            format!("unknown parameter '--{name}'"),
                        ),
                    );
                    continue;
                };

                let canonical = parameter.name.clone();
                if bound.iter().any(|b| *b == canonical) {
                    let node = tree.add_node(
                        directive,
                        NodeKind::DirectiveParameter { name: Some(canonical.clone()) },
                        token.span,
                    );
                    tree.add_diagnostic(
                        node,
                        Diagnostic::error(
                            token.span,
                            codes::TOO_MANY_OCCURRENCES_OF_PARAMETER,
                            format!("parameter '--{canonical}' may only appear once"),
                        ),
                    );
                    // Consume the value token it would have taken.
                    if !parameter.flag && i < tokens.len() && is_value(tokens[i].kind) {
                        i += 1;
                    }
                    continue;
                }

                if parameter.flag {
                    tree.add_node(
                        directive,
                        NodeKind::DirectiveParameter { name: Some(canonical.clone()) },
                        token.span,
                    );
                    bind(&mut bound, definition, &canonical);
                    continue;
                }

                // Value parameter: the next token must be its value.
                if i < tokens.len() && is_value(tokens[i].kind) {
                    let value_token = tokens[i];
                    i += 1;
                    let node = tree.add_node(
                        directive,
                        NodeKind::DirectiveParameter { name: Some(canonical.clone()) },
                        token.span.union(&value_token.span),
                    );
                    add_value_node(tree, node, value_token);
                    bind(&mut bound, definition, &canonical);
                } else {
                    let node = tree.add_node(
                        directive,
                        NodeKind::DirectiveParameter { name: Some(canonical.clone()) },
                        token.span,
                    );
                    tree.add_diagnostic(
                        node,
                        Diagnostic::error(
                            token.span,
                            codes::MISSING_PARAMETER_VALUE,
                            format!("parameter '--{canonical}' requires a value"),
                        ),
                    );
                }
            }

            DirectiveTokenKind::Value
            | DirectiveTokenKind::QuotedValue { .. }
            | DirectiveTokenKind::Expression => {
                // A bare value binds to the implicit parameter, if one is
                // declared and still unbound.
                let implicit = definition
                    .implicit_parameter()
                    .filter(|p| !bound.iter().any(|b| *b == p.name))
                    .map(|p| p.name.clone());

                match implicit {
                    Some(canonical) => {
                        let node = tree.add_node(
                            directive,
                            NodeKind::DirectiveParameter { name: Some(canonical.clone()) },
                            token.span,
                        );
                        add_value_node(tree, node, token);
                        bind(&mut bound, definition, &canonical);
                    }
                    None => {
                        let node = tree.add_node(
                            directive,
                            NodeKind::DirectiveParameter { name: None },
                            token.span,
                        );
                        tree.add_diagnostic(
                            node,
                            Diagnostic::error(
                                token.span,
                                codes::UNKNOWN_PARAMETER_NAME,
                                format!(
                                    "unexpected value '{}'",
                                    span_text(tree, token.span)
                                ),
                            ),
                        );
                    }
                }
            }

            DirectiveTokenKind::Name => {
                // Already consumed by the caller; defensive no-op.
            }
        }
    }

    // Required parameters that never bound get a diagnostic on the
    // directive node itself — there is no smaller node to carry it.
    let directive_span = tree.span_of(directive);
    for parameter in definition.parameters() {
        if parameter.required
            && parameter.default.is_none()
            && !bound.iter().any(|b| *b == parameter.name)
        {
            tree.add_diagnostic(
                directive,
                Diagnostic::error(
                    directive_span,
                    codes::MISSING_REQUIRED_PARAMETER,
                    format!(
                        "missing required parameter '--{}' for '#!{}'",
                        parameter.name,
                        definition.name()
                    ),
                ),
            );
        }
    }
}

fn bind<'d>(bound: &mut Vec<&'d str>, definition: &'d DirectiveDefinition, canonical: &str) {
    if let Some(parameter) = definition.parameter(canonical) {
        bound.push(&parameter.name);
    }
}

fn is_value(kind: DirectiveTokenKind) -> bool {
    matches!(
        kind,
        DirectiveTokenKind::Value
            | DirectiveTokenKind::QuotedValue { .. }
            | DirectiveTokenKind::Expression
    )
}

fn span_text(tree: &SyntaxTree, span: SourceSpan) -> String {
    tree.source()[span.start..span.end()].to_string()
}

/// Add the value child of a parameter node: a plain value node, or a
/// directive-expression node for `@`-syntax.
fn add_value_node(tree: &mut SyntaxTree, parameter: NodeId, token: DirectiveToken) {
    match token.kind {
        DirectiveTokenKind::Expression => {
            let text = span_text(tree, token.span);
            match parse_expression(&text) {
                Some(kind) => {
                    tree.add_node(parameter, NodeKind::DirectiveExpression { kind }, token.span);
                }
                None => {
                    // `@word` with no colon is just a literal that happens to
                    // start with '@'.
                    tree.add_node(parameter, NodeKind::DirectiveParameterValue, token.span);
                }
            }
        }
        DirectiveTokenKind::QuotedValue { terminated } => {
            let node = tree.add_node(parameter, NodeKind::DirectiveParameterValue, token.span);
            if !terminated {
                tree.add_diagnostic(
                    node,
                    Diagnostic::error(
                        token.span,
                        codes::UNTERMINATED_VALUE,
                        "unterminated quoted value",
                    ),
                );
            }
        }
        _ => {
            tree.add_node(parameter, NodeKind::DirectiveParameterValue, token.span);
        }
    }
}

/// Parse `@kernel:name` / `@input:prompt` expression text. The tail may be
/// quoted to include whitespace.
fn parse_expression(text: &str) -> Option<DirectiveExpressionKind> {
    let rest = text.strip_prefix('@')?;
    let (head, tail) = rest.split_once(':')?;
    if head.is_empty() {
        return None;
    }
    let tail = unquote(tail);
    if head == "input" {
        Some(DirectiveExpressionKind::Input { prompt: tail })
    } else {
        Some(DirectiveExpressionKind::ValueFrom {
            kernel: head.to_string(),
            name: tail,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Submission splitting
// ─────────────────────────────────────────────────────────────────────────

/// One dispatchable piece of a parsed submission.
#[derive(Debug, Clone)]
pub enum SubmissionChunk {
    /// A contiguous run of code for one language.
    Code { language: String, code: String },
    /// An action directive to run against the invocation context.
    Directive(DirectiveInvocation),
}

/// Walk a parsed tree and produce the chunks to dispatch, in source order.
///
/// Kernel-selector directives produce no chunk (their whole effect is the
/// language switch, already baked into the tree); blank language runs are
/// skipped. Directive arguments are rebuilt from the parameter nodes, with
/// declared defaults filled in.
pub fn split_submission(tree: &SyntaxTree, config: &ParserConfiguration) -> Vec<SubmissionChunk> {
    let mut chunks = Vec::new();

    for child in tree.root().children() {
        match child.kind() {
            NodeKind::Language { language } => {
                if child.text().trim().is_empty() {
                    continue;
                }
                chunks.push(SubmissionChunk::Code {
                    language: language.clone(),
                    code: child.text().to_string(),
                });
            }
            NodeKind::ActionDirective {
                directive_name,
                owning_kernel,
            } => {
                let arguments = collect_arguments(&child, config, owning_kernel, directive_name);
                chunks.push(SubmissionChunk::Directive(DirectiveInvocation {
                    directive_name: directive_name.clone(),
                    owning_kernel: owning_kernel.clone(),
                    span: child.span(),
                    arguments,
                }));
            }
            _ => {}
        }
    }

    chunks
}

fn collect_arguments(
    node: &SyntaxNode<'_>,
    config: &ParserConfiguration,
    owning_kernel: &str,
    directive_name: &str,
) -> DirectiveArguments {
    let mut arguments = DirectiveArguments::default();
    let definition = config.directive_for(owning_kernel, directive_name);

    for parameter_node in node.children() {
        let NodeKind::DirectiveParameter { name: Some(name) } = parameter_node.kind() else {
            continue;
        };
        let is_flag = definition
            .as_deref()
            .and_then(|d| d.parameter(name))
            .map(|p| p.flag)
            .unwrap_or(false);

        if is_flag {
            arguments.flags.insert(name.clone());
            continue;
        }

        for value_node in parameter_node.children() {
            let value = match value_node.kind() {
                NodeKind::DirectiveParameterValue => {
                    DirectiveValue::Literal(unquote(value_node.text()))
                }
                NodeKind::DirectiveExpression { kind } => DirectiveValue::from_expression(kind),
                _ => continue,
            };
            arguments.named.insert(name.clone(), value);
        }
    }

    if let Some(definition) = definition.as_deref() {
        for parameter in definition.parameters() {
            if let Some(default) = &parameter.default {
                arguments
                    .named
                    .entry(parameter.name.clone())
                    .or_insert_with(|| DirectiveValue::Literal(default.clone()));
            }
        }
    }

    arguments
}
