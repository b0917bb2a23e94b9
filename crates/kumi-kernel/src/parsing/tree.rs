//! The syntax tree for a parsed submission.
//!
//! Nodes live in an arena owned by the tree; parent/child links are plain
//! indices, so there are no ownership cycles and the whole tree drops in one
//! shot. Node text is never stored — it is always sliced out of the shared
//! source buffer, which is what makes the round-trip law cheap to uphold:
//! concatenating the root's children's text reproduces the input exactly.

use kumi_types::{Diagnostic, SourceSpan};

/// Index of a node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// A value-binding expression inside a directive argument.
///
/// `@kernel:name` reads a value from another kernel at execution time;
/// `@input:prompt` asks the front-end for input. Neither does any work at
/// parse time — binding is deferred to directive execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveExpressionKind {
    /// `@<kernel>:<name>` — a value from another kernel.
    ValueFrom { kernel: String, name: String },
    /// `@input:<prompt>` — input requested from the front-end.
    Input { prompt: String },
}

/// What a node in the tree is.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The whole submission.
    Root,
    /// A contiguous run of one language's code.
    Language { language: String },
    /// `#!csharp` — switches the active language.
    KernelNameDirective { kernel_name: String },
    /// `#!command --args` — a magic command bound against the directive
    /// grammar of `owning_kernel` (the language active at the directive site).
    ActionDirective {
        directive_name: String,
        owning_kernel: String,
    },
    /// The `#!name` token of a directive line.
    DirectiveName,
    /// One `--name value` pair (or bare implicit value) on a directive line.
    DirectiveParameter { name: Option<String> },
    /// The value token of a parameter.
    DirectiveParameterValue,
    /// A deferred value-binding expression (`@kernel:name`, `@input:prompt`).
    DirectiveExpression { kind: DirectiveExpressionKind },
}

#[derive(Debug)]
struct NodeData {
    kind: NodeKind,
    span: SourceSpan,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    diagnostics: Vec<Diagnostic>,
}

/// An immutable tree of spans over one submission's source text.
///
/// Built once per parse, discarded when the next submission replaces it.
#[derive(Debug)]
pub struct SyntaxTree {
    source: String,
    default_language: String,
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl SyntaxTree {
    pub(crate) fn new(source: impl Into<String>, default_language: impl Into<String>) -> Self {
        let source = source.into();
        let root_span = SourceSpan::new(0, source.len());
        let root = NodeData {
            kind: NodeKind::Root,
            span: root_span,
            parent: None,
            children: Vec::new(),
            diagnostics: Vec::new(),
        };
        Self {
            source,
            default_language: default_language.into(),
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    /// The original submission text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The language assumed before any kernel-selector directive.
    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// The root node.
    pub fn root(&self) -> SyntaxNode<'_> {
        self.node(self.root)
    }

    /// A handle to the node with the given id.
    pub fn node(&self, id: NodeId) -> SyntaxNode<'_> {
        SyntaxNode { tree: self, id }
    }

    /// All diagnostics in the tree, ordered by span start.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut all: Vec<Diagnostic> = self
            .nodes
            .iter()
            .flat_map(|n| n.diagnostics.iter().cloned())
            .collect();
        all.sort_by_key(|d| (d.span.start, d.span.length));
        all
    }

    /// The smallest node whose span covers `offset`, or the root when no
    /// child covers it.
    pub fn find_node_at(&self, offset: usize) -> SyntaxNode<'_> {
        let mut current = self.root;
        'descend: loop {
            for &child in &self.nodes[current.0 as usize].children {
                if self.nodes[child.0 as usize].span.contains(offset) {
                    current = child;
                    continue 'descend;
                }
            }
            return self.node(current);
        }
    }

    /// The effective language at `offset`.
    ///
    /// A kernel-selector directive establishes the language for every
    /// position from its own start until the next selector or end of input.
    pub fn language_at(&self, offset: usize) -> &str {
        let mut current: &str = &self.default_language;
        for &child in &self.nodes[self.root.0 as usize].children {
            let data = &self.nodes[child.0 as usize];
            if let NodeKind::KernelNameDirective { kernel_name } = &data.kind {
                if data.span.start > offset {
                    break;
                }
                current = kernel_name;
            } else if data.span.start > offset {
                break;
            }
        }
        current
    }

    // ── Construction (parser-internal) ──────────────────────────────────

    pub(crate) fn add_node(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        span: SourceSpan,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            kind,
            span,
            parent: Some(parent),
            children: Vec::new(),
            diagnostics: Vec::new(),
        });
        self.nodes[parent.0 as usize].children.push(id);
        id
    }

    pub(crate) fn root_id(&self) -> NodeId {
        self.root
    }

    /// Extend a node's span to cover `span` (used when merging adjacent
    /// language lines into one node).
    pub(crate) fn grow_span(&mut self, id: NodeId, span: SourceSpan) {
        let node = &mut self.nodes[id.0 as usize];
        node.span = node.span.union(&span);
    }

    pub(crate) fn add_diagnostic(&mut self, id: NodeId, diagnostic: Diagnostic) {
        self.nodes[id.0 as usize].diagnostics.push(diagnostic);
    }

    pub(crate) fn span_of(&self, id: NodeId) -> SourceSpan {
        self.nodes[id.0 as usize].span
    }

    /// Verify the structural invariants. Called (debug-only) after every
    /// parse; tests call it directly.
    ///
    /// - every node's span is contained in its parent's span;
    /// - the root's span equals the union of its children's spans (when it
    ///   has children);
    /// - concatenating the root's children's text reproduces the source.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                let parent_span = self.nodes[parent.0 as usize].span;
                if !parent_span.encloses(&node.span) {
                    return Err(format!(
                        "node {i} span {} escapes parent span {parent_span}",
                        node.span
                    ));
                }
            }
        }

        let root = &self.nodes[self.root.0 as usize];
        if !root.children.is_empty() {
            let mut union: Option<SourceSpan> = None;
            for &child in &root.children {
                let span = self.nodes[child.0 as usize].span;
                union = Some(match union {
                    Some(u) => u.union(&span),
                    None => span,
                });
            }
            let union = union.unwrap_or(SourceSpan::new(0, 0));
            if union != root.span {
                return Err(format!(
                    "root span {} is not the union {union} of its children",
                    root.span
                ));
            }

            let concatenated: String = root
                .children
                .iter()
                .map(|&c| {
                    let span = self.nodes[c.0 as usize].span;
                    &self.source[span.start..span.end()]
                })
                .collect();
            if concatenated != self.source {
                return Err("round-trip violation: children do not reproduce the source".into());
            }
        }

        Ok(())
    }
}

/// A borrowed handle to one node.
#[derive(Debug, Clone, Copy)]
pub struct SyntaxNode<'t> {
    tree: &'t SyntaxTree,
    id: NodeId,
}

impl<'t> SyntaxNode<'t> {
    /// This node's id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node's kind.
    pub fn kind(&self) -> &'t NodeKind {
        &self.tree.nodes[self.id.0 as usize].kind
    }

    /// The node's span in the source.
    pub fn span(&self) -> SourceSpan {
        self.tree.nodes[self.id.0 as usize].span
    }

    /// The node's text, sliced from the shared source buffer.
    pub fn text(&self) -> &'t str {
        let span = self.span();
        &self.tree.source()[span.start..span.end()]
    }

    /// The parent node, if any.
    pub fn parent(&self) -> Option<SyntaxNode<'t>> {
        self.tree.nodes[self.id.0 as usize]
            .parent
            .map(|id| self.tree.node(id))
    }

    /// Child nodes in source order.
    pub fn children(&self) -> impl Iterator<Item = SyntaxNode<'t>> + '_ {
        self.tree.nodes[self.id.0 as usize]
            .children
            .iter()
            .map(|&id| self.tree.node(id))
    }

    /// Diagnostics attached directly to this node.
    pub fn diagnostics(&self) -> &'t [Diagnostic] {
        &self.tree.nodes[self.id.0 as usize].diagnostics
    }

    /// This node and all descendants, pre-order.
    pub fn descendants(&self) -> Vec<SyntaxNode<'t>> {
        let mut out = vec![*self];
        let mut i = 0;
        while i < out.len() {
            let children: Vec<_> = out[i].children().collect();
            out.extend(children);
            i += 1;
        }
        out
    }
}
