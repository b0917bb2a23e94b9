//! S-expression rendering of syntax trees, for the REPL's tree-inspection
//! mode and for eyeballing parser output in tests.

use super::tree::{NodeKind, SyntaxNode, SyntaxTree};

/// Render a tree as an indented s-expression.
pub fn format_tree(tree: &SyntaxTree) -> String {
    let mut out = String::new();
    write_node(&tree.root(), 0, &mut out);
    out.trim_end().to_string()
}

fn write_node(node: &SyntaxNode<'_>, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let label = match node.kind() {
        NodeKind::Root => "root".to_string(),
        NodeKind::Language { language } => format!("language {language:?}"),
        NodeKind::KernelNameDirective { kernel_name } => {
            format!("kernel-name-directive {kernel_name:?}")
        }
        NodeKind::ActionDirective {
            directive_name,
            owning_kernel,
        } => format!("action-directive {directive_name:?} in {owning_kernel:?}"),
        NodeKind::DirectiveName => "directive-name".to_string(),
        NodeKind::DirectiveParameter { name } => match name {
            Some(name) => format!("parameter {name:?}"),
            None => "parameter ?".to_string(),
        },
        NodeKind::DirectiveParameterValue => "value".to_string(),
        NodeKind::DirectiveExpression { kind } => format!("expression {kind:?}"),
    };

    let span = node.span();
    out.push_str(&format!("{indent}({label} [{}..{}]", span.start, span.end()));

    let has_children = node.children().next().is_some();
    if has_children {
        out.push('\n');
        for child in node.children() {
            write_node(&child, depth + 1, out);
        }
        out.push_str(&format!("{indent})\n"));
    } else {
        out.push_str(&format!(" {:?})\n", node.text()));
    }

    for diagnostic in node.diagnostics() {
        out.push_str(&format!("{indent}  ! {diagnostic}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::{parse, ParserConfiguration};

    #[test]
    fn renders_selectors_languages_and_spans() {
        let config = ParserConfiguration::new("csharp").with_kernel("fsharp", &[]);
        let tree = parse("#!fsharp\nlet x = 1\n", None, &config);
        let rendered = format_tree(&tree);

        assert!(rendered.starts_with("(root [0..19]"));
        assert!(rendered.contains("kernel-name-directive \"fsharp\" [0..9]"));
        assert!(rendered.contains("directive-name [0..8]"));
        assert!(rendered.contains("language \"fsharp\" [9..19]"));
    }
}
