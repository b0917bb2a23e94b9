//! Submission parsing — syntax tree, lexer, and the line-oriented parser.

mod lexer;
mod parser;
pub mod sexpr;
mod tree;

pub use parser::{parse, split_submission, ParserConfiguration, SubmissionChunk};
pub use tree::{DirectiveExpressionKind, NodeId, NodeKind, SyntaxNode, SyntaxTree};
