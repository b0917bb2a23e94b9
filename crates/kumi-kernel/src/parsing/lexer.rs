//! Low-level scanning for the submission parser.
//!
//! The submission grammar is line-oriented: the lexer splits the source into
//! lines (each line owning its terminator, so spans tile the source exactly)
//! and tokenizes directive lines into name / parameter / value tokens with
//! byte-accurate spans. Language lines are never tokenized — their text
//! belongs to the target language.

use kumi_types::SourceSpan;

/// One source line. `span` includes the line terminator; `content` excludes
/// it. The `span`s of consecutive lines tile the source with no gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Line {
    pub span: SourceSpan,
    pub content: SourceSpan,
}

/// Split the source into lines, preserving exact byte offsets.
///
/// Handles `\n` and `\r\n`; a final line without a terminator is kept.
pub(crate) fn split_lines(source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let bytes = source.as_bytes();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\n' {
            let content_end = if i > start && bytes[i - 1] == b'\r' {
                i - 1
            } else {
                i
            };
            lines.push(Line {
                span: SourceSpan::new(start, i + 1 - start),
                content: SourceSpan::new(start, content_end - start),
            });
            start = i + 1;
        }
        i += 1;
    }

    if start < bytes.len() {
        lines.push(Line {
            span: SourceSpan::new(start, bytes.len() - start),
            content: SourceSpan::new(start, bytes.len() - start),
        });
    }

    lines
}

/// If `text` is a directive line, the identifier after `#!`.
///
/// A directive requires `#!` at the very start of the line, immediately
/// followed by a non-whitespace character — `#! foo` is language text, and a
/// `#!` appearing mid-line never reaches this function.
pub(crate) fn directive_ident(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("#!")?;
    let ident: &str = rest
        .split(|c: char| c.is_whitespace())
        .next()
        .unwrap_or_default();
    if ident.is_empty() {
        return None;
    }
    Some(ident)
}

/// Token kinds on a directive line, after the directive name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirectiveTokenKind {
    /// The leading `#!name`.
    Name,
    /// `--parameter-name`.
    ParameterName,
    /// A bare value word.
    Value,
    /// A `"quoted value"`. `terminated` is false when the closing quote is
    /// missing (the token then runs to end of line).
    QuotedValue { terminated: bool },
    /// An `@`-expression (`@kernel:name`, `@input:prompt`).
    Expression,
}

/// A token on a directive line, with its absolute span in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DirectiveToken {
    pub kind: DirectiveTokenKind,
    pub span: SourceSpan,
}

/// Tokenize the content of one directive line.
///
/// The first token is always the `#!name`; the rest are parameters, values,
/// quoted values, and `@`-expressions. Whitespace separates tokens and is
/// covered by no token (the enclosing directive node's span still covers the
/// whole line).
pub(crate) fn tokenize_directive_line(source: &str, content: SourceSpan) -> Vec<DirectiveToken> {
    let text = &source[content.start..content.end()];
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut seen_name = false;

    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        let kind = if !seen_name {
            seen_name = true;
            i = scan_word(bytes, i);
            DirectiveTokenKind::Name
        } else if bytes[i] == b'"' {
            i += 1;
            let mut terminated = false;
            while i < bytes.len() {
                match bytes[i] {
                    b'\\' if i + 1 < bytes.len() => i += 2,
                    b'"' => {
                        i += 1;
                        terminated = true;
                        break;
                    }
                    _ => i += 1,
                }
            }
            DirectiveTokenKind::QuotedValue { terminated }
        } else if text[i..].starts_with("--") {
            i = scan_word(bytes, i);
            DirectiveTokenKind::ParameterName
        } else if bytes[i] == b'@' {
            // An expression's tail may be quoted (`@input:"Pick a color"`);
            // the quoted section swallows whitespace.
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                if bytes[i] == b'"' {
                    i += 1;
                    while i < bytes.len() {
                        match bytes[i] {
                            b'\\' if i + 1 < bytes.len() => i += 2,
                            b'"' => {
                                i += 1;
                                break;
                            }
                            _ => i += 1,
                        }
                    }
                } else {
                    i += 1;
                }
            }
            DirectiveTokenKind::Expression
        } else {
            i = scan_word(bytes, i);
            DirectiveTokenKind::Value
        };

        tokens.push(DirectiveToken {
            kind,
            span: SourceSpan::new(content.start + start, i - start),
        });
    }

    tokens
}

fn scan_word(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Unwrap a quoted token's text into its value, handling `\"` and `\\`.
pub(crate) fn unquote(text: &str) -> String {
    let inner = text
        .strip_prefix('"')
        .map(|t| t.strip_suffix('"').unwrap_or(t))
        .unwrap_or(text);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
