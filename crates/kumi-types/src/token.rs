//! Correlation tokens for commands and their events.
//!
//! Every command carries a token; every event produced during that command's
//! execution carries the same token. Commands spawned on behalf of another
//! command (directive expansion, value sharing) derive child tokens from the
//! parent so that aggregate success/failure can be computed for a whole
//! submission.

use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-wide counter so tokens minted in one session never collide.
static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A correlation token tying a command to the events it produces.
///
/// Tokens are opaque strings on the wire. Locally-minted tokens look like
/// `"a1b2c3d4.7"`; child tokens append a sequence number to their parent
/// (`"a1b2c3d4.7.1"`), making submission ancestry visible in traces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandToken(String);

impl CommandToken {
    /// Mint a fresh root token.
    pub fn new() -> Self {
        let seq = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}.{}", session_prefix(), seq))
    }

    /// Wrap an existing wire token.
    pub fn from_wire(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Derive the `n`th child token of this token.
    pub fn child(&self, n: usize) -> Self {
        Self(format!("{}.{}", self.0, n))
    }

    /// True if `other` is this token or a descendant of it.
    pub fn contains(&self, other: &CommandToken) -> bool {
        other.0 == self.0 || other.0.starts_with(&format!("{}.", self.0))
    }

    /// The raw token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CommandToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session prefix: hashed from RandomState so two hosts talking over a
/// transport don't mint colliding token namespaces.
fn session_prefix() -> &'static str {
    use std::sync::OnceLock;
    static PREFIX: OnceLock<String> = OnceLock::new();
    PREFIX.get_or_init(|| {
        let state = std::collections::hash_map::RandomState::new();
        let mut hasher = state.build_hasher();
        hasher.write_u32(std::process::id());
        format!("{:08x}", hasher.finish() as u32)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique() {
        let a = CommandToken::new();
        let b = CommandToken::new();
        assert_ne!(a, b);
    }

    #[test]
    fn child_tokens_nest_under_parent() {
        let parent = CommandToken::new();
        let child = parent.child(1);
        let grandchild = child.child(2);

        assert!(parent.contains(&child));
        assert!(parent.contains(&grandchild));
        assert!(!child.contains(&parent));
    }

    #[test]
    fn contains_is_prefix_safe() {
        // "x.1" must not contain "x.10"
        let a = CommandToken::from_wire("x.1");
        let b = CommandToken::from_wire("x.10");
        assert!(!a.contains(&b));
    }

    #[test]
    fn wire_round_trip() {
        let token = CommandToken::new();
        let json = serde_json::to_string(&token).unwrap();
        let back: CommandToken = serde_json::from_str(&json).unwrap();
        assert_eq!(token, back);
    }
}
