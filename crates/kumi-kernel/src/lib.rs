//! kumi-kernel (組): the core of kumi.
//!
//! This crate provides:
//!
//! - **Parsing**: the syntax tree and line-oriented submission parser that
//!   split a multi-language cell on `#!` directives
//! - **Directives**: the dynamically composed directive grammar and its
//!   async actions
//! - **Kernel**: the `Kernel` trait and dispatch error taxonomy
//! - **CompositeKernel**: the kernel tree, routing, and per-kernel queues
//! - **KernelInvocationContext**: per-command event log, cancellation, and
//!   terminal-state machine
//! - **ProxyKernel / connection**: forwarding to kernels hosted in other
//!   processes over envelope transports
//! - **Values**: cross-kernel value sharing and the built-in `value` store

pub mod composite;
pub mod connection;
pub mod context;
pub mod directives;
pub mod kernel;
pub mod parsing;
pub mod proxy;
mod scheduler;
pub mod value_kernel;
pub mod values;

pub use composite::{CompositeKernel, InputHandler};
pub use context::{CommandOutcome, ContextState, KernelInvocationContext};
pub use kernel::{Kernel, KernelError, KernelResult};
pub use proxy::ProxyKernel;
pub use value_kernel::ValueStoreKernel;

use connection::connect_directive;
use values::{set_directive, share_directive, who_directive, whos_directive};

/// Register the standard directive set on a composite's root grammar:
/// `#!set`, `#!share`, `#!who`, `#!whos`, and `#!connect`.
pub fn install_standard_directives(composite: &CompositeKernel) {
    composite.add_directive(set_directive());
    composite.add_directive(share_directive());
    composite.add_directive(who_directive());
    composite.add_directive(whos_directive());
    composite.add_directive(connect_directive());
}
