//! Client handles for kumi kernel trees.
//!
//! - `EmbeddedClient` drives a composite kernel in the same process.
//! - `StdioClient` drives a `kumi serve` host in a child process.
//!
//! Both implement [`KernelClient`], so front-ends are transport-agnostic.

mod embedded;
mod stdio;
mod traits;

pub use embedded::EmbeddedClient;
pub use stdio::StdioClient;
pub use traits::{ClientError, ClientResult, KernelClient};
