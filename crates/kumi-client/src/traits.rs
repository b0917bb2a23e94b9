//! Common trait for kernel clients.

use async_trait::async_trait;
use thiserror::Error;

use kumi_types::{FormattedValue, KernelEvent, ValueInfo};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur when using a kernel client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection to the kernel failed or closed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The kernel reported a failed command.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Common interface for driving a kumi kernel tree.
///
/// Both `EmbeddedClient` and `StdioClient` implement this, so front-ends can
/// work against either an in-process composite or a remote host.
#[async_trait]
pub trait KernelClient: Send + Sync {
    /// Submit a cell and return every event it produced, terminal included.
    ///
    /// A failed command is not an `Err` — the failure event is in the
    /// returned stream, mirroring the dispatch boundary.
    async fn submit(&self, code: &str) -> ClientResult<Vec<KernelEvent>>;

    /// Request a named value from a kernel.
    async fn request_value(&self, kernel: &str, name: &str) -> ClientResult<FormattedValue>;

    /// List the values a kernel holds.
    async fn request_value_infos(&self, kernel: &str) -> ClientResult<Vec<ValueInfo>>;

    /// Cancel the currently executing command.
    async fn cancel(&self) -> ClientResult<()>;

    /// Shut the kernel host down.
    async fn quit(&self) -> ClientResult<()>;
}
