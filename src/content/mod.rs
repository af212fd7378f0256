//! Per-host static content.
//!
//! The [HTTP listeners][crate::http] hand every request's host and path to a [`ContentStore`],
//! which either returns the content to serve or nothing, in which case the client gets a 404.
//!
//! Two implementations are provided, [`file::FileContentStore`] and
//! [`memory::InMemoryContentStore`]. The former serves `<content_dir>/<host>/<path>` from disk,
//! the latter serves a fixed map and is handy for tests and demos.

use crate::error::Error;
use std::sync::Arc;

pub mod file;
pub mod memory;

#[allow(clippy::module_name_repetitions)]
pub use file::FileContentStore;
#[allow(clippy::module_name_repetitions)]
pub use memory::InMemoryContentStore;

/// `DynContentStore` is a type alias for a [`ContentStore`] shared by both HTTP listeners. The
/// store is read-only, so no lock is needed.
#[allow(clippy::module_name_repetitions)]
pub type DynContentStore = Arc<dyn ContentStore + Send + Sync>;

/// Bytes to serve for a host and path, and their media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// An async trait mapping a request's host and path to static content.
#[async_trait::async_trait]
#[allow(clippy::module_name_repetitions)]
pub trait ContentStore {
    /// Look up the content for a lowercased host (without port) and a request path.
    ///
    /// Returns `Ok(None)` when there is nothing to serve.
    async fn fetch(&self, host: &str, path: &str) -> Result<Option<Content>, Error>;
}
