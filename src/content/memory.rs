use crate::content::{Content, ContentStore};
use crate::error::Error;
use std::collections::HashMap;

/// A fixed, in-memory map of `(host, path)` to content.
#[derive(Default, Debug, Clone)]
pub struct InMemoryContentStore {
    content: HashMap<(String, String), Content>,
}

impl InMemoryContentStore {
    /// Add content for a host and path. The host is lowercased; the path is kept as given.
    #[must_use]
    pub fn with(
        mut self,
        host: &str,
        path: &str,
        content_type: &str,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        self.content.insert(
            (host.to_lowercase(), path.to_string()),
            Content {
                body: body.into(),
                content_type: content_type.to_string(),
            },
        );
        self
    }
}

#[async_trait::async_trait]
impl ContentStore for InMemoryContentStore {
    async fn fetch(&self, host: &str, path: &str) -> Result<Option<Content>, Error> {
        Ok(self
            .content
            .get(&(host.to_string(), path.to_string()))
            .cloned())
    }
}
