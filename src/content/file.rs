//! A filesystem-backed implementation of the [`ContentStore`][super::ContentStore] trait.
//!
//! Content for `https://example.com/index.html` lives at
//! `<root>/example.com/index.html`.
use crate::content::{Content, ContentStore};
use crate::error::Error;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct FileContentStore {
    root: PathBuf,
}

impl FileContentStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        FileContentStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Map a host and request path onto a file below the root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContentPath`] if the host isn't a single path component, or if
    /// the path tries to climb out of the host directory.
    pub fn resolve_path(&self, host: &str, path: &str) -> Result<PathBuf, Error> {
        let invalid = || Error::InvalidContentPath {
            host: host.to_string(),
            path: path.to_string(),
        };

        let mut host_components = Path::new(host).components();
        let host_dir = match (host_components.next(), host_components.next()) {
            (Some(Component::Normal(dir)), None) => dir,
            _ => return Err(invalid()),
        };

        let mut full_path = self.root.join(host_dir);
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(c) => full_path.push(c),
                Component::CurDir => {}
                _ => return Err(invalid()),
            }
        }
        Ok(full_path)
    }
}

#[async_trait::async_trait]
impl ContentStore for FileContentStore {
    async fn fetch(&self, host: &str, path: &str) -> Result<Option<Content>, Error> {
        let file_path = self.resolve_path(host, path)?;
        match fs::metadata(&file_path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::IO(err)),
        }

        let body = fs::read(&file_path).await?;
        let content_type = mime_guess::from_path(&file_path)
            .first_or_octet_stream()
            .to_string();
        Ok(Some(Content { body, content_type }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, FileContentStore) {
        let dir = TempDir::new().unwrap();
        let host_dir = dir.path().join("example.com");
        fs::create_dir_all(host_dir.join("assets")).await.unwrap();
        fs::write(host_dir.join("index.html"), b"<h1>not the real example</h1>")
            .await
            .unwrap();
        fs::write(host_dir.join("assets/app.js"), b"console.log('mitm');")
            .await
            .unwrap();
        fs::write(dir.path().join("secret.txt"), b"outside").await.unwrap();
        let store = FileContentStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn serves_files_below_host_dir() {
        let (_dir, store) = store().await;

        let content = store
            .fetch("example.com", "/index.html")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content.body, b"<h1>not the real example</h1>");
        assert_eq!(content.content_type, "text/html");

        let content = store
            .fetch("example.com", "/assets/app.js")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content.body, b"console.log('mitm');");
        assert!(content.content_type.contains("javascript"));
    }

    #[tokio::test]
    async fn missing_files_and_directories_are_none() {
        let (_dir, store) = store().await;
        assert_eq!(store.fetch("example.com", "/nope.html").await.unwrap(), None);
        assert_eq!(store.fetch("example.com", "/assets").await.unwrap(), None);
        assert_eq!(store.fetch("example.com", "/").await.unwrap(), None);
        assert_eq!(store.fetch("other.example", "/index.html").await.unwrap(), None);
    }

    #[test]
    fn resolve_rejects_traversal() {
        let store = FileContentStore::new("/srv/mitm");
        assert_eq!(
            store.resolve_path("example.com", "/a/./b.txt").unwrap(),
            PathBuf::from("/srv/mitm/example.com/a/b.txt")
        );
        for (host, path) in [
            ("example.com", "/../secret.txt"),
            ("example.com", "/a/../../secret.txt"),
            ("..", "/secret.txt"),
            ("a/b", "/index.html"),
            ("", "/index.html"),
        ] {
            assert!(
                matches!(
                    store.resolve_path(host, path),
                    Err(Error::InvalidContentPath { .. })
                ),
                "{host} {path}"
            );
        }
    }
}
