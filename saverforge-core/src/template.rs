//! Template bundle acquisition.
//!
//! The template is a ZIP of a stock `.saver` bundle, loaded from the local
//! filesystem or fetched over HTTP. Raw bytes are cached per loader so
//! repeated builds reuse one download, while every load parses a fresh
//! archive so callers can mutate it freely.

use bytes::Bytes;
use tokio::sync::Mutex;
use url::Url;

use crate::bundle::{BundleArchive, BundleError};

/// Errors raised while locating or fetching the template archive.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The server answered with a non-success status.
    #[error("template download failed: {url} returned {status}")]
    Fetch { url: String, status: u16 },

    /// The HTTP request itself failed.
    #[error("template request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Reading the template from disk failed.
    #[error("template read failed: {0}")]
    Io(#[from] std::io::Error),

    /// The fetched bytes are not a usable bundle archive.
    #[error(transparent)]
    Bundle(#[from] BundleError),
}

enum TemplateSource {
    Path(std::path::PathBuf),
    Url(Url),
}

/// Loads and caches the template bundle.
pub struct TemplateLoader {
    source: TemplateSource,
    cached: Mutex<Option<Bytes>>,
}

impl TemplateLoader {
    /// Creates a loader from a location string: `http://` and `https://`
    /// locations are fetched, anything else is treated as a filesystem path.
    pub fn new(location: &str) -> Self {
        let source = match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => TemplateSource::Url(url),
            _ => TemplateSource::Path(std::path::PathBuf::from(location)),
        };
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    /// Returns a freshly parsed template archive, fetching the bytes on
    /// first use.
    ///
    /// # Errors
    /// - `TemplateError::Fetch` / `TemplateError::Request` - download failed
    /// - `TemplateError::Io` - local read failed
    /// - `TemplateError::Bundle` - the bytes are not a valid ZIP
    pub async fn load(&self) -> Result<BundleArchive, TemplateError> {
        let bytes = self.fetch_bytes().await?;
        Ok(BundleArchive::from_zip_bytes(&bytes)?)
    }

    async fn fetch_bytes(&self) -> Result<Bytes, TemplateError> {
        let mut cached = self.cached.lock().await;
        if let Some(bytes) = cached.as_ref() {
            return Ok(bytes.clone());
        }

        let bytes = match &self.source {
            TemplateSource::Path(path) => Bytes::from(tokio::fs::read(path).await?),
            TemplateSource::Url(url) => {
                let response = reqwest::get(url.clone()).await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(TemplateError::Fetch {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                response.bytes().await?
            }
        };

        *cached = Some(bytes.clone());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn template_zip_bytes() -> Vec<u8> {
        let mut archive = BundleArchive::new();
        archive.insert_directory("Stock.saver/");
        archive.insert_file("Stock.saver/Contents/Info.plist", b"<dict/>".to_vec(), None);
        archive.to_zip_bytes().unwrap()
    }

    #[tokio::test]
    async fn test_loads_from_path_and_caches() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&template_zip_bytes()).unwrap();
        file.flush().unwrap();

        let loader = TemplateLoader::new(file.path().to_str().unwrap());
        let first = loader.load().await.unwrap();
        assert!(first.contains("Stock.saver/Contents/Info.plist"));

        // Deleting the file after the first load must not break later loads.
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
        let second = loader.load().await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_loads_are_independent_archives() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&template_zip_bytes()).unwrap();
        file.flush().unwrap();

        let loader = TemplateLoader::new(file.path().to_str().unwrap());
        let mut first = loader.load().await.unwrap();
        first.remove("Stock.saver/Contents/Info.plist");

        let second = loader.load().await.unwrap();
        assert!(second.contains("Stock.saver/Contents/Info.plist"));
    }

    #[tokio::test]
    async fn test_missing_path_reports_io_error() {
        let loader = TemplateLoader::new("/definitely/not/here.zip");
        assert!(matches!(loader.load().await, Err(TemplateError::Io(_))));
    }

    #[tokio::test]
    async fn test_invalid_archive_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a zip").unwrap();
        file.flush().unwrap();

        let loader = TemplateLoader::new(file.path().to_str().unwrap());
        assert!(matches!(loader.load().await, Err(TemplateError::Bundle(_))));
    }
}
