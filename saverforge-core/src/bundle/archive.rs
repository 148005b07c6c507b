//! In-memory archive model.
//!
//! An archive is an ordered mapping from forward-slash path to entry, with
//! directory and file entries modeled explicitly rather than inferred from
//! path suffixes. Directory keys carry a trailing separator; file keys do
//! not. Unix permission bits are kept per file entry when the source archive
//! stored them.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::BundleError;

/// One archive entry: a directory marker or a file with bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleEntry {
    Directory,
    File {
        data: Vec<u8>,
        /// Stored permission bits, when the source archive recorded them.
        unix_mode: Option<u32>,
    },
}

/// Ordered path-keyed archive with explicit directory semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleArchive {
    entries: BTreeMap<String, BundleEntry>,
}

impl BundleArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses ZIP bytes into the archive model.
    ///
    /// # Errors
    /// - `BundleError::Zip` - malformed ZIP container
    /// - `BundleError::Io` - entry decompression failed
    pub fn from_zip_bytes(bytes: &[u8]) -> Result<Self, BundleError> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut archive = Self::new();

        for index in 0..zip.len() {
            let mut file = zip.by_index(index)?;
            let path = file.name().to_string();
            if file.is_dir() {
                archive.insert_directory(&path);
            } else {
                let mut data = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut data)?;
                let unix_mode = file.unix_mode().map(|mode| mode & 0o777).filter(|mode| *mode != 0);
                archive.insert_file(&path, data, unix_mode);
            }
        }

        Ok(archive)
    }

    /// Serializes the archive to ZIP bytes (Deflate level 6, Unix platform
    /// permission bits).
    ///
    /// Files without stored permissions are written as `0o644`; directories
    /// as `0o755`.
    pub fn to_zip_bytes(&self) -> Result<Vec<u8>, BundleError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let base = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(6));

        for (path, entry) in &self.entries {
            match entry {
                BundleEntry::Directory => {
                    writer.add_directory(path.trim_end_matches('/'), base.unix_permissions(0o755))?;
                }
                BundleEntry::File { data, unix_mode } => {
                    writer.start_file(path.as_str(), base.unix_permissions(unix_mode.unwrap_or(0o644)))?;
                    writer.write_all(data)?;
                }
            }
        }

        Ok(writer.finish()?.into_inner())
    }

    /// Inserts or replaces a file entry.
    pub fn insert_file(&mut self, path: &str, data: Vec<u8>, unix_mode: Option<u32>) {
        self.entries
            .insert(path.to_string(), BundleEntry::File { data, unix_mode });
    }

    /// Inserts a directory entry; the key is normalized to end with `/`.
    pub fn insert_directory(&mut self, path: &str) {
        let key = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        self.entries.insert(key, BundleEntry::Directory);
    }

    /// Removes a file, or a directory together with everything beneath it.
    /// Returns the number of entries removed; zero when the path is absent.
    pub fn remove(&mut self, path: &str) -> usize {
        let base = path.trim_end_matches('/');
        let prefix = format!("{base}/");
        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|key| *key == base || *key == &prefix || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in &doomed {
            self.entries.remove(key);
        }
        doomed.len()
    }

    pub fn get(&self, path: &str) -> Option<&BundleEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Entries in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &BundleEntry)> {
        self.entries.iter()
    }

    /// Paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_archive() -> BundleArchive {
        let mut archive = BundleArchive::new();
        archive.insert_directory("Root.saver/");
        archive.insert_directory("Root.saver/Contents/");
        archive.insert_file(
            "Root.saver/Contents/Info.plist",
            b"<plist><dict/></plist>".to_vec(),
            None,
        );
        archive.insert_file(
            "Root.saver/Contents/MacOS/Root",
            b"\xCF\xFA\xED\xFE".to_vec(),
            Some(0o755),
        );
        archive
    }

    #[test]
    fn test_zip_round_trip_preserves_entries() {
        let archive = sample_archive();
        let bytes = archive.to_zip_bytes().unwrap();
        let restored = BundleArchive::from_zip_bytes(&bytes).unwrap();

        let paths: Vec<&String> = restored.paths().collect();
        assert_eq!(
            paths,
            vec![
                "Root.saver/",
                "Root.saver/Contents/",
                "Root.saver/Contents/Info.plist",
                "Root.saver/Contents/MacOS/Root",
            ]
        );
        match restored.get("Root.saver/Contents/MacOS/Root") {
            Some(BundleEntry::File { data, unix_mode }) => {
                assert_eq!(data, b"\xCF\xFA\xED\xFE");
                assert_eq!(*unix_mode, Some(0o755));
            }
            other => panic!("expected file entry, got {other:?}"),
        }
        assert!(matches!(restored.get("Root.saver/"), Some(BundleEntry::Directory)));
    }

    #[test]
    fn test_unstored_permissions_default_to_644_after_round_trip() {
        let archive = sample_archive();
        let bytes = archive.to_zip_bytes().unwrap();
        let restored = BundleArchive::from_zip_bytes(&bytes).unwrap();

        match restored.get("Root.saver/Contents/Info.plist") {
            Some(BundleEntry::File { unix_mode, .. }) => assert_eq!(*unix_mode, Some(0o644)),
            other => panic!("expected file entry, got {other:?}"),
        }
    }

    #[test]
    fn test_remove_file() {
        let mut archive = sample_archive();
        assert_eq!(archive.remove("Root.saver/Contents/Info.plist"), 1);
        assert!(!archive.contains("Root.saver/Contents/Info.plist"));
        assert_eq!(archive.remove("Root.saver/Contents/Info.plist"), 0);
    }

    #[test]
    fn test_remove_directory_removes_subtree() {
        let mut archive = sample_archive();
        let removed = archive.remove("Root.saver/Contents/");
        assert_eq!(removed, 3);
        assert_eq!(archive.len(), 1);
        assert!(archive.contains("Root.saver/"));
    }

    #[test]
    fn test_invalid_zip_bytes_rejected() {
        let result = BundleArchive::from_zip_bytes(b"definitely not a zip");
        assert!(matches!(result, Err(BundleError::Zip(_))));
    }
}
