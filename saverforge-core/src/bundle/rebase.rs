//! Bundle-root discovery and archive rebasing.
//!
//! A template archive is rooted under exactly one top-level directory ending
//! in `.saver`. Rebasing renames that root throughout every entry path while
//! resolving permission bits for files that never stored any.

use std::collections::BTreeSet;

use super::archive::{BundleArchive, BundleEntry};
use super::BundleError;

/// Suffix marking the bundle's top-level directory.
pub const BUNDLE_ROOT_SUFFIX: &str = ".saver";

/// Directory (relative to the bundle root) whose files default to 0o755.
const EXECUTABLE_DIR: &str = "Contents/MacOS/";

/// Locates the single top-level `.saver` directory and returns it with a
/// trailing separator.
///
/// # Errors
/// - `BundleError::MissingRoot` - no top-level segment ends with `.saver`
/// - `BundleError::AmbiguousRoot` - more than one such segment exists
pub fn find_bundle_root(archive: &BundleArchive) -> Result<String, BundleError> {
    let mut roots = BTreeSet::new();
    for path in archive.paths() {
        if let Some(head) = path.split('/').next() {
            if !head.is_empty() && head.ends_with(BUNDLE_ROOT_SUFFIX) {
                roots.insert(head.to_string());
            }
        }
    }

    let mut roots: Vec<String> = roots.into_iter().collect();
    match roots.len() {
        0 => Err(BundleError::MissingRoot),
        1 => Ok(format!("{}/", roots.remove(0))),
        _ => Err(BundleError::AmbiguousRoot { roots }),
    }
}

/// Produces a new archive with the leading root segment of every entry path
/// replaced.
///
/// Both roots must end with `/`. When the roots are equal the archive is
/// cloned unchanged. Entries outside the old root pass through untouched;
/// stray top-level entries in malformed templates are tolerated rather than
/// dropped. File permissions resolve to the stored bits, else 0o755 under
/// the executable directory, else 0o644.
pub fn rebase(archive: &BundleArchive, old_root: &str, new_root: &str) -> BundleArchive {
    if old_root == new_root {
        return archive.clone();
    }

    let mut rebased = BundleArchive::new();
    for (path, entry) in archive.entries() {
        let target = match path.strip_prefix(old_root) {
            Some(rest) => format!("{new_root}{rest}"),
            None => path.clone(),
        };
        match entry {
            BundleEntry::Directory => rebased.insert_directory(&target),
            BundleEntry::File { data, unix_mode } => {
                let mode = resolve_permissions(&target, new_root, *unix_mode);
                rebased.insert_file(&target, data.clone(), Some(mode));
            }
        }
    }
    rebased
}

/// Permission bits for a file at `target` under the given bundle root.
pub fn resolve_permissions(target: &str, root: &str, stored: Option<u32>) -> u32 {
    if let Some(mode) = stored {
        return mode;
    }
    if target.starts_with(&format!("{root}{EXECUTABLE_DIR}")) && !target.ends_with('/') {
        0o755
    } else {
        0o644
    }
}

/// Removes code-signing residue from the archive. Output bundles are never
/// expected to carry a valid signature.
pub fn strip_signatures(archive: &mut BundleArchive, root: &str) {
    archive.remove(&format!("{root}Contents/_CodeSignature/"));
    archive.remove(&format!("{root}Contents/_CodeSignature/CodeResources"));
    archive.remove(&format!("{root}Contents/CodeResources"));
}
