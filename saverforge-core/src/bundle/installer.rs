//! Installer archive assembly.
//!
//! The installer download wraps the finished bundle tree together with a
//! double-clickable shell script that copies the bundle into the user's
//! screen-saver directory.

use super::archive::{BundleArchive, BundleEntry};
use super::rebase::resolve_permissions;

/// Path of the install script at the installer archive's top level.
pub const INSTALLER_SCRIPT_PATH: &str = "install.command";

/// Shell script that installs the bundle named `name` (including its
/// `.saver` suffix) from the script's own directory.
pub fn installer_script(name: &str) -> String {
    format!(
        r#"#!/usr/bin/env bash
set -euo pipefail
NAME="${{1:-{name}}}"
SRC="$(cd "$(dirname "$0")" && pwd)/$NAME"
DST="$HOME/Library/Screen Savers"
mkdir -p "$DST"
cp -R "$SRC" "$DST/"
echo "Installed to: $DST/$NAME"
open "$DST"
"#
    )
}

/// Builds the installer archive: every entry of the finished bundle plus an
/// executable install script at the top level.
///
/// `root_name` is the bundle's root directory without a trailing separator,
/// e.g. `MySaver.saver`. Files that somehow lost their permission bits fall
/// back to the same rule used during rebasing.
pub fn build_installer(bundle: &BundleArchive, root_name: &str) -> BundleArchive {
    let root = format!("{root_name}/");
    let mut installer = BundleArchive::new();

    for (path, entry) in bundle.entries() {
        match entry {
            BundleEntry::Directory => installer.insert_directory(path),
            BundleEntry::File { data, unix_mode } => {
                let mode = resolve_permissions(path, &root, *unix_mode);
                installer.insert_file(path, data.clone(), Some(mode));
            }
        }
    }

    installer.insert_file(
        INSTALLER_SCRIPT_PATH,
        installer_script(root_name).into_bytes(),
        Some(0o755),
    );
    installer
}
