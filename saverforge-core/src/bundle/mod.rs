//! Bundle archive transformation: ZIP tree model, root rebasing, metadata
//! patching, and installer packaging.

mod archive;
mod installer;
mod plist;
mod rebase;

pub use archive::{BundleArchive, BundleEntry};
pub use installer::{INSTALLER_SCRIPT_PATH, build_installer, installer_script};
pub use plist::patch_plist;
pub use rebase::{BUNDLE_ROOT_SUFFIX, find_bundle_root, rebase, strip_signatures};

/// Errors raised while reading, rewriting, or repackaging a bundle archive.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// The archive container could not be read or written.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Underlying I/O failed while streaming archive entries.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No top-level directory ends with the bundle-root marker.
    #[error("Template missing .saver root folder.")]
    MissingRoot,

    /// More than one top-level directory ends with the bundle-root marker.
    #[error("template contains multiple .saver roots: {roots:?}")]
    AmbiguousRoot { roots: Vec<String> },

    /// The designated metadata file is absent from the template.
    #[error("Info.plist not found in template.")]
    MetadataMissing,

    /// The metadata file is not well-formed XML.
    #[error("Invalid Info.plist XML: {reason}")]
    InvalidPlist { reason: String },

    /// The metadata document lacks the top-level property dictionary.
    #[error("Info.plist missing <dict>.")]
    PlistDictMissing,
}
