//! Saverforge Core - Video-to-screen-saver build pipeline
//!
//! This crate provides the building blocks for packaging a video file as a
//! macOS screen-saver bundle: codec compatibility probing, transcode/remux
//! orchestration against an FFmpeg worker, and template bundle rewriting.

pub mod builder;
pub mod bundle;
pub mod config;
pub mod engine;
pub mod orchestrator;
pub mod probe;
pub mod progress;
pub mod template;

// Re-export main types for convenient access
pub use builder::{BuildArtifacts, BuildEvent, BuildRequest, SaverBuilder};
pub use bundle::{BundleArchive, BundleError};
pub use config::SaverConfig;
pub use engine::{EngineBridge, EngineError, spawn_engine};
pub use orchestrator::{BuildMode, TranscodePlan};
pub use probe::ProbeReport;
pub use template::{TemplateError, TemplateLoader};

/// Core errors that can bubble up from any saverforge subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SaverError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SaverError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            SaverError::Engine(e) => e.to_string(),
            SaverError::Bundle(BundleError::MissingRoot) => {
                "Template missing .saver root folder.".to_string()
            }
            SaverError::Bundle(BundleError::AmbiguousRoot { .. }) => {
                "Template contains more than one .saver root folder.".to_string()
            }
            SaverError::Bundle(BundleError::MetadataMissing) => {
                "Info.plist not found in template.".to_string()
            }
            SaverError::Bundle(e) => e.to_string(),
            SaverError::Template(e) => e.to_string(),
            SaverError::Io(_) => "File system error occurred".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SaverError>;
