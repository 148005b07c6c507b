//! Centralized configuration for saverforge.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;

/// Central configuration for all saverforge components.
///
/// Groups related configuration settings into logical sections, owned by the
/// top-level build coordinator and passed to the components that need them.
#[derive(Debug, Clone, Default)]
pub struct SaverConfig {
    pub encode: EncodeConfig,
    pub engine: EngineConfig,
    pub naming: NamingConfig,
}

/// Default encoding parameters handed to the FFmpeg worker.
///
/// Individual requests may override these per call; the worker falls back to
/// these values when a request leaves a field unset.
#[derive(Debug, Clone)]
pub struct EncodeConfig {
    /// Constant rate factor for H.264 transcodes
    pub crf: String,
    /// x264 preset name
    pub preset: String,
    /// AAC audio bitrate
    pub audio_bitrate: String,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            crf: "20".to_string(),
            preset: "medium".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

/// Media engine process configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// FFmpeg binary to invoke
    pub ffmpeg_path: PathBuf,
    /// Progress ratio ceiling reported during transcode runs
    pub transcode_progress_cap: f64,
    /// Progress ratio ceiling reported during remux runs
    pub remux_progress_cap: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            transcode_progress_cap: 0.95,
            remux_progress_cap: 0.6,
        }
    }
}

/// Naming defaults for produced bundles.
#[derive(Debug, Clone)]
pub struct NamingConfig {
    /// Display name used when the sanitized user input is empty
    pub default_name: &'static str,
    /// Prefix for generated reverse-domain bundle identifiers
    pub identifier_prefix: &'static str,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            default_name: "MySaver",
            identifier_prefix: "local.videosaver",
        }
    }
}
