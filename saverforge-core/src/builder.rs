//! Build pipeline: template in, two downloadable archives out.
//!
//! [`SaverBuilder`] drives the fixed stage sequence of a build: load the
//! template, probe the source video, prepare the payload through the engine,
//! rewrite the bundle tree, and package the bundle and installer archives.
//! Stage transitions and diagnostics are streamed to the caller as
//! [`BuildEvent`]s; the returned [`BuildArtifacts`] carry the final bytes.

use bytes::Bytes;
use regex::Regex;
use tokio::sync::mpsc;

use crate::bundle::{
    BundleEntry, build_installer, find_bundle_root, patch_plist, rebase, strip_signatures,
};
use crate::config::SaverConfig;
use crate::engine::EngineBridge;
use crate::orchestrator::{BuildMode, prepare_video};
use crate::probe::ProbeReport;
use crate::progress::ProgressTracker;
use crate::template::TemplateLoader;
use crate::{BundleError, Result};

/// Events streamed to the caller while a build runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    /// Current pipeline stage, suitable for a status line.
    Status(String),
    /// Overall progress in [0, 1]; values only ever increase within a build.
    Progress(f64),
    /// Diagnostic trace line for the build log.
    Log(String),
}

/// One build's inputs.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Raw source video bytes.
    pub source: Bytes,
    /// Requested display name; sanitized, empty falls back to the default.
    pub saver_name: String,
    /// Requested bundle identifier; empty generates a timestamped one.
    pub bundle_id: String,
    pub mode: BuildMode,
}

/// Finished build outputs.
#[derive(Debug)]
pub struct BuildArtifacts {
    pub bundle_zip: Vec<u8>,
    pub bundle_filename: String,
    pub installer_zip: Vec<u8>,
    pub installer_filename: String,
    /// Summary of the payload operation, e.g. "transcoded to H.264/AAC".
    pub description: String,
}

/// Orchestrates complete builds against a media engine bridge.
pub struct SaverBuilder {
    config: SaverConfig,
    template: TemplateLoader,
    events: mpsc::UnboundedSender<BuildEvent>,
    progress: ProgressTracker,
}

impl SaverBuilder {
    pub fn new(
        config: SaverConfig,
        template: TemplateLoader,
        events: mpsc::UnboundedSender<BuildEvent>,
    ) -> Self {
        let progress = ProgressTracker::new(events.clone());
        Self {
            config,
            template,
            events,
            progress,
        }
    }

    /// Shared progress tracker; clone it to feed worker ratios from an
    /// engine event pump.
    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Runs one build end to end.
    ///
    /// # Errors
    /// - `SaverError::Template` - template could not be loaded
    /// - `SaverError::Bundle` - template tree is not a usable bundle
    /// - `SaverError::Engine` - payload preparation failed
    pub async fn build(
        &self,
        bridge: &EngineBridge,
        request: BuildRequest,
    ) -> Result<BuildArtifacts> {
        self.progress.reset();
        self.status("Starting build…");

        self.status("Loading template…");
        self.progress.set(0.05);
        let mut archive = self.template.load().await?;
        let root = find_bundle_root(&archive).map_err(crate::SaverError::Bundle)?;

        let info_path = format!("{root}Contents/Info.plist");
        let plist_text = match archive.get(&info_path) {
            Some(BundleEntry::File { data, .. }) => String::from_utf8_lossy(data).into_owned(),
            _ => return Err(BundleError::MetadataMissing.into()),
        };

        let saver_name = {
            let cleaned = sanitize_name(&request.saver_name);
            if cleaned.is_empty() {
                self.config.naming.default_name.to_string()
            } else {
                cleaned
            }
        };
        let bundle_id = {
            let trimmed = request.bundle_id.trim();
            if trimmed.is_empty() {
                format!(
                    "{}.{}",
                    self.config.naming.identifier_prefix,
                    chrono::Utc::now().timestamp_millis()
                )
            } else {
                trimmed.to_string()
            }
        };
        let new_root = format!("{saver_name}.saver/");

        self.status("Reading video…");
        self.progress.set(0.15);
        let source = request.source;

        self.status("Inspecting video…");
        self.progress.set(0.25);
        self.log(format!("Mode selected: {}", request.mode));
        let probe = self.safe_probe(bridge, &source).await;
        match probe.as_ref() {
            Some(report) => {
                self.log(format!(
                    "Detected format={} video={} audio={}",
                    report.format.as_deref().unwrap_or("unknown"),
                    report.video_codec.as_deref().unwrap_or("unknown"),
                    report.audio_codec.as_deref().unwrap_or("none"),
                ));
                self.log(if report.is_compatible {
                    "Streams already H.264/AAC inside an MP4 container."
                } else if report.copy_safe {
                    "Streams look copy-safe but container needs attention."
                } else {
                    "Stream codecs/container require transcoding."
                });
            }
            None => self.log("Probe unavailable; falling back to safe defaults."),
        }

        self.status("Preparing video…");
        self.progress.set(0.30);
        let plan = prepare_video(bridge, &source, request.mode, probe.as_ref(), &self.progress)
            .await
            .map_err(crate::SaverError::Engine)?;
        for message in &plan.messages {
            self.log(message.clone());
        }
        self.progress.set(0.82);

        self.status("Updating bundle…");
        strip_signatures(&mut archive, &root);
        archive.remove(&format!("{root}Contents/Resources/payload.mp4"));
        archive.remove(&format!("{root}Contents/Resources/payload.mov"));
        archive.insert_file(
            &format!("{root}Contents/Resources/payload.mp4"),
            plan.bytes.to_vec(),
            Some(0o644),
        );
        let patched = patch_plist(
            &plist_text,
            &[
                ("CFBundleName", saver_name.as_str()),
                ("CFBundleIdentifier", bundle_id.as_str()),
            ],
        )
        .map_err(crate::SaverError::Bundle)?;
        archive.insert_file(&info_path, patched.into_bytes(), None);

        self.status("Packaging downloads…");
        self.progress.set(0.88);
        let rebased = rebase(&archive, &root, &new_root);
        let bundle_zip = rebased.to_zip_bytes().map_err(crate::SaverError::Bundle)?;
        let root_name = new_root.trim_end_matches('/');
        let installer_zip = build_installer(&rebased, root_name)
            .to_zip_bytes()
            .map_err(crate::SaverError::Bundle)?;

        self.log(format!(
            "Saved bundle as {saver_name}.saver ({}).",
            plan.description
        ));
        self.log("Install path: ~/Library/Screen Savers/");
        self.status("Done! Grab your downloads below.");
        self.progress.set(1.0);

        Ok(BuildArtifacts {
            bundle_zip,
            bundle_filename: format!("{saver_name}.saver.zip"),
            installer_zip,
            installer_filename: format!("{saver_name}-install.zip"),
            description: plan.description,
        })
    }

    // Probe failures never abort a build; downstream stages fall back to
    // safe defaults when no report is available.
    async fn safe_probe(&self, bridge: &EngineBridge, source: &Bytes) -> Option<ProbeReport> {
        self.log("Sending probe request to FFmpeg worker…");
        let name = format!("probe-{}", chrono::Utc::now().timestamp_millis());
        match bridge.probe(source.clone(), name).await {
            Ok(report) => {
                self.log("Probe response received.");
                Some(report)
            }
            Err(error) => {
                tracing::warn!("probe failed: {error}");
                self.log(format!("Probe failed: {error}"));
                None
            }
        }
    }

    fn status(&self, message: impl Into<String>) {
        let _ = self.events.send(BuildEvent::Status(message.into()));
    }

    fn log(&self, message: impl Into<String>) {
        let _ = self.events.send(BuildEvent::Log(message.into()));
    }
}

/// Strips characters unsafe for bundle and file names; keeps letters,
/// digits, spaces, `_`, `.`, and `-`.
fn sanitize_name(raw: &str) -> String {
    match Regex::new(r"[^A-Za-z0-9 _.-]+") {
        Ok(pattern) => pattern.replace_all(raw, "").trim().to_string(),
        Err(_) => raw.trim().to_string(),
    }
}
