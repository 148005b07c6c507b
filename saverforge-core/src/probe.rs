//! Codec compatibility classification from FFmpeg diagnostic output.
//!
//! FFmpeg's `-i` run prints a line-oriented summary of the input file. This
//! module parses that text into a [`ProbeReport`] and decides whether the
//! streams can be copied into an MP4 container without re-encoding. The
//! diagnostic format is externally defined, so parsing is deliberately
//! heuristic: fixed line markers and first-comma truncation, no grammar.

use regex::Regex;

/// Classification of a probed video derived from FFmpeg diagnostics.
///
/// Immutable once created; a fresh report is derived per build attempt.
/// Invariant: `is_compatible` implies `copy_safe` implies
/// (`container_ok` && `video_ok` && `audio_ok`).
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    /// Raw container format token from the input summary line
    pub format: Option<String>,
    /// Normalized (lowercased, first-token) container name
    pub container: Option<String>,
    /// Primary video stream codec token
    pub video_codec: Option<String>,
    /// Primary audio stream codec token, if an audio stream exists
    pub audio_codec: Option<String>,
    /// Whether an audio stream was detected
    pub has_audio: bool,
    /// Container is already in the MP4 family
    pub container_ok: bool,
    /// Video codec is H.264/AVC
    pub video_ok: bool,
    /// No audio, or audio codec is AAC
    pub audio_ok: bool,
    /// Streams can be copied into MP4 without re-encoding
    pub copy_safe: bool,
    /// No transcode and no remux needed.
    ///
    /// Currently identical to `copy_safe`; kept separate so stricter future
    /// policies (e.g. requiring faststart already present) can diverge
    /// without changing the `copy_safe` contract.
    pub is_compatible: bool,
}

/// Parses FFmpeg diagnostic text into a [`ProbeReport`].
///
/// Pure function of the input text; never fails. Unrecognized or empty
/// input yields a report with every compatibility flag false and
/// `audio_ok` true (no audio stream found).
pub fn analyze_diagnostics(text: &str) -> ProbeReport {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    let input = lines.iter().find(|line| line.starts_with("Input #0"));
    let video = lines
        .iter()
        .find(|line| line.contains("Stream #0:0") && line.contains("Video:"));
    let audio = lines
        .iter()
        .find(|line| line.contains("Stream #0:") && line.contains("Audio:"));

    let format = input.and_then(|line| extract_format(line));
    let video_codec = video.and_then(|line| codec_token(line, "Video:"));
    let audio_codec = audio.and_then(|line| codec_token(line, "Audio:"));

    let normalized = format.as_deref().unwrap_or("").to_lowercase();
    let container = normalized
        .split(',')
        .map(str::trim)
        .next()
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    let container_ok = matches_pattern(r"\bmp4\b|\bm4v\b|\bisom\b", &normalized);
    let video_ok = video_codec
        .as_deref()
        .is_some_and(|codec| matches_pattern(r"(?i)h\.?264|avc1", codec));
    let audio_ok = match audio_codec.as_deref() {
        None => true,
        Some(codec) => matches_pattern(r"(?i)aac|mp4a", codec),
    };
    let copy_safe = container_ok && video_ok && audio_ok;

    ProbeReport {
        format,
        container,
        has_audio: audio_codec.is_some(),
        video_codec,
        audio_codec,
        container_ok,
        video_ok,
        audio_ok,
        copy_safe,
        is_compatible: copy_safe,
    }
}

/// Extracts the container format token after `Input #0,`, truncated at the
/// first comma.
fn extract_format(line: &str) -> Option<String> {
    let rest = line.strip_prefix("Input #0,")?;
    let token = rest.split(',').next()?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Extracts the codec token following a stream marker, truncated at the
/// first comma.
fn codec_token(line: &str, marker: &str) -> Option<String> {
    let idx = line.find(marker)?;
    let token = line[idx + marker.len()..].split(',').next()?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn matches_pattern(pattern: &str, text: &str) -> bool {
    Regex::new(pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const MP4_H264_AAC: &str = "\
Input #0, mp4, from 'movie.mp4':
  Duration: 00:01:30.00, start: 0.000000, bitrate: 1000 kb/s
    Stream #0:0(und): Video: h264 (High) (avc1 / 0x31637661), yuv420p, 1920x1080, 30 fps
    Stream #0:1(und): Audio: aac (LC) (mp4a / 0x6134706D), 48000 Hz, stereo";

    const MKV_H265_OPUS: &str = "\
Input #0, matroska, from 'movie.mkv':
  Duration: 00:02:00.00, start: 0.000000, bitrate: 2000 kb/s
    Stream #0:0: Video: hevc (Main), yuv420p, 3840x2160, 24 fps
    Stream #0:1: Audio: opus, 48000 Hz, stereo";

    const MP4_H264_SILENT: &str = "\
Input #0, mp4, from 'silent.mp4':
  Duration: 00:00:10.00, start: 0.000000, bitrate: 800 kb/s
    Stream #0:0(und): Video: h264 (Main) (avc1 / 0x31637661), yuv420p, 1280x720, 25 fps";

    // The mov demuxer reports a compound name; first-comma truncation keeps
    // only "mov", which is outside the MP4 family.
    const MOV_COMPOUND_NAME: &str = "\
Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'clip.mov':
  Duration: 00:00:05.00, start: 0.000000, bitrate: 500 kb/s
    Stream #0:0(und): Video: h264 (High) (avc1 / 0x31637661), yuv420p, 640x480
    Stream #0:1(und): Audio: aac (LC) (mp4a / 0x6134706D), 44100 Hz, stereo";

    #[test]
    fn test_mp4_h264_aac_is_compatible() {
        let report = analyze_diagnostics(MP4_H264_AAC);
        assert_eq!(report.format.as_deref(), Some("mp4"));
        assert_eq!(report.container.as_deref(), Some("mp4"));
        assert!(report.container_ok);
        assert!(report.video_ok);
        assert!(report.audio_ok);
        assert!(report.has_audio);
        assert!(report.copy_safe);
        assert!(report.is_compatible);
    }

    #[test]
    fn test_mkv_h265_requires_transcode() {
        let report = analyze_diagnostics(MKV_H265_OPUS);
        assert_eq!(report.container.as_deref(), Some("matroska"));
        assert!(!report.container_ok);
        assert!(!report.video_ok);
        assert!(!report.audio_ok);
        assert!(!report.copy_safe);
        assert!(!report.is_compatible);
    }

    #[test]
    fn test_silent_video_audio_ok() {
        let report = analyze_diagnostics(MP4_H264_SILENT);
        assert!(!report.has_audio);
        assert!(report.audio_ok);
        assert_eq!(report.audio_codec, None);
        assert!(report.copy_safe);
    }

    #[test]
    fn test_compound_demuxer_name_truncates_to_mov() {
        let report = analyze_diagnostics(MOV_COMPOUND_NAME);
        assert_eq!(report.format.as_deref(), Some("mov"));
        assert!(!report.container_ok);
        assert!(report.video_ok);
        assert!(report.audio_ok);
        assert!(!report.copy_safe);
    }

    #[test]
    fn test_codec_tokens_extracted() {
        let report = analyze_diagnostics(MP4_H264_AAC);
        assert_eq!(
            report.video_codec.as_deref(),
            Some("h264 (High) (avc1 / 0x31637661)")
        );
        assert_eq!(
            report.audio_codec.as_deref(),
            Some("aac (LC) (mp4a / 0x6134706D)")
        );
    }

    #[test]
    fn test_empty_and_garbage_input() {
        for text in ["", "not ffmpeg output at all", "Input #0"] {
            let report = analyze_diagnostics(text);
            assert_eq!(report.format, None);
            assert!(!report.container_ok);
            assert!(!report.video_ok);
            assert!(report.audio_ok);
            assert!(!report.copy_safe);
            assert!(!report.is_compatible);
        }
    }

    proptest! {
        // For any input text the flag implication chain holds.
        #[test]
        fn compatibility_implies_copy_safe(text in ".{0,400}") {
            let report = analyze_diagnostics(&text);
            if report.is_compatible {
                prop_assert!(report.copy_safe);
            }
            if report.copy_safe {
                prop_assert!(report.container_ok && report.video_ok && report.audio_ok);
            }
        }
    }
}
