use super::types::{Codec, ConversionRequest};
use crate::engine::probe::{InputInfo, probe_input};
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Video file extensions picked up by discovery
const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "m4v", "mov", "avi", "webm"];

/// How discovered files become requests
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub output_codec: Codec,
    pub quality: Option<u32>,
    pub preserve_hdr: bool,
    pub output_dir: Option<PathBuf>,
    /// Appended to the input stem; `{codec}` expands to the output codec name
    pub filename_suffix: String,
    /// Only convert inputs whose probed codec matches (e.g. "av1")
    pub input_codec: Option<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            output_codec: Codec::Hevc,
            quality: None,
            preserve_hdr: true,
            output_dir: None,
            filename_suffix: "_{codec}".to_string(),
            input_codec: None,
        }
    }
}

/// Check if a path has a video file extension
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Scan a directory recursively for video files, sorted for a stable order
pub fn scan(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_video_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

/// `<output_dir or input dir>/<stem><suffix>.<container>`
pub fn derive_output_path(input: &Path, settings: &DiscoverySettings) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let suffix = expanded_suffix(settings);
    let file_name = format!(
        "{}{}.{}",
        stem,
        suffix,
        settings.output_codec.container().extension()
    );
    let dir = settings
        .output_dir
        .clone()
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(file_name)
}

fn expanded_suffix(settings: &DiscoverySettings) -> String {
    settings
        .filename_suffix
        .replace("{codec}", settings.output_codec.name())
}

/// Files this tool would have produced, so a rerun never converts its own output
pub fn is_own_output(path: &Path, settings: &DiscoverySettings) -> bool {
    let suffix = expanded_suffix(settings);
    let stem_matches = !suffix.is_empty()
        && path
            .file_stem()
            .is_some_and(|s| s.to_string_lossy().ends_with(&suffix));
    stem_matches || path == derive_output_path(path, settings)
}

/// Build a request from a path and (optionally) its probe result
pub fn build_request(
    input_path: PathBuf,
    info: Option<&InputInfo>,
    settings: &DiscoverySettings,
) -> ConversionRequest {
    let output_path = derive_output_path(&input_path, settings);
    let mut request = ConversionRequest::new(input_path, output_path, settings.output_codec);
    if let Some(q) = settings.quality {
        request.quality = q;
    }
    if let Some(info) = info {
        request.input_codec = Some(info.codec.clone());
        request.duration_s = info.duration;
        request.hdr_signaling = Some(info.signaling.clone());
        request.hdr_intent = settings.preserve_hdr && info.is_hdr;
    }
    request
}

/// Probe every file and keep the ones matching the input codec filter.
///
/// Files ffprobe can't read are still converted when no filter is set, so the
/// engine gets to report the real error.
pub fn build_requests(files: Vec<PathBuf>, ffprobe: &Path, settings: &DiscoverySettings) -> Vec<ConversionRequest> {
    let mut requests = Vec::new();
    for path in files {
        if is_own_output(&path, settings) {
            debug!(input = %path.display(), "skipping, looks like a previous output");
            continue;
        }

        let info = match probe_input(ffprobe, &path) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(input = %path.display(), error = %e, "probe failed");
                None
            }
        };

        if let Some(wanted) = settings.input_codec.as_deref() {
            let matches = info
                .as_ref()
                .is_some_and(|i| i.codec.eq_ignore_ascii_case(wanted));
            if !matches {
                debug!(input = %path.display(), wanted, "skipping, input codec does not match");
                continue;
            }
        }

        requests.push(build_request(path, info.as_ref(), settings));
    }
    requests
}

/// Scan and probe a directory into an ordered request list
pub fn discover(root: &Path, ffprobe: &Path, settings: &DiscoverySettings) -> Result<Vec<ConversionRequest>> {
    let files = scan(root)?;
    Ok(build_requests(files, ffprobe, settings))
}
