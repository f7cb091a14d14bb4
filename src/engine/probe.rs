// Input probing using ffprobe

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

use crate::engine::core::HdrSignaling;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run ffprobe: {0}")]
    Launch(#[from] std::io::Error),
    #[error("ffprobe failed: {0}")]
    Failed(String),
    #[error("failed to parse ffprobe JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no video stream found")]
    NoVideoStream,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    duration: Option<String>,
    color_primaries: Option<String>,
    color_transfer: Option<String>,
    color_space: Option<String>,
    color_range: Option<String>,
    #[serde(default)]
    side_data_list: Vec<serde_json::Value>,
}

/// What the core needs to know about an input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputInfo {
    pub codec: String,
    pub duration: Option<f64>,
    pub signaling: HdrSignaling,
    pub is_hdr: bool,
}

/// `-v error` keeps stderr quiet on success but says why a probe failed
fn probe_command(ffprobe: &Path, input_path: &Path) -> Command {
    let mut cmd = Command::new(ffprobe);
    cmd.args([
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ])
    .arg(input_path);
    cmd
}

/// Probe input file using ffprobe to get video metadata
pub fn probe_input(ffprobe: &Path, input_path: &Path) -> Result<InputInfo, ProbeError> {
    let output = probe_command(ffprobe, input_path).output()?;

    if !output.status.success() {
        return Err(ProbeError::Failed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    parse_probe_json(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `ffprobe -show_streams -show_format` JSON
pub fn parse_probe_json(json: &str) -> Result<InputInfo, ProbeError> {
    let probe: FfprobeOutput = serde_json::from_str(json)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(ProbeError::NoVideoStream)?;

    // Container duration first, stream duration as a fallback
    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| video.duration.as_deref().and_then(|d| d.parse::<f64>().ok()));

    let has_static_metadata = video.side_data_list.iter().any(|sd| {
        sd.get("side_data_type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| t.contains("Mastering display") || t.contains("Content light level"))
    });

    let signaling = HdrSignaling {
        primaries: clean(&video.color_primaries),
        transfer: clean(&video.color_transfer),
        matrix: clean(&video.color_space),
        range: clean(&video.color_range),
        has_static_metadata,
    };

    Ok(InputInfo {
        codec: video.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
        duration,
        is_hdr: signaling.is_hdr(),
        signaling,
    })
}

/// ffprobe reports "unknown" for unset color fields
fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "unknown")
        .map(str::to_string)
}
