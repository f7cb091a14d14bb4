//! Command builder
//!
//! Pure translation of (request, backend, HDR mode) into a complete FFmpeg
//! argument list. Vendor flags come from the tables in `hw_config`; nothing
//! here touches the filesystem or spawns processes.

use super::hw_config::{BackendId, EncoderTuning, HdrTier, tuning_for};
use super::quality::clamp_quality;
use super::types::{Codec, Container, ConversionRequest, HdrMode, HdrSignaling, TransferKind};
use crate::engine::hardware::EncoderBackend;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The only way building can fail: the caller asked a backend for a codec it
/// never advertised. The fallback chain is built so this cannot happen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("backend '{backend}' has no encoder for {codec}")]
    UnsupportedPair { backend: BackendId, codec: Codec },
}

/// Knobs that come from configuration rather than the request
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Extra arguments inserted right before the output path
    pub extra_args: Vec<String>,
}

impl BuildOptions {
    /// Split a shell-style string into extra arguments
    pub fn with_extra_args(mut self, raw: &str) -> Result<Self> {
        self.extra_args = shlex::split(raw)
            .with_context(|| format!("[engine] extra_args is not valid shell syntax: {}", raw))?;
        Ok(self)
    }
}

/// Colorimetry quartet emitted in explicit-values mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Colorimetry {
    pub primaries: String,
    pub transfer: String,
    pub matrix: String,
    pub range: String,
}

/// Fully resolved arguments for one attempt
#[derive(Debug, Clone, Serialize)]
pub struct EncodePlan {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub backend: BackendId,
    pub encoder: &'static str,
    pub hdr_mode: HdrMode,
    pub container: Container,
    pub quality: u32,
    pub duration_s: Option<f64>,
    /// Engine arguments, program name excluded
    pub args: Vec<String>,
    /// Things the builder had to adjust (clamped quality, downgraded HDR mode)
    pub warnings: Vec<String>,
    /// Deliberate policy substitutions the caller should surface
    pub policy_notes: Vec<String>,
}

impl EncodePlan {
    /// "nvenc/explicit-values" style label for logs and reports
    pub fn label(&self) -> String {
        format!("{}/{}", self.backend, self.hdr_mode)
    }

    /// Printable command line, quoting arguments with spaces
    pub fn command_line(&self, program: &Path) -> String {
        let mut parts = vec![quote(&program.to_string_lossy())];
        parts.extend(self.args.iter().map(|a| quote(a)));
        parts.join(" ")
    }
}

fn quote(arg: &str) -> String {
    if arg.contains(' ') {
        format!("\"{}\"", arg)
    } else {
        arg.to_string()
    }
}

/// Resolve the explicit colorimetry for a probed signaling.
///
/// HLG input on a backend flagged as mishandling HLG gets PQ instead. That is
/// a fixed policy for the backend, not a detected incompatibility, so a note
/// is returned for the caller to report.
pub fn resolve_colorimetry(
    signaling: Option<&HdrSignaling>,
    backend: BackendId,
) -> (Colorimetry, Option<String>) {
    let default = HdrSignaling::default();
    let sig = signaling.unwrap_or(&default);
    let range = sig.range.clone().unwrap_or_else(|| "tv".to_string());

    let (primaries, transfer, matrix) = match sig.transfer_kind() {
        TransferKind::Hlg => ("bt2020".to_string(), "arib-std-b67".to_string(), "bt2020nc".to_string()),
        TransferKind::Pq => ("bt2020".to_string(), "smpte2084".to_string(), "bt2020nc".to_string()),
        TransferKind::Other => (
            sig.primaries.clone().unwrap_or_else(|| "bt2020".to_string()),
            sig.transfer.clone().unwrap_or_else(|| "smpte2084".to_string()),
            sig.matrix.clone().unwrap_or_else(|| "bt2020nc".to_string()),
        ),
    };

    let mut colorimetry = Colorimetry {
        primaries,
        transfer,
        matrix,
        range,
    };

    let mut note = None;
    if sig.transfer_kind() == TransferKind::Hlg && backend.profile().mishandles_hlg {
        colorimetry.transfer = "smpte2084".to_string();
        note = Some(format!(
            "HLG transfer replaced with smpte2084 (HDR10) on {}: policy for this backend, not a detected incompatibility",
            backend
        ));
    }

    (colorimetry, note)
}

/// Pick the HDR mode the backend can actually carry, with a warning when it differs
fn effective_hdr_mode(
    requested: HdrMode,
    codec: Codec,
    backend: &EncoderBackend,
) -> (HdrMode, Option<String>) {
    if requested == HdrMode::Disabled {
        return (requested, None);
    }
    if !codec.supports_hdr() {
        return (
            HdrMode::Disabled,
            Some(format!("{} output cannot carry HDR, {} ignored", codec, requested)),
        );
    }
    if backend.hdr_tier == HdrTier::None {
        return (
            HdrMode::Disabled,
            Some(format!("{} has no HDR support, {} ignored", backend.id, requested)),
        );
    }
    if requested == HdrMode::CopyMetadata && backend.id.is_hardware() {
        return (
            HdrMode::ExplicitValues,
            Some(format!("{} cannot forward source metadata, using explicit values", backend.id)),
        );
    }
    (requested, None)
}

fn push_all(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

fn push_tuning(args: &mut Vec<String>, tuning: &EncoderTuning, quality: u32) {
    push_all(args, tuning.preset);
    push_all(args, tuning.rate_control);
    for flag in tuning.quality {
        args.push(flag.to_string());
        args.push(quality.to_string());
    }
    push_all(args, tuning.lookahead);
    push_all(args, tuning.b_frames);
    push_all(args, tuning.extra);
}

fn push_stream_maps(args: &mut Vec<String>, container: Container) {
    match container {
        // Matroska takes everything the source has
        Container::Mkv => push_all(args, &["-map", "0:v:0", "-map", "0:a?", "-map", "0:s?", "-c:s", "copy"]),
        Container::Mp4 | Container::Webm => push_all(args, &["-map", "0:v:0", "-map", "0:a?"]),
    }
}

fn push_audio(args: &mut Vec<String>, container: Container) {
    match container {
        Container::Mkv => push_all(args, &["-c:a", "copy"]),
        // MP4 doesn't take Vorbis/Opus reliably
        Container::Mp4 => push_all(args, &["-c:a", "aac", "-b:a", "192k"]),
        // WebM only supports Vorbis/Opus
        Container::Webm => push_all(args, &["-c:a", "libopus", "-b:a", "128k"]),
    }
}

/// Build the plan for one attempt
pub fn build_plan(
    request: &ConversionRequest,
    backend: &EncoderBackend,
    hdr_mode: HdrMode,
    options: &BuildOptions,
) -> Result<EncodePlan, BuildError> {
    let codec = request.output_codec;
    let unsupported = BuildError::UnsupportedPair {
        backend: backend.id,
        codec,
    };
    let encoder = backend.encoder_for(codec).ok_or_else(|| unsupported.clone())?;
    let tuning = tuning_for(encoder).ok_or(unsupported)?;

    let mut warnings = Vec::new();
    let mut policy_notes = Vec::new();

    let (quality, clamp) = clamp_quality(codec, request.quality);
    if let Some(clamp) = clamp {
        warnings.push(clamp.to_string());
    }

    let (hdr_mode, downgrade) = effective_hdr_mode(hdr_mode, codec, backend);
    warnings.extend(downgrade);

    let container = codec.container();
    let output_path = request.resolved_output_path();

    let mut args: Vec<String> = Vec::new();
    push_all(&mut args, &["-hide_banner", "-nostdin", "-y", "-i"]);
    args.push(request.input_path.to_string_lossy().to_string());
    push_stream_maps(&mut args, container);

    args.push("-c:v".to_string());
    args.push(encoder.to_string());
    push_tuning(&mut args, tuning, quality);

    if hdr_mode != HdrMode::Disabled {
        push_all(&mut args, &["-pix_fmt", backend.id.profile().hdr_pix_fmt]);
    }
    match hdr_mode {
        HdrMode::CopyMetadata => {
            push_all(&mut args, &["-map_metadata", "0"]);
            if let Some((flag, value)) = tuning.hdr_headers {
                push_all(&mut args, &[flag, value]);
            }
            if container == Container::Mp4 {
                push_all(&mut args, &["-movflags", "+write_colr"]);
            }
        }
        HdrMode::ExplicitValues => {
            let (color, note) = resolve_colorimetry(request.hdr_signaling.as_ref(), backend.id);
            policy_notes.extend(note);
            args.push("-color_primaries".to_string());
            args.push(color.primaries);
            args.push("-color_trc".to_string());
            args.push(color.transfer);
            args.push("-colorspace".to_string());
            args.push(color.matrix);
            args.push("-color_range".to_string());
            args.push(color.range);
        }
        HdrMode::Disabled => {}
    }

    push_audio(&mut args, container);
    push_all(&mut args, &["-progress", "pipe:2", "-nostats"]);
    args.extend(options.extra_args.iter().cloned());
    args.push(output_path.to_string_lossy().to_string());

    Ok(EncodePlan {
        input_path: request.input_path.clone(),
        output_path,
        backend: backend.id,
        encoder,
        hdr_mode,
        container,
        quality,
        duration_s: request.duration_s,
        args,
        warnings,
        policy_notes,
    })
}
