use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Output codecs the engine knows how to plan for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Hevc,
    H264,
    Av1,
    Vp9,
}

/// Quality scale family. CRF-style codecs accept 1-51, the extended family 1-63.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityFamily {
    Crf,
    Extended,
}

/// Output container, chosen from the codec alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mkv,
    Mp4,
    Webm,
}

impl Codec {
    pub const ALL: [Codec; 4] = [Codec::Hevc, Codec::H264, Codec::Av1, Codec::Vp9];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hevc => "hevc",
            Self::H264 => "h264",
            Self::Av1 => "av1",
            Self::Vp9 => "vp9",
        }
    }

    pub fn quality_family(&self) -> QualityFamily {
        match self {
            Self::Hevc | Self::H264 => QualityFamily::Crf,
            Self::Av1 | Self::Vp9 => QualityFamily::Extended,
        }
    }

    pub fn container(&self) -> Container {
        match self {
            Self::Hevc | Self::Av1 => Container::Mkv,
            Self::H264 => Container::Mp4,
            Self::Vp9 => Container::Webm,
        }
    }

    /// H.264 output is 8-bit in practice, so HDR is never planned for it
    pub fn supports_hdr(&self) -> bool {
        !matches!(self, Self::H264)
    }

    pub fn default_quality(&self) -> u32 {
        match self {
            Self::Hevc | Self::H264 => 23,
            Self::Av1 => 30,
            Self::Vp9 => 31,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hevc" | "h265" | "x265" => Ok(Self::Hevc),
            "h264" | "avc" | "x264" => Ok(Self::H264),
            "av1" => Ok(Self::Av1),
            "vp9" => Ok(Self::Vp9),
            other => Err(format!("unknown codec '{}'", other)),
        }
    }
}

impl QualityFamily {
    pub fn range(&self) -> (u32, u32) {
        match self {
            Self::Crf => (1, 51),
            Self::Extended => (1, 63),
        }
    }
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mkv => "mkv",
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
        }
    }
}

/// Strategy for carrying HDR color metadata through one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HdrMode {
    CopyMetadata,
    ExplicitValues,
    Disabled,
}

impl HdrMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::CopyMetadata => "copy-metadata",
            Self::ExplicitValues => "explicit-values",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for HdrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Transfer characteristic family of a probed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Pq,
    Hlg,
    Other,
}

/// Color signaling read from the input's first video stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HdrSignaling {
    pub primaries: Option<String>,
    pub transfer: Option<String>,
    pub matrix: Option<String>,
    pub range: Option<String>,
    /// Mastering display or content light level side data was present
    #[serde(default)]
    pub has_static_metadata: bool,
}

impl HdrSignaling {
    pub fn transfer_kind(&self) -> TransferKind {
        let trc = self
            .transfer
            .as_deref()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if trc.contains("arib-std-b67") || trc.contains("hlg") {
            TransferKind::Hlg
        } else if trc.contains("smpte2084") || trc == "pq" {
            TransferKind::Pq
        } else {
            TransferKind::Other
        }
    }

    pub fn is_hdr(&self) -> bool {
        self.transfer_kind() != TransferKind::Other
            || self.primaries.as_deref() == Some("bt2020")
            || self.has_static_metadata
    }
}

/// One file to convert. Built once by discovery, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub id: Uuid,
    pub input_path: PathBuf,
    /// Codec name as reported by the probe (e.g. "av1")
    pub input_codec: Option<String>,
    pub output_codec: Codec,
    pub quality: u32,
    pub hdr_intent: bool,
    /// Output path; the extension is replaced by the codec's container
    pub output_path: PathBuf,
    pub duration_s: Option<f64>,
    pub hdr_signaling: Option<HdrSignaling>,
}

impl ConversionRequest {
    pub fn new(input_path: PathBuf, output_path: PathBuf, output_codec: Codec) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_path,
            input_codec: None,
            output_codec,
            quality: output_codec.default_quality(),
            hdr_intent: false,
            output_path,
            duration_s: None,
            hdr_signaling: None,
        }
    }

    /// HDR intent after accounting for codecs that cannot carry HDR
    pub fn effective_hdr_intent(&self) -> bool {
        self.hdr_intent && self.output_codec.supports_hdr()
    }

    /// Final output path with the container extension applied
    pub fn resolved_output_path(&self) -> PathBuf {
        self.output_path
            .with_extension(self.output_codec.container().extension())
    }
}

/// Discrete progress update emitted while an attempt runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub elapsed_media_s: f64,
    pub total_duration_s: Option<f64>,
    /// 0.0..=1.0, None when the total duration is unknown
    pub fraction: Option<f64>,
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub speed: Option<f64>,
    pub eta: Option<Duration>,
}

/// Parser for the engine's diagnostic stream.
///
/// Understands both the interactive stats line
/// (`frame= 1234 fps= 25 ... time=00:00:49.36 ... speed=1.0x`) and the
/// key=value records of `-progress` (`out_time_us=...`). A `-progress` record
/// spans several lines and reports its time three ways, so it counts as one
/// marker when its closing `progress=` line arrives.
#[derive(Debug, Default, Clone)]
pub struct ProgressParser {
    pub out_time_us: u64,
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub speed: Option<f64>,
    pub bitrate_kbps: Option<f64>,
    pub is_complete: bool,
    /// The open `-progress` record has carried a time position
    record_has_time: bool,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line. Returns true when the line completed a time-position marker.
    pub fn parse_line(&mut self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }

        // Stats line: several "key= value" pairs on one line
        if line.starts_with("frame=") && line.contains("time=") {
            return self.parse_stats_line(line);
        }

        let Some((key, value)) = line.split_once('=') else {
            return false;
        };
        let value = value.trim();
        match key.trim() {
            "out_time_us" | "out_time_ms" => {
                // out_time_ms is microseconds too, an FFmpeg quirk
                if let Ok(us) = value.parse::<u64>() {
                    self.out_time_us = us;
                    self.record_has_time = true;
                }
            }
            "out_time" => {
                if let Some(secs) = parse_timestamp(value) {
                    self.out_time_us = (secs * 1_000_000.0).round() as u64;
                    self.record_has_time = true;
                }
            }
            "frame" => self.frame = value.parse().ok().or(self.frame),
            "fps" => self.fps = value.parse().ok().or(self.fps),
            "speed" => self.speed = parse_speed(value).or(self.speed),
            "bitrate" => self.bitrate_kbps = parse_bitrate(value).or(self.bitrate_kbps),
            "progress" => {
                if value == "end" {
                    self.is_complete = true;
                }
                return std::mem::take(&mut self.record_has_time);
            }
            _ => {}
        }
        false
    }

    fn parse_stats_line(&mut self, line: &str) -> bool {
        let mut saw_time = false;
        for (key, value) in stats_pairs(line) {
            match key {
                "frame" => self.frame = value.parse().ok().or(self.frame),
                "fps" => self.fps = value.parse().ok().or(self.fps),
                "speed" => self.speed = parse_speed(value).or(self.speed),
                "bitrate" => self.bitrate_kbps = parse_bitrate(value).or(self.bitrate_kbps),
                "time" => {
                    if let Some(secs) = parse_timestamp(value) {
                        self.out_time_us = (secs * 1_000_000.0).round() as u64;
                        saw_time = true;
                    }
                }
                _ => {}
            }
        }
        saw_time
    }

    pub fn out_time_s(&self) -> f64 {
        self.out_time_us as f64 / 1_000_000.0
    }

    /// Fraction complete (0.0..=1.0) given the probed total duration
    pub fn fraction(&self, duration_s: Option<f64>) -> Option<f64> {
        match duration_s {
            Some(dur) if dur > 0.0 => Some((self.out_time_s() / dur).clamp(0.0, 1.0)),
            _ => None,
        }
    }
}

/// Split "frame=  12 fps=0.0 q=28.0 size=  1kB time=00:00:01.00" into pairs.
/// Values may be separated from their key by spaces.
fn stats_pairs(line: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let mut rest = line;
    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim();
        let after = rest[eq + 1..].trim_start();
        let end = after.find(char::is_whitespace).unwrap_or(after.len());
        pairs.push((key, &after[..end]));
        rest = &after[end..];
    }
    pairs
}

/// Parse HH:MM:SS(.frac) into seconds. Negative or N/A stamps yield None.
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.starts_with('-') {
        return None;
    }
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    if hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn parse_speed(value: &str) -> Option<f64> {
    value.trim().trim_end_matches('x').parse::<f64>().ok()
}

fn parse_bitrate(value: &str) -> Option<f64> {
    value.trim().trim_end_matches("kbits/s").parse::<f64>().ok()
}

/// EWMA-smoothed ETA so the displayed estimate doesn't jump on every tick
#[derive(Debug, Clone)]
pub struct EtaSmoother {
    alpha: f64,
    smoothed_speed: Option<f64>,
}

impl Default for EtaSmoother {
    fn default() -> Self {
        Self::new(0.2)
    }
}

impl EtaSmoother {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            smoothed_speed: None,
        }
    }

    /// Feed one speed sample (media seconds per wall second) and return the ETA
    pub fn update(&mut self, speed: f64, elapsed_media_s: f64, total_s: Option<f64>) -> Option<Duration> {
        if speed.is_finite() && speed > 0.0 {
            self.smoothed_speed = Some(match self.smoothed_speed {
                Some(prev) => self.alpha * speed + (1.0 - self.alpha) * prev,
                None => speed,
            });
        }
        let total = total_s?;
        let speed = self.smoothed_speed?;
        let remaining = (total - elapsed_media_s).max(0.0);
        Duration::try_from_secs_f64(remaining / speed).ok()
    }

    pub fn smoothed_speed(&self) -> Option<f64> {
        self.smoothed_speed
    }
}
