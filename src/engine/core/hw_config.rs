//! Per-backend and per-encoder parameter tables.
//!
//! Everything vendor specific lives here: backend priority, HDR tier, the
//! encoder names FFmpeg advertises, and the rate-control / lookahead /
//! B-frame flags each encoder gets. Adding a backend means adding rows, the
//! command builder never hard-codes vendor flags.

use super::types::Codec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hardware or software encoding path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    Nvenc,
    Amf,
    Qsv,
    Software,
}

impl BackendId {
    pub const ALL: [BackendId; 4] = [Self::Nvenc, Self::Amf, Self::Qsv, Self::Software];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Nvenc => "nvenc",
            Self::Amf => "amf",
            Self::Qsv => "qsv",
            Self::Software => "software",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Nvenc => "NVENC (NVIDIA)",
            Self::Amf => "AMF (AMD)",
            Self::Qsv => "Quick Sync (Intel)",
            Self::Software => "Software (CPU)",
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, Self::Software)
    }

    pub fn profile(&self) -> &'static BackendProfile {
        match self {
            Self::Nvenc => &BACKEND_PROFILES[0],
            Self::Amf => &BACKEND_PROFILES[1],
            Self::Qsv => &BACKEND_PROFILES[2],
            Self::Software => &BACKEND_PROFILES[3],
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How much HDR signaling a backend can be trusted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HdrTier {
    None,
    Basic,
    Full,
}

/// Static facts about a backend
#[derive(Debug, Clone)]
pub struct BackendProfile {
    pub id: BackendId,
    /// Lower tries first
    pub priority: u8,
    pub hdr_tier: HdrTier,
    /// Known to mangle HLG transfer tags; explicit HDR substitutes PQ
    pub mishandles_hlg: bool,
    /// `ffmpeg -hwaccels` entry the backend depends on
    pub required_hwaccel: Option<&'static str>,
    /// 10-bit pixel format used whenever HDR is carried
    pub hdr_pix_fmt: &'static str,
}

pub static BACKEND_PROFILES: [BackendProfile; 4] = [
    BackendProfile {
        id: BackendId::Nvenc,
        priority: 0,
        hdr_tier: HdrTier::Full,
        mishandles_hlg: true,
        required_hwaccel: Some("cuda"),
        hdr_pix_fmt: "p010le",
    },
    BackendProfile {
        id: BackendId::Amf,
        priority: 1,
        hdr_tier: HdrTier::Basic,
        mishandles_hlg: false,
        required_hwaccel: None,
        hdr_pix_fmt: "p010le",
    },
    BackendProfile {
        id: BackendId::Qsv,
        priority: 2,
        hdr_tier: HdrTier::Basic,
        mishandles_hlg: false,
        required_hwaccel: Some("qsv"),
        hdr_pix_fmt: "p010le",
    },
    BackendProfile {
        id: BackendId::Software,
        priority: 3,
        hdr_tier: HdrTier::Full,
        mishandles_hlg: false,
        required_hwaccel: None,
        hdr_pix_fmt: "yuv420p10le",
    },
];

/// Flag set for one FFmpeg encoder.
///
/// `quality` flags each receive the clamped quality value.
#[derive(Debug, Clone)]
pub struct EncoderTuning {
    pub encoder: &'static str,
    pub backend: BackendId,
    pub codec: Codec,
    pub preset: &'static [&'static str],
    pub rate_control: &'static [&'static str],
    pub quality: &'static [&'static str],
    pub lookahead: &'static [&'static str],
    pub b_frames: &'static [&'static str],
    pub extra: &'static [&'static str],
    /// Private-options flag and value that make the encoder repeat HDR headers
    pub hdr_headers: Option<(&'static str, &'static str)>,
}

const NVENC_PRESET: &[&str] = &["-preset", "p4"];
const NVENC_RC: &[&str] = &["-rc", "vbr"];
const NVENC_LOOKAHEAD: &[&str] = &["-rc-lookahead", "20"];
const NVENC_BFRAMES: &[&str] = &["-b_ref_mode", "middle"];
const NVENC_AQ: &[&str] = &["-spatial_aq", "1", "-temporal_aq", "1"];

const AMF_PRESET: &[&str] = &["-quality", "balanced"];
const AMF_RC: &[&str] = &["-rc", "cqp"];
const AMF_QP: &[&str] = &["-qp_i", "-qp_p", "-qp_b"];

const QSV_PRESET: &[&str] = &["-preset", "medium"];
const QSV_LOOKAHEAD: &[&str] = &["-look_ahead", "1"];

pub static ENCODER_TABLE: &[EncoderTuning] = &[
    EncoderTuning {
        encoder: "hevc_nvenc",
        backend: BackendId::Nvenc,
        codec: Codec::Hevc,
        preset: NVENC_PRESET,
        rate_control: NVENC_RC,
        quality: &["-cq"],
        lookahead: NVENC_LOOKAHEAD,
        b_frames: NVENC_BFRAMES,
        extra: NVENC_AQ,
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "h264_nvenc",
        backend: BackendId::Nvenc,
        codec: Codec::H264,
        preset: NVENC_PRESET,
        rate_control: NVENC_RC,
        quality: &["-cq"],
        lookahead: NVENC_LOOKAHEAD,
        b_frames: NVENC_BFRAMES,
        extra: NVENC_AQ,
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "av1_nvenc",
        backend: BackendId::Nvenc,
        codec: Codec::Av1,
        preset: NVENC_PRESET,
        rate_control: NVENC_RC,
        quality: &["-cq"],
        lookahead: NVENC_LOOKAHEAD,
        b_frames: NVENC_BFRAMES,
        extra: NVENC_AQ,
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "hevc_amf",
        backend: BackendId::Amf,
        codec: Codec::Hevc,
        preset: AMF_PRESET,
        rate_control: AMF_RC,
        quality: AMF_QP,
        lookahead: &[],
        b_frames: &[],
        extra: &[],
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "h264_amf",
        backend: BackendId::Amf,
        codec: Codec::H264,
        preset: AMF_PRESET,
        rate_control: AMF_RC,
        quality: AMF_QP,
        lookahead: &[],
        b_frames: &[],
        extra: &[],
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "av1_amf",
        backend: BackendId::Amf,
        codec: Codec::Av1,
        preset: AMF_PRESET,
        rate_control: AMF_RC,
        quality: &["-qp_i", "-qp_p"],
        lookahead: &[],
        b_frames: &[],
        extra: &[],
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "hevc_qsv",
        backend: BackendId::Qsv,
        codec: Codec::Hevc,
        preset: QSV_PRESET,
        rate_control: &[],
        quality: &["-global_quality"],
        lookahead: QSV_LOOKAHEAD,
        b_frames: &[],
        extra: &[],
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "h264_qsv",
        backend: BackendId::Qsv,
        codec: Codec::H264,
        preset: QSV_PRESET,
        rate_control: &[],
        quality: &["-global_quality"],
        lookahead: QSV_LOOKAHEAD,
        b_frames: &[],
        extra: &[],
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "av1_qsv",
        backend: BackendId::Qsv,
        codec: Codec::Av1,
        preset: QSV_PRESET,
        rate_control: &[],
        quality: &["-global_quality"],
        lookahead: &[],
        b_frames: &[],
        extra: &[],
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "vp9_qsv",
        backend: BackendId::Qsv,
        codec: Codec::Vp9,
        preset: QSV_PRESET,
        rate_control: &[],
        quality: &["-global_quality"],
        lookahead: &[],
        b_frames: &[],
        extra: &[],
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "libx265",
        backend: BackendId::Software,
        codec: Codec::Hevc,
        preset: &["-preset", "medium"],
        rate_control: &[],
        quality: &["-crf"],
        lookahead: &[],
        b_frames: &[],
        extra: &[],
        hdr_headers: Some(("-x265-params", "hdr-opt=1:repeat-headers=1")),
    },
    EncoderTuning {
        encoder: "libx264",
        backend: BackendId::Software,
        codec: Codec::H264,
        preset: &["-preset", "medium"],
        rate_control: &[],
        quality: &["-crf"],
        lookahead: &[],
        b_frames: &[],
        extra: &[],
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "libsvtav1",
        backend: BackendId::Software,
        codec: Codec::Av1,
        preset: &["-preset", "8"],
        rate_control: &[],
        quality: &["-crf"],
        lookahead: &[],
        b_frames: &[],
        extra: &[],
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "libaom-av1",
        backend: BackendId::Software,
        codec: Codec::Av1,
        preset: &["-cpu-used", "6"],
        rate_control: &["-b:v", "0"],
        quality: &["-crf"],
        lookahead: &[],
        b_frames: &[],
        extra: &["-row-mt", "1"],
        hdr_headers: None,
    },
    EncoderTuning {
        encoder: "libvpx-vp9",
        backend: BackendId::Software,
        codec: Codec::Vp9,
        preset: &["-deadline", "good", "-cpu-used", "2"],
        rate_control: &["-b:v", "0"],
        quality: &["-crf"],
        lookahead: &[],
        b_frames: &[],
        extra: &["-row-mt", "1"],
        hdr_headers: None,
    },
];

/// Look up the tuning row for an encoder name
pub fn tuning_for(encoder: &str) -> Option<&'static EncoderTuning> {
    ENCODER_TABLE.iter().find(|t| t.encoder == encoder)
}

/// Map an advertised encoder name to its backend and output codec
pub fn classify_encoder(encoder: &str) -> Option<(BackendId, Codec)> {
    tuning_for(encoder).map(|t| (t.backend, t.codec))
}

/// Encoder names for a backend/codec pair, in preference order
pub fn encoders_for(backend: BackendId, codec: Codec) -> impl Iterator<Item = &'static EncoderTuning> {
    ENCODER_TABLE
        .iter()
        .filter(move |t| t.backend == backend && t.codec == codec)
}
