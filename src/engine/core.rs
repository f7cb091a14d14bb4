mod ffmpeg_cmd;
mod ffmpeg_info;
mod hw_config;
mod quality;
mod scan;
mod types;

pub use ffmpeg_cmd::{BuildError, BuildOptions, Colorimetry, EncodePlan, build_plan, resolve_colorimetry};
pub use ffmpeg_info::{ffmpeg_version, ffprobe_version};
pub use hw_config::{
    BACKEND_PROFILES, BackendId, BackendProfile, ENCODER_TABLE, EncoderTuning, HdrTier,
    classify_encoder, encoders_for, tuning_for,
};
pub use quality::{QualityClamp, clamp_quality};
pub use scan::{
    DiscoverySettings, build_request, build_requests, derive_output_path, discover,
    is_own_output, is_video_file, scan,
};
pub use types::{
    Codec, Container, ConversionRequest, EtaSmoother, HdrMode, HdrSignaling, ProgressEvent,
    ProgressParser, QualityFamily, TransferKind, parse_timestamp,
};
