#![allow(dead_code)] // Not every integration module uses every fixture

use chrono::Local;
use ffswitch::engine::{
    AttemptResult, AttemptRunner, AttemptStatus, BackendId, CancelToken, CapabilityTable, Codec,
    ConversionRequest, EncodePlan, FatalReason, HdrMode, HdrSignaling, ProgressEvent,
    RecoverableReason,
};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `ffmpeg -encoders` output from a machine with every GPU vendor present
pub const ALL_VENDORS_LISTING: &str = "Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (codec h264)
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)
 V....D h264_amf             AMD AMF H.264 Encoder (codec h264)
 V....D h264_qsv             H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (Intel Quick Sync Video acceleration) (codec h264)
 V....D libx265              libx265 H.265 / HEVC (codec hevc)
 V....D hevc_nvenc           NVIDIA NVENC hevc encoder (codec hevc)
 V....D hevc_amf             AMD AMF HEVC encoder (codec hevc)
 V....D hevc_qsv             HEVC (Intel Quick Sync Video acceleration) (codec hevc)
 V....D libsvtav1            SVT-AV1(Scalable Video Technology for AV1) encoder (codec av1)
 V....D av1_nvenc            NVIDIA NVENC av1 encoder (codec av1)
 V....D libvpx-vp9           libvpx VP9 (codec vp9)
 A....D aac                  AAC (Advanced Audio Coding)
";

/// Listing with NVENC as the only hardware vendor
pub const NVENC_ONLY_LISTING: &str = "Encoders:
 ------
 V....D libx265              libx265 H.265 / HEVC (codec hevc)
 V....D hevc_nvenc           NVIDIA NVENC hevc encoder (codec hevc)
 V....D libsvtav1            SVT-AV1(Scalable Video Technology for AV1) encoder (codec av1)
";

pub fn all_vendors_table() -> CapabilityTable {
    CapabilityTable::from_listings(ALL_VENDORS_LISTING, None, None)
}

pub fn nvenc_table() -> CapabilityTable {
    CapabilityTable::from_listings(NVENC_ONLY_LISTING, None, None)
}

pub fn software_table() -> CapabilityTable {
    CapabilityTable::software_only("no hardware in tests")
}

pub fn pq_signaling() -> HdrSignaling {
    HdrSignaling {
        primaries: Some("bt2020".to_string()),
        transfer: Some("smpte2084".to_string()),
        matrix: Some("bt2020nc".to_string()),
        range: Some("tv".to_string()),
        has_static_metadata: true,
    }
}

/// Request for `<dir>/<stem>.mkv`, creating the input file
pub fn request_in(dir: &Path, stem: &str, codec: Codec, hdr: bool) -> ConversionRequest {
    let input = dir.join(format!("{}.mkv", stem));
    fs::write(&input, vec![0u8; 4096]).unwrap();
    let output = dir.join(format!("{}_{}", stem, codec.name()));
    let mut request = ConversionRequest::new(input, output, codec);
    request.input_codec = Some("av1".to_string());
    request.duration_s = Some(10.0);
    if hdr {
        request.hdr_intent = true;
        request.hdr_signaling = Some(pq_signaling());
    }
    request
}

/// What a scripted attempt does
#[derive(Debug, Clone)]
pub enum Script {
    /// Write an output of this many bytes and exit 0
    Succeed(u64),
    Recoverable(RecoverableReason),
    Fatal(FatalReason),
    /// Raise the token mid-run, as Ctrl-C would, and report cancellation
    CancelDuring,
}

/// One call the runner received
#[derive(Debug, Clone)]
pub struct RunCall {
    pub backend: BackendId,
    pub hdr_mode: HdrMode,
    pub encoder: &'static str,
    pub args: Vec<String>,
    pub output_path: PathBuf,
}

/// In-memory engine that plays back a fixed script, one entry per attempt.
/// Once the script runs out every further attempt fails as fatal.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: VecDeque<Script>,
    pub calls: Vec<RunCall>,
}

impl ScriptedRunner {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: script.into_iter().collect(),
            calls: Vec::new(),
        }
    }

    pub fn labels(&self) -> Vec<String> {
        self.calls
            .iter()
            .map(|c| format!("{}/{}", c.backend, c.hdr_mode))
            .collect()
    }
}

fn result_with(status: AttemptStatus) -> AttemptResult {
    let mut result = AttemptResult::launch_failed("", Local::now());
    result.status = status;
    result.exit_code = Some(1);
    result.elapsed = Duration::from_millis(5);
    result
}

impl AttemptRunner for ScriptedRunner {
    fn run(
        &mut self,
        plan: &EncodePlan,
        on_progress: &mut dyn FnMut(&ProgressEvent),
        cancel: &CancelToken,
    ) -> AttemptResult {
        self.calls.push(RunCall {
            backend: plan.backend,
            hdr_mode: plan.hdr_mode,
            encoder: plan.encoder,
            args: plan.args.clone(),
            output_path: plan.output_path.clone(),
        });

        // Every attempt leaves something on disk, like a real encoder would
        let _ = fs::write(&plan.output_path, b"partial");

        on_progress(&ProgressEvent {
            elapsed_media_s: 5.0,
            total_duration_s: plan.duration_s,
            fraction: plan.duration_s.map(|d| 5.0 / d),
            frame: Some(120),
            fps: Some(48.0),
            speed: Some(2.0),
            eta: Some(Duration::from_millis(2500)),
        });

        match self.script.pop_front() {
            Some(Script::Succeed(bytes)) => {
                fs::write(&plan.output_path, vec![0u8; bytes as usize]).unwrap();
                let mut result = result_with(AttemptStatus::Succeeded);
                result.exit_code = Some(0);
                result
            }
            Some(Script::Recoverable(reason)) => {
                let mut result = result_with(AttemptStatus::Recoverable(reason));
                result.tail = vec!["Error while opening encoder".to_string()];
                result
            }
            Some(Script::Fatal(reason)) => result_with(AttemptStatus::Fatal(reason)),
            Some(Script::CancelDuring) => {
                cancel.cancel();
                let mut result = result_with(AttemptStatus::Cancelled);
                result.exit_code = None;
                result.signal = Some(15);
                result
            }
            None => result_with(AttemptStatus::Fatal(FatalReason::Unrecognized)),
        }
    }
}
