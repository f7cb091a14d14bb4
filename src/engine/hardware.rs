//! Encoder capability detection
//!
//! Asks FFmpeg which encoders, hardware acceleration contexts and HDR-capable
//! filters it has, and turns the listings into an ordered [`CapabilityTable`].
//! Detection never fails: anything that goes wrong degrades the table to
//! software-only.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::engine::core::{BackendId, Codec, HdrTier, classify_encoder, encoders_for};

/// Filters that can touch HDR color data (reported by `caps`)
const HDR_FILTERS: &[&str] = &["zscale", "tonemap", "tonemap_opencl", "tonemap_vaapi", "libplacebo"];

/// One usable encoding path and the codecs it can produce
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncoderBackend {
    pub id: BackendId,
    pub priority: u8,
    pub hdr_tier: HdrTier,
    /// Output codec -> FFmpeg encoder name
    pub encoders: BTreeMap<Codec, &'static str>,
}

impl EncoderBackend {
    fn empty(id: BackendId) -> Self {
        let profile = id.profile();
        Self {
            id,
            priority: profile.priority,
            hdr_tier: profile.hdr_tier,
            encoders: BTreeMap::new(),
        }
    }

    pub fn supports(&self, codec: Codec) -> bool {
        self.encoders.contains_key(&codec)
    }

    pub fn encoder_for(&self, codec: Codec) -> Option<&'static str> {
        self.encoders.get(&codec).copied()
    }

    /// Software backend covering every codec with its preferred encoder
    pub fn software_default() -> Self {
        let mut backend = Self::empty(BackendId::Software);
        for codec in Codec::ALL {
            if let Some(tuning) = encoders_for(BackendId::Software, codec).next() {
                backend.encoders.insert(codec, tuning.encoder);
            }
        }
        backend
    }
}

/// Ordered, deduplicated set of usable backends for this run.
///
/// Built once per batch and passed around read-only. The software backend is
/// always present and always last.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityTable {
    backends: Vec<EncoderBackend>,
    /// Hardware contexts from `ffmpeg -hwaccels`; None when the listing failed
    pub hwaccels: Option<Vec<String>>,
    pub hdr_filters: Vec<String>,
    /// Why the table is degraded, if it is
    pub degraded_reason: Option<String>,
}

impl CapabilityTable {
    /// Software-only table, used when detection is impossible or hardware is disabled
    pub fn software_only(reason: impl Into<String>) -> Self {
        Self {
            backends: vec![EncoderBackend::software_default()],
            hwaccels: None,
            hdr_filters: Vec::new(),
            degraded_reason: Some(reason.into()),
        }
    }

    /// Build a table from raw `-encoders`, `-hwaccels` and `-filters` output
    pub fn from_listings(encoders: &str, hwaccels: Option<&str>, filters: Option<&str>) -> Self {
        let advertised: Vec<String> = parse_encoder_listing(encoders)
            .into_iter()
            .filter(|name| classify_encoder(name).is_some())
            .collect();
        if advertised.is_empty() {
            return Self::software_only("ffmpeg advertised no usable encoders");
        }

        let hwaccels = hwaccels.map(parse_hwaccel_listing);
        let hdr_filters = filters.map(parse_hdr_filters).unwrap_or_default();

        let mut backends = Vec::new();
        for id in BackendId::ALL {
            if let (Some(required), Some(contexts)) = (id.profile().required_hwaccel, hwaccels.as_ref()) {
                if !contexts.iter().any(|c| c == required) {
                    debug!(backend = %id, required, "skipping backend, hwaccel context missing");
                    continue;
                }
            }

            let mut backend = EncoderBackend::empty(id);
            for codec in Codec::ALL {
                // First row in the tuning table wins when several encoders cover a codec
                let advertised_row = encoders_for(id, codec)
                    .find(|t| advertised.iter().any(|name| name == t.encoder));
                match advertised_row {
                    Some(tuning) => {
                        backend.encoders.insert(codec, tuning.encoder);
                    }
                    // The last-resort backend must cover every codec even if ffmpeg hid it
                    None if id == BackendId::Software => {
                        if let Some(tuning) = encoders_for(id, codec).next() {
                            warn!(codec = %codec, encoder = tuning.encoder, "software encoder not advertised, assuming it");
                            backend.encoders.insert(codec, tuning.encoder);
                        }
                    }
                    None => {}
                }
            }
            if !backend.encoders.is_empty() {
                backends.push(backend);
            }
        }
        backends.sort_by_key(|b| b.priority);

        Self {
            backends,
            hwaccels,
            hdr_filters,
            degraded_reason: None,
        }
    }

    /// Drop every hardware backend
    pub fn without_hardware(&self) -> Self {
        Self {
            backends: self
                .backends
                .iter()
                .filter(|b| !b.id.is_hardware())
                .cloned()
                .collect(),
            hwaccels: self.hwaccels.clone(),
            hdr_filters: self.hdr_filters.clone(),
            degraded_reason: Some("hardware encoding disabled".to_string()),
        }
    }

    /// Backends in priority order
    pub fn backends(&self) -> &[EncoderBackend] {
        &self.backends
    }

    pub fn backend(&self, id: BackendId) -> Option<&EncoderBackend> {
        self.backends.iter().find(|b| b.id == id)
    }

    /// Hardware backends able to produce `codec`, in priority order
    pub fn hardware_for(&self, codec: Codec) -> impl Iterator<Item = &EncoderBackend> {
        self.backends
            .iter()
            .filter(move |b| b.id.is_hardware() && b.supports(codec))
    }

    pub fn software(&self) -> Option<&EncoderBackend> {
        self.backend(BackendId::Software)
    }

    pub fn has_hardware(&self) -> bool {
        self.backends.iter().any(|b| b.id.is_hardware())
    }
}

/// Query FFmpeg and build the capability table.
///
/// Called once per run; the result is passed to the orchestrator.
pub fn detect(ffmpeg: &Path) -> CapabilityTable {
    let encoders = match run_listing(ffmpeg, "-encoders") {
        Some(out) => out,
        None => {
            warn!(ffmpeg = %ffmpeg.display(), "encoder query failed, using software only");
            return CapabilityTable::software_only("encoder query failed");
        }
    };
    let hwaccels = run_listing(ffmpeg, "-hwaccels");
    let filters = run_listing(ffmpeg, "-filters");

    let table = CapabilityTable::from_listings(&encoders, hwaccels.as_deref(), filters.as_deref());
    info!(
        backends = ?table.backends().iter().map(|b| b.id.name()).collect::<Vec<_>>(),
        "detected encoder backends"
    );
    table
}

fn run_listing(ffmpeg: &Path, flag: &str) -> Option<String> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", flag])
        .output()
        .ok()?;
    if !output.status.success() {
        debug!(flag, status = %output.status, "listing query exited non-zero");
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Video encoder names from `ffmpeg -encoders`.
///
/// The listing has a legend terminated by a ` ------` line, then one
/// `<flags> <name> <description>` row per encoder. Video rows have flags
/// starting with `V`.
pub fn parse_encoder_listing(listing: &str) -> Vec<String> {
    let mut names = Vec::new();
    let has_legend = listing.lines().any(|l| l.trim_start().starts_with("---"));
    let mut in_body = !has_legend;
    for line in listing.lines() {
        if !in_body {
            if line.trim_start().starts_with("---") {
                in_body = true;
            }
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(flags), Some(name)) = (parts.next(), parts.next()) else {
            continue;
        };
        if flags.starts_with('V') && flags.len() == 6 {
            names.push(name.to_string());
        }
    }
    names.sort();
    names.dedup();
    names
}

/// Context names from `ffmpeg -hwaccels`
pub fn parse_hwaccel_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .map(str::to_string)
        .collect()
}

/// HDR-relevant filter names present in `ffmpeg -filters`
pub fn parse_hdr_filters(listing: &str) -> Vec<String> {
    let mut found: Vec<String> = listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter(|name| HDR_FILTERS.contains(name))
        .map(str::to_string)
        .collect();
    found.sort();
    found.dedup();
    found
}
