// Config file values flowing into discovery and request building

use ffswitch::config::Config;
use ffswitch::engine::probe::parse_probe_json;
use ffswitch::engine::{Codec, build_request, discover, scan};
use std::fs;
use std::path::{Path, PathBuf};

const HDR10_PROBE: &str = r#"{
    "streams": [
        {
            "codec_type": "video",
            "codec_name": "av1",
            "color_primaries": "bt2020",
            "color_transfer": "smpte2084",
            "color_space": "bt2020nc",
            "color_range": "tv",
            "side_data_list": [{"side_data_type": "Mastering display metadata"}]
        },
        {"codec_type": "audio", "codec_name": "opus"}
    ],
    "format": {"duration": "3600.5"}
}"#;

fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, b"x").unwrap();
}

#[test]
fn test_config_file_drives_discovery_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
        [defaults]
        output_codec = "av1"
        quality = 99
        preserve_hdr = false
        filename_suffix = ".{codec}-re"
        input_codec = "any"
        "#,
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();
    let settings = config.discovery_settings();
    assert_eq!(settings.output_codec, Codec::Av1);
    assert_eq!(settings.input_codec, None);

    let info = parse_probe_json(HDR10_PROBE).unwrap();
    let request = build_request(PathBuf::from("/media/show.mkv"), Some(&info), &settings);
    assert_eq!(request.output_path, PathBuf::from("/media/show.av1-re.mkv"));
    assert_eq!(request.quality, 99, "clamping happens when the plan is built");
    assert!(!request.hdr_intent, "preserve_hdr = false turns HDR off");
    assert_eq!(request.duration_s, Some(3600.5));
}

#[test]
fn test_hdr_input_keeps_hdr_by_default() {
    let settings = Config::default().discovery_settings();
    let info = parse_probe_json(HDR10_PROBE).unwrap();
    let request = build_request(PathBuf::from("/media/show.mkv"), Some(&info), &settings);
    assert!(request.hdr_intent);
    assert_eq!(request.input_codec.as_deref(), Some("av1"));
    assert_eq!(request.output_path, PathBuf::from("/media/show_hevc.mkv"));
    assert!(request.hdr_signaling.unwrap().has_static_metadata);
}

#[test]
fn test_scan_is_recursive_and_sorted() {
    let dir = tempfile::tempdir().unwrap();
    touch(&dir.path().join("b.mkv"));
    touch(&dir.path().join("a.MP4"));
    touch(&dir.path().join("season1/e01.webm"));
    touch(&dir.path().join("notes.txt"));

    let files = scan(dir.path()).unwrap();
    let names: Vec<String> = files
        .iter()
        .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["a.MP4", "b.mkv", "season1/e01.webm"]);
}

#[test]
fn test_discover_without_probe_depends_on_filter() {
    let dir = tempfile::tempdir().unwrap();
    touch(&dir.path().join("movie.mkv"));
    touch(&dir.path().join("movie_hevc.mkv"));
    let missing_ffprobe = Path::new("/nonexistent/ffprobe");

    // No filter: unprobeable files are still converted, previous outputs are not
    let mut config = Config::default();
    config.defaults.input_codec = None;
    let requests = discover(dir.path(), missing_ffprobe, &config.discovery_settings()).unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].input_path.ends_with("movie.mkv"));
    assert!(!requests[0].hdr_intent);

    // Default av1 filter: nothing can be confirmed as AV1
    let requests = discover(dir.path(), missing_ffprobe, &Config::default().discovery_settings()).unwrap();
    assert!(requests.is_empty());
}

#[test]
fn test_discover_rejects_missing_directory() {
    let settings = Config::default().discovery_settings();
    assert!(discover(Path::new("/nonexistent/videos"), Path::new("ffprobe"), &settings).is_err());
}
