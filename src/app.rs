use crate::cli::{Cli, Commands, Overrides};
use ffswitch::config::Config;
use ffswitch::engine::{
    self, AttemptStatus, BatchOptions, BatchReport, CancelToken, CapabilityTable, ConversionOutcome,
    ConversionRequest, FfmpegRunner, OutcomeKind, ProgressEvent, WorkerMessage,
};
use ffswitch::logging;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::{debug, warn};

/// Exit code when the user interrupted the batch
const EXIT_INTERRUPTED: i32 = 130;

pub fn run(cli: Cli) {
    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Warning: {:#}; using defaults", e);
            Config::default()
        }
    };
    apply_overrides(&mut config, &cli.overrides);

    if let Err(e) = logging::init_logging(cli.verbose, config.logging.log_file.as_deref()) {
        eprintln!("Warning: {:#}", e);
    }

    match cli.command {
        Commands::Convert { file } => handle_convert(file, &config, cli.json),
        Commands::Batch {
            directory,
            dry_run,
            input_codec,
        } => {
            if let Some(codec) = input_codec {
                config.defaults.input_codec = Some(codec);
            }
            handle_batch(directory, dry_run, &config, cli.json)
        }
        Commands::Caps => handle_caps(&config, cli.json),
        Commands::Probe { file } => handle_probe(file, &config, cli.json),
        Commands::CheckFfmpeg => handle_check_ffmpeg(&config),
        Commands::InitConfig => handle_init_config(),
    }
}

fn apply_overrides(config: &mut Config, overrides: &Overrides) {
    if let Some(codec) = overrides.codec {
        config.defaults.output_codec = codec;
    }
    if let Some(quality) = overrides.quality {
        config.defaults.quality = Some(quality);
    }
    if overrides.no_hdr {
        config.defaults.preserve_hdr = false;
    }
    if let Some(dir) = &overrides.output {
        config.defaults.output_dir = Some(dir.clone());
    }
    if overrides.overwrite {
        config.defaults.overwrite = true;
    }
    if overrides.software_only {
        config.fallback.disable_hardware = true;
    }
}

fn batch_options(config: &Config, dry_run: bool) -> anyhow::Result<BatchOptions> {
    Ok(BatchOptions {
        dry_run,
        overwrite: config.defaults.overwrite,
        disable_hardware: config.fallback.disable_hardware,
        machine: config.machine_settings()?,
    })
}

fn capability_table(config: &Config) -> CapabilityTable {
    if config.fallback.disable_hardware {
        CapabilityTable::software_only("hardware disabled by configuration")
    } else {
        engine::detect(&config.engine.ffmpeg_path)
    }
}

fn handle_convert(file: PathBuf, config: &Config, json: bool) {
    if !file.is_file() {
        eprintln!("Error: input file not found: {}", file.display());
        process::exit(1);
    }

    let info = match engine::probe::probe_input(&config.engine.ffprobe_path, &file) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(input = %file.display(), error = %e, "probe failed, converting without metadata");
            None
        }
    };

    // An explicit file bypasses the input codec filter
    let request = engine::build_request(file, info.as_ref(), &config.discovery_settings());
    let code = run_requests(vec![request], config, false, json);
    process::exit(code);
}

fn handle_batch(directory: Option<PathBuf>, dry_run: bool, config: &Config, json: bool) {
    let dir = directory.unwrap_or_else(|| {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    });
    if !json {
        println!("Scanning directory: {}", dir.display());
    }

    let requests = match engine::discover(&dir, &config.engine.ffprobe_path, &config.discovery_settings()) {
        Ok(requests) => requests,
        Err(e) => {
            eprintln!("Error scanning directory: {:#}", e);
            process::exit(1);
        }
    };

    if requests.is_empty() {
        if json {
            print_json(&BatchReport {
                outcomes: Vec::new(),
                summary: Default::default(),
            });
        } else {
            println!("No matching video files found in {}", dir.display());
        }
        process::exit(0);
    }

    let code = run_requests(requests, config, dry_run, json);
    process::exit(code);
}

/// Run the requests on a background worker and report as messages arrive.
/// Returns the process exit code.
fn run_requests(requests: Vec<ConversionRequest>, config: &Config, dry_run: bool, json: bool) -> i32 {
    let options = match batch_options(config, dry_run) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return 1;
        }
    };

    let table = capability_table(config);
    if let Some(reason) = &table.degraded_reason {
        warn!(reason = %reason, "hardware detection degraded, using software only");
    }

    let runner = FfmpegRunner::new(config.monitor_settings());
    let worker = engine::BatchWorker::spawn(
        requests,
        table,
        options,
        runner,
        CancelToken::new(),
    );

    let handler_token = worker.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let mut report = None;
    while let Ok(message) = worker.receiver().recv() {
        match message {
            WorkerMessage::BatchFinished(finished) => {
                report = Some(finished);
                break;
            }
            other if !json => print_message(&other),
            other => debug!(?other, "worker message"),
        }
    }

    if let Err(e) = worker.join() {
        eprintln!("Error: {:#}", e);
        return 1;
    }

    let Some(report) = report else {
        eprintln!("Error: batch worker stopped without a report");
        return 1;
    };

    if json {
        print_json(&report);
    } else {
        print_summary(&report);
    }

    if report.summary.cancelled > 0 {
        EXIT_INTERRUPTED
    } else if report.summary.failed > 0 {
        1
    } else {
        0
    }
}

fn print_message(message: &WorkerMessage) {
    match message {
        WorkerMessage::FileStarted { index, total, input, .. } => {
            println!("[{}/{}] {}", index + 1, total, input.display());
        }
        WorkerMessage::AttemptStarted {
            number,
            backend,
            hdr_mode,
            encoder,
            ..
        } => {
            println!("  attempt {}: {} ({}, hdr {})", number, encoder, backend, hdr_mode);
        }
        WorkerMessage::Progress { progress, .. } => {
            eprint!("\r  {}", progress_line(progress));
            let _ = io::stderr().flush();
        }
        WorkerMessage::AttemptFinished { number, status, .. } => {
            eprintln!();
            println!("  attempt {} finished: {}", number, status_label(status));
        }
        WorkerMessage::FileFinished { outcome, .. } => print_outcome(outcome),
        WorkerMessage::BatchFinished(_) => {}
    }
}

fn status_label(status: &AttemptStatus) -> String {
    match status {
        AttemptStatus::Succeeded => "ok".to_string(),
        AttemptStatus::Recoverable(reason) => format!("recoverable failure ({})", reason),
        AttemptStatus::Fatal(reason) => format!("fatal failure ({})", reason),
        AttemptStatus::Cancelled => "cancelled".to_string(),
    }
}

fn progress_line(progress: &ProgressEvent) -> String {
    let mut line = match progress.fraction {
        Some(fraction) => format!("{:5.1}%", fraction * 100.0),
        None => format!("{:.1}s", progress.elapsed_media_s),
    };
    if let Some(fps) = progress.fps {
        line.push_str(&format!("  {:.1} fps", fps));
    }
    if let Some(speed) = progress.speed {
        line.push_str(&format!("  {:.2}x", speed));
    }
    if let Some(eta) = progress.eta {
        line.push_str(&format!("  ETA {}", format_duration(eta)));
    }
    line
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn print_outcome(outcome: &ConversionOutcome) {
    match &outcome.kind {
        OutcomeKind::Succeeded { .. } => {
            print!("  done: {}", outcome.output_path.display());
            match outcome.size_change_pct() {
                Some(pct) => println!(" ({:+.1}% size)", pct),
                None => println!(),
            }
            println!("  {}", outcome.reason);
        }
        OutcomeKind::DryRun { chain, .. } => {
            println!("  -> {}", outcome.output_path.display());
            for (i, candidate) in chain.iter().enumerate() {
                println!("     {}. {}", i + 1, candidate.label());
            }
        }
        OutcomeKind::ExhaustedFailed => {
            println!("  FAILED: {}", outcome.reason);
            if let Some(last) = outcome.attempts.last() {
                for line in last.result.tail.iter().rev().take(5).rev() {
                    println!("    | {}", line);
                }
            }
        }
        OutcomeKind::Cancelled | OutcomeKind::Skipped => println!("  {}", outcome.reason),
    }
    for warning in &outcome.warnings {
        println!("  warning: {}", warning);
    }
}

fn print_summary(report: &BatchReport) {
    let s = &report.summary;
    println!();
    if s.planned > 0 {
        println!("Planned: {} of {} files", s.planned, s.total);
    }
    println!(
        "Total: {}  succeeded: {}  failed: {}  skipped: {}  cancelled: {}",
        s.total, s.succeeded, s.failed, s.skipped, s.cancelled
    );

    let (input_bytes, output_bytes) = report
        .outcomes
        .iter()
        .filter(|o| o.is_success())
        .filter_map(|o| Some((o.input_size?, o.output_size?)))
        .fold((0u64, 0u64), |(i, o), (a, b)| (i + a, o + b));
    if input_bytes > 0 {
        let pct = (output_bytes as f64 - input_bytes as f64) / input_bytes as f64 * 100.0;
        println!(
            "Size: {:.1} MB -> {:.1} MB ({:+.1}%)",
            input_bytes as f64 / 1_048_576.0,
            output_bytes as f64 / 1_048_576.0,
            pct
        );
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("Error: failed to serialize output: {}", e);
            process::exit(1);
        }
    }
}

fn handle_caps(config: &Config, json: bool) {
    let table = capability_table(config);
    if json {
        print_json(&table);
        return;
    }

    if let Some(reason) = &table.degraded_reason {
        println!("Detection degraded: {}", reason);
        println!();
    }

    if !table.has_hardware() {
        println!("No hardware encoders available; conversions use software only");
        println!();
    }

    println!("Encoder backends (in fallback order):");
    for backend in table.backends() {
        let encoders: Vec<String> = backend
            .encoders
            .iter()
            .map(|(codec, encoder)| format!("{}={}", codec, encoder))
            .collect();
        println!(
            "  {:<10} hdr {:<5} {}",
            backend.id.display_name(),
            format!("{:?}", backend.hdr_tier).to_lowercase(),
            encoders.join(" ")
        );
    }

    println!();
    match &table.hwaccels {
        Some(list) if !list.is_empty() => println!("Hardware accelerators: {}", list.join(", ")),
        Some(_) => println!("Hardware accelerators: none"),
        None => println!("Hardware accelerators: unknown"),
    }
    if table.hdr_filters.is_empty() {
        println!("HDR filters: none");
    } else {
        println!("HDR filters: {}", table.hdr_filters.join(", "));
    }
}

fn handle_probe(file: PathBuf, config: &Config, json: bool) {
    match engine::probe::probe_input(&config.engine.ffprobe_path, &file) {
        Ok(info) => {
            if json {
                print_json(&info);
                return;
            }
            println!("Codec: {}", info.codec);
            match info.duration {
                Some(duration) => println!("Duration: {:.2} seconds", duration),
                None => println!("Duration: unknown"),
            }
            let s = &info.signaling;
            println!(
                "Color: primaries={} transfer={} matrix={} range={}",
                s.primaries.as_deref().unwrap_or("-"),
                s.transfer.as_deref().unwrap_or("-"),
                s.matrix.as_deref().unwrap_or("-"),
                s.range.as_deref().unwrap_or("-")
            );
            println!(
                "HDR: {}{}",
                if info.is_hdr { "yes" } else { "no" },
                if s.has_static_metadata { " (static metadata present)" } else { "" }
            );
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn handle_check_ffmpeg(config: &Config) {
    let ffmpeg: &Path = &config.engine.ffmpeg_path;
    let ffprobe: &Path = &config.engine.ffprobe_path;
    match engine::ffmpeg_version(ffmpeg) {
        Ok(version) => {
            println!("ffmpeg found: {}", version);
            match engine::ffprobe_version(ffprobe) {
                Ok(probe_version) => {
                    println!("ffprobe found: {}", probe_version);
                    process::exit(0);
                }
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn handle_init_config() {
    if Config::exists() {
        match Config::load() {
            Ok(cfg) => {
                match Config::config_path() {
                    Ok(path) => println!("Config loaded successfully from {}", path.display()),
                    Err(e) => println!("Config loaded, but config path unknown: {:#}", e),
                }
                println!("{:#?}", cfg);
            }
            Err(e) => {
                eprintln!("Config invalid: {:#}", e);
                process::exit(1);
            }
        }
        return;
    }

    println!("Config missing, creating default config...");
    let cfg = Config::default();
    if let Err(err) = cfg.save() {
        eprintln!("Failed to save default config: {:#}", err);
        process::exit(1);
    }
    match Config::config_path() {
        Ok(path) => println!("Default config saved to {}", path.display()),
        Err(e) => println!("Default config saved (path unknown): {:#}", e),
    }
}
