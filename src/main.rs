//! Screenrec command line
//!
//! Usage:
//!   screenrec record [CONFIG] [--frames N] [--background]
//!   screenrec mux <AUDIO> <VIDEO> <OUTPUT>
//!   screenrec info <FILE>
//!
//! Options:
//!   --verbose           Extra debug output
//!
//! `record` renders a moving test pattern through the full capture pipeline.
//! CONFIG defaults to `<config dir>/screenrec/capture.toml`. Recording needs
//! a build with the `gstreamer` feature (`cargo build --features gstreamer`);
//! `mux` and `info` work in every build.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use screenrec_lib::config::{default_config_path, CaptureParams};
#[cfg(feature = "gstreamer")]
use screenrec_lib::events::{EventQueue, EVENT_SOURCE};
use screenrec_lib::webm::{self, WebmReader};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let verbose = args.iter().any(|a| a == "--verbose");
    screenrec_lib::init_logging(if verbose { "debug" } else { "info" });

    let positional: Vec<&str> = positional_args(&args);
    let result = match positional.first().copied() {
        Some("record") => run_record(&args, positional.get(1).copied()),
        Some("mux") => match positional.get(1..4) {
            Some([audio, video, output]) => run_mux(audio, video, output),
            _ => Err(anyhow::anyhow!("mux needs <AUDIO> <VIDEO> <OUTPUT>")),
        },
        Some("info") => match positional.get(1) {
            Some(file) => run_info(Path::new(file)),
            None => Err(anyhow::anyhow!("info needs <FILE>")),
        },
        _ => {
            print_usage();
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Arguments that are neither flags nor flag values
fn positional_args(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        match arg.as_str() {
            "--frames" => skip_next = true,
            a if a.starts_with("--") => {}
            a => out.push(a),
        }
    }
    out
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  screenrec record [CONFIG] [--frames N] [--background] [--verbose]");
    eprintln!("  screenrec mux <AUDIO> <VIDEO> <OUTPUT>");
    eprintln!("  screenrec info <FILE>");
    if cfg!(not(feature = "gstreamer")) {
        eprintln!();
        eprintln!("This build has no VP8 encoder; rebuild with `--features gstreamer` to record.");
    }
}

#[cfg(feature = "gstreamer")]
fn print_events(events: &EventQueue) -> bool {
    let mut failed = false;
    events.flush(|event| {
        failed |= event.is_error;
        match event.to_json() {
            Ok(json) => println!("{}: {}", EVENT_SOURCE, json),
            Err(e) => log::warn!("Could not serialize event: {}", e),
        }
    });
    failed
}

/// Load capture parameters, expanding a directory filename into a timestamped file.
fn load_params(config: Option<&str>) -> Result<CaptureParams> {
    let path = config.map(PathBuf::from).unwrap_or_else(default_config_path);
    let mut params =
        CaptureParams::load(&path).with_context(|| format!("Failed to load config {:?}", path))?;
    if params.filename.is_dir() {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        params.filename = params.filename.join(format!("recording_{}.webm", stamp));
    }
    Ok(params)
}

#[cfg(feature = "gstreamer")]
fn run_record(args: &[String], config: Option<&str>) -> Result<()> {
    use screenrec_lib::encoding::vp8::GstVp8Encoder;
    use screenrec_lib::recording::{RecordingSession, TestPatternSource};

    let params = load_params(config)?;
    let frames = args
        .iter()
        .position(|a| a == "--frames")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or_else(|| {
            let secs = params.duration.map(|d| d * 2.0).unwrap_or(10.0);
            (secs * params.fps as f64) as u64
        });
    let background = args.iter().any(|a| a == "--background");

    println!("\n=== Screenrec ===\n");
    println!("  Output:     {:?}", params.filename);
    println!("  Resolution: {}x{} @ {} fps", params.width, params.height, params.fps);
    println!("  Bitrate:    {} bps, keyframe every {}s", params.bitrate, params.iframe);
    match params.duration {
        Some(d) => println!("  Keeping:    last {}s", d),
        None => println!("  Keeping:    everything"),
    }
    println!("  Frames:     {}", frames);

    let events = EventQueue::new();
    let mut session: RecordingSession<TestPatternSource, GstVp8Encoder> =
        RecordingSession::new(TestPatternSource::new(true), events.clone());
    session.init(params)?;
    session.start()?;
    for _ in 0..frames {
        session.capture_frame()?;
    }

    if background {
        session.stop_in_background()?;
        session.wait_for_background_stop();
    } else {
        let summary = session.stop()?;
        println!(
            "\n  Wrote {} frames ({} discarded, {} dropped), {:.2}s",
            summary.frames_written, summary.frames_discarded, summary.frames_dropped, summary.duration_secs
        );
    }

    if print_events(&events) {
        bail!("recording reported an error");
    }
    Ok(())
}

#[cfg(not(feature = "gstreamer"))]
fn run_record(_args: &[String], config: Option<&str>) -> Result<()> {
    let params = load_params(config)?;
    bail!(
        "cannot record {:?}: built without the `gstreamer` feature",
        params.filename
    )
}

fn run_mux(audio: &str, video: &str, output: &str) -> Result<()> {
    let report = webm::mux_audio_video(audio, video, output)
        .with_context(|| format!("Failed to mux {} + {}", video, audio))?;
    println!("Muxed into {}", output);
    println!("  Video blocks: {}", report.video_blocks);
    println!("  Audio blocks: {}", report.audio_blocks);
    println!("  Audio loops:  {}", report.audio_loops());
    if let Some(d) = report.duration_secs {
        println!("  Duration:     {:.3}s", d);
    }
    Ok(())
}

fn run_info(path: &Path) -> Result<()> {
    let mut reader = WebmReader::open(path).with_context(|| format!("Failed to open {:?}", path))?;

    println!("{}", path.display());
    println!("  DocType:       {}", reader.doc_type());
    let info = reader.info().clone();
    println!("  TimecodeScale: {} ns", info.timecode_scale);
    if let Some(d) = info.duration_secs() {
        println!("  Duration:      {:.3}s", d);
    }
    if let Some(app) = &info.writing_app {
        println!("  WritingApp:    {}", app);
    }

    let tracks = reader.tracks().to_vec();
    for track in &tracks {
        println!("  Track {}: {} {:?}", track.number, track.codec_id, track.kind);
    }

    let mut counts = vec![0u64; tracks.len()];
    let mut keyframes = 0u64;
    for block in reader.blocks() {
        let block = block?;
        if let Some(i) = tracks.iter().position(|t| t.number == block.track) {
            counts[i] += 1;
        }
        if block.is_key {
            keyframes += 1;
        }
    }
    for (track, count) in tracks.iter().zip(&counts) {
        println!("  Track {} blocks: {}", track.number, count);
    }
    println!("  Keyframes:     {}", keyframes);
    Ok(())
}
