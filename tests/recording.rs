//! End-to-end recording through the public session API, followed by muxing.
//!
//! A small stand-in encoder replaces vp8enc so these run without GStreamer.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use screenrec_lib::config::CaptureParams;
use screenrec_lib::encoding::{CompressedFrame, EncoderConfig, EncoderInput, VideoEncoder};
use screenrec_lib::events::{EventPhase, EventQueue};
use screenrec_lib::recording::{RecordingSession, SessionState, TestPatternSource};
use screenrec_lib::webm::{self, WebmReader, WebmWriter};
use tempfile::TempDir;

/// Holds one frame back and marks every `keyframe_every`th frame as a keyframe.
struct DelayEncoder {
    keyframe_every: i64,
    held: VecDeque<CompressedFrame>,
}

impl VideoEncoder for DelayEncoder {
    fn open(config: &EncoderConfig) -> screenrec_lib::encoding::Result<Self> {
        Ok(Self {
            keyframe_every: config.keyframe_max_dist.max(1) as i64,
            held: VecDeque::new(),
        })
    }

    fn encode(&mut self, input: EncoderInput<'_>) -> screenrec_lib::encoding::Result<Vec<CompressedFrame>> {
        match input {
            EncoderInput::Frame { data, pts } => {
                // Packet size varies with content so the buffer sees uneven frames
                let len = 40 + (data[pts as usize % data.len()] as usize % 60);
                self.held.push_back(CompressedFrame {
                    data: vec![pts as u8; len],
                    pts,
                    is_keyframe: pts % self.keyframe_every == 0,
                });
                if self.held.len() > 1 {
                    Ok(self.held.pop_front().into_iter().collect())
                } else {
                    Ok(Vec::new())
                }
            }
            EncoderInput::Flush => Ok(self.held.pop_front().into_iter().collect()),
        }
    }

    fn finish(&mut self) -> screenrec_lib::encoding::Result<()> {
        self.held.clear();
        Ok(())
    }
}

type Session = RecordingSession<TestPatternSource, DelayEncoder>;

fn config_file(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("capture.toml");
    std::fs::write(&path, body).unwrap();
    path
}

fn record(params: CaptureParams, frames: u64, async_readback: bool) -> (screenrec_lib::recording::StopSummary, EventQueue) {
    let events = EventQueue::new();
    let mut session = Session::new(TestPatternSource::new(async_readback), events.clone());
    session.init(params).unwrap();
    session.start().unwrap();
    for _ in 0..frames {
        session.capture_frame().unwrap();
    }
    let summary = session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
    (summary, events)
}

fn video_blocks(path: &Path) -> Vec<(i64, bool)> {
    let mut reader = WebmReader::open(path).unwrap();
    let blocks = reader
        .blocks()
        .map(|b| b.unwrap())
        .map(|b| (b.timestamp_ns, b.is_key))
        .collect();
    blocks
}

#[test]
fn unbounded_recording_from_toml_config() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("full.webm");
    let config = config_file(
        dir.path(),
        &format!(
            "filename = {:?}\ntexture = 7\nwidth = 64\nheight = 32\nfps = 30\nasync_encoding = true\n",
            out.to_string_lossy()
        ),
    );
    let params = CaptureParams::load(&config).unwrap();
    assert!(!params.is_bounded());

    let (summary, events) = record(params, 60, true);
    assert_eq!(summary.frames_captured, 60);
    assert_eq!(summary.frames_written, 60);
    assert!((summary.duration_secs - 2.0).abs() < 0.01);

    let reader = WebmReader::open(&out).unwrap();
    let track = reader.first_track().unwrap();
    assert_eq!(track.codec_id, webm::CODEC_VP8);
    assert_eq!(reader.info().writing_app.as_deref(), Some("screenrecorder"));

    let blocks = video_blocks(&out);
    assert_eq!(blocks.len(), 60);
    assert_eq!(blocks.iter().filter(|b| b.1).count(), 2);

    let mut phases = Vec::new();
    events.flush(|e| phases.push((e.phase, e.is_error)));
    assert_eq!(
        phases,
        vec![(EventPhase::Init, false), (EventPhase::Recorded, false)]
    );
}

#[test]
fn bounded_recording_keeps_the_tail_from_a_keyframe() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("replay.webm");
    let config = config_file(
        dir.path(),
        &format!(
            "filename = {:?}\ntexture = 7\nwidth = 64\nheight = 32\nfps = 30\nduration = 5.0\n",
            out.to_string_lossy()
        ),
    );
    let params = CaptureParams::load(&config).unwrap();
    assert!(params.is_bounded());

    // 20 seconds in; the buffer holds at most 6 seconds of frames
    let (summary, _) = record(params, 600, false);
    assert!(summary.frames_written <= 180);
    assert!(summary.frames_written >= 150);
    assert_eq!(summary.frames_written + summary.frames_discarded + 420, 600);

    let blocks = video_blocks(&out);
    assert_eq!(blocks.len() as u64, summary.frames_written);
    assert_eq!(blocks[0], (0, true));
    assert!(blocks.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn recording_muxed_with_short_audio_loops_it() {
    let dir = TempDir::new().unwrap();
    let video = dir.path().join("video.webm");
    let audio = dir.path().join("audio.webm");
    let out = dir.path().join("muxed.webm");

    let params = CaptureParams::from_toml_str(&format!(
        "filename = {:?}\ntexture = 1\nwidth = 32\nheight = 16\n",
        video.to_string_lossy()
    ))
    .unwrap();
    let (summary, _) = record(params, 90, false);
    assert_eq!(summary.frames_written, 90);

    // One second of 20 ms packets
    let mut writer = WebmWriter::create(&audio).unwrap();
    let track = writer.add_audio_track(48_000.0, 2, webm::CODEC_OPUS).unwrap();
    writer.set_codec_private(track, b"OpusHead").unwrap();
    for i in 0..50u64 {
        writer.add_frame(track, &[0x11; 10], i * 20_000_000, true).unwrap();
    }
    writer.finalize().unwrap();

    let report = webm::mux_audio_video(&audio, &video, &out).unwrap();
    assert_eq!(report.video_blocks, 90);
    assert_eq!(report.audio_loops(), 2);
    assert_eq!(report.loop_offsets_ns[0], 999_000_000);
    assert!(report.audio_blocks > 100);

    let mut reader = WebmReader::open(&out).unwrap();
    assert_eq!(reader.tracks().len(), 2);
    assert!(reader.tracks().iter().any(|t| t.is_video()));
    assert!(reader.tracks().iter().any(|t| t.is_audio()));
    let count = reader.blocks().count() as u64;
    assert_eq!(count, report.video_blocks + report.audio_blocks);
}
