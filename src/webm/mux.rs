// Audio/video muxing
//
// Merges a finished video recording with a separately recorded audio file.
// The video defines the output length; the audio is restarted from the
// beginning whenever it runs out, so a short clip loops underneath.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use super::reader::{Block, WebmReader};
use super::writer::WebmWriter;
use super::{TrackKind, WebmError};
use crate::events::{EventQueue, SessionEvent};

/// Error type for muxing
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("Failed to read video file: {0}")]
    Video(#[source] WebmError),

    #[error("Failed to read audio file: {0}")]
    Audio(#[source] WebmError),

    #[error("Failed to write output file: {0}")]
    Output(#[source] WebmError),

    #[error("{0} has no tracks")]
    NoTracks(&'static str),

    #[error("First track of the video file is not a video track")]
    NotVideo,

    #[error("First track of the audio file is not an audio track")]
    NotAudio,
}

pub type Result<T> = std::result::Result<T, MuxError>;

/// Summary of a finished mux
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MuxReport {
    pub video_blocks: u64,
    pub audio_blocks: u64,
    /// Video time (ns) at which the audio was restarted, one entry per loop
    pub loop_offsets_ns: Vec<i64>,
    /// Output duration in seconds, copied from the video
    pub duration_secs: Option<f64>,
}

impl MuxReport {
    pub fn audio_loops(&self) -> usize {
        self.loop_offsets_ns.len()
    }
}

type FileWriter = WebmWriter<std::fs::File>;

/// Combine `video_path` and `audio_path` into `output_path`.
///
/// On failure the partially written output is removed.
pub fn mux_audio_video(
    audio_path: impl AsRef<Path>,
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
) -> Result<MuxReport> {
    let output_path = output_path.as_ref();
    let result = mux_inner(audio_path.as_ref(), video_path.as_ref(), output_path);
    match &result {
        Ok(report) => log::info!(
            "Muxed {:?}: {} video blocks, {} audio blocks, {} audio loop(s)",
            output_path,
            report.video_blocks,
            report.audio_blocks,
            report.audio_loops()
        ),
        Err(e) => {
            log::error!("Mux into {:?} failed: {}", output_path, e);
            if output_path.exists() {
                if let Err(remove_err) = std::fs::remove_file(output_path) {
                    log::warn!("Could not remove partial output {:?}: {}", output_path, remove_err);
                }
            }
        }
    }
    result
}

/// Run [`mux_audio_video`] on its own thread and report through `events`.
pub fn mux_in_background(
    audio_path: PathBuf,
    video_path: PathBuf,
    output_path: PathBuf,
    events: EventQueue,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("screenrec-mux".into())
        .spawn(move || {
            let result = mux_audio_video(&audio_path, &video_path, &output_path);
            events.push(SessionEvent::muxed(result.as_ref().err().map(|e| e.to_string())));
        })
}

fn mux_inner(audio_path: &Path, video_path: &Path, output_path: &Path) -> Result<MuxReport> {
    let mut video = WebmReader::open(video_path).map_err(MuxError::Video)?;
    let video_track = video.first_track().cloned().ok_or(MuxError::NoTracks("video file"))?;
    if !video_track.is_video() {
        return Err(MuxError::NotVideo);
    }

    let mut audio = WebmReader::open(audio_path).map_err(MuxError::Audio)?;
    let audio_track = audio.first_track().cloned().ok_or(MuxError::NoTracks("audio file"))?;
    if !audio_track.is_audio() {
        return Err(MuxError::NotAudio);
    }

    let mut writer = WebmWriter::create(output_path).map_err(MuxError::Output)?;
    let (out_video, out_audio) = configure_output(&mut writer, &video, &audio).map_err(MuxError::Output)?;

    let mut report = MuxReport {
        duration_secs: video.info().duration_secs(),
        ..MuxReport::default()
    };

    let audio_is_empty = next_for_track(&mut audio, audio_track.number)
        .map_err(MuxError::Audio)?
        .is_none();
    audio.rewind().map_err(MuxError::Audio)?;
    if audio_is_empty {
        log::warn!("Audio file {:?} has no blocks; copying video only", audio_path);
    }

    let mut pending_video: Option<Block> = None;
    let mut pending_audio: Option<Block> = None;
    let mut loop_offset: i64 = 0;

    loop {
        if pending_video.is_none() {
            pending_video = next_for_track(&mut video, video_track.number).map_err(MuxError::Video)?;
        }
        let Some(video_block) = pending_video.as_ref() else {
            break;
        };
        let video_time = video_block.timestamp_ns;

        if pending_audio.is_none() && !audio_is_empty {
            pending_audio = next_for_track(&mut audio, audio_track.number).map_err(MuxError::Audio)?;
            if pending_audio.is_none() {
                audio.rewind().map_err(MuxError::Audio)?;
                loop_offset = video_time;
                report.loop_offsets_ns.push(video_time);
                log::debug!("Audio exhausted, looping at {} ns", video_time);
                pending_audio = next_for_track(&mut audio, audio_track.number).map_err(MuxError::Audio)?;
            }
        }

        let audio_first = pending_audio
            .as_ref()
            .map(|a| loop_offset + a.timestamp_ns <= video_time)
            .unwrap_or(false);

        if audio_first {
            if let Some(block) = pending_audio.take() {
                write_block(&mut writer, out_audio, &block, loop_offset).map_err(MuxError::Output)?;
                report.audio_blocks += 1;
            }
        } else if let Some(block) = pending_video.take() {
            write_block(&mut writer, out_video, &block, 0).map_err(MuxError::Output)?;
            report.video_blocks += 1;
        }
    }

    writer.finalize().map_err(MuxError::Output)?;
    Ok(report)
}

/// Copy track metadata from both inputs into the output writer.
///
/// libwebm writes its own timecode scale; block times are carried in
/// nanoseconds so a different input scale still lines up.
fn configure_output(
    writer: &mut FileWriter,
    video: &WebmReader,
    audio: &WebmReader,
) -> std::result::Result<(u64, u64), WebmError> {
    if let Some(secs) = video.info().duration_secs() {
        writer.set_duration(secs * 1_000_000_000.0 / super::DEFAULT_TIMECODE_SCALE as f64);
    }

    let (Some(v), Some(a)) = (video.first_track(), audio.first_track()) else {
        return Err(WebmError::Muxer("missing input track".into()));
    };

    let out_video = match &v.kind {
        TrackKind::Video { width, height } => {
            let (Ok(width), Ok(height)) = (u32::try_from(*width), u32::try_from(*height)) else {
                return Err(WebmError::Muxer(format!("video size {}x{} out of range", width, height)));
            };
            let track = writer.add_video_track(width, height, &v.codec_id)?;
            if let Some(private) = v.codec_private.as_deref().filter(|p| !p.is_empty()) {
                writer.set_codec_private(track, private)?;
            }
            track
        }
        _ => return Err(WebmError::Muxer("first video-file track is not video".into())),
    };

    let out_audio = match &a.kind {
        TrackKind::Audio {
            sampling_rate,
            channels,
            ..
        } => {
            let track = writer.add_audio_track(*sampling_rate, *channels, &a.codec_id)?;
            if let Some(private) = a.codec_private.as_deref().filter(|p| !p.is_empty()) {
                writer.set_codec_private(track, private)?;
            }
            track
        }
        _ => return Err(WebmError::Muxer("first audio-file track is not audio".into())),
    };

    Ok((out_video, out_audio))
}

fn next_for_track(reader: &mut WebmReader, track: u64) -> std::result::Result<Option<Block>, WebmError> {
    while let Some(block) = reader.next_block()? {
        if block.track == track {
            return Ok(Some(block));
        }
    }
    Ok(None)
}

fn write_block(
    writer: &mut FileWriter,
    track: u64,
    block: &Block,
    offset_ns: i64,
) -> std::result::Result<(), WebmError> {
    let timestamp = (offset_ns + block.timestamp_ns).max(0) as u64;
    writer.add_frame(track, &block.data, timestamp, block.is_key)
}
