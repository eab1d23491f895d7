// WebM writer
//
// Wraps a libwebm segment. Tracks are numbered in the order they are added,
// starting at 1, and frames are addressed by that number.

use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;

use webm::mux::{self, AudioCodecId, AudioTrack, Segment, Track, VideoCodecId, VideoTrack};

use super::{Result, WebmError, CODEC_OPUS, CODEC_VORBIS, CODEC_VP8, CODEC_VP9};

enum TrackHandle {
    Video(VideoTrack),
    Audio(AudioTrack),
}

pub struct WebmWriter<W: Write + Seek> {
    segment: Segment<mux::Writer<W>>,
    tracks: Vec<(u64, TrackHandle)>,
    /// Duration in timecode units; libwebm computes one when unset
    duration: Option<f64>,
    blocks: u64,
}

// SAFETY: the segment and the track handles that point into it are owned by
// this value alone and are only reached through `&mut self`.
unsafe impl<W: Write + Seek + Send> Send for WebmWriter<W> {}

impl WebmWriter<File> {
    /// Create (or truncate) `path` and start a segment in it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Self::new(file)
    }
}

impl<W: Write + Seek> WebmWriter<W> {
    pub fn new(sink: W) -> Result<Self> {
        let segment = Segment::new(mux::Writer::new(sink))
            .ok_or_else(|| WebmError::Muxer("could not initialize segment".into()))?;
        Ok(Self {
            segment,
            tracks: Vec::new(),
            duration: None,
            blocks: 0,
        })
    }

    fn next_number(&self) -> u64 {
        self.tracks.len() as u64 + 1
    }

    pub fn add_video_track(&mut self, width: u32, height: u32, codec_id: &str) -> Result<u64> {
        let codec = match codec_id {
            CODEC_VP8 => VideoCodecId::VP8,
            CODEC_VP9 => VideoCodecId::VP9,
            other => return Err(WebmError::UnsupportedCodec(other.to_string())),
        };
        let number = self.next_number();
        let track = self
            .segment
            .add_video_track(width, height, Some(number as i32), codec);
        self.tracks.push((number, TrackHandle::Video(track)));
        Ok(number)
    }

    pub fn add_audio_track(&mut self, sampling_rate: f64, channels: u64, codec_id: &str) -> Result<u64> {
        let codec = match codec_id {
            CODEC_OPUS => AudioCodecId::Opus,
            CODEC_VORBIS => AudioCodecId::Vorbis,
            other => return Err(WebmError::UnsupportedCodec(other.to_string())),
        };
        let number = self.next_number();
        let track = self.segment.add_audio_track(
            sampling_rate.round() as i32,
            channels as i32,
            Some(number as i32),
            codec,
        );
        self.tracks.push((number, TrackHandle::Audio(track)));
        Ok(number)
    }

    pub fn set_codec_private(&mut self, track: u64, data: &[u8]) -> Result<()> {
        self.check_track(track)?;
        if self.segment.set_codec_private(track, data) {
            Ok(())
        } else {
            Err(WebmError::Muxer(format!("could not set CodecPrivate on track {}", track)))
        }
    }

    pub fn set_writing_app(&mut self, app: &str) {
        self.segment.set_app_name(app);
    }

    /// Fix the segment duration, in timecode units.
    pub fn set_duration(&mut self, units: f64) {
        self.duration = Some(units);
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks
    }

    fn check_track(&self, track: u64) -> Result<()> {
        if self.tracks.iter().any(|(n, _)| *n == track) {
            Ok(())
        } else {
            Err(WebmError::UnknownTrack(track))
        }
    }

    /// Write one frame. Timestamps must not go backwards within a track.
    pub fn add_frame(&mut self, track: u64, data: &[u8], timestamp_ns: u64, is_key: bool) -> Result<()> {
        let handle = self
            .tracks
            .iter_mut()
            .find(|(n, _)| *n == track)
            .map(|(_, h)| h)
            .ok_or(WebmError::UnknownTrack(track))?;
        let written = match handle {
            TrackHandle::Video(t) => t.add_frame(data, timestamp_ns, is_key),
            TrackHandle::Audio(t) => t.add_frame(data, timestamp_ns, is_key),
        };
        if !written {
            return Err(WebmError::Muxer(format!(
                "frame at {} ns rejected on track {}",
                timestamp_ns, track
            )));
        }
        self.blocks += 1;
        Ok(())
    }

    /// Write cues, seek head and sizes, then release the sink.
    pub fn finalize(self) -> Result<()> {
        let duration = self.duration.filter(|d| *d > 0.0).map(|d| d.round() as u64);
        let blocks = self.blocks;
        self.segment
            .try_finalize(duration)
            .map(|_| ())
            .map_err(|_| WebmError::Muxer(format!("finalize failed after {} blocks", blocks)))
    }
}
