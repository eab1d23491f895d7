// WebM container support
//
// Writing goes through libwebm's muxer (the `webm` crate) and reading through
// `matroska-demuxer`. This module adds the track bookkeeping the recorder
// needs on top of both, plus merging a video file with looping audio.

pub mod mux;
pub mod reader;
pub mod writer;

pub use mux::{mux_audio_video, mux_in_background, MuxError, MuxReport};
pub use reader::{Block, BlockCursor, WebmReader};
pub use writer::WebmWriter;

/// Codec ID written for the recorder's video track
pub const CODEC_VP8: &str = "V_VP8";
pub const CODEC_VP9: &str = "V_VP9";
pub const CODEC_OPUS: &str = "A_OPUS";
pub const CODEC_VORBIS: &str = "A_VORBIS";

/// Timecode scale libwebm writes: one tick per millisecond
pub const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// Error type for WebM reading and writing
#[derive(Debug, thiserror::Error)]
pub enum WebmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Demux error: {0}")]
    Demux(#[from] matroska_demuxer::DemuxError),

    #[error("Unsupported document type: {0}")]
    DocType(String),

    #[error("Unknown track number {0}")]
    UnknownTrack(u64),

    #[error("Codec {0} cannot be written to WebM")]
    UnsupportedCodec(String),

    #[error("Muxer error: {0}")]
    Muxer(String),
}

pub type Result<T> = std::result::Result<T, WebmError>;

/// Type-specific track settings
#[derive(Debug, Clone, PartialEq)]
pub enum TrackKind {
    Video {
        width: u64,
        height: u64,
    },
    Audio {
        sampling_rate: f64,
        channels: u64,
        bit_depth: Option<u64>,
    },
    /// Subtitles, metadata and the like; kept so numbering stays intact
    Other,
}

/// One TrackEntry as read back from a file
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub number: u64,
    pub uid: u64,
    pub codec_id: String,
    pub codec_private: Option<Vec<u8>>,
    /// Nanoseconds per frame, when constant
    pub default_duration: Option<u64>,
    pub kind: TrackKind,
}

impl TrackInfo {
    pub fn is_video(&self) -> bool {
        matches!(self.kind, TrackKind::Video { .. })
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, TrackKind::Audio { .. })
    }
}

/// Segment-level information
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    pub timecode_scale: u64,
    /// Duration in timecode-scale units
    pub duration: Option<f64>,
    pub muxing_app: Option<String>,
    pub writing_app: Option<String>,
}

impl Default for SegmentInfo {
    fn default() -> Self {
        Self {
            timecode_scale: DEFAULT_TIMECODE_SCALE,
            duration: None,
            muxing_app: None,
            writing_app: None,
        }
    }
}

impl SegmentInfo {
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration
            .map(|d| d * self.timecode_scale as f64 / 1_000_000_000.0)
    }
}
