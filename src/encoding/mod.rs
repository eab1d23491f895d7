// Video encoding
//
// The session drives any `VideoEncoder`: raw I420 frames go in, zero or more
// compressed VP8 packets come out. The real backend is GStreamer's vp8enc
// (feature `gstreamer`); tests plug in scripted encoders.

#[cfg(feature = "gstreamer")]
pub mod gst_init;
#[cfg(feature = "gstreamer")]
pub mod vp8;

use crate::config::CaptureParams;

/// Error type for encoder operations
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("GStreamer error: {0}")]
    Gst(String),

    #[error("Encoder not available: {0}")]
    NotAvailable(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Encode failed: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, EncoderError>;

/// Quantizer bounds used for every session
pub const MIN_QUANTIZER: u32 = 2;
pub const MAX_QUANTIZER: u32 = 50;

/// Settings the encoder is opened with
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Longest run of frames between keyframes
    pub keyframe_max_dist: u32,
    pub min_quantizer: u32,
    pub max_quantizer: u32,
    pub threads: u32,
}

impl EncoderConfig {
    pub fn from_params(params: &CaptureParams) -> Self {
        Self {
            width: params.width,
            height: params.height,
            fps: params.fps,
            bitrate: params.bitrate,
            keyframe_max_dist: params.keyframe_max_dist(),
            min_quantizer: MIN_QUANTIZER,
            max_quantizer: MAX_QUANTIZER,
            threads: 4,
        }
    }

    /// Bytes in one I420 input frame
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3 / 2
    }

    /// Duration of one frame (one timebase tick) in nanoseconds
    pub fn frame_duration_ns(&self) -> u64 {
        1_000_000_000 / self.fps.max(1) as u64
    }
}

/// An encoded packet
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedFrame {
    pub data: Vec<u8>,
    /// Presentation time in timebase ticks (frames)
    pub pts: i64,
    pub is_keyframe: bool,
}

/// What the session hands the encoder
#[derive(Debug, Clone, Copy)]
pub enum EncoderInput<'a> {
    /// One raw I420 frame and its presentation index
    Frame { data: &'a [u8], pts: i64 },
    /// No image; ask for packets the encoder is still holding
    Flush,
}

/// A VP8 encoder backend
pub trait VideoEncoder: Send {
    fn open(config: &EncoderConfig) -> Result<Self>
    where
        Self: Sized;

    /// Submit one input and return every packet that became available.
    ///
    /// A flush must eventually return an empty list once nothing is held back.
    fn encode(&mut self, input: EncoderInput<'_>) -> Result<Vec<CompressedFrame>>;

    /// Release the backend. Called once after flushing.
    fn finish(&mut self) -> Result<()>;
}
