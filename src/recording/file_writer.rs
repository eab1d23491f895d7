// Session-facing video file writer
//
// Wraps a WebM writer configured for a single VP8 track. Frames arrive with
// encoder timebase ticks which are converted to nanoseconds here.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::webm::{self, WebmWriter};

/// Writing application recorded in the file header
pub const WRITING_APP: &str = "screenrecorder";

/// What was written when the file was closed
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFileSummary {
    pub path: PathBuf,
    pub frames: u64,
    pub duration_secs: f64,
}

pub struct VideoFileWriter {
    writer: WebmWriter<File>,
    track: u64,
    frame_ns: u64,
    path: PathBuf,
    frames: u64,
    last_ticks: i64,
}

impl VideoFileWriter {
    pub fn open(filename: &Path, width: u32, height: u32, fps: u32) -> webm::Result<Self> {
        let mut writer = WebmWriter::create(filename)?;
        writer.set_writing_app(WRITING_APP);
        let track = writer.add_video_track(width, height, webm::CODEC_VP8)?;
        log::debug!("Opened {:?} for {}x{} @ {} fps", filename, width, height, fps);

        Ok(Self {
            writer,
            track,
            frame_ns: 1_000_000_000 / fps.max(1) as u64,
            path: filename.to_path_buf(),
            frames: 0,
            last_ticks: -1,
        })
    }

    pub fn write_frame(&mut self, data: &[u8], ticks: i64, is_keyframe: bool) -> webm::Result<()> {
        let timestamp_ns = ticks.max(0) as u64 * self.frame_ns;
        self.writer.add_frame(self.track, data, timestamp_ns, is_keyframe)?;
        self.frames += 1;
        self.last_ticks = self.last_ticks.max(ticks);
        Ok(())
    }

    /// Finalize the container and close the file.
    pub fn close(self) -> webm::Result<VideoFileSummary> {
        self.writer.finalize()?;
        let duration_secs = if self.frames == 0 {
            0.0
        } else {
            (self.last_ticks + 1) as f64 * self.frame_ns as f64 / 1_000_000_000.0
        };
        log::info!(
            "Closed {:?}: {} frames, {:.2}s",
            self.path,
            self.frames,
            duration_secs
        );
        Ok(VideoFileSummary {
            path: self.path,
            frames: self.frames,
            duration_secs,
        })
    }
}
