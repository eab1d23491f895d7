// Encode stage
//
// The encoder plus wherever its packets go. Bounded sessions keep packets in
// the circular buffer until stop; unbounded sessions stream them straight to
// the file. Only one thread uses a stage at a time.

use super::circular::CircularFrameBuffer;
use super::file_writer::VideoFileWriter;
use crate::encoding::{CompressedFrame, EncoderInput, VideoEncoder};
use crate::webm::WebmError;

pub struct EncodeStage<E: VideoEncoder> {
    encoder: E,
    next_pts: i64,
    buffer: Option<CircularFrameBuffer>,
    writer: VideoFileWriter,
    packets: u64,
    dropped: u64,
    write_error: Option<WebmError>,
}

impl<E: VideoEncoder> EncodeStage<E> {
    pub fn new(encoder: E, buffer: Option<CircularFrameBuffer>, writer: VideoFileWriter) -> Self {
        Self {
            encoder,
            next_pts: 0,
            buffer,
            writer,
            packets: 0,
            dropped: 0,
            write_error: None,
        }
    }

    /// Encode one frame, or flush when `image` is `None`.
    ///
    /// Every packet produced is routed on. Encode failures are logged and the
    /// frame is dropped. Returns whether any packet came out.
    pub fn encode_frame(&mut self, image: Option<&[u8]>) -> bool {
        let input = match image {
            Some(data) => {
                let pts = self.next_pts;
                self.next_pts += 1;
                EncoderInput::Frame { data, pts }
            }
            None => EncoderInput::Flush,
        };

        match self.encoder.encode(input) {
            Ok(packets) => {
                let produced = !packets.is_empty();
                for packet in packets {
                    self.route(packet);
                }
                produced
            }
            Err(e) => {
                self.dropped += 1;
                log::warn!("Encode failed, dropping frame: {}", e);
                false
            }
        }
    }

    fn route(&mut self, packet: CompressedFrame) {
        self.packets += 1;
        match self.buffer.as_mut() {
            Some(buffer) => {
                buffer.add_frame(&packet.data, packet.pts, packet.is_keyframe);
            }
            None => {
                if self.write_error.is_some() {
                    return;
                }
                if let Err(e) = self.writer.write_frame(&packet.data, packet.pts, packet.is_keyframe) {
                    log::error!("Failed to write frame {}: {}", packet.pts, e);
                    self.write_error = Some(e);
                }
            }
        }
    }

    /// Frames submitted so far (the next presentation index)
    pub fn frames_submitted(&self) -> i64 {
        self.next_pts
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn into_parts(self) -> StageParts<E> {
        StageParts {
            encoder: self.encoder,
            buffer: self.buffer,
            writer: self.writer,
            write_error: self.write_error,
        }
    }
}

pub(crate) struct StageParts<E> {
    pub encoder: E,
    pub buffer: Option<CircularFrameBuffer>,
    pub writer: VideoFileWriter,
    pub write_error: Option<WebmError>,
}
