//! VP8 encoding through GStreamer
//!
//! Pipeline: `appsrc (I420) ! vp8enc ! appsink`. Raw frames are pushed in with
//! their presentation time and compressed packets are pulled back out without
//! blocking; any packets the encoder still holds are collected after EOS when
//! the session flushes.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::gst_init;
use super::{CompressedFrame, EncoderConfig, EncoderError, EncoderInput, Result, VideoEncoder};

/// How long a flush waits for the next packet after EOS
const FLUSH_PULL_TIMEOUT_SECS: u64 = 5;

pub struct GstVp8Encoder {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    fps: u32,
    frame_ns: u64,
    eos_sent: bool,
}

impl GstVp8Encoder {
    fn create_pipeline(config: &EncoderConfig) -> Result<(gst::Pipeline, gst_app::AppSrc, gst_app::AppSink)> {
        let pipeline = gst::Pipeline::new();

        let video_info = gst_video::VideoInfo::builder(gst_video::VideoFormat::I420, config.width, config.height)
            .fps(gst::Fraction::new(config.fps as i32, 1))
            .build()
            .map_err(|e| EncoderError::Pipeline(format!("Invalid video info: {}", e)))?;
        let caps = video_info
            .to_caps()
            .map_err(|e| EncoderError::Pipeline(format!("Failed to build caps: {}", e)))?;

        let appsrc = gst_app::AppSrc::builder()
            .name("src")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(false)
            .block(true)
            .stream_type(gst_app::AppStreamType::Stream)
            .build();

        let encoder = gst::ElementFactory::make("vp8enc")
            .build()
            .map_err(|e| EncoderError::NotAvailable(format!("Failed to create vp8enc: {}", e)))?;
        apply_realtime_vp8(&encoder, config);

        let appsink = gst_app::AppSink::builder()
            .name("sink")
            .sync(false)
            .build();

        pipeline
            .add_many([appsrc.upcast_ref(), &encoder, appsink.upcast_ref()])
            .map_err(|e| EncoderError::Pipeline(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([appsrc.upcast_ref(), &encoder, appsink.upcast_ref()])
            .map_err(|e| EncoderError::Pipeline(format!("Failed to link elements: {}", e)))?;

        Ok((pipeline, appsrc, appsink))
    }

    fn to_compressed(&self, sample: gst::Sample) -> Result<CompressedFrame> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| EncoderError::Encode("sample without buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| EncoderError::Encode(format!("Failed to map buffer: {}", e)))?;
        let pts_ns = buffer.pts().map(|t| t.nseconds()).unwrap_or(0);
        Ok(CompressedFrame {
            data: map.as_slice().to_vec(),
            pts: ((pts_ns as u128 * self.fps as u128 + 500_000_000) / 1_000_000_000) as i64,
            is_keyframe: !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT),
        })
    }

    /// Collect packets that are ready right now.
    fn drain_ready(&self) -> Result<Vec<CompressedFrame>> {
        let mut packets = Vec::new();
        while let Some(sample) = self.appsink.try_pull_sample(gst::ClockTime::ZERO) {
            packets.push(self.to_compressed(sample)?);
        }
        Ok(packets)
    }

    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(err) = msg.view() {
                return Err(EncoderError::Pipeline(format!(
                    "{} ({:?})",
                    err.error(),
                    err.debug()
                )));
            }
        }
        Ok(())
    }
}

impl VideoEncoder for GstVp8Encoder {
    fn open(config: &EncoderConfig) -> Result<Self> {
        gst_init::check_vp8_available()?;
        let (pipeline, appsrc, appsink) = Self::create_pipeline(config)?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| EncoderError::Pipeline(format!("Failed to start pipeline: {:?}", e)))?;

        log::info!(
            "[Encoder] vp8enc opened: {}x{} @ {} fps, {} bps, keyframe every {} frames",
            config.width,
            config.height,
            config.fps,
            config.bitrate,
            config.keyframe_max_dist
        );

        Ok(Self {
            pipeline,
            appsrc,
            appsink,
            fps: config.fps.max(1),
            frame_ns: config.frame_duration_ns(),
            eos_sent: false,
        })
    }

    fn encode(&mut self, input: EncoderInput<'_>) -> Result<Vec<CompressedFrame>> {
        self.check_bus()?;
        match input {
            EncoderInput::Frame { data, pts } => {
                if self.eos_sent {
                    return Err(EncoderError::Encode("frame submitted after flush".into()));
                }
                let mut buffer = gst::Buffer::from_mut_slice(data.to_vec());
                {
                    let buffer_ref = buffer.make_mut();
                    buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts.max(0) as u64 * self.frame_ns));
                    buffer_ref.set_duration(gst::ClockTime::from_nseconds(self.frame_ns));
                }
                self.appsrc
                    .push_buffer(buffer)
                    .map_err(|e| EncoderError::Encode(format!("Failed to push buffer: {:?}", e)))?;
                self.drain_ready()
            }
            EncoderInput::Flush => {
                if !self.eos_sent {
                    if let Err(e) = self.appsrc.end_of_stream() {
                        log::warn!("[Encoder] EOS send failed: {:?}", e);
                    }
                    self.eos_sent = true;
                }
                // One packet per call; None once the sink has seen EOS.
                let timeout = gst::ClockTime::from_seconds(FLUSH_PULL_TIMEOUT_SECS);
                match self.appsink.try_pull_sample(timeout) {
                    Some(sample) => Ok(vec![self.to_compressed(sample)?]),
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| EncoderError::Pipeline(format!("Failed to stop pipeline: {:?}", e)))?;
        log::debug!("[Encoder] vp8enc closed");
        Ok(())
    }
}

impl Drop for GstVp8Encoder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Realtime one-pass VBR settings for libvpx's vp8enc
///
/// Properties used:
/// - `deadline`: 1 = realtime
/// - `target-bitrate`: bits per second
/// - `end-usage`: VBR rate control
/// - `min-quantizer` / `max-quantizer`: quality bounds
/// - `keyframe-max-dist`: forced keyframe spacing in frames
/// - `lag-in-frames`: 0 so packets come out as soon as possible
fn apply_realtime_vp8(encoder: &gst::Element, config: &EncoderConfig) {
    let threads = std::thread::available_parallelism()
        .map(|p| p.get() as u32)
        .unwrap_or(config.threads)
        .min(config.threads) as i32;

    encoder.set_property_from_str("deadline", "1");
    encoder.set_property("cpu-used", 4i32);
    encoder.set_property("threads", threads);
    encoder.set_property("target-bitrate", config.bitrate.min(i32::MAX as u32) as i32);
    encoder.set_property_from_str("end-usage", "vbr");
    encoder.set_property("min-quantizer", config.min_quantizer as i32);
    encoder.set_property("max-quantizer", config.max_quantizer as i32);
    encoder.set_property("lag-in-frames", 0i32);
    if config.keyframe_max_dist > 0 {
        encoder.set_property("keyframe-max-dist", config.keyframe_max_dist as i32);
    }
}
