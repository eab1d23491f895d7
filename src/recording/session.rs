// Recording session
//
// Owns the capture pipeline for one output file at a time:
//   init -> start -> capture_frame (once per rendered frame) -> stop
// A stopped session can be initialized again for the next recording.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::circular::CircularFrameBuffer;
use super::file_writer::VideoFileWriter;
use super::readback::{CaptureTarget, PixelSource, ReadbackPipeline};
use super::stage::EncodeStage;
use super::worker::EncodingWorker;
use super::{Result, SessionError, SessionState};
use crate::config::{CaptureParams, RawCaptureParams};
use crate::encoding::{EncoderConfig, VideoEncoder};
use crate::events::{EventQueue, SessionEvent};

/// What `stop` produced
#[derive(Debug, Clone, PartialEq)]
pub struct StopSummary {
    pub path: PathBuf,
    /// Frames handed to `capture_frame`
    pub frames_captured: u64,
    /// Packets the encoder produced
    pub packets_encoded: u64,
    /// Frames stored in the output file
    pub frames_written: u64,
    /// Buffered frames skipped before the first keyframe
    pub frames_discarded: u64,
    /// Frames lost to encode errors
    pub frames_dropped: u64,
    pub duration_secs: f64,
}

struct ActiveRecording<E: VideoEncoder> {
    readback: ReadbackPipeline,
    stage: Arc<Mutex<EncodeStage<E>>>,
    worker: Option<EncodingWorker>,
}

/// Everything needed to finish a recording once capture has ended.
/// Runs on the caller's thread for `stop` or on its own for `stop_in_background`.
struct StopJob<E: VideoEncoder> {
    stage: EncodeStage<E>,
    frames_captured: u64,
    state: Arc<Mutex<SessionState>>,
    events: EventQueue,
}

impl<E: VideoEncoder> StopJob<E> {
    fn run(self) -> Result<StopSummary> {
        let mut stage = self.stage;

        let mut flushed = 0u64;
        while stage.encode_frame(None) {
            flushed += 1;
        }
        log::debug!("Encoder flushed {} held packet batch(es)", flushed);

        let packets_encoded = stage.packets();
        let frames_dropped = stage.dropped();
        let parts = stage.into_parts();

        let mut encoder = parts.encoder;
        let finish_result = encoder.finish();
        drop(encoder);

        let mut writer = parts.writer;
        let mut frames_discarded = 0;
        if let Some(buffer) = parts.buffer {
            log::debug!(
                "Draining {} buffered frames ({} bytes)",
                buffer.len(),
                buffer.bytes_used()
            );
            let mut frames = buffer.keyframe_aligned();
            for frame in frames.by_ref() {
                writer.write_frame(frame.data, frame.timestamp, frame.is_keyframe)?;
            }
            frames_discarded = frames.discarded() as u64;
        }

        let file = writer.close()?;
        if let Some(e) = parts.write_error {
            return Err(e.into());
        }
        finish_result?;

        Ok(StopSummary {
            path: file.path,
            frames_captured: self.frames_captured,
            packets_encoded,
            frames_written: file.frames,
            frames_discarded,
            frames_dropped,
            duration_secs: file.duration_secs,
        })
    }
}

/// Run a stop job and publish its outcome.
fn complete_stop<E: VideoEncoder>(job: StopJob<E>) -> Result<StopSummary> {
    let state = job.state.clone();
    let events = job.events.clone();
    let result = job.run();
    *state.lock() = SessionState::Stopped;

    match &result {
        Ok(summary) => log::info!(
            "Recording saved to {:?}: {} frames ({} discarded), {:.2}s",
            summary.path,
            summary.frames_written,
            summary.frames_discarded,
            summary.duration_secs
        ),
        Err(e) => log::error!("Failed to finish recording: {}", e),
    }
    events.push(SessionEvent::recorded(result.as_ref().err().map(|e| e.to_string())));
    result
}

pub struct RecordingSession<S: PixelSource, E: VideoEncoder> {
    source: S,
    events: EventQueue,
    state: Arc<Mutex<SessionState>>,
    params: Option<CaptureParams>,
    depth: usize,
    active: Option<ActiveRecording<E>>,
    frames_captured: u64,
    stop_thread: Option<JoinHandle<()>>,
}

impl<S: PixelSource, E: VideoEncoder> RecordingSession<S, E> {
    pub fn new(source: S, events: EventQueue) -> Self {
        Self {
            source,
            events,
            state: Arc::new(Mutex::new(SessionState::Uninitialized)),
            params: None,
            depth: 1,
            active: None,
            frames_captured: 0,
            stop_thread: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn params(&self) -> Option<&CaptureParams> {
        self.params.as_ref()
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    /// Readback slots in use (3 with async readback, otherwise 1)
    pub fn readback_depth(&self) -> usize {
        self.depth
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    fn require(&self, action: &'static str, expected: SessionState) -> Result<()> {
        let state = self.state();
        if state != expected {
            return Err(SessionError::InvalidState { action, state });
        }
        Ok(())
    }

    /// Wait for a previous `stop_in_background` to finish.
    pub fn wait_for_background_stop(&mut self) {
        if let Some(handle) = self.stop_thread.take() {
            if handle.join().is_err() {
                log::error!("Background stop thread panicked");
                self.set_state(SessionState::Stopped);
            }
        }
    }

    /// Validate parameters from a raw table and prepare capture resources.
    pub fn init_raw(&mut self, raw: RawCaptureParams) -> Result<()> {
        match CaptureParams::from_raw(raw) {
            Ok(params) => self.init(params),
            Err(e) => {
                self.events.push(SessionEvent::init(Some(e.to_string())));
                Err(e.into())
            }
        }
    }

    /// Prepare capture resources for `params` and raise the `init` event.
    pub fn init(&mut self, params: CaptureParams) -> Result<()> {
        self.wait_for_background_stop();
        let state = self.state();
        if !state.can_init() {
            return Err(SessionError::InvalidState { action: "init", state });
        }

        let depth = ReadbackPipeline::depth_for(&self.source);
        let target = CaptureTarget {
            texture: params.texture,
            width: params.width,
            height: params.height,
            x_scale: params.x_scale,
            y_scale: params.y_scale,
        };
        if state == SessionState::Initialized {
            self.source.release();
        }
        if let Err(e) = self.source.prepare(&target, depth) {
            self.set_state(SessionState::Uninitialized);
            self.events.push(SessionEvent::init(Some(e.to_string())));
            return Err(e.into());
        }

        log::debug!(
            "Session initialized: {:?} {}x{} @ {} fps, {} readback slot(s), {}",
            params.filename,
            params.width,
            params.height,
            params.fps,
            depth,
            match params.duration {
                Some(d) => format!("keeping last {}s", d),
                None => "unbounded".to_string(),
            }
        );
        self.depth = depth;
        self.params = Some(params);
        self.set_state(SessionState::Initialized);
        self.events.push(SessionEvent::init(None));
        Ok(())
    }

    /// Open the encoder and output file and begin accepting frames.
    pub fn start(&mut self) -> Result<()>
    where
        E: 'static,
    {
        self.require("start", SessionState::Initialized)?;
        let Some(params) = self.params.clone() else {
            return Err(SessionError::InvalidState {
                action: "start",
                state: SessionState::Uninitialized,
            });
        };

        let config = EncoderConfig::from_params(&params);
        let encoder = E::open(&config)?;
        let buffer = params
            .buffer_plan()
            .map(CircularFrameBuffer::with_plan)
            .transpose()?;
        let writer = VideoFileWriter::open(&params.filename, params.width, params.height, params.fps)?;

        let stage = Arc::new(Mutex::new(EncodeStage::new(encoder, buffer, writer)));
        let worker = if params.async_encoding {
            Some(EncodingWorker::spawn(stage.clone(), config.frame_size())?)
        } else {
            None
        };

        self.active = Some(ActiveRecording {
            readback: ReadbackPipeline::new(self.depth),
            stage,
            worker,
        });
        self.frames_captured = 0;
        self.set_state(SessionState::Recording);
        log::info!(
            "Recording started: {:?} ({} encoding)",
            params.filename,
            if params.async_encoding { "async" } else { "inline" }
        );
        Ok(())
    }

    /// Capture the current frame. Call once per rendered frame.
    pub fn capture_frame(&mut self) -> Result<()> {
        self.require("capture", SessionState::Recording)?;
        let Some(active) = self.active.as_mut() else {
            return Err(SessionError::InvalidState {
                action: "capture",
                state: SessionState::Initialized,
            });
        };

        if let Some(slot) = active.readback.advance(&mut self.source)? {
            let image = self.source.map(slot)?;
            match active.worker.as_mut() {
                Some(worker) => worker.submit(image)?,
                None => {
                    active.stage.lock().encode_frame(Some(image));
                }
            }
            active.readback.release(slot);
        }
        self.frames_captured += 1;
        Ok(())
    }

    /// End capture: join the worker, encode outstanding readbacks and take the
    /// encode stage back for flushing.
    fn begin_stop(&mut self) -> Result<StopJob<E>> {
        self.require("stop", SessionState::Recording)?;
        self.set_state(SessionState::Stopping);

        let Some(mut active) = self.active.take() else {
            return Err(SessionError::Worker("no active recording".into()));
        };

        let worker_result = match active.worker.take() {
            Some(worker) => worker.shutdown(),
            None => Ok(()),
        };

        let pending = active.readback.drain_pending();
        if !pending.is_empty() {
            log::debug!("Encoding {} outstanding readback(s)", pending.len());
        }
        for slot in pending {
            match self.source.map(slot) {
                Ok(image) => {
                    active.stage.lock().encode_frame(Some(image));
                }
                Err(e) => log::warn!("Dropping pending readback in slot {}: {}", slot, e),
            }
            active.readback.release(slot);
        }

        let stage = Arc::try_unwrap(active.stage)
            .map_err(|_| SessionError::Worker("encode stage still in use".into()))?
            .into_inner();
        worker_result?;

        Ok(StopJob {
            stage,
            frames_captured: self.frames_captured,
            state: self.state.clone(),
            events: self.events.clone(),
        })
    }

    fn fail_stop(&self, error: SessionError) -> SessionError {
        if !matches!(error, SessionError::InvalidState { .. }) {
            self.set_state(SessionState::Stopped);
            log::error!("Failed to stop recording: {}", error);
            self.events.push(SessionEvent::recorded(Some(error.to_string())));
        }
        error
    }

    /// Stop recording and write the file. Raises the `recorded` event.
    pub fn stop(&mut self) -> Result<StopSummary> {
        let job = self.begin_stop().map_err(|e| self.fail_stop(e))?;
        complete_stop(job)
    }

    /// Like [`stop`](Self::stop), but flushing and writing happen on a
    /// separate thread. The outcome is reported only through the event queue.
    pub fn stop_in_background(&mut self) -> Result<()>
    where
        E: 'static,
    {
        self.wait_for_background_stop();
        let job = self.begin_stop().map_err(|e| self.fail_stop(e))?;
        let handle = std::thread::Builder::new()
            .name("screenrec-stop".into())
            .spawn(move || {
                let _ = complete_stop(job);
            })
            .map_err(|e| self.fail_stop(SessionError::Worker(format!("Failed to spawn stop thread: {}", e))))?;
        self.stop_thread = Some(handle);
        Ok(())
    }
}

impl<S: PixelSource, E: VideoEncoder> Drop for RecordingSession<S, E> {
    fn drop(&mut self) {
        if self.state() == SessionState::Recording {
            log::warn!("Session dropped while recording; stopping");
            if let Err(e) = self.stop() {
                log::error!("Stop on drop failed: {}", e);
            }
        }
        self.wait_for_background_stop();
        self.source.release();
    }
}
