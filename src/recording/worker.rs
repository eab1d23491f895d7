// Encoding worker
//
// One background thread that encodes frames handed over by the capture
// thread. The handoff is a single-slot mailbox in each direction: a request
// carries the frame bytes to the worker and the done signal carries the
// buffer back for reuse. At most one job is in flight, and the capture thread
// only waits when it needs to submit while that job is still running.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use super::stage::EncodeStage;
use super::SessionError;
use crate::encoding::VideoEncoder;

enum WorkerMessage {
    Encode(Vec<u8>),
    Exit,
}

pub struct EncodingWorker {
    requests: Sender<WorkerMessage>,
    done: Receiver<Vec<u8>>,
    spare: Option<Vec<u8>>,
    in_flight: bool,
    handle: Option<JoinHandle<()>>,
}

impl EncodingWorker {
    pub fn spawn<E: VideoEncoder + 'static>(
        stage: Arc<Mutex<EncodeStage<E>>>,
        frame_size: usize,
    ) -> Result<Self, SessionError> {
        let (request_tx, request_rx) = bounded::<WorkerMessage>(1);
        let (done_tx, done_rx) = bounded::<Vec<u8>>(1);

        let handle = std::thread::Builder::new()
            .name("screenrec-encoder".into())
            .spawn(move || Self::worker_main(request_rx, done_tx, stage))
            .map_err(|e| SessionError::Worker(format!("Failed to spawn encoder thread: {}", e)))?;

        log::debug!("[Worker] Encoder thread started");
        Ok(Self {
            requests: request_tx,
            done: done_rx,
            spare: Some(Vec::with_capacity(frame_size)),
            in_flight: false,
            handle: Some(handle),
        })
    }

    fn worker_main<E: VideoEncoder>(
        requests: Receiver<WorkerMessage>,
        done: Sender<Vec<u8>>,
        stage: Arc<Mutex<EncodeStage<E>>>,
    ) {
        let mut jobs = 0u64;
        loop {
            match requests.recv() {
                Ok(WorkerMessage::Encode(buffer)) => {
                    stage.lock().encode_frame(Some(&buffer));
                    jobs += 1;
                    if done.send(buffer).is_err() {
                        break;
                    }
                }
                Ok(WorkerMessage::Exit) | Err(_) => break,
            }
        }
        log::debug!("[Worker] Encoder thread exiting after {} jobs", jobs);
    }

    /// Queue `image` for encoding.
    ///
    /// The bytes are copied into the idle buffer first; the call then waits
    /// for the previous job only if it has not finished yet.
    pub fn submit(&mut self, image: &[u8]) -> Result<(), SessionError> {
        let mut buffer = self.spare.take().unwrap_or_default();
        buffer.clear();
        buffer.extend_from_slice(image);

        if self.in_flight {
            let returned = self
                .done
                .recv()
                .map_err(|_| SessionError::Worker("encoder thread stopped".into()))?;
            self.spare = Some(returned);
            self.in_flight = false;
        }

        self.requests
            .send(WorkerMessage::Encode(buffer))
            .map_err(|_| SessionError::Worker("encoder thread stopped".into()))?;
        self.in_flight = true;
        Ok(())
    }

    /// Ask the worker to exit and wait for it. A running job always finishes.
    pub fn shutdown(mut self) -> Result<(), SessionError> {
        let _ = self.requests.send(WorkerMessage::Exit);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| SessionError::Worker("encoder thread panicked".into())),
            None => Ok(()),
        }
    }
}

impl Drop for EncodingWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Let the thread wind down on its own
            let _ = self.requests.try_send(WorkerMessage::Exit);
        }
    }
}
