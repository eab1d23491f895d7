// Scripted encoder shared by the recording unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::encoding::{CompressedFrame, EncoderConfig, EncoderError, EncoderInput, Result, VideoEncoder};

/// Counts how many threads are inside `encode` at once
#[derive(Default)]
pub struct CallCounter {
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub calls: AtomicUsize,
}

/// Emits one packet per input after holding back `lookahead` frames.
/// Frames whose pts is a multiple of `keyframe_every` are keyframes.
pub struct ScriptedEncoder {
    pub lookahead: usize,
    pub keyframe_every: i64,
    pub fail_on: Vec<i64>,
    pub work: Duration,
    pub counter: Arc<CallCounter>,
    held: VecDeque<CompressedFrame>,
    pub finished: bool,
}

impl ScriptedEncoder {
    pub fn new(lookahead: usize, keyframe_every: i64) -> Self {
        Self {
            lookahead,
            keyframe_every: keyframe_every.max(1),
            fail_on: Vec::new(),
            work: Duration::ZERO,
            counter: Arc::new(CallCounter::default()),
            held: VecDeque::new(),
            finished: false,
        }
    }
}

impl VideoEncoder for ScriptedEncoder {
    fn open(config: &EncoderConfig) -> Result<Self> {
        Ok(Self::new(2, config.keyframe_max_dist as i64))
    }

    fn encode(&mut self, input: EncoderInput<'_>) -> Result<Vec<CompressedFrame>> {
        let now = self.counter.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counter.max_active.fetch_max(now, Ordering::SeqCst);
        self.counter.calls.fetch_add(1, Ordering::SeqCst);
        if !self.work.is_zero() {
            std::thread::sleep(self.work);
        }

        let result = match input {
            EncoderInput::Frame { pts, .. } if self.fail_on.contains(&pts) => {
                Err(EncoderError::Encode(format!("scripted failure at {}", pts)))
            }
            EncoderInput::Frame { data, pts } => {
                let mut payload = pts.to_le_bytes().to_vec();
                payload.push(data.first().copied().unwrap_or(0));
                self.held.push_back(CompressedFrame {
                    data: payload,
                    pts,
                    is_keyframe: pts % self.keyframe_every == 0,
                });
                let mut out = Vec::new();
                while self.held.len() > self.lookahead {
                    out.extend(self.held.pop_front());
                }
                Ok(out)
            }
            EncoderInput::Flush => Ok(self.held.pop_front().into_iter().collect()),
        };

        self.counter.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}
