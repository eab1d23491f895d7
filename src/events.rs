// Session events
//
// Completion notices for init, recording and muxing. They can be raised from
// any thread (the stop and mux threads included) and are delivered on the
// host's own thread when it calls `flush`.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

/// Listener name events are reported under
pub const EVENT_SOURCE: &str = "screenrecorder";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPhase {
    Init,
    Recorded,
    Muxed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub phase: EventPhase,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SessionEvent {
    pub fn new(phase: EventPhase, error: Option<String>) -> Self {
        Self {
            phase,
            is_error: error.is_some(),
            error_message: error,
        }
    }

    pub fn init(error: Option<String>) -> Self {
        Self::new(EventPhase::Init, error)
    }

    pub fn recorded(error: Option<String>) -> Self {
        Self::new(EventPhase::Recorded, error)
    }

    pub fn muxed(error: Option<String>) -> Self {
        Self::new(EventPhase::Muxed, error)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Multi-producer queue of pending events
#[derive(Clone)]
pub struct EventQueue {
    sender: Sender<SessionEvent>,
    receiver: Receiver<SessionEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn push(&self, event: SessionEvent) {
        match &event.error_message {
            Some(message) => log::error!("[{}] {:?} failed: {}", EVENT_SOURCE, event.phase, message),
            None => log::debug!("[{}] {:?}", EVENT_SOURCE, event.phase),
        }
        // The queue holds its own receiver, so sending cannot fail.
        let _ = self.sender.send(event);
    }

    /// Deliver every queued event to `listener`, oldest first.
    pub fn flush<F: FnMut(SessionEvent)>(&self, mut listener: F) -> usize {
        let mut delivered = 0;
        for event in self.receiver.try_iter() {
            listener(event);
            delivered += 1;
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
