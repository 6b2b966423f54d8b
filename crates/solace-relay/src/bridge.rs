//! Audio adapter between one relay connection and the engine's callback
//! interface.
//!
//! Inbound frames are queued and, while recording, forwarded to the
//! engine's input callback. Outbound frames are handed to the task that
//! owns the connection's sink through a bounded channel — the engine's
//! worker thread never writes to the transport itself.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use solace_engine::{AudioFormat, AudioInterface, InputCallback};
use solace_types::ServerMessage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Upper bound on how long an engine thread waits for the connection's
/// owning task to confirm that an outbound frame reached the socket.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// An outbound protocol frame, optionally carrying a delivery
/// acknowledgement.
///
/// The ack side is a std channel so the producing engine thread can wait
/// with a timeout without entering the async runtime.
#[derive(Debug)]
pub struct OutboundFrame {
    pub message: ServerMessage,
    pub ack: Option<std::sync::mpsc::Sender<()>>,
}

impl OutboundFrame {
    pub fn new(message: ServerMessage) -> Self {
        Self { message, ack: None }
    }
}

pub struct AudioBridge {
    session_id: String,
    recording: AtomicBool,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    input_callback: Mutex<Option<InputCallback>>,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl AudioBridge {
    pub fn new(session_id: impl Into<String>, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            session_id: session_id.into(),
            recording: AtomicBool::new(false),
            inbound: Mutex::new(VecDeque::new()),
            input_callback: Mutex::new(None),
            outbound,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Accepts a raw audio frame from the connection. The frame is always
    /// queued; while recording with a registered callback it is also
    /// forwarded to the engine, exactly once. Callback failures are
    /// logged and never propagate into the receive loop.
    pub fn enqueue_inbound(&self, frame: Vec<u8>) {
        if self.recording.load(Ordering::SeqCst) {
            let callback = self
                .input_callback
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            if let Some(callback) = callback {
                if let Err(e) = callback(&frame) {
                    tracing::warn!(
                        session_id = %self.session_id,
                        "engine input callback failed: {}",
                        e
                    );
                }
            }
        }

        self.inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(frame);
    }

    /// Number of inbound frames currently queued.
    pub fn queued_frames(&self) -> usize {
        self.inbound.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Discards the inbound queue, returning how many frames were dropped.
    pub fn drain(&self) -> usize {
        let mut queue = self.inbound.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl AudioInterface for AudioBridge {
    fn begin(&self, input: InputCallback) {
        *self
            .input_callback
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(input);
        self.recording.store(true, Ordering::SeqCst);
        tracing::info!(session_id = %self.session_id, "audio bridge recording");
    }

    fn end(&self) {
        self.recording.store(false, Ordering::SeqCst);
        tracing::info!(session_id = %self.session_id, "audio bridge stopped");
    }

    fn deliver_outbound(&self, frame: &[u8], format: AudioFormat) {
        let message = ServerMessage::Audio {
            audio_data: BASE64.encode(frame),
            encoding: format.encoding.to_string(),
            sample_rate_hz: format.sample_rate_hz,
        };

        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        if let Err(e) = self.outbound.try_send(OutboundFrame {
            message,
            ack: Some(ack_tx),
        }) {
            tracing::warn!(
                session_id = %self.session_id,
                "dropping outbound audio frame: {}",
                e
            );
            return;
        }

        // Best-effort: a slow or closed connection costs at most the
        // bounded wait, never the engine thread.
        if ack_rx.recv_timeout(DELIVERY_TIMEOUT).is_err() {
            tracing::warn!(
                session_id = %self.session_id,
                "outbound audio frame delivery not confirmed within {:?}; frame dropped",
                DELIVERY_TIMEOUT
            );
        }
    }
}
