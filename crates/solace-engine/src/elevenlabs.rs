//! ElevenLabs Conversational AI client.
//!
//! Each session runs on a dedicated worker thread with its own
//! current-thread runtime driving the provider WebSocket: user audio
//! chunks go up as base64 `user_audio_chunk` payloads, and `audio`,
//! `agent_response`, `agent_response_correction`, `user_transcript` and
//! `ping` events come down. [`EngineSession::start_session`] blocks until
//! the provider has sent its initiation metadata, per the engine
//! contract; the worker then keeps pumping events until told to stop.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::interface::{
    AudioFormat, AudioInterface, ConversationEngine, EngineSession, SessionCallbacks,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Conversational WebSocket endpoint.
const DEFAULT_ENDPOINT: &str = "wss://api.elevenlabs.io/v1/convai/conversation";

/// Production [`ConversationEngine`] backed by ElevenLabs Conversational AI.
#[derive(Debug, Clone)]
pub struct ElevenLabsEngine {
    config: EngineConfig,
    endpoint: String,
}

impl ElevenLabsEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Overrides the conversational endpoint (tests, regional gateways).
    pub fn with_endpoint(config: EngineConfig, endpoint: impl Into<String>) -> Self {
        Self {
            config,
            endpoint: endpoint.into(),
        }
    }
}

impl ConversationEngine for ElevenLabsEngine {
    fn create_session(
        &self,
        agent_id: &str,
        audio: Arc<dyn AudioInterface>,
        callbacks: SessionCallbacks,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        if self.config.api_key.is_empty() {
            return Err(EngineError::NotConfigured(
                "engine API key is not set".to_string(),
            ));
        }
        if agent_id.is_empty() {
            return Err(EngineError::NotConfigured(
                "agent id is not set".to_string(),
            ));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Box::new(ElevenLabsSession {
            url: format!("{}?agent_id={}", self.endpoint, agent_id),
            api_key: self.config.api_key.clone(),
            format: AudioFormat::pcm16(self.config.output_sample_rate_hz),
            audio,
            callbacks: Mutex::new(Some(callbacks)),
            shutdown_tx,
            shutdown_rx,
            started: AtomicBool::new(false),
        }))
    }
}

/// One provider conversation. Created by [`ElevenLabsEngine::create_session`].
struct ElevenLabsSession {
    url: String,
    api_key: String,
    format: AudioFormat,
    audio: Arc<dyn AudioInterface>,
    callbacks: Mutex<Option<SessionCallbacks>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    started: AtomicBool,
}

impl EngineSession for ElevenLabsSession {
    fn start_session(&self) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Protocol(
                "session has already been started".to_string(),
            ));
        }
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| {
                EngineError::Protocol("session callbacks already consumed".to_string())
            })?;

        let ctx = WorkerContext {
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            format: self.format,
            audio: self.audio.clone(),
            callbacks,
            shutdown: self.shutdown_rx.clone(),
        };

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        std::thread::Builder::new()
            .name("engine-session".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(EngineError::Connect(format!(
                            "failed to build session runtime: {e}"
                        ))));
                        return;
                    }
                };
                rt.block_on(run_session(ctx, ready_tx));
            })
            .map_err(|e| EngineError::Connect(format!("failed to spawn session worker: {e}")))?;

        match ready_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(EngineError::Connect(
                "session worker exited before confirming startup".to_string(),
            )),
        }
    }

    fn end_session(&self) -> Result<(), EngineError> {
        // A receiver is held on self, so the signal cannot fail; the worker
        // observes it on its next loop turn.
        let _ = self.shutdown_tx.send(true);
        self.audio.end();
        Ok(())
    }
}

struct WorkerContext {
    url: String,
    api_key: String,
    format: AudioFormat,
    audio: Arc<dyn AudioInterface>,
    callbacks: SessionCallbacks,
    shutdown: watch::Receiver<bool>,
}

fn build_request(
    url: &str,
    api_key: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, EngineError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| EngineError::Connect(e.to_string()))?;
    let key = api_key.parse().map_err(|_| {
        EngineError::NotConfigured("engine API key contains invalid header characters".to_string())
    })?;
    request.headers_mut().insert("xi-api-key", key);
    Ok(request)
}

async fn run_session(ctx: WorkerContext, ready: std::sync::mpsc::Sender<Result<(), EngineError>>) {
    let WorkerContext {
        url,
        api_key,
        format,
        audio,
        callbacks,
        mut shutdown,
    } = ctx;

    let request = match build_request(&url, &api_key) {
        Ok(request) => request,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let (ws, _) = match connect_async(request).await {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready.send(Err(EngineError::Connect(e.to_string())));
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();

    // The provider opens with initiation metadata; the session is not
    // accepted until it arrives.
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if matches!(
                    serde_json::from_str::<ProviderEvent>(text.as_str()),
                    Ok(ProviderEvent::ConversationInitiationMetadata)
                ) {
                    break;
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let _ = ready.send(Err(EngineError::Connect(e.to_string())));
                return;
            }
            None => {
                let _ = ready.send(Err(EngineError::Closed));
                return;
            }
        }
    }
    let _ = ready.send(Ok(()));
    tracing::info!("conversation session accepted by engine");

    // Register for user audio; frames arrive from the relay's receive path
    // and are drained here onto the provider socket.
    let (audio_tx, mut audio_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
    {
        let audio_tx = audio_tx.clone();
        audio.begin(Arc::new(move |frame: &[u8]| {
            audio_tx
                .send(frame.to_vec())
                .map_err(|_| EngineError::Closed)
        }));
    }

    loop {
        tokio::select! {
            chunk = audio_rx.recv() => {
                let Some(chunk) = chunk else { break };
                let payload =
                    serde_json::json!({ "user_audio_chunk": BASE64.encode(&chunk) });
                if sink.send(Message::Text(payload.to_string().into())).await.is_err() {
                    tracing::warn!("conversation stream closed while sending user audio");
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ProviderEvent>(text.as_str()) {
                            Ok(event) => {
                                if let Some(reply) = dispatch_event(&*audio, &callbacks, format, event) {
                                    if sink.send(reply).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::debug!("ignoring unrecognized conversation event: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("conversation stream error: {}", e);
                        break;
                    }
                }
            }
            // wait_for observes a stop that was signalled before this
            // worker started polling, covering an end racing an
            // in-flight start.
            stopped = shutdown.wait_for(|stop| *stop) => {
                let signalled = stopped.is_ok();
                drop(stopped);
                if signalled {
                    let _ = sink.send(Message::Close(None)).await;
                }
                break;
            }
        }
    }

    audio.end();
    tracing::info!("conversation session worker stopped");
}

/// Handles one provider event; returns a frame to send back when the
/// protocol requires one (ping/pong).
fn dispatch_event(
    audio: &dyn AudioInterface,
    callbacks: &SessionCallbacks,
    format: AudioFormat,
    event: ProviderEvent,
) -> Option<Message> {
    match event {
        ProviderEvent::Audio { audio_event } => {
            match BASE64.decode(audio_event.audio_base_64.as_bytes()) {
                Ok(frame) => audio.deliver_outbound(&frame, format),
                Err(e) => tracing::warn!("failed to decode agent audio chunk: {}", e),
            }
            None
        }
        ProviderEvent::AgentResponse {
            agent_response_event,
        } => {
            (callbacks.on_agent_response)(&agent_response_event.agent_response);
            None
        }
        ProviderEvent::AgentResponseCorrection {
            agent_response_correction_event,
        } => {
            (callbacks.on_agent_response_correction)(
                &agent_response_correction_event.original_agent_response,
                &agent_response_correction_event.corrected_agent_response,
            );
            None
        }
        ProviderEvent::UserTranscript {
            user_transcription_event,
        } => {
            (callbacks.on_user_transcript)(&user_transcription_event.user_transcript);
            None
        }
        ProviderEvent::Ping { ping_event } => Some(Message::Text(
            serde_json::json!({ "type": "pong", "event_id": ping_event.event_id })
                .to_string()
                .into(),
        )),
        ProviderEvent::ConversationInitiationMetadata | ProviderEvent::Other => None,
    }
}

/// Downstream events on the conversational socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProviderEvent {
    ConversationInitiationMetadata,
    Audio { audio_event: AudioEvent },
    AgentResponse { agent_response_event: AgentResponseEvent },
    AgentResponseCorrection {
        agent_response_correction_event: AgentResponseCorrectionEvent,
    },
    UserTranscript {
        user_transcription_event: UserTranscriptionEvent,
    },
    Ping { ping_event: PingEvent },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AudioEvent {
    audio_base_64: String,
}

#[derive(Debug, Deserialize)]
struct AgentResponseEvent {
    agent_response: String,
}

#[derive(Debug, Deserialize)]
struct AgentResponseCorrectionEvent {
    original_agent_response: String,
    corrected_agent_response: String,
}

#[derive(Debug, Deserialize)]
struct UserTranscriptionEvent {
    user_transcript: String,
}

#[derive(Debug, Deserialize)]
struct PingEvent {
    event_id: u64,
}
