//! Integration tests for the relay WebSocket endpoint.
//!
//! These drive a real bound server with a WebSocket client and a scripted
//! engine, covering the full client scenarios: session handshake, start
//! against configured and unconfigured engines, text echo, audio framing
//! in both directions, stop, protocol violations and disconnect cleanup.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use solace_engine::{
    AudioFormat, AudioInterface, ConversationEngine, EngineConfig, EngineError, EngineSession,
    InputCallback, SessionCallbacks,
};
use solace_relay::SessionRegistry;
use solace_server::{app, AppState};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

/// Engine double: accepts sessions, captures forwarded audio frames and
/// optionally emits one synthesized audio frame when the session starts.
struct ScriptedEngine {
    fail_start: bool,
    emit_audio: Option<Vec<u8>>,
    created: AtomicUsize,
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_start: false,
            emit_audio: None,
            created: AtomicUsize::new(0),
            frames: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn emitting(audio: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            fail_start: false,
            emit_audio: Some(audio),
            created: AtomicUsize::new(0),
            frames: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

impl ConversationEngine for ScriptedEngine {
    fn create_session(
        &self,
        _agent_id: &str,
        audio: Arc<dyn AudioInterface>,
        _callbacks: SessionCallbacks,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            fail_start: self.fail_start,
            emit_audio: self.emit_audio.clone(),
            audio,
            frames: self.frames.clone(),
        }))
    }
}

struct ScriptedSession {
    fail_start: bool,
    emit_audio: Option<Vec<u8>>,
    audio: Arc<dyn AudioInterface>,
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl EngineSession for ScriptedSession {
    fn start_session(&self) -> Result<(), EngineError> {
        if self.fail_start {
            return Err(EngineError::Connect("scripted start failure".to_string()));
        }
        let frames = self.frames.clone();
        let input: InputCallback = Arc::new(move |frame| {
            frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        });
        self.audio.begin(input);
        if let Some(audio) = &self.emit_audio {
            self.audio.deliver_outbound(audio, AudioFormat::pcm16(24_000));
        }
        Ok(())
    }

    fn end_session(&self) -> Result<(), EngineError> {
        self.audio.end();
        Ok(())
    }
}

/// Binds the app on an ephemeral port with the given engine and config.
async fn setup_server(
    engine: Arc<ScriptedEngine>,
    config: EngineConfig,
) -> (SocketAddr, Arc<SessionRegistry>) {
    let registry = Arc::new(SessionRegistry::new(engine, config));
    let state = AppState {
        registry: registry.clone(),
    };
    let app = app(state, &["*".to_string()]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, registry)
}

fn configured() -> EngineConfig {
    EngineConfig::new("test-key", "test-agent")
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(addr: SocketAddr) -> WsStream {
    let url = format!("ws://{}/ws/conversation", addr);
    let (stream, _) = connect_async(url).await.expect("failed to connect");
    stream
}

/// Receives the next text frame and parses it as JSON, with a timeout.
async fn recv_json(ws: &mut WsStream) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for frame")
        .expect("connection closed")
        .expect("frame error");
    match frame {
        Message::Text(text) => serde_json::from_str(&text).expect("invalid JSON frame"),
        other => panic!("expected text frame, got: {:?}", other),
    }
}

/// Connects and consumes the `session_created` handshake, returning the
/// session id.
async fn connect_and_create(addr: SocketAddr) -> (WsStream, String) {
    let mut ws = connect(addr).await;
    let created = recv_json(&mut ws).await;
    assert_eq!(created["type"], "session_created");
    let session_id = created["session_id"]
        .as_str()
        .expect("missing session_id")
        .to_string();
    (ws, session_id)
}

/// Polls until `check` passes or the deadline expires.
async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within deadline");
}

#[tokio::test]
async fn connect_receives_session_created() {
    let (addr, registry) = setup_server(ScriptedEngine::new(), configured()).await;

    let (_ws, session_id) = connect_and_create(addr).await;
    assert!(session_id.starts_with("session_"));
    assert!(registry.get(&session_id).await.is_some());
}

#[tokio::test]
async fn start_with_configured_engine_begins_conversation() {
    let engine = ScriptedEngine::new();
    let (addr, registry) = setup_server(engine.clone(), configured()).await;
    let (mut ws, session_id) = connect_and_create(addr).await;

    ws.send(Message::Text(json!({"type": "start"}).to_string().into()))
        .await
        .unwrap();

    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "conversation_started");
    assert_eq!(engine.created.load(Ordering::SeqCst), 1);

    let session = registry.get(&session_id).await.expect("session missing");
    assert!(session.is_active());
}

#[tokio::test]
async fn start_with_unconfigured_engine_reports_error_and_ends_session() {
    let engine = ScriptedEngine::new();
    let (addr, registry) = setup_server(engine.clone(), EngineConfig::default()).await;
    let (mut ws, session_id) = connect_and_create(addr).await;

    ws.send(Message::Text(json!({"type": "start"}).to_string().into()))
        .await
        .unwrap();

    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    let message = reply["message"].as_str().unwrap();
    assert!(
        message.contains("not configured"),
        "error should name the configuration failure, got: {}",
        message
    );

    assert!(registry.get(&session_id).await.is_none());
    assert_eq!(engine.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn double_start_is_rejected_without_second_engine_session() {
    let engine = ScriptedEngine::new();
    let (addr, _registry) = setup_server(engine.clone(), configured()).await;
    let (mut ws, _session_id) = connect_and_create(addr).await;

    ws.send(Message::Text(json!({"type": "start"}).to_string().into()))
        .await
        .unwrap();
    assert_eq!(recv_json(&mut ws).await["type"], "conversation_started");

    ws.send(Message::Text(json!({"type": "start"}).to_string().into()))
        .await
        .unwrap();
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(engine.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn text_echo_works_before_start() {
    let (addr, _registry) = setup_server(ScriptedEngine::new(), configured()).await;
    let (mut ws, _session_id) = connect_and_create(addr).await;

    ws.send(Message::Text(
        json!({"type": "text", "text": "hi"}).to_string().into(),
    ))
    .await
    .unwrap();

    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "text_response");
    assert_eq!(reply["text"], "Echo: hi");
}

#[tokio::test]
async fn audio_before_start_is_queued_but_not_forwarded() {
    let engine = ScriptedEngine::new();
    let (addr, registry) = setup_server(engine.clone(), configured()).await;
    let (mut ws, session_id) = connect_and_create(addr).await;

    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();

    let session = registry.get(&session_id).await.expect("session missing");
    let bridge = session.bridge().clone();
    wait_for(move || bridge.queued_frames() == 1).await;
    assert!(engine.frames.lock().unwrap().is_empty());
}

#[tokio::test]
async fn audio_after_start_is_forwarded_to_the_engine_once() {
    let engine = ScriptedEngine::new();
    let (addr, _registry) = setup_server(engine.clone(), configured()).await;
    let (mut ws, _session_id) = connect_and_create(addr).await;

    ws.send(Message::Text(json!({"type": "start"}).to_string().into()))
        .await
        .unwrap();
    assert_eq!(recv_json(&mut ws).await["type"], "conversation_started");

    ws.send(Message::Binary(vec![9u8, 9, 9].into())).await.unwrap();

    let frames = engine.frames.clone();
    wait_for(move || !frames.lock().unwrap().is_empty()).await;
    let frames = engine.frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0], vec![9, 9, 9]);
}

#[tokio::test]
async fn engine_audio_reaches_the_client_as_base64_pcm16() {
    let pcm = vec![0u8, 1, 2, 3, 4, 5];
    let engine = ScriptedEngine::emitting(pcm.clone());
    let (addr, _registry) = setup_server(engine, configured()).await;
    let (mut ws, _session_id) = connect_and_create(addr).await;

    ws.send(Message::Text(json!({"type": "start"}).to_string().into()))
        .await
        .unwrap();

    // The scripted engine pushes one audio frame during start, so it
    // arrives before the conversation_started reply.
    let audio = recv_json(&mut ws).await;
    assert_eq!(audio["type"], "audio");
    assert_eq!(audio["encoding"], "pcm16");
    assert_eq!(audio["sample_rate_hz"], 24_000);
    assert_eq!(audio["audio_data"], BASE64.encode(&pcm));

    assert_eq!(recv_json(&mut ws).await["type"], "conversation_started");
}

#[tokio::test]
async fn stop_ends_the_conversation_and_is_idempotent() {
    let (addr, registry) = setup_server(ScriptedEngine::new(), configured()).await;
    let (mut ws, session_id) = connect_and_create(addr).await;

    ws.send(Message::Text(json!({"type": "start"}).to_string().into()))
        .await
        .unwrap();
    assert_eq!(recv_json(&mut ws).await["type"], "conversation_started");

    ws.send(Message::Text(json!({"type": "stop"}).to_string().into()))
        .await
        .unwrap();
    assert_eq!(recv_json(&mut ws).await["type"], "conversation_stopped");
    assert!(registry.get(&session_id).await.is_none());

    // A second stop must not fail the connection.
    ws.send(Message::Text(json!({"type": "stop"}).to_string().into()))
        .await
        .unwrap();
    assert_eq!(recv_json(&mut ws).await["type"], "conversation_stopped");
}

#[tokio::test]
async fn unknown_message_type_is_named_in_the_error() {
    let (addr, _registry) = setup_server(ScriptedEngine::new(), configured()).await;
    let (mut ws, _session_id) = connect_and_create(addr).await;

    ws.send(Message::Text(
        json!({"type": "reboot", "data": 42}).to_string().into(),
    ))
    .await
    .unwrap();

    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "Unknown message type: reboot");
}

#[tokio::test]
async fn malformed_frame_reports_invalid_format_and_keeps_the_connection() {
    let (addr, _registry) = setup_server(ScriptedEngine::new(), configured()).await;
    let (mut ws, _session_id) = connect_and_create(addr).await;

    ws.send(Message::Text("this is not json".into()))
        .await
        .unwrap();

    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "invalid message format");

    // Connection still serves the echo path afterwards.
    ws.send(Message::Text(
        json!({"type": "text", "text": "still here"}).to_string().into(),
    ))
    .await
    .unwrap();
    assert_eq!(recv_json(&mut ws).await["text"], "Echo: still here");
}

#[tokio::test]
async fn disconnect_cleans_up_the_session() {
    let (addr, registry) = setup_server(ScriptedEngine::new(), configured()).await;
    let (mut ws, session_id) = connect_and_create(addr).await;

    ws.send(Message::Text(json!({"type": "start"}).to_string().into()))
        .await
        .unwrap();
    assert_eq!(recv_json(&mut ws).await["type"], "conversation_started");

    drop(ws);

    for _ in 0..100 {
        if registry.get(&session_id).await.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(registry.get(&session_id).await.is_none());
    assert_eq!(registry.count().await, 0);
}

#[tokio::test]
async fn start_carries_the_user_id_into_the_session_summary() {
    let (addr, registry) = setup_server(ScriptedEngine::new(), configured()).await;
    let (mut ws, session_id) = connect_and_create(addr).await;

    ws.send(Message::Text(
        json!({"type": "start", "user_id": "user-42"}).to_string().into(),
    ))
    .await
    .unwrap();
    assert_eq!(recv_json(&mut ws).await["type"], "conversation_started");

    let summaries = registry.list().await;
    let summary = summaries
        .iter()
        .find(|s| s.session_id == session_id)
        .expect("session summary missing");
    assert_eq!(summary.user_id.as_deref(), Some("user-42"));
    assert!(summary.is_active);
}
