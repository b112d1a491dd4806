//! In-process stand-ins for the realtime endpoint and the audio devices

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::audio::{AudioFrame, AudioInput, AudioOutput};
use crate::error::AudioError;
use crate::network::Connection;
use crate::session::TranscriptSink;

/// Ordered record of device calls shared between test doubles
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: &str) {
        self.0.lock().push(event.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// What the server saw in the upgrade request
#[derive(Debug, Default, Clone)]
pub struct UpgradeRequest {
    pub authorization: Option<String>,
    pub protocol: Option<String>,
    pub path: String,
}

/// Websocket server on an ephemeral local port
pub struct WsServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl WsServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self { listener, addr }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }

    /// Accept one client and complete the upgrade
    pub async fn accept_one(self) -> (UpgradeRequest, Peer<TcpStream>) {
        let (stream, _) = self.listener.accept().await.unwrap();
        let seen = Arc::new(Mutex::new(UpgradeRequest::default()));
        let record = seen.clone();

        let callback =
            move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                let header = |name: &str| {
                    request
                        .headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                *record.lock() = UpgradeRequest {
                    authorization: header("authorization"),
                    protocol: header("openai-beta"),
                    path: request.uri().to_string(),
                };
                Ok(response)
            };

        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();
        let request = seen.lock().clone();
        (request, Peer { ws })
    }
}

/// Server end of a test connection
pub struct Peer<S> {
    ws: WebSocketStream<S>,
}

impl<S> Peer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Next text message, or `None` once the client is gone
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    pub async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// A connection wired to a peer over an in-memory pipe
pub async fn ws_pair() -> (Connection, Peer<DuplexStream>) {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    (Connection::from_stream(client), Peer { ws: server })
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Input device replaying a script of reads, then blocking until closed
pub struct ScriptedInput {
    script: Mutex<VecDeque<Result<AudioFrame, AudioError>>>,
    wake: Condvar,
    stopped: AtomicBool,
    closed: AtomicBool,
    log: EventLog,
}

impl ScriptedInput {
    pub fn new(script: Vec<Result<AudioFrame, AudioError>>, log: EventLog) -> Self {
        Self {
            script: Mutex::new(script.into()),
            wake: Condvar::new(),
            stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            log,
        }
    }

    /// Blocks forever until closed
    pub fn silent(log: EventLog) -> Self {
        Self::new(Vec::new(), log)
    }
}

impl AudioInput for ScriptedInput {
    fn read_frame(&self) -> Result<AudioFrame, AudioError> {
        let mut script = self.script.lock();
        loop {
            if self.stopped.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
                return Err(AudioError::Closed);
            }
            if let Some(next) = script.pop_front() {
                return next;
            }
            self.wake.wait_for(&mut script, Duration::from_millis(10));
        }
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.log.push("input.stop");
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_all();
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        self.log.push("input.close");
        self.closed.store(true, Ordering::SeqCst);
        self.wake.notify_all();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Input delivering a silent frame every `interval`, like a live microphone
pub struct TickingInput {
    interval: Duration,
    stopped: AtomicBool,
    closed: AtomicBool,
    log: EventLog,
}

impl TickingInput {
    pub fn new(interval: Duration, log: EventLog) -> Self {
        Self {
            interval,
            stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            log,
        }
    }

    fn halted(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst)
    }
}

impl AudioInput for TickingInput {
    fn read_frame(&self) -> Result<AudioFrame, AudioError> {
        if self.halted() {
            return Err(AudioError::Closed);
        }
        std::thread::sleep(self.interval);
        if self.halted() {
            return Err(AudioError::Closed);
        }
        Ok(AudioFrame::silence())
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.log.push("input.stop");
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        self.log.push("input.close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Output device recording every accepted write
pub struct RecordingOutput {
    writes: Mutex<Vec<Vec<u8>>>,
    /// Per-write latency, consumed in order
    delays: Mutex<VecDeque<Duration>>,
    failures: Mutex<usize>,
    fail_stop: bool,
    closed: AtomicBool,
    log: EventLog,
}

impl RecordingOutput {
    pub fn new(log: EventLog) -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            delays: Mutex::new(VecDeque::new()),
            failures: Mutex::new(0),
            fail_stop: false,
            closed: AtomicBool::new(false),
            log,
        }
    }

    pub fn with_delays(self, delays: Vec<Duration>) -> Self {
        *self.delays.lock() = delays.into();
        self
    }

    /// The first `n` writes fail with a transient stream error
    pub fn failing_first(self, n: usize) -> Self {
        *self.failures.lock() = n;
        self
    }

    /// `stop` reports an error
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }
}

impl AudioOutput for RecordingOutput {
    fn write(&self, pcm: &[u8]) -> Result<(), AudioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::Closed);
        }
        let delay = self.delays.lock().pop_front();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(AudioError::StreamError("device busy".into()));
            }
        }
        self.writes.lock().push(pcm.to_vec());
        Ok(())
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.log.push("output.stop");
        if self.fail_stop {
            return Err(AudioError::StreamError("stop failed".into()));
        }
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        self.log.push("output.close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    Fragment(String),
    End,
}

/// Transcript sink whose clones share one record
#[derive(Clone, Default)]
pub struct RecordingTranscript(Arc<Mutex<Vec<TranscriptEvent>>>);

impl RecordingTranscript {
    pub fn events(&self) -> Vec<TranscriptEvent> {
        self.0.lock().clone()
    }
}

impl TranscriptSink for RecordingTranscript {
    fn fragment(&mut self, text: &str) {
        self.0.lock().push(TranscriptEvent::Fragment(text.to_string()));
    }

    fn end_utterance(&mut self) {
        self.0.lock().push(TranscriptEvent::End);
    }
}
