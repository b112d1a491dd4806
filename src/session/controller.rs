//! Session controller
//!
//! ```text
//!  Idle ──► Connecting ──► Handshaking ──► Streaming ──► Closing ──► Closed
//!               │               │                           ▲
//!               └───────────────┴──── failure / interrupt ──┘
//! ```
//!
//! The controller owns both device handles and the connection. While
//! streaming, the capture feeder runs on the blocking pool and the playback
//! sink on the runtime; whichever ends first (or an interrupt) moves the
//! session to `Closing`, where teardown runs once, in a fixed order, with
//! every step attempted regardless of earlier failures.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;
use uuid::Uuid;

use crate::audio::{device, AudioCapture, AudioInput, AudioOutput, AudioPlayback};
use crate::config::{AppConfig, AudioConfig, Credentials, RealtimeConfig};
use crate::error::{AudioError, Error, NetworkError, Result};
use crate::network::Connection;
use crate::session::feeder::CaptureFeeder;
use crate::session::sink::{ConsoleTranscript, PlaybackSink, TranscriptSink};
use crate::session::stats::{SessionStats, StatsSnapshot};

/// How long teardown waits for each unit of work to wind down
const UNIT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Handshaking,
    /// Capture and playback are running
    Streaming,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a session that reached the network stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// External stop request
    Interrupted,
    /// The server closed the connection
    RemoteClosed,
    /// The connection failed mid-session
    TransportFailed(String),
    /// A unit of work stopped on its own
    UnitExited(&'static str),
}

impl SessionEnd {
    /// Whether this ending should be reported as an error
    pub fn is_failure(&self) -> bool {
        matches!(self, SessionEnd::TransportFailed(_) | SessionEnd::UnitExited(_))
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Interrupted => write!(f, "stopped by user"),
            SessionEnd::RemoteClosed => write!(f, "connection closed by server"),
            SessionEnd::TransportFailed(reason) => write!(f, "connection lost: {}", reason),
            SessionEnd::UnitExited(unit) => write!(f, "{} stopped unexpectedly", unit),
        }
    }
}

/// One teardown action, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    StopInput,
    CloseInput,
    StopOutput,
    CloseOutput,
    CloseConnection,
}

/// The input and output device for one session
pub struct SessionDevices {
    pub input: Arc<dyn AudioInput>,
    pub output: Arc<dyn AudioOutput>,
}

impl SessionDevices {
    pub fn new(input: Arc<dyn AudioInput>, output: Arc<dyn AudioOutput>) -> Self {
        Self { input, output }
    }

    /// Resolve the configured (or default) devices and pick a usable stream
    /// format for each. Streams are not started yet.
    pub fn open(config: &AudioConfig) -> std::result::Result<Self, AudioError> {
        let input = device::resolve_input(config.input_device.as_deref())?;
        tracing::info!("Input device: {}", input.name);
        let capture = AudioCapture::new(input)?;

        let output = device::resolve_output(config.output_device.as_deref())?;
        tracing::info!("Output device: {}", output.name);
        let playback = AudioPlayback::new(output)?;

        Ok(Self::new(Arc::new(capture), Arc::new(playback)))
    }
}

/// Outcome of a session that got past startup
#[derive(Debug)]
pub struct SessionReport {
    pub id: Uuid,
    pub end: SessionEnd,
    pub stats: StatsSnapshot,
    /// Teardown steps attempted, in order
    pub teardown: Vec<TeardownStep>,
    pub connection_closed: bool,
}

/// Drives one session from connect to teardown
pub struct SessionController {
    id: Uuid,
    state: watch::Sender<SessionState>,
    stats: Arc<SessionStats>,
    torn_down: AtomicBool,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            id: Uuid::new_v4(),
            state,
            stats: Arc::new(SessionStats::default()),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state transitions; the receiver outlives the controller
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Run one interactive session on the configured audio devices.
    ///
    /// The credential is resolved first, so a missing one fails before any
    /// device or network access.
    pub async fn run<F>(self, config: &AppConfig, shutdown: F) -> Result<SessionReport>
    where
        F: Future<Output = ()>,
    {
        let credentials = match config.credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                self.set_state(SessionState::Closed);
                return Err(e.into());
            }
        };

        let devices = match SessionDevices::open(&config.audio) {
            Ok(devices) => devices,
            Err(e) => {
                self.set_state(SessionState::Closed);
                return Err(e.into());
            }
        };

        self.run_with(
            &config.realtime,
            &credentials,
            devices,
            ConsoleTranscript::stdout(),
            shutdown,
        )
        .await
    }

    /// Run one session on the given devices and transcript sink
    pub async fn run_with<T, F>(
        self,
        config: &RealtimeConfig,
        credentials: &Credentials,
        devices: SessionDevices,
        transcript: T,
        shutdown: F,
    ) -> Result<SessionReport>
    where
        T: TranscriptSink,
        F: Future<Output = ()>,
    {
        let span = tracing::info_span!("session", id = %self.id);
        self.drive(config, credentials, devices, transcript, shutdown)
            .instrument(span)
            .await
    }

    async fn drive<T, F>(
        self,
        config: &RealtimeConfig,
        credentials: &Credentials,
        devices: SessionDevices,
        transcript: T,
        shutdown: F,
    ) -> Result<SessionReport>
    where
        T: TranscriptSink,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!("Session starting");

        self.set_state(SessionState::Connecting);
        let connection = tokio::select! {
            result = Connection::connect(config, credentials) => match result {
                Ok(connection) => connection,
                Err(e) => return Err(self.abort(&devices, None, e.into()).await),
            },
            _ = &mut shutdown => {
                let steps = self.close_session(&devices, None).await;
                return Ok(self.report(SessionEnd::Interrupted, steps, true));
            }
        };

        self.set_state(SessionState::Handshaking);
        let handshake = tokio::select! {
            result = connection.handshake(config.response_config()) => result,
            _ = &mut shutdown => {
                let steps = self.close_session(&devices, Some(&connection)).await;
                return Ok(self.report(SessionEnd::Interrupted, steps, connection.is_closed()));
            }
        };
        if let Err(e) = handshake {
            return Err(self.abort(&devices, Some(&connection), e.into()).await);
        }

        if let Err(e) = devices.input.start().and_then(|_| devices.output.start()) {
            return Err(self.abort(&devices, Some(&connection), e.into()).await);
        }

        let (sender, receiver) = match connection.split() {
            Some(halves) => halves,
            None => {
                let err = NetworkError::Closed.into();
                return Err(self.abort(&devices, Some(&connection), err).await);
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        let feeder = CaptureFeeder::new(
            devices.input.clone(),
            sender,
            running.clone(),
            self.stats.clone(),
        );
        let mut feeder = tokio::task::spawn_blocking(move || feeder.run());

        let sink = PlaybackSink::new(
            receiver,
            devices.output.clone(),
            transcript,
            self.stats.clone(),
        );
        let mut sink = tokio::spawn(sink.run());

        self.set_state(SessionState::Streaming);

        let mut feeder_done = false;
        let mut sink_done = false;
        let end = tokio::select! {
            result = &mut feeder => {
                feeder_done = true;
                capture_ended(result)
            }
            result = &mut sink => {
                sink_done = true;
                playback_ended(result)
            }
            _ = &mut shutdown => SessionEnd::Interrupted,
        };

        match &end {
            SessionEnd::Interrupted | SessionEnd::RemoteClosed => {
                tracing::info!("Session ending: {}", end);
            }
            _ => tracing::error!("Session ending: {}", end),
        }

        // Audio the server sent before closing still goes to the speaker
        if end == SessionEnd::RemoteClosed && !sink_done {
            match tokio::time::timeout(UNIT_JOIN_TIMEOUT, &mut sink).await {
                Ok(Ok(Err(e))) => {
                    sink_done = true;
                    tracing::warn!("Playback failed after remote close: {}", e);
                }
                Ok(_) => sink_done = true,
                Err(_) => tracing::warn!("Playback did not drain within {:?}", UNIT_JOIN_TIMEOUT),
            }
        }

        running.store(false, Ordering::SeqCst);
        let steps = self.close_session(&devices, Some(&connection)).await;

        if !feeder_done {
            join_unit("capture", feeder).await;
        }
        if !sink_done {
            join_unit("playback", sink).await;
        }

        Ok(self.report(end, steps, connection.is_closed()))
    }

    /// Tear down after a startup failure and hand the error back
    async fn abort(
        &self,
        devices: &SessionDevices,
        connection: Option<&Connection>,
        err: Error,
    ) -> Error {
        tracing::error!("Session startup failed in {}: {}", self.state(), err);
        self.close_session(devices, connection).await;
        self.set_state(SessionState::Closed);
        err
    }

    async fn close_session(
        &self,
        devices: &SessionDevices,
        connection: Option<&Connection>,
    ) -> Vec<TeardownStep> {
        self.set_state(SessionState::Closing);
        self.teardown(devices, connection).await
    }

    /// Stop and close input, then output, then the connection. Runs once.
    async fn teardown(
        &self,
        devices: &SessionDevices,
        connection: Option<&Connection>,
    ) -> Vec<TeardownStep> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }

        let mut steps = Vec::with_capacity(5);
        guarded(&mut steps, TeardownStep::StopInput, devices.input.stop());
        guarded(&mut steps, TeardownStep::CloseInput, devices.input.close());
        guarded(&mut steps, TeardownStep::StopOutput, devices.output.stop());
        guarded(&mut steps, TeardownStep::CloseOutput, devices.output.close());

        if let Some(connection) = connection {
            connection.shutdown().await;
            steps.push(TeardownStep::CloseConnection);
        }

        tracing::debug!("Teardown complete: {:?}", steps);
        steps
    }

    fn report(
        &self,
        end: SessionEnd,
        teardown: Vec<TeardownStep>,
        connection_closed: bool,
    ) -> SessionReport {
        self.set_state(SessionState::Closed);

        let stats = self.stats.snapshot();
        tracing::info!(
            "Session closed: {} frames sent, {} audio chunks played ({:.1} KB), {} transcript fragments, {} read errors, {} decode errors",
            stats.frames_sent,
            stats.audio_chunks_played,
            stats.audio_bytes_played as f64 / 1024.0,
            stats.transcript_fragments,
            stats.read_errors,
            stats.decode_errors
        );

        SessionReport {
            id: self.id,
            end,
            stats,
            teardown,
            connection_closed,
        }
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!("Session state {} -> {}", previous, next);
        }
    }
}

fn guarded(
    steps: &mut Vec<TeardownStep>,
    step: TeardownStep,
    result: std::result::Result<(), AudioError>,
) {
    if let Err(e) = result {
        tracing::warn!("Teardown step {:?} failed: {}", step, e);
    }
    steps.push(step);
}

fn capture_ended(
    result: std::result::Result<std::result::Result<(), NetworkError>, JoinError>,
) -> SessionEnd {
    match result {
        Ok(Ok(())) => SessionEnd::UnitExited("capture"),
        Ok(Err(NetworkError::Closed)) => SessionEnd::RemoteClosed,
        Ok(Err(e)) => SessionEnd::TransportFailed(e.to_string()),
        Err(e) => {
            tracing::error!("Capture feeder panicked: {}", e);
            SessionEnd::UnitExited("capture")
        }
    }
}

fn playback_ended(
    result: std::result::Result<std::result::Result<(), NetworkError>, JoinError>,
) -> SessionEnd {
    match result {
        Ok(Ok(())) => SessionEnd::RemoteClosed,
        Ok(Err(e)) => SessionEnd::TransportFailed(e.to_string()),
        Err(e) => {
            tracing::error!("Playback sink panicked: {}", e);
            SessionEnd::UnitExited("playback")
        }
    }
}

async fn join_unit<T>(name: &str, handle: JoinHandle<T>) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(UNIT_JOIN_TIMEOUT, handle).await {
        Ok(Ok(_)) => tracing::debug!("{} stopped", name),
        Ok(Err(e)) => tracing::warn!("{} failed while stopping: {}", name, e),
        Err(_) => {
            tracing::warn!("{} did not stop within {:?}", name, UNIT_JOIN_TIMEOUT);
            abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFrame;
    use crate::constants::CHUNK_SIZE;
    use crate::error::ConfigError;
    use crate::test_support::{
        wait_until, EventLog, Peer, RecordingOutput, RecordingTranscript, ScriptedInput,
        TickingInput, TranscriptEvent, WsServer,
    };
    use serde_json::Value;
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    const DEVICE_TEARDOWN: [&str; 4] = ["input.stop", "input.close", "output.stop", "output.close"];

    const FULL_TEARDOWN: [TeardownStep; 5] = [
        TeardownStep::StopInput,
        TeardownStep::CloseInput,
        TeardownStep::StopOutput,
        TeardownStep::CloseOutput,
        TeardownStep::CloseConnection,
    ];

    fn realtime(server: &WsServer) -> RealtimeConfig {
        RealtimeConfig {
            endpoint: server.url(),
            ..Default::default()
        }
    }

    /// Log `connection.close` once the server sees the client's close
    fn observe_close(mut peer: Peer<TcpStream>, log: EventLog) -> JoinHandle<()> {
        tokio::spawn(async move {
            while peer.next_text().await.is_some() {}
            log.push("connection.close");
        })
    }

    async fn wait_for_state(rx: &mut watch::Receiver<SessionState>, state: SessionState) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_connecting() {
        let server = WsServer::bind().await;
        let config = AppConfig {
            realtime: realtime(&server),
            credential_env: "REALTIME_VOICE_TEST_UNSET_CREDENTIAL".into(),
            ..Default::default()
        };

        let controller = SessionController::new();
        let state = controller.subscribe();
        let err = controller
            .run(&config, std::future::pending())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config(ConfigError::MissingCredential(_))));
        assert!(err.is_startup_fatal());
        assert_eq!(*state.borrow(), SessionState::Closed);

        let accepted = tokio::time::timeout(Duration::from_millis(100), server.accept_one()).await;
        assert!(accepted.is_err(), "no connection attempt expected");
    }

    #[tokio::test]
    async fn test_connect_failure_closes_devices() {
        let log = EventLog::default();
        let input = Arc::new(ScriptedInput::silent(log.clone()));
        let output = Arc::new(RecordingOutput::new(log.clone()));
        let config = RealtimeConfig {
            endpoint: "ws://127.0.0.1:1/v1/realtime".into(),
            ..Default::default()
        };

        let controller = SessionController::new();
        let state = controller.subscribe();
        let err = controller
            .run_with(
                &config,
                &Credentials::new("sk-test"),
                SessionDevices::new(input.clone(), output.clone()),
                RecordingTranscript::default(),
                std::future::pending(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Network(NetworkError::ConnectionFailed(_))));
        assert!(input.is_closed());
        assert!(output.is_closed());
        assert_eq!(log.events(), DEVICE_TEARDOWN);
        assert_eq!(*state.borrow(), SessionState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transport_failure_tears_down_in_order() {
        let server = WsServer::bind().await;
        let config = realtime(&server);
        let log = EventLog::default();
        let input = Arc::new(ScriptedInput::silent(log.clone()));
        let output = Arc::new(RecordingOutput::new(log.clone()));

        let controller = SessionController::new();
        let mut state = controller.subscribe();
        let session = tokio::spawn({
            let devices = SessionDevices::new(input.clone(), output.clone());
            async move {
                controller
                    .run_with(
                        &config,
                        &Credentials::new("sk-test"),
                        devices,
                        RecordingTranscript::default(),
                        std::future::pending(),
                    )
                    .await
            }
        });

        let (_, mut peer) = server.accept_one().await;
        let init: Value = serde_json::from_str(&peer.next_text().await.unwrap()).unwrap();
        assert_eq!(init["type"], "response.create");
        wait_for_state(&mut state, SessionState::Streaming).await;

        drop(peer);
        let report = session.await.unwrap().unwrap();

        assert!(matches!(report.end, SessionEnd::TransportFailed(_)));
        assert!(report.end.is_failure());
        assert_eq!(report.teardown, FULL_TEARDOWN);
        assert_eq!(log.events(), DEVICE_TEARDOWN);
        assert!(input.is_closed());
        assert!(output.is_closed());
        assert!(report.connection_closed);
        assert_eq!(*state.borrow(), SessionState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupt_streams_then_closes_once() {
        let server = WsServer::bind().await;
        let config = realtime(&server);
        let log = EventLog::default();
        let frame = AudioFrame::new(vec![7; CHUNK_SIZE]).unwrap();
        let input = Arc::new(ScriptedInput::new(
            vec![Ok(frame.clone()), Err(AudioError::BufferOverflow), Ok(frame)],
            log.clone(),
        ));
        let output = Arc::new(RecordingOutput::new(log.clone()));
        let transcript = RecordingTranscript::default();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let controller = SessionController::new();
        let mut state = controller.subscribe();
        let session = tokio::spawn({
            let devices = SessionDevices::new(input.clone(), output.clone());
            let transcript = transcript.clone();
            async move {
                controller
                    .run_with(
                        &config,
                        &Credentials::new("sk-test"),
                        devices,
                        transcript,
                        async {
                            let _ = stop_rx.await;
                        },
                    )
                    .await
            }
        });

        let (request, mut peer) = server.accept_one().await;
        assert_eq!(request.authorization.as_deref(), Some("Bearer sk-test"));

        let kinds: Vec<String> = {
            let mut kinds = Vec::new();
            for _ in 0..3 {
                let value: Value = serde_json::from_str(&peer.next_text().await.unwrap()).unwrap();
                kinds.push(value["type"].as_str().unwrap().to_string());
            }
            kinds
        };
        assert_eq!(
            kinds,
            ["response.create", "input_audio_buffer.append", "input_audio_buffer.append"]
        );
        wait_for_state(&mut state, SessionState::Streaming).await;

        peer.send_text(r#"{"type":"response.audio.delta","delta":"QQ=="}"#).await;
        peer.send_text(r#"{"type":"response.audio_transcript.delta","delta":"hi"}"#)
            .await;
        peer.send_text(r#"{"type":"response.audio_transcript.done"}"#).await;

        let seen = transcript.clone();
        assert!(wait_until(Duration::from_secs(2), || seen.events().len() == 2).await);
        let written = output.clone();
        assert!(wait_until(Duration::from_secs(2), || !written.writes().is_empty()).await);

        let closed = observe_close(peer, log.clone());
        stop_tx.send(()).unwrap();
        let report = session.await.unwrap().unwrap();
        closed.await.unwrap();

        assert_eq!(report.end, SessionEnd::Interrupted);
        assert!(!report.end.is_failure());
        assert_eq!(report.teardown, FULL_TEARDOWN);
        // Devices first, then the server sees the close handshake
        assert_eq!(
            log.events(),
            ["input.stop", "input.close", "output.stop", "output.close", "connection.close"]
        );
        assert_eq!(report.stats.frames_sent, 2);
        assert_eq!(report.stats.read_errors, 1);
        assert_eq!(output.writes(), vec![vec![0x41]]);
        assert_eq!(
            transcript.events(),
            vec![TranscriptEvent::Fragment("hi".into()), TranscriptEvent::End]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remote_close_ends_session() {
        let server = WsServer::bind().await;
        let config = realtime(&server);
        let log = EventLog::default();
        let input = Arc::new(ScriptedInput::silent(log.clone()));
        let output = Arc::new(RecordingOutput::new(log.clone()));

        let controller = SessionController::new();
        let mut state = controller.subscribe();
        let session = tokio::spawn({
            let devices = SessionDevices::new(input.clone(), output.clone());
            async move {
                controller
                    .run_with(
                        &config,
                        &Credentials::new("sk-test"),
                        devices,
                        RecordingTranscript::default(),
                        std::future::pending(),
                    )
                    .await
            }
        });

        let (_, mut peer) = server.accept_one().await;
        peer.next_text().await.unwrap();
        wait_for_state(&mut state, SessionState::Streaming).await;
        peer.close().await;

        let report = session.await.unwrap().unwrap();
        assert_eq!(report.end, SessionEnd::RemoteClosed);
        assert_eq!(report.teardown, FULL_TEARDOWN);
        assert!(input.is_closed() && output.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_teardown_step_does_not_skip_the_rest() {
        let server = WsServer::bind().await;
        let config = realtime(&server);
        let log = EventLog::default();
        let input = Arc::new(ScriptedInput::silent(log.clone()));
        let output = Arc::new(RecordingOutput::new(log.clone()).failing_stop());

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let controller = SessionController::new();
        let mut state = controller.subscribe();
        let session = tokio::spawn({
            let devices = SessionDevices::new(input.clone(), output.clone());
            async move {
                controller
                    .run_with(
                        &config,
                        &Credentials::new("sk-test"),
                        devices,
                        RecordingTranscript::default(),
                        async {
                            let _ = stop_rx.await;
                        },
                    )
                    .await
            }
        });

        let (_, mut peer) = server.accept_one().await;
        peer.next_text().await.unwrap();
        wait_for_state(&mut state, SessionState::Streaming).await;
        let closed = observe_close(peer, log.clone());
        stop_tx.send(()).unwrap();

        let report = session.await.unwrap().unwrap();
        closed.await.unwrap();
        assert_eq!(report.teardown, FULL_TEARDOWN);
        assert_eq!(
            log.events(),
            ["input.stop", "input.close", "output.stop", "output.close", "connection.close"]
        );
        assert!(output.is_closed());
        assert!(report.connection_closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remote_close_plays_out_received_audio() {
        let server = WsServer::bind().await;
        let config = realtime(&server);
        let log = EventLog::default();
        let input = Arc::new(TickingInput::new(Duration::from_millis(20), log.clone()));
        let output = Arc::new(
            RecordingOutput::new(log.clone()).with_delays(vec![Duration::from_millis(300)]),
        );

        let controller = SessionController::new();
        let mut state = controller.subscribe();
        let session = tokio::spawn({
            let devices = SessionDevices::new(input.clone(), output.clone());
            async move {
                controller
                    .run_with(
                        &config,
                        &Credentials::new("sk-test"),
                        devices,
                        RecordingTranscript::default(),
                        std::future::pending(),
                    )
                    .await
            }
        });

        let (_, mut peer) = server.accept_one().await;
        peer.next_text().await.unwrap();
        wait_for_state(&mut state, SessionState::Streaming).await;

        peer.send_text(r#"{"type":"response.audio.delta","delta":"QQ=="}"#).await;
        peer.send_text(r#"{"type":"response.audio.delta","delta":"Qg=="}"#).await;
        peer.close().await;

        let report = session.await.unwrap().unwrap();
        assert_eq!(report.end, SessionEnd::RemoteClosed);
        assert_eq!(output.writes(), vec![vec![0x41], vec![0x42]]);
        assert_eq!(report.stats.audio_chunks_played, 2);
        assert_eq!(report.teardown, FULL_TEARDOWN);
        assert_eq!(log.events(), DEVICE_TEARDOWN);
    }

    #[test]
    fn test_session_end_classification() {
        assert!(!SessionEnd::Interrupted.is_failure());
        assert!(!SessionEnd::RemoteClosed.is_failure());
        assert!(SessionEnd::TransportFailed("reset".into()).is_failure());
        assert_eq!(
            SessionEnd::TransportFailed("reset".into()).to_string(),
            "connection lost: reset"
        );
    }
}
