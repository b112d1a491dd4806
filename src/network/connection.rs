//! Persistent websocket connection to the realtime endpoint
//!
//! After [`Connection::split`] the socket has exactly one writer
//! ([`EnvelopeSender`]) and one reader ([`EnvelopeReceiver`]); neither is
//! `Clone`. Outbound envelopes go through an unbounded queue to a writer
//! task, so senders never wait on the far end.

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use http::header::{HeaderValue, AUTHORIZATION};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::codec;
use crate::config::{Credentials, RealtimeConfig};
use crate::constants::PROTOCOL_HEADER;
use crate::error::NetworkError;
use crate::protocol::{ClientEvent, ResponseConfig};

/// Grace period for the writer to flush a close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type InboundStream = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// Work items for the writer task
enum Outbound {
    Text {
        text: String,
        ack: Option<oneshot::Sender<Result<(), NetworkError>>>,
    },
    Close,
}

/// State shared by the connection handle and its two halves
struct Shared {
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    /// First transport failure seen by the writer
    failure: Mutex<Option<String>>,
    envelopes_sent: AtomicU64,
}

impl Shared {
    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closed_tx.send_replace(true);
    }

    fn fail(&self, reason: String) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(reason);
        }
        drop(failure);
        self.mark_closed();
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }
}

/// An open realtime connection
pub struct Connection {
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Outbound>,
    halves: Mutex<Option<(EnvelopeSender, EnvelopeReceiver)>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    close_requested: AtomicBool,
}

impl Connection {
    /// Connect and send the session-init envelope.
    ///
    /// Any failure here is fatal to startup; no audio has flowed yet.
    pub async fn open(
        config: &RealtimeConfig,
        credentials: &Credentials,
    ) -> Result<Self, NetworkError> {
        let connection = Self::connect(config, credentials).await?;
        connection.handshake(config.response_config()).await?;
        Ok(connection)
    }

    /// Establish the websocket with bearer and protocol-version headers
    pub async fn connect(
        config: &RealtimeConfig,
        credentials: &Credentials,
    ) -> Result<Self, NetworkError> {
        let url = config.url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| NetworkError::InvalidEndpoint(e.to_string()))?;

        let bearer = HeaderValue::from_str(&credentials.bearer()).map_err(|_| {
            NetworkError::ConnectionFailed("credential is not a valid header value".into())
        })?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(PROTOCOL_HEADER.0, HeaderValue::from_static(PROTOCOL_HEADER.1));

        tracing::info!("Connecting to {}", url);
        let (ws_stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        tracing::info!("Connected ({})", response.status());

        Ok(Self::from_stream(ws_stream))
    }

    /// Wrap an already upgraded websocket
    pub fn from_stream<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_sink, ws_stream) = ws_stream.split();
        let (closed_tx, closed_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            closed_tx,
            failure: Mutex::new(None),
            envelopes_sent: AtomicU64::new(0),
        });

        let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
        let writer = tokio::spawn(run_writer(ws_sink, rx, shared.clone()));

        let sender = EnvelopeSender {
            tx: tx.clone(),
            shared: shared.clone(),
        };
        let receiver = EnvelopeReceiver {
            stream: Box::pin(ws_stream),
            closed_rx,
            shared: shared.clone(),
        };

        Self {
            shared,
            control: tx,
            halves: Mutex::new(Some((sender, receiver))),
            writer: Mutex::new(Some(writer)),
            close_requested: AtomicBool::new(false),
        }
    }

    /// Send `response.create` and wait until it is on the wire
    pub async fn handshake(&self, response: ResponseConfig) -> Result<(), NetworkError> {
        let event = ClientEvent::ResponseCreate { response };
        let text = codec::to_text(&event)
            .map_err(|e| NetworkError::HandshakeFailed(e.to_string()))?;
        let (ack_tx, ack_rx) = oneshot::channel();

        self.control
            .send(Outbound::Text {
                text,
                ack: Some(ack_tx),
            })
            .map_err(|_| NetworkError::HandshakeFailed("connection is closed".into()))?;

        match ack_rx.await {
            Ok(Ok(())) => {
                tracing::debug!("Session-init sent");
                Ok(())
            }
            Ok(Err(e)) => Err(NetworkError::HandshakeFailed(e.to_string())),
            Err(_) => Err(NetworkError::HandshakeFailed("writer stopped".into())),
        }
    }

    /// Hand out the single writer and single reader. `None` after the first call.
    pub fn split(&self) -> Option<(EnvelopeSender, EnvelopeReceiver)> {
        self.halves.lock().take()
    }

    /// Begin closing. Idempotent, safe from any state.
    pub fn close(&self) {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.mark_closed();
        let _ = self.control.send(Outbound::Close);
        tracing::debug!("Connection close requested");
    }

    /// Close and wait briefly for the writer to flush the close frame
    pub async fn shutdown(&self) {
        self.close();
        let handle = self.writer.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!("Writer did not finish within {:?}; aborting", CLOSE_TIMEOUT);
                handle.abort();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Envelopes written to the socket so far
    pub fn envelopes_sent(&self) -> u64 {
        self.shared.envelopes_sent.load(Ordering::Relaxed)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Outbound half: the only writer on the connection
pub struct EnvelopeSender {
    tx: mpsc::UnboundedSender<Outbound>,
    shared: Arc<Shared>,
}

impl EnvelopeSender {
    /// Queue one envelope. Never waits for the far end.
    pub fn send(&self, event: &ClientEvent) -> Result<(), NetworkError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(self.closed_error());
        }
        let text = codec::to_text(event).map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        self.tx
            .send(Outbound::Text { text, ack: None })
            .map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> NetworkError {
        match self.shared.failure() {
            Some(reason) => NetworkError::SendFailed(reason),
            None => NetworkError::Closed,
        }
    }
}

/// Inbound half: the only reader on the connection
pub struct EnvelopeReceiver {
    stream: InboundStream,
    closed_rx: watch::Receiver<bool>,
    shared: Arc<Shared>,
}

impl EnvelopeReceiver {
    /// Wait for the next text envelope.
    ///
    /// `Ok(None)` means the connection closed normally, either from the far
    /// end or by a local `close`. Errors are transport-fatal.
    pub async fn receive(&mut self) -> Result<Option<String>, NetworkError> {
        loop {
            if *self.closed_rx.borrow() {
                return self.closed_outcome();
            }

            tokio::select! {
                _ = wait_closed(&mut self.closed_rx) => {
                    return self.closed_outcome();
                }
                message = self.stream.next() => match message {
                    Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("Connection closed by server: {:?}", frame);
                        self.shared.mark_closed();
                        return Ok(None);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::debug!("Ignoring {} byte binary message", data.len());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let reason = e.to_string();
                        self.shared.fail(reason.clone());
                        return Err(NetworkError::ReceiveFailed(reason));
                    }
                    None => {
                        self.shared.mark_closed();
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn closed_outcome(&self) -> Result<Option<String>, NetworkError> {
        match self.shared.failure() {
            Some(reason) => Err(NetworkError::SendFailed(reason)),
            None => Ok(None),
        }
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn run_writer<K>(
    mut sink: K,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
) where
    K: futures_util::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Text { text, ack } => {
                let result = match sink.send(Message::Text(text.into())).await {
                    Ok(()) => {
                        shared.envelopes_sent.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                    Err(e) if is_closing(&e) => {
                        tracing::debug!("Envelope not sent, connection is closing: {}", e);
                        shared.mark_closed();
                        Err(NetworkError::Closed)
                    }
                    Err(e) => {
                        tracing::error!("Failed to send websocket message: {}", e);
                        shared.fail(e.to_string());
                        Err(NetworkError::SendFailed(e.to_string()))
                    }
                };

                let failed = result.is_err();
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
                if failed {
                    return;
                }
            }
            Outbound::Close => break,
        }
    }

    if let Err(e) = sink.send(Message::Close(None)).await {
        tracing::debug!("Close frame not sent: {}", e);
    }
    let _ = sink.close().await;
    tracing::debug!("Connection writer finished");
}

/// Send errors that mean the close handshake already started, not a broken transport
fn is_closing(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(ProtocolError::SendAfterClosing)
    )
}
