use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::cookie::{CookieStore, Jar};
use safehome_shared::{ClientEvent, LocationSample, ServerEvent, SubjectId};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{RECONNECT_BASE_MS, RECONNECT_MAX_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ChannelState {
    pub fn is_connected(self) -> bool {
        self == ChannelState::Connected
    }

    pub fn label(self) -> &'static str {
        match self {
            ChannelState::Disconnected => "Offline",
            ChannelState::Connecting => "Connecting",
            ChannelState::Connected => "Live",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
}

/// Something that can open a fresh push connection.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// One live push connection carrying JSON text frames.
pub trait Connection: Send + 'static {
    fn send_text(&mut self, text: String)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// `None` once the peer has closed the connection.
    fn recv_text(&mut self) -> impl Future<Output = Option<Result<String, TransportError>>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Exponential reconnect delay, reset after every successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(RECONNECT_BASE_MS),
            max: Duration::from_millis(RECONNECT_MAX_MS),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(6);
        let factor = 1u32 << exponent;
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Owner of one subject-scoped push channel. Dropping the handle stops the
/// channel task without waiting for it; `close` waits.
pub struct ChannelHandle {
    subject: SubjectId,
    status: watch::Receiver<ChannelState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    pub fn status(&self) -> ChannelState {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelState> {
        self.status.clone()
    }

    /// Tear down the connection. Once this returns the event handler will
    /// not be invoked again. Calling it twice is a no-op.
    pub async fn close(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await
                && e.is_panic()
            {
                warn!(subject = %self.subject, "channel task panicked");
            }
            debug!(subject = %self.subject, "channel closed");
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

pub fn open<T, F>(transport: T, subject: SubjectId, on_event: F) -> ChannelHandle
where
    T: Transport,
    F: FnMut(LocationSample) + Send + 'static,
{
    open_with(transport, subject, ReconnectPolicy::default(), on_event)
}

pub fn open_with<T, F>(
    transport: T,
    subject: SubjectId,
    policy: ReconnectPolicy,
    on_event: F,
) -> ChannelHandle
where
    T: Transport,
    F: FnMut(LocationSample) + Send + 'static,
{
    let (status_tx, status_rx) = watch::channel(ChannelState::Disconnected);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run(
        transport,
        subject.clone(),
        policy,
        on_event,
        status_tx,
        shutdown_rx,
    ));
    ChannelHandle {
        subject,
        status: status_rx,
        shutdown: shutdown_tx,
        task: Some(task),
    }
}

async fn run<T, F>(
    transport: T,
    subject: SubjectId,
    policy: ReconnectPolicy,
    mut on_event: F,
    status: watch::Sender<ChannelState>,
    mut shutdown: watch::Receiver<bool>,
) where
    T: Transport,
    F: FnMut(LocationSample) + Send + 'static,
{
    let mut consecutive_failures: u32 = 0;

    while !*shutdown.borrow() {
        status.send_replace(ChannelState::Connecting);
        let connected = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            connected = transport.connect() => connected,
        };

        match connected {
            Ok(mut connection) => {
                consecutive_failures = 0;
                status.send_replace(ChannelState::Connected);
                info!(%subject, "push channel connected");
                let stopped = serve(&mut connection, &subject, &mut on_event, &mut shutdown).await;
                connection.close().await;
                if stopped {
                    break;
                }
            }
            Err(e) => warn!(%subject, error = %e, "push channel connect failed"),
        }

        status.send_replace(ChannelState::Disconnected);
        consecutive_failures = consecutive_failures.saturating_add(1);
        let delay = policy.delay(consecutive_failures);
        debug!(
            %subject,
            attempt = consecutive_failures,
            delay_ms = delay.as_millis() as u64,
            "reconnecting"
        );
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    status.send_replace(ChannelState::Disconnected);
}

/// Subscribe and pump frames until the connection drops (`false`) or
/// shutdown is requested (`true`).
async fn serve<C, F>(
    connection: &mut C,
    subject: &SubjectId,
    on_event: &mut F,
    shutdown: &mut watch::Receiver<bool>,
) -> bool
where
    C: Connection,
    F: FnMut(LocationSample),
{
    let subscribe = ClientEvent::Subscribe {
        subject_id: subject.clone(),
    };
    let frame = match serde_json::to_string(&subscribe) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(%subject, error = %e, "failed to encode subscribe frame");
            return false;
        }
    };
    if let Err(e) = connection.send_text(frame).await {
        warn!(%subject, error = %e, "failed to subscribe");
        return false;
    }
    debug!(%subject, "subscribed");

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => return true,
            next = connection.recv_text() => next,
        };
        match next {
            Some(Ok(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(ServerEvent::Push(sample)) => on_event(sample),
                Err(e) => {
                    debug!(%subject, error = %e, frame = %text, "skipping unrecognised frame");
                }
            },
            Some(Err(e)) => {
                warn!(%subject, error = %e, "push channel read failed");
                return false;
            }
            None => {
                info!(%subject, "push channel closed by peer");
                return false;
            }
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport. The upgrade request carries the session cookies so
/// the push origin can authorise the subscription.
#[derive(Clone)]
pub struct WsTransport {
    url: Url,
    cookies: Option<(Arc<Jar>, Url)>,
}

impl WsTransport {
    pub fn new(url: Url) -> Self {
        Self { url, cookies: None }
    }

    /// Send the cookies the jar holds for `origin` on every connect.
    pub fn with_cookies(mut self, jar: Arc<Jar>, origin: Url) -> Self {
        self.cookies = Some((jar, origin));
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Transport for WsTransport {
    type Connection = WsConnection;

    async fn connect(&self) -> Result<WsConnection, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if let Some((jar, origin)) = &self.cookies
            && let Some(cookies) = jar.cookies(origin)
        {
            let value = HeaderValue::from_bytes(cookies.as_bytes())
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            request.headers_mut().insert(COOKIE, value);
        }
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(WsConnection { stream })
    }
}

pub struct WsConnection {
    stream: WsStream,
}

impl Connection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite; binary frames are not part of the protocol.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "websocket close handshake failed");
        }
    }
}
