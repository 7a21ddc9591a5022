#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::{DateTime, TimeZone, Utc};
use safehome_client::{ClientConfig, Gateway, WsTransport};
use safehome_shared::{ClientEvent, HistoryResponse, LocationSample, ServerEvent};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use url::Url;

pub const WAIT: Duration = Duration::from_secs(5);

/// What the history route answers.
#[derive(Debug, Clone)]
pub enum HistoryScript {
    Fixed(Vec<LocationSample>),
    Failing(String),
    /// Queries reaching back more than two hours answer slowly with `wide`.
    SlowWhenWide {
        wide: Vec<LocationSample>,
        narrow: Vec<LocationSample>,
    },
}

#[derive(Clone)]
struct Backend {
    history: Arc<Mutex<HistoryScript>>,
    pushes: broadcast::Sender<(String, String)>,
    subscribed: mpsc::UnboundedSender<String>,
    closed: mpsc::UnboundedSender<String>,
    upgrade_cookies: Arc<Mutex<Vec<Option<String>>>>,
}

/// HTTP routes and a push socket on one ephemeral port.
pub struct FakeBackend {
    pub addr: SocketAddr,
    history: Arc<Mutex<HistoryScript>>,
    pushes: broadcast::Sender<(String, String)>,
    subscribed: mpsc::UnboundedReceiver<String>,
    closed: mpsc::UnboundedReceiver<String>,
    upgrade_cookies: Arc<Mutex<Vec<Option<String>>>>,
}

impl FakeBackend {
    pub async fn spawn(script: HistoryScript) -> Self {
        let (pushes, _) = broadcast::channel(64);
        let (subscribed_tx, subscribed) = mpsc::unbounded_channel();
        let (closed_tx, closed) = mpsc::unbounded_channel();
        let backend = Backend {
            history: Arc::new(Mutex::new(script)),
            pushes: pushes.clone(),
            subscribed: subscribed_tx,
            closed: closed_tx,
            upgrade_cookies: Arc::default(),
        };
        let app = Router::new()
            .route(
                "/auth/csrf",
                get(|| async { axum::Json(json!({ "csrfToken": "itest-token" })) }),
            )
            .route("/auth/login", post(login))
            .route("/subjects/{id}/locations", get(history))
            .route("/ws", get(ws_handler))
            .with_state(backend.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve fake backend");
        });
        Self {
            addr,
            history: backend.history,
            pushes,
            subscribed,
            closed,
            upgrade_cookies: backend.upgrade_cookies,
        }
    }

    pub fn http_url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).expect("http url")
    }

    pub fn ws_url(&self) -> Url {
        Url::parse(&format!("ws://{}/ws", self.addr)).expect("ws url")
    }

    pub fn gateway(&self) -> Gateway {
        Gateway::new(&ClientConfig::for_backend(self.http_url())).expect("gateway")
    }

    pub fn transport(&self) -> WsTransport {
        WsTransport::new(self.ws_url())
    }

    pub fn set_history(&self, script: HistoryScript) {
        *self.history.lock().expect("history lock") = script;
    }

    /// Next subject id a socket subscribed to.
    pub async fn next_subscription(&mut self) -> String {
        tokio::time::timeout(WAIT, self.subscribed.recv())
            .await
            .expect("subscription in time")
            .expect("backend alive")
    }

    /// Subject of the next subscribed socket the client hung up.
    pub async fn next_closed(&mut self) -> String {
        tokio::time::timeout(WAIT, self.closed.recv())
            .await
            .expect("socket closed in time")
            .expect("backend alive")
    }

    pub fn push(&self, subject: &str, sample: &LocationSample) {
        let frame = serde_json::to_string(&ServerEvent::Push(sample.clone())).expect("push frame");
        self.pushes
            .send((subject.to_owned(), frame))
            .expect("at least one socket listening");
    }

    pub fn upgrade_cookies(&self) -> Vec<Option<String>> {
        self.upgrade_cookies.lock().expect("cookie lock").clone()
    }
}

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, 8, minute, 0).unwrap()
}

pub fn sample(lat: f64, lng: f64, minute: u32) -> LocationSample {
    LocationSample::new(lat, lng, at(minute))
}

async fn login() -> Response {
    (
        [(header::SET_COOKIE, "sid=session-1; Path=/; HttpOnly")],
        axum::Json(json!({ "ok": true })),
    )
        .into_response()
}

async fn history(
    State(backend): State<Backend>,
    Query(query): Query<std::collections::HashMap<String, String>>,
) -> Response {
    let script = backend.history.lock().expect("history lock").clone();
    match script {
        HistoryScript::Fixed(samples) => axum::Json(HistoryResponse {
            samples,
            debug: None,
        })
        .into_response(),
        HistoryScript::Failing(message) => {
            (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
        }
        HistoryScript::SlowWhenWide { wide, narrow } => {
            let from = query
                .get("from")
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|from| from.with_timezone(&Utc))
                .expect("from query parameter");
            if Utc::now() - from > chrono::Duration::hours(2) {
                tokio::time::sleep(Duration::from_millis(400)).await;
                axum::Json(json!({ "pings": wide })).into_response()
            } else {
                axum::Json(json!({ "samples": narrow })).into_response()
            }
        }
    }
}

async fn ws_handler(
    State(backend): State<Backend>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let cookie = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    backend.upgrade_cookies.lock().expect("cookie lock").push(cookie);
    ws.on_upgrade(move |socket| handle_socket(socket, backend))
}

async fn handle_socket(mut socket: WebSocket, backend: Backend) {
    let mut pushes = backend.pushes.subscribe();

    let subject = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ClientEvent>(text.as_str()) {
                    Ok(ClientEvent::Subscribe { subject_id }) => break subject_id.to_string(),
                    Err(_) => continue,
                }
            }
            Some(Ok(_)) => continue,
            _ => return,
        }
    };
    let _ = backend.subscribed.send(subject.clone());

    loop {
        tokio::select! {
            outbound = pushes.recv() => match outbound {
                Ok((target, frame)) if target == subject => {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    let _ = backend.closed.send(subject);
}
