//! Realtime location sync for the SafeHome dashboard: anti-forgery credential
//! handling, the request gateway, per-subject push channels, and the history
//! window that turns bulk fetches and live pushes into a map projection.

pub mod api;
pub mod channel;
pub mod config;
pub mod credential;
pub mod gateway;
pub mod projector;
pub mod reconciler;
pub mod session;

pub use api::BackendApi;
pub use channel::{ChannelHandle, ChannelState, ReconnectPolicy, Transport, WsTransport};
pub use config::ClientConfig;
pub use credential::{CredentialManager, CredentialPolicy};
pub use gateway::{Gateway, Payload, RequestBody, RequestError, RequestOptions};
pub use projector::{Projection, project};
pub use reconciler::{HistoryReconciler, PushOutcome};
pub use session::{LocationSession, SessionOptions, SessionView};
