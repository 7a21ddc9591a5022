use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use futures::StreamExt;
use safehome_client::config::socket_url_for;
use safehome_client::{
    BackendApi, ClientConfig, Gateway, LocationSession, SessionOptions, SessionView, WsTransport,
};
use safehome_shared::{HistoryRange, SubjectId, presence};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(
    name = "safehome-watch",
    about = "Follow one subject's live location and log every map update",
    version
)]
struct Cli {
    /// Subject (child account) id to follow.
    subject: String,

    #[arg(long, short, default_value = "24h", help = "History horizon: 1h, 6h or 24h")]
    range: HistoryRange,

    #[arg(long, env = "SAFEHOME_BACKEND_URL", help = "Backend base URL")]
    backend: Option<Url>,

    #[arg(
        long,
        env = "SAFEHOME_SOCKET_URL",
        help = "Push channel URL (defaults to the backend origin over ws/wss)"
    )]
    socket: Option<Url>,

    #[arg(long, env = "SAFEHOME_EMAIL", requires = "password")]
    email: Option<String>,

    #[arg(long, env = "SAFEHOME_PASSWORD", hide_env_values = true, requires = "email")]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env().context("reading configuration")?;
    if let Some(backend) = cli.backend {
        config.socket_url = socket_url_for(&backend);
        config.backend_url = backend;
    }
    if let Some(socket) = cli.socket {
        config.socket_url = socket;
    }
    tracing::info!(
        backend = %config.backend_url,
        socket = %config.socket_url,
        policy = ?config.credential_policy,
        "safehome-watch starting"
    );

    let gateway = Gateway::new(&config).context("building HTTP client")?;
    let api = BackendApi::new(gateway.clone());
    if let (Some(email), Some(password)) = (cli.email.as_deref(), cli.password.as_deref()) {
        api.login(email, password).await.context("signing in")?;
    }
    match api.me().await {
        Ok(user) => tracing::info!(user = %user.email, role = ?user.role, "signed in"),
        Err(e) => {
            tracing::warn!(error = %e, "no active session; history and pushes may be refused");
        }
    }

    let transport = WsTransport::new(config.socket_url.clone())
        .with_cookies(gateway.cookie_jar(), config.backend_url.clone());
    let options = SessionOptions::from_config(&config).with_range(cli.range);
    let session = LocationSession::start(gateway, transport, SubjectId::new(cli.subject), options);

    let mut updates = session.updates();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            view = updates.next() => match view {
                Some(view) => log_view(&view),
                None => break,
            },
        }
    }

    session.shutdown().await;
    tracing::info!("safehome-watch stopped");
    Ok(())
}

fn log_view(view: &SessionView) {
    let last_seen = presence::last_seen_label(view.head.as_ref().map(|head| head.ts), Utc::now());
    let center = view.projection.center;
    let fit = view.projection.bounds.map(|bounds| bounds.padded());
    tracing::info!(
        subject = %view.subject,
        range = %view.range,
        channel = view.channel.label(),
        points = view.window_len,
        path = view.projection.path.len(),
        lat = center.lat,
        lng = center.lng,
        zoom = view.projection.zoom,
        fit = ?fit,
        loading = view.loading,
        %last_seen,
        "view updated"
    );
    if let Some(error) = &view.last_error {
        tracing::warn!(subject = %view.subject, %error, "history unavailable");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
