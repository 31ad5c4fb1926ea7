use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// Module declarations
pub mod auth;
pub mod callback;
pub mod config;
pub mod credentials;
pub mod display;
pub mod error;
pub mod http;
pub mod lrc;
pub mod lyrics;
pub mod pkce;
pub mod poller;
pub mod scroll;
pub mod spotify;
pub mod types;

#[cfg(test)]
mod testing;

use auth::{EventPrompt, TokenManager};
use callback::LoopbackAcceptor;
use config::Config;
use credentials::FileCredentialStore;
use display::{run_display, Display};
use http::{HttpTransport, ReqwestTransport};
use lyrics::LyricsClient;
use poller::Poller;
use scroll::ScrollSmoother;
use spotify::PlaybackClient;

pub fn run() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    info!("Starting Lyrisync...");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(start()) {
        error!("Lyrisync could not start: {:#}", e);
        std::process::exit(1);
    }
}

async fn start() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    info!("Polling every {:?}", config.poll_interval);

    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(&config.user_agent, config.http_timeout)?);
    let acceptor = LoopbackAcceptor::for_redirect_uri(&config.redirect_uri, config.auth_timeout)?;
    info!(
        "Sign-in redirects will be received on {}{}",
        acceptor.bind_addr(),
        acceptor.path()
    );
    let store = FileCredentialStore::open_or_reset(&config.credentials_path);
    info!("Credentials stored at {}", store.path().display());

    let mut tokens = TokenManager::new(
        config.auth_config(),
        Arc::clone(&transport),
        Box::new(store),
        Arc::new(acceptor),
        Arc::new(EventPrompt::new(events_tx.clone())),
    );
    if !tokens.load_persisted() {
        info!("Not signed in yet; authorization starts with the first poll");
    }

    let poller = Poller::new(
        tokens,
        PlaybackClient::new(Arc::clone(&transport), &config.api_base),
        LyricsClient::new(transport, &config.lrclib_base),
        config.poller_config(),
        events_tx,
    );
    let display = Display::new(ScrollSmoother::default(), std::io::stdout());

    let cancel = CancellationToken::new();
    let display_task = tokio::spawn(run_display(display, events_rx, cancel.clone()));
    let poller_task = tokio::spawn(poller.run(cancel.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => warn!("Failed to listen for Ctrl+C: {}; shutting down", e),
    }
    cancel.cancel();

    if let Err(e) = poller_task.await {
        error!("Polling task failed: {}", e);
    }
    if let Err(e) = display_task.await {
        error!("Display task failed: {}", e);
    }

    info!("Lyrisync stopped");
    Ok(())
}
