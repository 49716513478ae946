pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod server;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::Config;
pub use error::{BridgeError, ConfigError, ServerError, SessionError, SignalingError, TransportError};
pub use session::{handle_connection, Session, SessionContext};

#[cfg(feature = "gst")]
pub async fn run(config: Config) -> Result<(), ServerError> {
    use std::sync::Arc;
    use tracing::info;

    media::gst::init()?;

    let ice_servers = config.ice_servers()?;
    info!(servers = ice_servers.len(), "ICE servers configured");

    let context = Arc::new(SessionContext::new(
        Arc::new(peer::WebRtcTransportFactory::new(ice_servers)),
        Arc::new(media::gst::PipelineSources::new(&config)),
    ));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(
        port = config.port,
        device = %config.video_device,
        bitrate = config.bitrate,
        "webcast started, open http://localhost:{}/",
        config.port
    );

    let state = server::AppState::new(Arc::new(config), context);
    server::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
    })
    .await?;

    info!("server stopped");
    Ok(())
}
