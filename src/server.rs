// HTTP-поверхность: страница клиента и WebSocket сигнальный канал `/ws`

use crate::config::Config;
use crate::error::SignalingError;
use crate::session::{handle_connection, SessionContext};
use crate::signaling::{SignalReader, SignalWriter};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub const SIGNALING_PATH: &str = "/ws";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub context: Arc<SessionContext>,
}

impl AppState {
    pub fn new(config: Arc<Config>, context: Arc<SessionContext>) -> Self {
        Self { config, context }
    }
}

pub fn build_router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();
    let index = static_dir.join("index.html");

    Router::new()
        .route(SIGNALING_PATH, get(ws_handler))
        .fallback_service(ServeDir::new(&static_dir).fallback(ServeFile::new(index)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            handle_connection(
                Box::new(WsReader { stream }),
                Box::new(WsWriter { sink }),
                state.context,
            )
            .await;
        })
}

/// Слушает до сигнала `shutdown`; открытые сессии дорабатывают сами
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

struct WsReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl SignalReader for WsReader {
    async fn next_text(&mut self) -> Option<Result<String, SignalingError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket close frame received");
                    return None;
                }
                // ping/pong axum обрабатывает сам
                Ok(_) => continue,
                Err(e) => return Some(Err(SignalingError::Transport(e.to_string()))),
            }
        }
    }
}

struct WsWriter {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl SignalWriter for WsWriter {
    async fn send_text(&mut self, text: String) -> Result<(), SignalingError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!(error = %e, "websocket already closed");
        }
    }
}
