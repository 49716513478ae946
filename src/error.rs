use thiserror::Error;

/// Ошибки сигнального канала и разбора сообщений
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("malformed signaling message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownKind(String),

    #[error("invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    #[error("signaling channel closed")]
    Closed,

    #[error("signaling transport error: {0}")]
    Transport(String),
}

/// Ошибки Session Transport (peer connection)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),

    #[error("rejected by transport: {0}")]
    Rejected(String),

    #[error("transport closed")]
    Closed,
}

/// Ошибки источника семплов
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to start sample source: {0}")]
    SourceStart(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),
}

/// Ошибки уровня сессии; наружу из `handle_connection` не выходят
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session startup failed: {0}")]
    Startup(TransportError),

    #[error("signaling channel error: {0}")]
    Channel(#[from] SignalingError),

    #[error("negotiation failed: {0}")]
    Negotiation(TransportError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ICE server URL cannot be empty")]
    EmptyIceUrl,

    #[error("TURN server {0} requires username and credential")]
    MissingTurnCredentials(String),
}

/// Ошибки запуска процесса
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}
