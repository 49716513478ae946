pub mod connection;
pub mod ice;
pub mod state;
pub mod types;

pub use connection::{WebRtcTransport, WebRtcTransportFactory};
pub use ice::{CandidateSummary, PendingCandidates};
pub use state::NegotiationState;
pub use types::{IceCandidate, MediaKind, MessageKind, ServerConfig, SignalingMessage};

use crate::error::TransportError;
use crate::media::source::EncodedBuffer;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// События, которые транспорт поднимает из своих колбэков
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Локальный кандидат для trickle-ICE
    LocalCandidate(IceCandidate),
    GatheringComplete,
    ConnectionState(RTCPeerConnectionState),
}

/// Исходящий трек. Пишет в него ровно один мост.
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn write_sample(&self, buffer: &EncodedBuffer) -> Result<(), TransportError>;
}

/// Session Transport: peer connection одной сессии
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn add_track(&self, kind: MediaKind) -> Result<Arc<dyn SampleSink>, TransportError>;

    /// Создаёт offer, ставит его local description и возвращает SDP
    async fn create_offer(&self) -> Result<String, TransportError>;

    async fn set_remote_answer(&self, sdp: String) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn SessionTransport>, TransportError>;
}
