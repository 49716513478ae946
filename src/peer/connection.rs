use crate::error::TransportError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::media::source::EncodedBuffer;
use crate::peer::types::{IceCandidate, MediaKind, ServerConfig};
use crate::peer::{SampleSink, SessionTransport, TransportEvent, TransportFactory};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Общий stream id для аудио и видео трека
pub const STREAM_ID: &str = "webcast";

/// Создаёт peer connection'ы для новых сессий
pub struct WebRtcTransportFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransportFactory {
    pub fn new(servers: Vec<ServerConfig>) -> Self {
        Self {
            ice_servers: get_user_ice_servers(servers),
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn SessionTransport>, TransportError> {
        let pc = new_peer(rtc_config(self.ice_servers.clone()), events).await?;
        Ok(Arc::new(WebRtcTransport { pc }))
    }
}

/// создаём Peer и вешаем обработчики, которые шлют события в `events`
pub async fn new_peer(
    config: RTCConfiguration,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> Result<Arc<RTCPeerConnection>, TransportError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(config).await?);

    let candidate_tx = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let tx = candidate_tx.clone();
        Box::pin(async move {
            match cand {
                Some(c) => {
                    dump_candidate("LOCAL", &c);
                    match c.to_json() {
                        Ok(init) => {
                            let _ = tx.send(TransportEvent::LocalCandidate(init.into()));
                        }
                        Err(e) => warn!(error = %e, "failed to serialize local candidate"),
                    }
                }
                // cand == None означает конец сбора
                None => {
                    let _ = tx.send(TransportEvent::GatheringComplete);
                }
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(|state| {
        debug!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    pc.on_ice_connection_state_change(Box::new(|state: RTCIceConnectionState| {
        info!(%state, "ICE connection state changed");
        Box::pin(async {})
    }));

    // слабая ссылка, чтобы обработчик не держал peer connection живым
    let pc_stats = Arc::downgrade(&pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(state = %st, "peer connection state changed");
        if st == RTCPeerConnectionState::Failed {
            if let Some(pc) = pc_stats.upgrade() {
                tokio::spawn(async move {
                    dump_selected_pair(&pc, "BEFORE-FAIL").await;
                });
            }
        }
        let _ = events.send(TransportEvent::ConnectionState(st));
        Box::pin(async {})
    }));

    Ok(pc)
}

/// Создает конфигурацию для peer connection
pub fn rtc_config(ice_servers: Vec<RTCIceServer>) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: Vec<ServerConfig>) -> Vec<RTCIceServer> {
    servers
        .into_iter()
        .map(|config| {
            let url = add_ice_url_scheme(&config);

            RTCIceServer {
                urls: vec![url],
                username: config.username.unwrap_or_default(),
                credential: config.credential.unwrap_or_default(),
            }
        })
        .collect()
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl SessionTransport for WebRtcTransport {
    async fn add_track(&self, kind: MediaKind) -> Result<Arc<dyn SampleSink>, TransportError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: kind.mime_type().to_owned(),
                ..Default::default()
            },
            kind.track_id(),
            STREAM_ID.to_owned(),
        ));

        let rtp_sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP нужно вычитывать, иначе interceptor'ы не работают
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
            debug!(%kind, "RTCP reader finished");
        });

        Ok(Arc::new(LocalTrack { track }))
    }

    async fn create_offer(&self) -> Result<String, TransportError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;

        // НЕ ждем ICE gathering - кандидаты уходят через trickle
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::Rejected("local description missing after offer".into()))?;
        Ok(local.sdp)
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<(), TransportError> {
        let answer = RTCSessionDescription::answer(sdp)?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        self.pc.add_ice_candidate(candidate.to_init()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc.close().await?;
        Ok(())
    }
}

struct LocalTrack {
    track: Arc<TrackLocalStaticSample>,
}

#[async_trait]
impl SampleSink for LocalTrack {
    async fn write_sample(&self, buffer: &EncodedBuffer) -> Result<(), TransportError> {
        self.track
            .write_sample(&Sample {
                data: buffer.data.clone(),
                duration: buffer.duration,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}
