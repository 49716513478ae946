// Negotiation State Machine: одна сессия на одно сигнальное соединение.
//
// Сервер всегда делает offer. Сообщения из канала обрабатываются строго
// по одному; события транспорта (локальные кандидаты, состояние
// соединения) приходят через ту же петлю, поэтому состояние сессии
// меняется только из её собственной задачи.

use crate::error::{SessionError, SignalingError};
use crate::media::bridge::{BridgeHandle, MediaBridge};
use crate::media::source::{SampleSource, SourceFactory};
use crate::peer::ice::{CandidateSummary, PendingCandidates};
use crate::peer::state::NegotiationState;
use crate::peer::types::{IceCandidate, MediaKind, MessageKind, SignalingMessage};
use crate::peer::{SampleSink, SessionTransport, TransportEvent, TransportFactory};
use std::collections::VecDeque;
use crate::signaling::{self, Outbound, SignalReader, SignalWriter, WriterTask};
use crate::utils::random_id;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, info_span, warn, Instrument};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Всё, что нужно сессии от процесса. Общего изменяемого состояния нет.
pub struct SessionContext {
    pub transports: Arc<dyn TransportFactory>,
    pub sources: Arc<dyn SourceFactory>,
}

impl SessionContext {
    pub fn new(transports: Arc<dyn TransportFactory>, sources: Arc<dyn SourceFactory>) -> Self {
        Self {
            transports,
            sources,
        }
    }
}

/// Исходящий трек; к источнику привязывается не более одного раза
pub struct Track {
    kind: MediaKind,
    sink: Arc<dyn SampleSink>,
    bound: bool,
    bridge: Option<BridgeHandle>,
}

impl Track {
    fn new(kind: MediaKind, sink: Arc<dyn SampleSink>) -> Self {
        Self {
            kind,
            sink,
            bound: false,
            bridge: None,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    fn bind(&mut self, source: Box<dyn SampleSource>, shutdown: watch::Receiver<bool>) {
        if self.bound {
            warn!(kind = %self.kind, "track already bound to a source");
            return;
        }
        self.bound = true;
        let bridge = MediaBridge::new(self.kind, Arc::clone(&self.sink), source);
        self.bridge = Some(bridge.start(shutdown));
    }
}

enum Flow {
    Continue,
    Stop,
}

enum Step {
    Inbound(Option<Result<String, SignalingError>>),
    Transport(Option<TransportEvent>),
}

pub struct Session {
    id: String,
    state: NegotiationState,
    transport: Arc<dyn SessionTransport>,
    tracks: Vec<Track>,
    pending: PendingCandidates,
    local_candidates: CandidateSummary,
    reader: Box<dyn SignalReader>,
    // прочитаны, пока исходящая очередь была полна
    deferred: VecDeque<String>,
    outbound: Outbound,
    writer: WriterTask,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    events_open: bool,
    sources: Arc<dyn SourceFactory>,
    shutdown: watch::Sender<bool>,
}

/// Обработка нового сигнального соединения. Возвращается, когда канал
/// закрыт или согласование провалилось; ошибки только логируются.
pub async fn handle_connection(
    reader: Box<dyn SignalReader>,
    writer: Box<dyn SignalWriter>,
    context: Arc<SessionContext>,
) {
    let id = random_id();
    let span = info_span!("session", %id);

    async move {
        info!("new signaling connection");
        match Session::open(id, reader, writer, &context).await {
            Ok(session) => {
                let state = session.run().await;
                info!(%state, "session finished");
            }
            Err(e) => error!(error = %e, "session aborted before negotiation"),
        }
    }
    .instrument(span)
    .await
}

impl Session {
    /// Создаёт транспорт и треки. Ошибка здесь завершает сессию до offer.
    pub async fn open(
        id: String,
        reader: Box<dyn SignalReader>,
        writer: Box<dyn SignalWriter>,
        context: &SessionContext,
    ) -> Result<Session, SessionError> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let transport = context
            .transports
            .create(events_tx)
            .await
            .map_err(SessionError::Startup)?;

        let mut tracks = Vec::with_capacity(MediaKind::ALL.len());
        for kind in MediaKind::ALL {
            match transport.add_track(kind).await {
                Ok(sink) => tracks.push(Track::new(kind, sink)),
                Err(e) => {
                    if let Err(close_err) = transport.close().await {
                        warn!(error = %close_err, "failed to close transport");
                    }
                    return Err(SessionError::Startup(e));
                }
            }
        }
        debug!(tracks = tracks.len(), "tracks attached");

        let (outbound, writer) = signaling::spawn_writer(writer);
        let (shutdown, _) = watch::channel(false);

        Ok(Session {
            id,
            state: NegotiationState::Idle,
            transport,
            tracks,
            pending: PendingCandidates::default(),
            local_candidates: CandidateSummary::default(),
            reader,
            deferred: VecDeque::new(),
            outbound,
            writer,
            events,
            events_open: true,
            sources: Arc::clone(&context.sources),
            shutdown,
        })
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Ведёт сессию до конца и возвращает итоговое состояние
    pub async fn run(mut self) -> NegotiationState {
        if let Err(e) = self.send_offer().await {
            error!(error = %e, "failed to send offer");
            self.fail();
        } else {
            self.event_loop().await;
        }
        let state = self.state;
        self.teardown().await;
        state
    }

    async fn send_offer(&mut self) -> Result<(), SessionError> {
        let sdp = self
            .transport
            .create_offer()
            .await
            .map_err(SessionError::Negotiation)?;
        self.enqueue(SignalingMessage::offer(sdp)).await?;
        self.advance(NegotiationState::OfferSent);
        info!("offer sent");
        Ok(())
    }

    async fn event_loop(&mut self) {
        loop {
            let step = match self.deferred.pop_front() {
                Some(text) => Step::Inbound(Some(Ok(text))),
                None => tokio::select! {
                    inbound = self.reader.next_text() => Step::Inbound(inbound),
                    event = self.events.recv(), if self.events_open => Step::Transport(event),
                },
            };

            let flow = match step {
                Step::Inbound(Some(Ok(text))) => self.on_text(&text).await,
                Step::Inbound(Some(Err(e))) => {
                    warn!(error = %e, "signaling read error");
                    self.fail();
                    Flow::Stop
                }
                Step::Inbound(None) => {
                    info!(state = %self.state, "signaling channel closed");
                    self.fail();
                    Flow::Stop
                }
                Step::Transport(Some(event)) => self.on_transport_event(event).await,
                Step::Transport(None) => {
                    self.events_open = false;
                    Flow::Continue
                }
            };

            if let Flow::Stop = flow {
                break;
            }
        }
    }

    /// Ставит сообщение в исходящую очередь. Пока очередь полна, читает
    /// канал дальше: закрытие канала прерывает ожидание.
    async fn enqueue(&mut self, message: SignalingMessage) -> Result<(), SignalingError> {
        let send = self.outbound.send(message);
        tokio::pin!(send);
        loop {
            tokio::select! {
                biased;
                result = &mut send => return result,
                inbound = self.reader.next_text() => match inbound {
                    Some(Ok(text)) => self.deferred.push_back(text),
                    Some(Err(e)) => return Err(e),
                    None => {
                        info!(id = %self.id, "signaling channel closed while outbound queue is full");
                        return Err(SignalingError::Closed);
                    }
                },
            }
        }
    }

    async fn on_text(&mut self, text: &str) -> Flow {
        let message = match signaling::parse_message(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "skipping signaling message");
                return Flow::Continue;
            }
        };
        debug!(kind = %message.kind, "signaling message received");

        match message.kind {
            MessageKind::Answer => self.on_answer(message.data).await,
            MessageKind::Candidate => {
                self.on_remote_candidate(&message.data).await;
                Flow::Continue
            }
            MessageKind::Offer => {
                warn!("ignoring offer from client, this side is the offerer");
                Flow::Continue
            }
        }
    }

    async fn on_answer(&mut self, sdp: String) -> Flow {
        if self.state != NegotiationState::OfferSent {
            info!(state = %self.state, "ignoring answer, negotiation is single-shot");
            return Flow::Continue;
        }

        if let Err(e) = self.transport.set_remote_answer(sdp).await {
            error!(error = %e, "SetRemoteDescription failed");
            self.fail();
            return Flow::Stop;
        }
        self.advance(NegotiationState::Negotiated);

        if !self.pending.is_empty() {
            let queued = self.pending.len();
            let applied = self.pending.apply(self.transport.as_ref()).await;
            debug!(queued, applied, "pending remote candidates flushed");
        }

        self.start_bridges().await;
        self.advance(NegotiationState::BridgesRunning);
        Flow::Continue
    }

    async fn on_remote_candidate(&mut self, data: &str) {
        let candidate = match IceCandidate::parse(data) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(error = %e, "skipping remote candidate");
                return;
            }
        };

        if !self.state.is_negotiated() {
            // remote description ещё нет: держим до answer
            self.pending.push(candidate);
            return;
        }

        if let Err(e) = self.transport.add_ice_candidate(&candidate).await {
            warn!(candidate = %candidate.candidate, error = %e, "AddICECandidate failed");
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Flow {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.local_candidates.record(&candidate);
                if let Err(e) = self.enqueue(SignalingMessage::candidate(&candidate)).await {
                    warn!(error = %e, "cannot relay local candidate");
                    self.fail();
                    return Flow::Stop;
                }
                Flow::Continue
            }
            TransportEvent::GatheringComplete => {
                debug!(
                    total = self.local_candidates.total(),
                    "ICE candidate gathering completed"
                );
                self.local_candidates.log();
                Flow::Continue
            }
            TransportEvent::ConnectionState(state) => match state {
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                    warn!(%state, "transport is gone, ending session");
                    self.fail();
                    Flow::Stop
                }
                RTCPeerConnectionState::Connected => {
                    info!("peer connected");
                    Flow::Continue
                }
                _ => Flow::Continue,
            },
        }
    }

    async fn start_bridges(&mut self) {
        for track in self.tracks.iter_mut().filter(|t| !t.is_bound()) {
            let kind = track.kind();
            let sources = Arc::clone(&self.sources);
            // запуск конвейера блокирующий, уводим его с рабочего потока
            match tokio::task::spawn_blocking(move || sources.start(kind)).await {
                Ok(Ok(source)) => {
                    info!(%kind, "starting media bridge");
                    track.bind(source, self.shutdown.subscribe());
                }
                Ok(Err(e)) => error!(%kind, error = %e, "failed to start sample source"),
                Err(e) => error!(%kind, error = %e, "sample source start task failed"),
            }
        }
    }

    fn advance(&mut self, next: NegotiationState) {
        if self.state.can_transition_to(next) {
            debug!(from = %self.state, to = %next, "negotiation state changed");
            self.state = next;
        } else {
            warn!(from = %self.state, to = %next, "illegal negotiation transition ignored");
        }
    }

    fn fail(&mut self) {
        self.advance(NegotiationState::Failed);
    }

    async fn teardown(self) {
        let Session {
            transport,
            mut tracks,
            outbound,
            writer,
            shutdown,
            ..
        } = self;

        shutdown.send_replace(true);
        if let Err(e) = transport.close().await {
            warn!(error = %e, "failed to close transport");
        }

        for track in tracks.iter_mut() {
            if let Some(bridge) = track.bridge.take() {
                let report = bridge.join().await;
                debug!(kind = %report.kind, state = %report.state, forwarded = report.forwarded, "bridge joined");
            }
        }

        drop(outbound);
        writer.finish().await;
        debug!("session resources released");
    }
}
