// Общие заглушки для интеграционных тестов: транспорт, источники и
// сигнальный канал в памяти.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use webcast_lib::error::{BridgeError, SignalingError, TransportError};
use webcast_lib::media::source::{channel_source, ChannelSource, EncodedBuffer};
use webcast_lib::media::{SampleSource, SourceFactory, SourceFeeder};
use webcast_lib::peer::{
    IceCandidate, MediaKind, SampleSink, SessionTransport, SignalingMessage, TransportEvent,
    TransportFactory,
};
use webcast_lib::signaling::{parse_message, SignalReader, SignalWriter};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub const HOST_CANDIDATE: &str = "candidate:1 1 udp 2130706431 192.168.1.2 54321 typ host";
pub const SRFLX_CANDIDATE: &str =
    "candidate:2 1 udp 1694498815 203.0.113.7 40000 typ srflx raddr 192.168.1.2 rport 54321";

pub fn init_test_tracing() {
    webcast_lib::logger::init("debug");
}

/// Ждёт, пока условие станет истинным
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// --- транспорт ---

#[derive(Debug, Default)]
pub struct TransportRecord {
    pub offers: usize,
    pub answers: Vec<String>,
    pub applied: Vec<String>,
    /// кандидаты, пришедшие в транспорт раньше remote description
    pub applied_before_remote: usize,
    pub closed: bool,
}

#[derive(Default)]
pub struct MockSink {
    pub samples: Mutex<Vec<EncodedBuffer>>,
    pub fail: bool,
}

impl MockSink {
    pub fn count(&self) -> usize {
        self.samples.lock().unwrap().len()
    }
}

#[async_trait]
impl SampleSink for MockSink {
    async fn write_sample(&self, buffer: &EncodedBuffer) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Rejected("track is broken".into()));
        }
        self.samples.lock().unwrap().push(buffer.clone());
        Ok(())
    }
}

/// Общий зонд: фабрика и транспорт пишут сюда, тест читает
#[derive(Default)]
pub struct Probe {
    pub record: Mutex<TransportRecord>,
    pub sinks: Mutex<HashMap<MediaKind, Arc<MockSink>>>,
    pub events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl Probe {
    pub fn record<R>(&self, f: impl FnOnce(&TransportRecord) -> R) -> R {
        f(&self.record.lock().unwrap())
    }

    pub fn sink(&self, kind: MediaKind) -> Arc<MockSink> {
        Arc::clone(&self.sinks.lock().unwrap()[&kind])
    }

    pub fn emit(&self, event: TransportEvent) {
        let events = self.events.lock().unwrap();
        events
            .as_ref()
            .expect("transport not created yet")
            .send(event)
            .expect("session stopped listening");
    }
}

#[derive(Default, Clone)]
pub struct MockOptions {
    pub reject_answer: bool,
    pub fail_track: Option<MediaKind>,
    pub broken_sink: Option<MediaKind>,
}

pub struct MockTransportFactory {
    pub probe: Arc<Probe>,
    pub options: MockOptions,
}

impl MockTransportFactory {
    pub fn new(options: MockOptions) -> Self {
        Self {
            probe: Arc::new(Probe::default()),
            options,
        }
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn SessionTransport>, TransportError> {
        *self.probe.events.lock().unwrap() = Some(events);
        Ok(Arc::new(MockTransport {
            probe: Arc::clone(&self.probe),
            options: self.options.clone(),
        }))
    }
}

struct MockTransport {
    probe: Arc<Probe>,
    options: MockOptions,
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn add_track(&self, kind: MediaKind) -> Result<Arc<dyn SampleSink>, TransportError> {
        if self.options.fail_track == Some(kind) {
            return Err(TransportError::Rejected(format!("no codec for {kind}")));
        }
        let sink = Arc::new(MockSink {
            fail: self.options.broken_sink == Some(kind),
            ..Default::default()
        });
        self.probe
            .sinks
            .lock()
            .unwrap()
            .insert(kind, Arc::clone(&sink));
        Ok(sink)
    }

    async fn create_offer(&self) -> Result<String, TransportError> {
        let mut record = self.probe.record.lock().unwrap();
        record.offers += 1;
        Ok(format!("v=0\r\no=- {} 0 IN IP4 0.0.0.0\r\n", record.offers))
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<(), TransportError> {
        if self.options.reject_answer {
            return Err(TransportError::Rejected("malformed SDP".into()));
        }
        self.probe.record.lock().unwrap().answers.push(sdp);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let mut record = self.probe.record.lock().unwrap();
        if record.answers.is_empty() {
            record.applied_before_remote += 1;
        }
        record.applied.push(candidate.candidate.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.probe.record.lock().unwrap().closed = true;
        Ok(())
    }
}

// --- источники ---

/// Один источник на трек: повторный запуск отдаёт ошибку
pub struct MockSourceFactory {
    sources: Mutex<HashMap<MediaKind, ChannelSource>>,
    feeders: HashMap<MediaKind, SourceFeeder>,
    starts: Mutex<HashMap<MediaKind, usize>>,
}

impl MockSourceFactory {
    pub fn new() -> Self {
        let mut sources = HashMap::new();
        let mut feeders = HashMap::new();
        for kind in MediaKind::ALL {
            let (feeder, source) = channel_source(16);
            sources.insert(kind, source);
            feeders.insert(kind, feeder);
        }
        Self {
            sources: Mutex::new(sources),
            feeders,
            starts: Mutex::new(HashMap::new()),
        }
    }

    pub fn feeder(&self, kind: MediaKind) -> SourceFeeder {
        self.feeders[&kind].clone()
    }

    pub fn starts(&self, kind: MediaKind) -> usize {
        self.starts.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }
}

impl SourceFactory for MockSourceFactory {
    fn start(&self, kind: MediaKind) -> Result<Box<dyn SampleSource>, BridgeError> {
        *self.starts.lock().unwrap().entry(kind).or_default() += 1;
        self.sources
            .lock()
            .unwrap()
            .remove(&kind)
            .map(|source| Box::new(source) as Box<dyn SampleSource>)
            .ok_or_else(|| BridgeError::SourceStart(format!("{kind} source already started")))
    }
}

// --- сигнальный канал ---

pub struct ChanReader(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl SignalReader for ChanReader {
    async fn next_text(&mut self) -> Option<Result<String, SignalingError>> {
        self.0.recv().await.map(Ok)
    }
}

/// Без `gate` пишет сразу; с ним каждое сообщение ждёт разрешения
pub struct ChanWriter {
    tx: mpsc::UnboundedSender<String>,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl SignalWriter for ChanWriter {
    async fn send_text(&mut self, text: String) -> Result<(), SignalingError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| SignalingError::Closed)?
                .forget();
        }
        self.tx.send(text).map_err(|_| SignalingError::Closed)
    }
}

/// Сторона браузера
pub struct TestClient {
    to_server: Option<mpsc::UnboundedSender<String>>,
    from_server: mpsc::UnboundedReceiver<String>,
}

pub fn signaling_pair() -> (TestClient, Box<dyn SignalReader>, Box<dyn SignalWriter>) {
    gated_signaling_pair(None)
}

/// Писатель отправляет по одному сообщению на каждое разрешение `gate`
pub fn gated_signaling_pair(
    gate: Option<Arc<Semaphore>>,
) -> (TestClient, Box<dyn SignalReader>, Box<dyn SignalWriter>) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let (outbound, from_server) = mpsc::unbounded_channel();
    (
        TestClient {
            to_server: Some(to_server),
            from_server,
        },
        Box::new(ChanReader(inbound)),
        Box::new(ChanWriter { tx: outbound, gate }),
    )
}

impl TestClient {
    pub fn send_raw(&self, text: &str) {
        self.to_server
            .as_ref()
            .expect("client already closed")
            .send(text.to_string())
            .expect("session is gone");
    }

    pub fn send(&self, kind: &str, data: &str) {
        self.send_raw(&serde_json::json!({ "type": kind, "data": data }).to_string());
    }

    pub async fn recv(&mut self) -> SignalingMessage {
        let text = tokio::time::timeout(TIMEOUT, self.from_server.recv())
            .await
            .expect("timed out waiting for a server message")
            .expect("server closed the channel");
        parse_message(&text).expect("server sent a malformed message")
    }

    /// Закрывает канал со стороны клиента
    pub fn close(&mut self) {
        self.to_server.take();
    }
}
