// Sample Source: внешний производитель закодированных буферов.
//
// Источник не вызывает колбэки, а отдаёт события по запросу моста
// (`next_event`). Между конвейером и мостом стоит ограниченная очередь,
// поэтому мост тянет буферы не быстрее, чем успевает их отправить.

use crate::error::BridgeError;
use crate::peer::types::MediaKind;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;

/// Закодированный буфер с длительностью воспроизведения
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBuffer {
    pub data: Bytes,
    pub duration: Duration,
}

impl EncodedBuffer {
    pub fn new(data: impl Into<Bytes>, duration: Duration) -> Self {
        Self {
            data: data.into(),
            duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Buffer(EncodedBuffer),
    /// Семпл пришёл, но данных в нём нет
    Missing,
    EndOfStream,
    Error(String),
}

#[async_trait]
pub trait SampleSource: Send {
    /// Ждёт следующее событие источника. Должно быть безопасно к отмене.
    async fn next_event(&mut self) -> SourceEvent;
}

/// Запускает источник для трека; вызывается только после согласования
pub trait SourceFactory: Send + Sync {
    fn start(&self, kind: MediaKind) -> Result<Box<dyn SampleSource>, BridgeError>;
}

/// Источник, питаемый через ограниченный канал
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<SourceEvent>,
}

/// Пишущая сторона `ChannelSource`. Когда все копии закрыты, источник
/// отдаёт `EndOfStream`.
#[derive(Debug, Clone)]
pub struct SourceFeeder {
    tx: mpsc::Sender<SourceEvent>,
}

pub fn channel_source(capacity: usize) -> (SourceFeeder, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (SourceFeeder { tx }, ChannelSource { rx })
}

impl SourceFeeder {
    /// false, если мост уже остановился
    pub async fn push(&self, event: SourceEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Для потоков конвейера вне tokio runtime
    pub fn blocking_push(&self, event: SourceEvent) -> bool {
        self.tx.blocking_send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl SampleSource for ChannelSource {
    async fn next_event(&mut self) -> SourceEvent {
        self.rx.recv().await.unwrap_or(SourceEvent::EndOfStream)
    }
}
