// Media Bridge: перекачивает буферы одного источника в один исходящий трек.

use crate::media::source::{SampleSource, SourceEvent};
use crate::peer::types::MediaKind;
use crate::peer::SampleSink;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Streaming,
    /// Источник закончился или сессия остановила мост
    Stopped,
    /// Отказ источника или трека; трек больше не используется
    Errored,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeState::Idle => "idle",
            BridgeState::Streaming => "streaming",
            BridgeState::Stopped => "stopped",
            BridgeState::Errored => "errored",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeReport {
    pub kind: MediaKind,
    pub state: BridgeState,
    pub forwarded: u64,
}

pub struct MediaBridge {
    kind: MediaKind,
    sink: Arc<dyn SampleSink>,
    source: Box<dyn SampleSource>,
    state: BridgeState,
    forwarded: u64,
}

impl MediaBridge {
    pub fn new(kind: MediaKind, sink: Arc<dyn SampleSink>, source: Box<dyn SampleSource>) -> Self {
        Self {
            kind,
            sink,
            source,
            state: BridgeState::Idle,
            forwarded: 0,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Запускает мост в отдельной задаче
    pub fn start(self, shutdown: watch::Receiver<bool>) -> BridgeHandle {
        let kind = self.kind;
        let span = tracing::info_span!("bridge", %kind);
        let task = tokio::spawn(self.run(shutdown).instrument(span));
        BridgeHandle { kind, task }
    }

    /// Качает буферы, пока источник не закончится, не сломается трек
    /// или не придёт сигнал остановки.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> BridgeReport {
        self.state = BridgeState::Streaming;
        info!("media bridge streaming");

        while self.state == BridgeState::Streaming {
            let event = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => {
                    debug!("shutdown requested");
                    self.state = BridgeState::Stopped;
                    break;
                }
                event = self.source.next_event() => event,
            };
            self.handle(event).await;
        }

        info!(state = %self.state, forwarded = self.forwarded, "media bridge finished");
        BridgeReport {
            kind: self.kind,
            state: self.state,
            forwarded: self.forwarded,
        }
    }

    async fn handle(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Buffer(buffer) if buffer.data.is_empty() => {
                error!("source produced an empty buffer");
                self.state = BridgeState::Errored;
            }
            SourceEvent::Buffer(buffer) => match self.sink.write_sample(&buffer).await {
                Ok(()) => self.forwarded += 1,
                Err(e) => {
                    // повторно не пишем: трек считается непригодным
                    error!(error = %e, "write sample failed, halting track");
                    self.state = BridgeState::Errored;
                }
            },
            SourceEvent::Missing => {
                error!("source sample carried no buffer");
                self.state = BridgeState::Errored;
            }
            SourceEvent::EndOfStream => {
                debug!("end of stream");
                self.state = BridgeState::Stopped;
            }
            SourceEvent::Error(e) => {
                warn!(error = %e, "source error");
                self.state = BridgeState::Errored;
            }
        }
    }
}

pub struct BridgeHandle {
    kind: MediaKind,
    task: JoinHandle<BridgeReport>,
}

impl BridgeHandle {
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub async fn join(self) -> BridgeReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                error!(kind = %self.kind, error = %e, "media bridge task panicked");
                BridgeReport {
                    kind: self.kind,
                    state: BridgeState::Errored,
                    forwarded: 0,
                }
            }
        }
    }
}
