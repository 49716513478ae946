// Signaling Message Router: разбор входящих сообщений и единственный
// писатель исходящих для одного соединения.

use crate::error::SignalingError;
use crate::peer::types::{MessageKind, SignalingMessage};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Размер очереди исходящих сообщений
pub const OUTBOUND_QUEUE: usize = 128;

/// Сколько ждём отправки хвоста очереди при закрытии сессии
pub const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Читающая сторона сигнального канала
#[async_trait]
pub trait SignalReader: Send {
    /// `None`, когда канал закрыт. Должно быть безопасно к отмене.
    async fn next_text(&mut self) -> Option<Result<String, SignalingError>>;
}

/// Пишущая сторона сигнального канала
#[async_trait]
pub trait SignalWriter: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SignalingError>;

    async fn close(&mut self) {}
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    data: String,
}

pub fn parse_message(text: &str) -> Result<SignalingMessage, SignalingError> {
    let raw: RawMessage = serde_json::from_str(text)?;
    let kind: MessageKind = raw.kind.parse()?;
    Ok(SignalingMessage {
        kind,
        data: raw.data,
    })
}

pub fn encode_message(message: &SignalingMessage) -> Result<String, SignalingError> {
    Ok(serde_json::to_string(message)?)
}

/// Очередь исходящих сообщений сессии
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<SignalingMessage>,
}

impl Outbound {
    /// Ошибка означает, что писатель уже завершился (канал закрыт)
    pub async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| SignalingError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Задача-писатель: владеет пишущей стороной канала и отправляет
/// сообщения строго в порядке постановки в очередь.
pub struct WriterTask {
    handle: JoinHandle<()>,
}

impl WriterTask {
    /// Дожидается отправки очереди после того, как все `Outbound` закрыты
    pub async fn finish(mut self) {
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut self.handle)
            .await
            .is_err()
        {
            warn!("signaling writer did not drain in time, abandoning it");
            self.handle.abort();
        }
    }
}

pub fn spawn_writer(mut writer: Box<dyn SignalWriter>) -> (Outbound, WriterTask) {
    let (tx, mut rx) = mpsc::channel::<SignalingMessage>(OUTBOUND_QUEUE);

    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match encode_message(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "failed to encode signaling message");
                    continue;
                }
            };
            debug!(kind = %message.kind, "sending signaling message");
            if let Err(e) = writer.send_text(text).await {
                error!(error = %e, "failed to send signaling message");
                return;
            }
        }
        writer.close().await;
    });

    (Outbound { tx }, WriterTask { handle })
}
