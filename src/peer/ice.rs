use crate::peer::types::IceCandidate;
use crate::peer::SessionTransport;
use tracing::{debug, warn};

/// Кандидаты, полученные до установки remote description
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: Vec<IceCandidate>,
}

impl PendingCandidates {
    pub fn push(&mut self, candidate: IceCandidate) {
        self.queue.push(candidate);
        debug!(pending = self.queue.len(), "queued remote candidate");
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Применяет все отложенные кандидаты после установки remote description.
    /// Возвращает число успешно применённых.
    pub async fn apply(&mut self, transport: &dyn SessionTransport) -> usize {
        let mut applied = 0;
        for candidate in self.queue.drain(..) {
            debug!(candidate = %candidate.candidate, "applying pending candidate");
            match transport.add_ice_candidate(&candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!(candidate = %candidate.candidate, error = %e, "failed to apply pending candidate"),
            }
        }
        applied
    }
}

/// Счётчик локальных кандидатов по типам
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
    pub other: usize,
}

impl CandidateSummary {
    pub fn record(&mut self, candidate: &IceCandidate) {
        let line = &candidate.candidate;
        if line.contains("typ host") {
            self.host += 1;
        } else if line.contains("typ srflx") {
            self.srflx += 1;
        } else if line.contains("typ relay") {
            self.relay += 1;
        } else {
            self.other += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.host + self.srflx + self.relay + self.other
    }

    pub fn log(&self) {
        debug!(
            host = self.host,
            srflx = self.srflx,
            relay = self.relay,
            "local candidate analysis"
        );
        if self.relay == 0 && self.srflx == 0 {
            warn!("no server-reflexive or relay candidates gathered, peers behind NAT may fail to connect");
        }
    }
}
