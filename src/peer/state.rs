use std::fmt;

/// Состояние согласования одной сессии.
///
/// Переходы монотонны: `Idle → OfferSent → Negotiated → BridgesRunning`,
/// `Failed` достижимо из любого нетерминального состояния.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    Negotiated,
    BridgesRunning,
    Failed,
}

impl NegotiationState {
    fn rank(self) -> u8 {
        match self {
            NegotiationState::Idle => 0,
            NegotiationState::OfferSent => 1,
            NegotiationState::Negotiated => 2,
            NegotiationState::BridgesRunning => 3,
            NegotiationState::Failed => 4,
        }
    }

    pub fn can_transition_to(self, next: NegotiationState) -> bool {
        match (self, next) {
            (NegotiationState::Failed, _) => false,
            (_, NegotiationState::Failed) => true,
            _ => next.rank() == self.rank() + 1,
        }
    }

    /// Remote description уже применён
    pub fn is_negotiated(self) -> bool {
        matches!(
            self,
            NegotiationState::Negotiated | NegotiationState::BridgesRunning
        )
    }

    pub fn is_terminal(self) -> bool {
        self == NegotiationState::Failed
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::OfferSent => "offer-sent",
            NegotiationState::Negotiated => "negotiated",
            NegotiationState::BridgesRunning => "bridges-running",
            NegotiationState::Failed => "failed",
        };
        f.write_str(s)
    }
}
