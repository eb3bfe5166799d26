//! Per-request gateway state
//!
//! Tracks where a request is in its lifecycle:
//!
//! ```text
//! Received -> Classified -> Passthrough ----------> HandlerRunning -> Finalizing -> Done
//!                        \-> Adapting -----------/                              \-> Aborted
//! Received / Classified / Adapting -> Rejected
//! ```
//!
//! `Done` covers both RPC success and RPC failure; those differ only in the
//! trailer status. `Rejected` means the handler never ran.

use std::time::{Duration, Instant};

use ftlog::debug;

use crate::grpc::web::ProtocolVariant;

/// Lifecycle phases of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Received,
    Classified,
    Passthrough,
    Adapting,
    HandlerRunning,
    Finalizing,
    Done,
    Rejected,
    Aborted,
}

impl RequestPhase {
    /// Check whether `next` is a legal successor
    pub fn can_advance_to(self, next: RequestPhase) -> bool {
        use RequestPhase::*;
        matches!(
            (self, next),
            (Received, Classified)
                | (Received, Rejected)
                | (Classified, Passthrough)
                | (Classified, Adapting)
                | (Classified, Rejected)
                | (Passthrough, HandlerRunning)
                | (Adapting, HandlerRunning)
                | (Adapting, Rejected)
                | (HandlerRunning, Finalizing)
                | (HandlerRunning, Aborted)
                | (Finalizing, Done)
                | (Finalizing, Aborted)
        )
    }

    /// Whether the phase is terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Rejected | Self::Aborted)
    }
}

/// Gateway request state
#[derive(Debug, Clone)]
pub struct RequestState {
    /// Current phase
    pub phase: RequestPhase,
    /// Variant decided by the classifier
    pub variant: Option<ProtocolVariant>,
    /// Request start time
    pub created_at: Instant,
}

impl RequestState {
    pub fn new() -> Self {
        Self {
            phase: RequestPhase::Received,
            variant: None,
            created_at: Instant::now(),
        }
    }

    /// Move to `next`; illegal transitions are ignored and reported
    pub fn advance(&mut self, next: RequestPhase) -> bool {
        if !self.phase.can_advance_to(next) {
            debug!("[grpc-web] ignored transition {:?} -> {:?}", self.phase, next);
            return false;
        }
        self.phase = next;
        true
    }

    /// Record the classification result and pick the next phase
    pub fn on_classified(&mut self, variant: ProtocolVariant) {
        self.variant = Some(variant);
        self.advance(RequestPhase::Classified);
        if variant.is_web() {
            self.advance(RequestPhase::Adapting);
        } else {
            self.advance(RequestPhase::Passthrough);
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Time since the request was received
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl Default for RequestState {
    fn default() -> Self {
        Self::new()
    }
}
