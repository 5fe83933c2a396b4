use crate::domain::messages::PeerInfo;
use crate::domain::task::MixTask;
use crate::foundation::{MixerError, SessionId, RECEIVED_BUFFER_CAP};
use bitcoin::Transaction;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Guest,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Guest => write!(f, "guest"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Announce,
    Accepted,
    Paired,
    Sign,
    Finished,
    Cancelled,
}

impl SessionState {
    /// Position along the forward ordering. `Cancelled` sits outside it.
    fn rank(self) -> u8 {
        match self {
            SessionState::Announce => 0,
            SessionState::Accepted => 1,
            SessionState::Paired => 2,
            SessionState::Sign => 3,
            SessionState::Finished => 4,
            SessionState::Cancelled => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Announce => write!(f, "announce"),
            SessionState::Accepted => write!(f, "accepted"),
            SessionState::Paired => write!(f, "paired"),
            SessionState::Sign => write!(f, "sign"),
            SessionState::Finished => write!(f, "finished"),
            SessionState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Forward moves only (skipping ahead is allowed); `Cancelled` is reachable
/// from any non-terminal state; terminal states never move again.
pub fn advance_allowed(from: SessionState, to: SessionState) -> bool {
    if from == to {
        return true;
    }
    if from.is_terminal() {
        return false;
    }
    if to == SessionState::Cancelled {
        return true;
    }
    to.rank() > from.rank()
}

/// A candidate reply buffered while announcing.
#[derive(Clone, Debug)]
pub struct CandidateReply {
    pub tx_hex: String,
    pub peer: PeerInfo,
}

/// One CoinJoin in flight.
pub struct Session {
    pub id: SessionId,
    pub role: Role,
    state: SessionState,
    my_tx: Transaction,
    /// The evolving joint transaction; refined until `Finished`.
    pub tx: Transaction,
    pub my_amount: u64,
    pub fee: u64,
    pub peer: Option<PeerInfo>,
    /// Guest only: index of the pocket funding this join.
    pub pocket: Option<u32>,
    /// Initiator only: the persisted task driving this session.
    pub task: Option<MixTask>,
    received: Vec<CandidateReply>,
}

impl Session {
    pub fn initiator(id: SessionId, my_tx: Transaction, my_amount: u64, task: MixTask) -> Self {
        let fee = task.fee;
        Self {
            id,
            role: Role::Initiator,
            state: SessionState::Announce,
            tx: my_tx.clone(),
            my_tx,
            my_amount,
            fee,
            peer: None,
            pocket: None,
            task: Some(task),
            received: Vec::new(),
        }
    }

    pub fn guest(id: SessionId, my_tx: Transaction, my_amount: u64, fee: u64, peer: PeerInfo, pocket: u32) -> Self {
        Self {
            id,
            role: Role::Guest,
            state: SessionState::Accepted,
            tx: my_tx.clone(),
            my_tx,
            my_amount,
            fee,
            peer: Some(peer),
            pocket: Some(pocket),
            task: None,
            received: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The locally prepared transaction; immutable after construction.
    pub fn my_tx(&self) -> &Transaction {
        &self.my_tx
    }

    pub fn advance(&mut self, to: SessionState) -> Result<(), MixerError> {
        if !advance_allowed(self.state, to) {
            warn!(session_id = %self.id, from = %self.state, to = %to, "invalid session state transition");
            return Err(MixerError::InvalidStateTransition { from: self.state.to_string(), to: to.to_string() });
        }
        if self.state != to {
            debug!(session_id = %self.id, role = %self.role, from = %self.state, to = %to, "session state transition");
            self.state = to;
        }
        Ok(())
    }

    /// Local, final termination. No cancellation frame is sent; peers detect
    /// loss through their own ping timeout.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            debug!(session_id = %self.id, role = %self.role, from = %self.state, "session cancelled");
            self.state = SessionState::Cancelled;
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Buffer a candidate reply during announce. Returns false when the
    /// bounded buffer is full and the candidate was dropped.
    pub fn push_received(&mut self, candidate: CandidateReply) -> bool {
        if self.received.len() >= RECEIVED_BUFFER_CAP {
            warn!(session_id = %self.id, cap = RECEIVED_BUFFER_CAP, "candidate buffer full, dropping reply");
            return false;
        }
        self.received.push(candidate);
        true
    }

    /// Drain the candidate buffer; at most one of the drained entries is
    /// ever processed.
    pub fn take_received(&mut self) -> Vec<CandidateReply> {
        std::mem::take(&mut self.received)
    }

    pub fn received_len(&self) -> usize {
        self.received.len()
    }
}
