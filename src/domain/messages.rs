use crate::foundation::SessionId;
use serde::{Deserialize, Serialize};

/// Wire bodies carried over the lobby channel. JSON with a `type` tag, the
/// tag doubling as the callback slot key.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum LobbyMessage {
    CoinJoinOpen {
        id: SessionId,
        amount: u64,
    },
    CoinJoin {
        id: SessionId,
        /// Consensus-hex transaction at the current protocol step.
        tx: String,
        /// Marks a guest's first candidate reply; buffered while announcing.
        #[serde(default)]
        initial: bool,
    },
    CoinJoinFinish {
        id: SessionId,
    },
}

impl LobbyMessage {
    pub fn session_id(&self) -> SessionId {
        match self {
            LobbyMessage::CoinJoinOpen { id, .. } | LobbyMessage::CoinJoin { id, .. } | LobbyMessage::CoinJoinFinish { id } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LobbyMessage::CoinJoinOpen { .. } => "CoinJoinOpen",
            LobbyMessage::CoinJoin { .. } => "CoinJoin",
            LobbyMessage::CoinJoinFinish { .. } => "CoinJoinFinish",
        }
    }
}

/// Channel participant identity as attached to every delivery.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct PeerInfo {
    pub pub_key: String,
    #[serde(default)]
    pub trusted: bool,
}

/// Inbound channel callback record.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Fingerprint of the sending participant; equal to our own on echoes.
    pub sender: String,
    pub peer: PeerInfo,
    pub message: LobbyMessage,
}
