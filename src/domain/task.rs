use crate::foundation::{SessionId, DEFAULT_TASK_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted lifecycle of a mixing intent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Announce,
    Paired,
    Finish,
    Finished,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Announce => write!(f, "announce"),
            TaskState::Paired => write!(f, "paired"),
            TaskState::Finish => write!(f, "finish"),
            TaskState::Finished => write!(f, "finished"),
        }
    }
}

/// Persisted user intent to mix. Survives restarts; the in-memory session
/// it spawns does not.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MixTask {
    pub state: TaskState,
    /// Hex of the locally prepared transaction.
    pub tx: String,
    pub total: u64,
    #[serde(default)]
    pub change: Option<u64>,
    pub fee: u64,
    /// Overall mixing timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Epoch seconds of the first announce. Zero until first entry.
    #[serde(default)]
    pub start: u64,
    /// Epoch seconds of the last forward progress on a peer message.
    #[serde(default)]
    pub ping: u64,
    /// Encrypted JSON blob holding the host input keys.
    #[serde(default)]
    pub priv_keys: Option<String>,
    /// Session id once allocated.
    #[serde(default)]
    pub session: Option<SessionId>,
}

impl MixTask {
    pub fn new(tx: String, total: u64, change: Option<u64>, fee: u64) -> Self {
        Self { state: TaskState::Announce, tx, total, change, fee, timeout: None, start: 0, ping: 0, priv_keys: None, session: None }
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.unwrap_or(DEFAULT_TASK_TIMEOUT_SECS)
    }

    /// `ping` never moves backwards; stale updates are ignored.
    pub fn touch(&mut self, now_secs: u64) {
        if now_secs > self.ping {
            self.ping = now_secs;
        }
    }
}
