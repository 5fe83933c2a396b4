//! Domain layer: protocol state independent of any transport or wallet.

pub mod messages;
pub mod protocol;
pub mod session;
pub mod task;

pub use messages::{Delivery, LobbyMessage, PeerInfo};
pub use protocol::{JoinProtocol, ProcessOutcome, TwoPartyJoin};
pub use session::{CandidateReply, Role, Session, SessionState};
pub use task::{MixTask, TaskState};
