//! Application layer: the coordinator service and its moving parts.

pub mod budget;
pub mod coordinator;
pub mod matchmaker;
pub mod retry;
pub mod runtime;
pub mod signer;

pub use coordinator::Coordinator;
pub use retry::RetryScheduler;
pub use runtime::{event_channel, run_mixer_loop, MixerEvent, TransportEvent};
pub use signer::SignerBridge;
