//! Infrastructure layer: collaborator seams and their adapters.

pub mod channel;
pub mod config;
pub mod crypto;
pub mod gui;
pub mod identity;
pub mod logging;
pub mod safe;
pub mod wallet;

pub use channel::{ChannelGateway, Lobby};
pub use config::MixerConfig;
pub use gui::{GuiBus, NoopGui};
pub use identity::{Identity, IdentityStore, MixingOptions, Pocket, PocketKeys, Settings};
pub use safe::{MemorySafe, Safe};
pub use wallet::{AddressKind, Recipient, SigningKey, Wallet, WalletAddress, WalletOutput};
