//! Identity model: settings, HD pockets and persisted tasks, plus the
//! persistence seam. The identity store itself lives outside this crate.

use crate::domain::MixTask;
use crate::foundation::Result;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct MixingOptions {
    pub budget: u64,
    pub spent: u64,
}

/// Decrypted pocket key material held in memory only while the pocket's
/// security context is live.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PocketKeys {
    /// Base58 xprv of the pocket's main branch.
    pub master: String,
    /// Base58 xprv of the pocket's change branch.
    pub change: String,
}

impl std::fmt::Debug for PocketKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PocketKeys([REDACTED])")
    }
}

/// A numbered HD subdivision of the wallet.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Pocket {
    pub index: u32,
    pub mixing: bool,
    #[serde(default)]
    pub mixing_options: MixingOptions,
    /// Password-encrypted base58 master key blob, when the pocket can sign.
    #[serde(default)]
    pub encrypted_master_key: Option<String>,
    /// Password-encrypted base58 change-branch key blob.
    #[serde(default)]
    pub encrypted_change_key: Option<String>,
    /// In-memory decrypted copies; cleared on demotion, never persisted.
    #[serde(skip)]
    pub cached_keys: Option<PocketKeys>,
}

impl Pocket {
    pub fn has_key_material(&self) -> bool {
        self.encrypted_master_key.is_some() || self.encrypted_change_key.is_some()
    }

    /// Demote the pocket: drop in-memory keys and stop mixing. The
    /// encrypted blobs stay for when the user reopens the security context.
    pub fn demote(&mut self) {
        self.cached_keys = None;
        self.mixing = false;
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Disables the timeout fallback: mixing retries indefinitely.
    #[serde(default)]
    pub hard_mixing: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Identity {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub pockets: Vec<Pocket>,
    /// Persisted mixer tasks, in announce order.
    #[serde(default)]
    pub tasks: Vec<MixTask>,
}

impl Identity {
    pub fn pocket(&self, index: u32) -> Option<&Pocket> {
        self.pockets.iter().find(|pocket| pocket.index == index)
    }

    pub fn pocket_mut(&mut self, index: u32) -> Option<&mut Pocket> {
        self.pockets.iter_mut().find(|pocket| pocket.index == index)
    }

    pub fn any_pocket_mixing(&self) -> bool {
        self.pockets.iter().any(|pocket| pocket.mixing)
    }
}

/// Persistence seam; the store is saved on every budget or task update.
pub trait IdentityStore: Send + Sync {
    fn save(&self, identity: &Identity) -> Result<()>;
}

/// Store that persists nothing; useful for tests and ephemeral identities.
pub struct NoopStore;

impl IdentityStore for NoopStore {
    fn save(&self, _identity: &Identity) -> Result<()> {
        Ok(())
    }
}
