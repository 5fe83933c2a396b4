//! Wallet collaborator contract. The wallet owns coin selection, transaction
//! construction, signing and broadcast; the mixer only orchestrates.

use crate::domain::MixTask;
use crate::foundation::Result;
use async_trait::async_trait;
use bitcoin::bip32::{ChildNumber, Xpriv};
use bitcoin::{Transaction, TxIn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Raw private key bytes handed to the wallet for input signing. Zeroized
/// on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKey(pub Vec<u8>);

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey([REDACTED {} bytes])", self.0.len())
    }
}

/// Prior output record from the wallet's output index, keyed `"<txid>:<vout>"`.
#[derive(Clone, Debug)]
pub struct WalletOutput {
    pub address: Option<String>,
    pub value: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressKind {
    /// Default single-key address; the only kind the mixer can sign for.
    KeyHash,
    ScriptHash,
    Other,
}

/// Wallet metadata for one of our own addresses. `index` is the derivation
/// path below the account root; its leading component selects the branch
/// (even = main, odd = change) and `index[0] / 2` names the pocket.
#[derive(Clone, Debug)]
pub struct WalletAddress {
    pub index: Vec<u32>,
    pub kind: AddressKind,
}

#[derive(Clone, Debug)]
pub struct Recipient {
    pub address: String,
    pub amount: u64,
}

#[async_trait]
pub trait Wallet: Send + Sync {
    /// Build a candidate transaction spending from `pocket`.
    fn prepare(&self, pocket: u32, recipients: &[Recipient], change_address: &str, fee: u64) -> Result<Transaction>;

    /// Sign the subset of `tx` inputs listed in `inputs` with `priv_keys`
    /// and return the signed copy.
    fn sign_my_inputs(&self, inputs: &[TxIn], tx: &Transaction, priv_keys: &[SigningKey]) -> Result<Transaction>;

    async fn broadcast_tx(&self, tx: &Transaction, task: &MixTask) -> Result<()>;

    /// Transmit the task's original transaction without mixing.
    async fn send_fallback(&self, kind: &str, task: &MixTask) -> Result<()>;

    /// Look up a prior output by `"<txid>:<vout>"`.
    fn output(&self, outpoint: &str) -> Option<WalletOutput>;

    /// Confirmed HD balance of a pocket, in satoshis.
    fn confirmed_balance(&self, pocket: u32) -> u64;

    /// Metadata for one of our own addresses, `None` for foreign ones.
    fn wallet_address(&self, address: &str) -> Option<WalletAddress>;

    /// A change address on `pocket`, tagged with `label`.
    fn change_address(&self, pocket: u32, label: &str) -> Result<String>;

    /// A fresh receive address on `pocket`, tagged with `label`.
    fn free_address(&self, pocket: u32, label: &str) -> Result<String>;

    /// Derive the private key for `path_tail` below `root`.
    fn derive_hd_private_key(&self, path_tail: &[u32], root: &Xpriv) -> Result<SigningKey> {
        derive_priv_key(root, path_tail)
    }
}

/// Non-hardened derivation of `path_tail` below `root`; the shared default
/// for `Wallet::derive_hd_private_key`.
pub fn derive_priv_key(root: &Xpriv, path_tail: &[u32]) -> Result<SigningKey> {
    let secp = bitcoin::secp256k1::Secp256k1::new();
    let mut path = Vec::with_capacity(path_tail.len());
    for component in path_tail {
        path.push(ChildNumber::from_normal_idx(*component)?);
    }
    let key = root.derive_priv(&secp, &path)?;
    Ok(SigningKey(key.private_key.secret_bytes().to_vec()))
}
