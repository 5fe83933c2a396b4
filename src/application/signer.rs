//! Signer bridge: gathers input private keys under a live password and
//! delegates the actual signing to the wallet. Keys exist in memory only
//! for the duration of one signing request.

use crate::domain::Session;
use crate::foundation::{MixerError, Result, SAFE_NS_MIXER, SAFE_NS_SEND};
use crate::infrastructure::crypto::decrypt_blob;
use crate::infrastructure::identity::Identity;
use crate::infrastructure::safe::{pocket_key, Safe};
use crate::infrastructure::wallet::{AddressKind, SigningKey, Wallet};
use bitcoin::bip32::Xpriv;
use bitcoin::Transaction;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SignerBridge {
    wallet: Arc<dyn Wallet>,
    safe: Arc<dyn Safe>,
}

impl SignerBridge {
    pub fn new(wallet: Arc<dyn Wallet>, safe: Arc<dyn Safe>) -> Self {
        Self { wallet, safe }
    }

    /// Sign this party's inputs of the session's joint transaction. The key
    /// source follows the role: a session with a task carries host keys on
    /// the task itself, a guest session derives pocket keys. Any failure is
    /// fatal to the session, never to the service.
    pub fn request_sign_inputs(&self, session: &Session, identity: &Identity) -> Result<Transaction> {
        let keys = match &session.task {
            Some(task) => self.host_keys(session, task.priv_keys.as_deref())?,
            None => self.guest_keys(session, identity)?,
        };
        debug!(session_id = %session.id, key_count = keys.len(), "delegating input signing to wallet");
        self.wallet.sign_my_inputs(&session.my_tx().input, &session.tx, &keys)
    }

    /// Host keys ride on the task as a JSON list of hex keys, encrypted
    /// under the password stored for this exact prepared transaction.
    fn host_keys(&self, session: &Session, priv_keys: Option<&str>) -> Result<Vec<SigningKey>> {
        let blob = priv_keys.ok_or_else(|| MixerError::SigningFailed("task carries no input keys".to_string()))?;
        let tx_hash = session.my_tx().compute_txid().to_string();
        let password = self
            .safe
            .get(SAFE_NS_SEND, &tx_hash)
            .ok_or_else(|| MixerError::PasswordUnavailable { namespace: SAFE_NS_SEND.to_string(), key: tx_hash.clone() })?;
        let plain = decrypt_blob(&password, blob)?;
        let hex_keys: Vec<String> = serde_json::from_slice(&plain)?;
        let mut keys = Vec::with_capacity(hex_keys.len());
        for hex_key in hex_keys {
            keys.push(SigningKey(hex::decode(hex_key.trim())?));
        }
        if keys.is_empty() {
            return Err(MixerError::SigningFailed("task key list is empty".to_string()));
        }
        Ok(keys)
    }

    /// Guest keys are derived per input from the pocket's master or change
    /// branch, after checking that every input really belongs to the pocket
    /// funding this session.
    fn guest_keys(&self, session: &Session, identity: &Identity) -> Result<Vec<SigningKey>> {
        let pocket_index = session
            .pocket
            .ok_or_else(|| MixerError::SigningFailed("guest session carries no pocket".to_string()))?;
        let pocket = identity
            .pocket(pocket_index)
            .ok_or_else(|| MixerError::SigningFailed(format!("pocket {} not found", pocket_index)))?;

        let key = pocket_key(pocket_index);
        let password = self
            .safe
            .get(SAFE_NS_MIXER, &key)
            .ok_or_else(|| MixerError::PasswordUnavailable { namespace: SAFE_NS_MIXER.to_string(), key })?;

        let master_blob = pocket
            .encrypted_master_key
            .as_deref()
            .ok_or_else(|| MixerError::SigningFailed(format!("pocket {} has no master key material", pocket_index)))?;
        let change_blob = pocket
            .encrypted_change_key
            .as_deref()
            .ok_or_else(|| MixerError::SigningFailed(format!("pocket {} has no change key material", pocket_index)))?;
        let master = parse_xprv(&decrypt_blob(&password, master_blob)?)?;
        let change = parse_xprv(&decrypt_blob(&password, change_blob)?)?;

        let mut keys = Vec::with_capacity(session.my_tx().input.len());
        for input in &session.my_tx().input {
            let outpoint = format!("{}:{}", input.previous_output.txid, input.previous_output.vout);
            let output = self.wallet.output(&outpoint).ok_or(MixerError::MissingOutput { outpoint: outpoint.clone() })?;
            let address = output
                .address
                .ok_or_else(|| MixerError::UnsupportedAddressType { address: outpoint.clone() })?;
            let info = self
                .wallet
                .wallet_address(&address)
                .ok_or_else(|| MixerError::SigningFailed(format!("address {} not in wallet", address)))?;
            if info.kind != AddressKind::KeyHash {
                return Err(MixerError::UnsupportedAddressType { address });
            }
            let branch = *info
                .index
                .first()
                .ok_or_else(|| MixerError::InvalidDerivationPath(format!("empty path for {}", address)))?;
            if branch / 2 != pocket_index {
                warn!(session_id = %session.id, address = %address, branch, pocket = pocket_index, "input outside session pocket");
                return Err(MixerError::PocketMismatch { expected: pocket_index, actual: branch / 2 });
            }
            let root = if branch % 2 == 1 { &change } else { &master };
            keys.push(self.wallet.derive_hd_private_key(&info.index[1..], root)?);
        }
        Ok(keys)
    }
}

fn parse_xprv(plain: &[u8]) -> Result<Xpriv> {
    let base58 = std::str::from_utf8(plain).map_err(|err| MixerError::ParseError(format!("key blob is not utf-8: {}", err)))?;
    Ok(Xpriv::from_str(base58.trim())?)
}
