//! Two-party CoinJoin transaction protocol.
//!
//! `Session::process`-style advancement lives here: given a peer message and
//! the session's role and state, validate the transaction, refine the joint
//! transaction and move the state machine. The coordinator only observes the
//! resulting state and forwards whatever transaction is returned.

use crate::domain::messages::PeerInfo;
use crate::domain::session::{Role, Session, SessionState};
use crate::foundation::{MixerError, Result, JOIN_TX_VERSION};
use bitcoin::consensus::encode;
use bitcoin::transaction::Version;
use bitcoin::{OutPoint, ScriptBuf, Transaction, TxIn, Witness};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use tracing::{debug, trace};

pub fn decode_tx_hex(tx_hex: &str) -> Result<Transaction> {
    let bytes = hex::decode(tx_hex.trim())?;
    Ok(encode::deserialize::<Transaction>(&bytes)?)
}

pub fn encode_tx_hex(tx: &Transaction) -> String {
    encode::serialize_hex(tx)
}

/// Clone with the version normalized; wallets prepare transactions with
/// whatever version their builder emits, the join always runs on one.
pub fn version_fixed_clone(tx: &Transaction) -> Transaction {
    let mut fixed = tx.clone();
    fixed.version = Version(JOIN_TX_VERSION);
    fixed
}

pub fn input_signed(input: &TxIn) -> bool {
    !input.script_sig.is_empty() || !input.witness.is_empty()
}

pub fn fully_signed(tx: &Transaction) -> bool {
    !tx.input.is_empty() && tx.input.iter().all(input_signed)
}

/// Clone with all signature material cleared. Two transactions describe the
/// same join when their stripped encodings are identical.
pub fn strip_signatures(tx: &Transaction) -> Transaction {
    let mut stripped = tx.clone();
    for input in &mut stripped.input {
        input.script_sig = ScriptBuf::new();
        input.witness = Witness::default();
    }
    stripped
}

fn same_shape(a: &Transaction, b: &Transaction) -> bool {
    encode::serialize(&strip_signatures(a)) == encode::serialize(&strip_signatures(b))
}

fn outpoints(tx: &Transaction) -> HashSet<OutPoint> {
    tx.input.iter().map(|input| input.previous_output).collect()
}

/// The outcome of advancing a session on a peer message. `updated_tx` is
/// the transaction the coordinator forwards to the peer, when any.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub updated_tx: Option<Transaction>,
}

impl ProcessOutcome {
    fn forward(tx: Transaction) -> Self {
        Self { updated_tx: Some(tx) }
    }

    fn silent() -> Self {
        Self { updated_tx: None }
    }
}

/// The CoinJoin primitive the coordinator drives. A session is advanced
/// exclusively through this seam; the coordinator reacts to the state it
/// observes afterwards.
pub trait JoinProtocol: Send + Sync {
    /// Advance `session` on a peer `CoinJoin` transaction. Validation
    /// failures leave the session untouched so the caller can drop the
    /// message as peer misbehavior.
    fn process(&self, session: &mut Session, tx_hex: &str, peer: &PeerInfo) -> Result<ProcessOutcome>;

    /// Merge a locally signed copy into `session.tx`. Moves the session to
    /// `Finished` when every input carries a signature. Returns the refined
    /// transaction for transmission to the peer.
    fn apply_signatures(&self, session: &mut Session, signed: Transaction) -> Result<Transaction>;
}

/// Production two-party protocol over Bitcoin transactions.
pub struct TwoPartyJoin;

impl TwoPartyJoin {
    /// Combine two prepared transactions into one unsigned joint
    /// transaction with CSPRNG-shuffled input and output order.
    pub fn merge(mine: &Transaction, theirs: &Transaction) -> Result<Transaction> {
        if theirs.input.is_empty() || theirs.output.is_empty() {
            return Err(MixerError::ProtocolViolation("peer transaction has no inputs or outputs".to_string()));
        }
        let ours = outpoints(mine);
        if theirs.input.iter().any(|input| ours.contains(&input.previous_output)) {
            return Err(MixerError::ProtocolViolation("peer transaction spends our own inputs".to_string()));
        }

        let mut rng = rand::thread_rng();
        let stripped_mine = strip_signatures(mine);
        let stripped_theirs = strip_signatures(theirs);
        let mut inputs: Vec<TxIn> = stripped_mine.input.into_iter().chain(stripped_theirs.input).collect();
        let mut outputs = stripped_mine.output.into_iter().chain(stripped_theirs.output).collect::<Vec<_>>();
        inputs.shuffle(&mut rng);
        outputs.shuffle(&mut rng);

        Ok(Transaction {
            version: Version(JOIN_TX_VERSION),
            lock_time: mine.lock_time,
            input: inputs,
            output: outputs,
        })
    }

    /// Guest-side check that a proposed joint transaction still contains
    /// everything we put in, untouched, plus a contribution from the peer.
    pub fn validate_joint(mine: &Transaction, joint: &Transaction) -> Result<()> {
        if joint.input.iter().any(input_signed) {
            return Err(MixerError::ProtocolViolation("joint transaction arrived pre-signed".to_string()));
        }
        let joint_outpoints = outpoints(joint);
        if joint_outpoints.len() != joint.input.len() {
            return Err(MixerError::ProtocolViolation("joint transaction repeats an outpoint".to_string()));
        }
        for input in &mine.input {
            if !joint_outpoints.contains(&input.previous_output) {
                return Err(MixerError::ProtocolViolation(format!("joint transaction dropped our input {}", input.previous_output)));
            }
        }
        for output in &mine.output {
            let ours = mine.output.iter().filter(|o| *o == output).count();
            let present = joint.output.iter().filter(|o| *o == output).count();
            if present < ours {
                return Err(MixerError::ProtocolViolation("joint transaction dropped or altered one of our outputs".to_string()));
            }
        }
        if joint.input.len() <= mine.input.len() || joint.output.len() <= mine.output.len() {
            return Err(MixerError::ProtocolViolation("joint transaction carries no peer contribution".to_string()));
        }
        Ok(())
    }

    /// Initiator-side check of the guest-signed joint transaction: same
    /// join, every peer input signed, our inputs still untouched.
    fn verify_peer_signed(mine: &Transaction, current: &Transaction, incoming: &Transaction) -> Result<()> {
        if !same_shape(current, incoming) {
            return Err(MixerError::ProtocolViolation("signed transaction does not match the agreed join".to_string()));
        }
        let ours = outpoints(mine);
        for input in &incoming.input {
            let is_ours = ours.contains(&input.previous_output);
            if is_ours && input_signed(input) {
                return Err(MixerError::ProtocolViolation(format!("peer signed our input {}", input.previous_output)));
            }
            if !is_ours && !input_signed(input) {
                return Err(MixerError::ProtocolViolation(format!("peer left its input {} unsigned", input.previous_output)));
            }
        }
        Ok(())
    }

    /// Check that previously collected signatures survive in `incoming`.
    fn verify_signatures_preserved(current: &Transaction, incoming: &Transaction) -> Result<()> {
        for (ours, theirs) in current.input.iter().zip(&incoming.input) {
            if input_signed(ours) && (ours.script_sig != theirs.script_sig || ours.witness != theirs.witness) {
                return Err(MixerError::ProtocolViolation(format!("signature on input {} was altered", ours.previous_output)));
            }
        }
        Ok(())
    }
}

impl JoinProtocol for TwoPartyJoin {
    fn process(&self, session: &mut Session, tx_hex: &str, peer: &PeerInfo) -> Result<ProcessOutcome> {
        let incoming = decode_tx_hex(tx_hex)?;
        trace!(
            session_id = %session.id,
            role = %session.role,
            state = %session.state(),
            inputs = incoming.input.len(),
            outputs = incoming.output.len(),
            "processing peer transaction"
        );

        match (session.role, session.state()) {
            // First candidate chosen by the matchmaker: build the joint tx.
            (Role::Initiator, SessionState::Announce) => {
                let joint = Self::merge(session.my_tx(), &incoming)?;
                session.tx = joint.clone();
                session.peer = Some(peer.clone());
                session.advance(SessionState::Paired)?;
                debug!(session_id = %session.id, inputs = joint.input.len(), outputs = joint.output.len(), "joint transaction built");
                Ok(ProcessOutcome::forward(joint))
            }

            // The initiator's joint proposal: adopt it and move to signing.
            (Role::Guest, SessionState::Accepted) => {
                Self::validate_joint(session.my_tx(), &incoming)?;
                session.tx = incoming;
                session.advance(SessionState::Sign)?;
                Ok(ProcessOutcome::silent())
            }

            // The guest returned the joint transaction with its inputs
            // signed: our turn to sign.
            (Role::Initiator, SessionState::Paired) => {
                Self::verify_peer_signed(session.my_tx(), &session.tx, &incoming)?;
                session.tx = incoming;
                session.advance(SessionState::Sign)?;
                Ok(ProcessOutcome::silent())
            }

            // The counterparty completed the transaction.
            (Role::Guest, SessionState::Sign) => {
                if !same_shape(&session.tx, &incoming) {
                    return Err(MixerError::ProtocolViolation("final transaction does not match the agreed join".to_string()));
                }
                Self::verify_signatures_preserved(&session.tx, &incoming)?;
                if !fully_signed(&incoming) {
                    return Err(MixerError::ProtocolViolation("final transaction is not fully signed".to_string()));
                }
                session.tx = incoming;
                session.advance(SessionState::Finished)?;
                Ok(ProcessOutcome::silent())
            }

            (role, state) => {
                Err(MixerError::ProtocolViolation(format!("unexpected CoinJoin transaction for {role} session in state {state}")))
            }
        }
    }

    fn apply_signatures(&self, session: &mut Session, signed: Transaction) -> Result<Transaction> {
        if !same_shape(&session.tx, &signed) {
            return Err(MixerError::SigningFailed("signer returned a different transaction".to_string()));
        }
        Self::verify_signatures_preserved(&session.tx, &signed)?;
        let before = session.tx.input.iter().filter(|input| input_signed(input)).count();
        let after = signed.input.iter().filter(|input| input_signed(input)).count();
        if after <= before {
            return Err(MixerError::SigningFailed("no signatures were added".to_string()));
        }
        session.tx = signed;
        if fully_signed(&session.tx) {
            session.advance(SessionState::Finished)?;
        }
        debug!(session_id = %session.id, signed_inputs = after, total_inputs = session.tx.input.len(), "signatures applied");
        Ok(session.tx.clone())
    }
}
