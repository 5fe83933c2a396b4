//! Matchmaking primitives: guest-side opening evaluation and the delayed
//! uniform choice among buffered initiator candidates.

use crate::domain::protocol::{encode_tx_hex, version_fixed_clone};
use crate::domain::{CandidateReply, LobbyMessage, PeerInfo, Session};
use crate::foundation::{Result, SessionId};
use crate::infrastructure::identity::Identity;
use crate::infrastructure::wallet::{Recipient, Wallet};
use rand::Rng;
use tracing::{debug, info};

/// Address label both guest-side derivations carry.
const MIXING_LABEL: &str = "mixing";

/// Uniform pick from the buffered candidates; the rest are dropped.
pub fn choose_candidate<R: Rng>(rng: &mut R, mut candidates: Vec<CandidateReply>) -> Option<CandidateReply> {
    if candidates.is_empty() {
        return None;
    }
    let index = rng.gen_range(0..candidates.len());
    Some(candidates.swap_remove(index))
}

/// First pocket, in index order, that is mixing and holds enough confirmed
/// balance. Deterministic on pocket index.
pub fn find_mixing_pocket(identity: &Identity, wallet: &dyn Wallet, need: u64) -> Option<u32> {
    let mut indexes: Vec<u32> = identity.pockets.iter().map(|pocket| pocket.index).collect();
    indexes.sort_unstable();
    for index in indexes {
        let pocket = identity.pocket(index)?;
        if !pocket.mixing {
            continue;
        }
        let confirmed = wallet.confirmed_balance(index);
        if confirmed >= need {
            debug!(pocket = index, confirmed, need, "pocket can fund the join");
            return Some(index);
        }
    }
    None
}

/// A guest session ready to install, plus the candidate reply to unicast.
pub struct OpeningAnswer {
    pub session: Session,
    pub reply: LobbyMessage,
}

/// Evaluate an inbound opening and, if a pocket can fund it, build the
/// candidate transaction and guest session. The caller has already filtered
/// echoes, untrusted peers and known ids.
pub fn answer_opening(
    identity: &Identity,
    wallet: &dyn Wallet,
    id: SessionId,
    amount: u64,
    fee: u64,
    peer: PeerInfo,
) -> Result<Option<OpeningAnswer>> {
    let need = amount.saturating_add(fee);
    let Some(pocket) = find_mixing_pocket(identity, wallet, need) else {
        debug!(session_id = %id, amount, need, "no mixing pocket can fund the opening");
        return Ok(None);
    };

    let change = wallet.change_address(pocket, MIXING_LABEL)?;
    let destination = wallet.free_address(pocket, MIXING_LABEL)?;
    let prepared = wallet.prepare(pocket, &[Recipient { address: destination, amount }], &change, fee)?;
    let my_tx = version_fixed_clone(&prepared);
    let reply = LobbyMessage::CoinJoin { id, tx: encode_tx_hex(&my_tx), initial: true };
    let session = Session::guest(id, my_tx, amount, fee, peer, pocket);
    info!(session_id = %id, pocket, amount, fee, "answering opening as guest");
    Ok(Some(OpeningAnswer { session, reply }))
}
