//! Guest-side budget accounting. Applied exactly once per finished session;
//! one overshoot terminates mixing on the pocket.

use crate::foundation::Result;
use crate::infrastructure::identity::{Identity, IdentityStore};
use tracing::{info, warn};

/// Charge `fee` against the pocket's mixing budget. When the budget is
/// reached the pocket is demoted: in-memory keys cleared, `mixing` off
/// until the user reopens the security context. The identity is persisted
/// on every update.
pub fn track_budget(identity: &mut Identity, store: &dyn IdentityStore, pocket_index: u32, fee: u64) -> Result<()> {
    let Some(pocket) = identity.pocket_mut(pocket_index) else {
        warn!(pocket = pocket_index, "budget update for unknown pocket");
        return Ok(());
    };
    pocket.mixing_options.spent = pocket.mixing_options.spent.saturating_add(fee);
    let spent = pocket.mixing_options.spent;
    let budget = pocket.mixing_options.budget;
    info!(pocket = pocket_index, fee, spent, budget, "mixing budget charged");
    if spent >= budget {
        pocket.demote();
        info!(pocket = pocket_index, spent, budget, "mixing budget exhausted, pocket demoted");
    }
    store.save(identity)
}
