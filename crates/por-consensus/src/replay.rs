// SPDX-License-Identifier: AGPL-3.0-only

//! Anti-Replay: ein Receipt-Hash darf über alle Claims hinweg nur einmal belohnt werden.

use crate::{BlockEnv, PorError, RelayEvent, RelayModule};
use por_crypto::Hash32;
use por_state::StateBackend;
use por_types::{Address, Amount, Claim, Height, ReplayMarker};
use std::collections::BTreeSet;
use tracing::warn;

impl<B: StateBackend> RelayModule<B> {
    /// Erster wiederverwendeter Hash (von einem anderen Claim markiert oder doppelt innerhalb
    /// der Liste). Marker des eigenen Claims stammen aus einem abgebrochenen Finalize.
    pub(crate) fn find_replay(&self, hashes: &[Hash32], own: &Hash32) -> Result<Option<Hash32>, PorError> {
        let mut seen: BTreeSet<&Hash32> = BTreeSet::new();
        for h in hashes {
            if !seen.insert(h) {
                return Ok(Some(*h));
            }
            if self.state.get_marker(h)?.is_some_and(|m| m.claim != *own) {
                return Ok(Some(*h));
            }
        }
        Ok(None)
    }

    /// Genau eine Strafverbrennung pro abgelehntem Proof, gedeckelt auf den Rest-Stake
    pub(crate) fn burn_for_replay(&mut self, offender: &Address, env: &mut BlockEnv<'_>) -> Amount {
        let requested = self.registry.params().replay_burn_amount();
        let available = env.staking.stake_of(offender);
        let amount = if requested > available {
            let e = PorError::InsufficientStake { requested, available };
            warn!(offender = %offender, error = %e, "replay burn capped");
            available
        } else {
            requested
        };
        let burned = env.staking.burn_stake(offender, amount);
        warn!(offender = %offender, requested, burned, height = env.height, "replay burn");
        self.events.push(RelayEvent::Burn {
            address: *offender,
            requested,
            burned,
        });
        burned
    }

    pub(crate) fn record_markers(
        &mut self,
        hashes: &[Hash32],
        claim: &Claim,
        height: Height,
    ) -> Result<(), PorError> {
        let marker = ReplayMarker {
            claim: claim.key().digest(),
            session_start_height: claim.session_header.session_start_height,
            recorded_at: height,
            prune_at: claim.prune_at,
        };
        for h in hashes {
            self.state.put_marker(h, &marker)?;
        }
        Ok(())
    }
}
