// SPDX-License-Identifier: AGPL-3.0-only

use crate::{PorError, RelayEvent, RelayModule};
use por_state::StateBackend;
use por_types::{ClaimState, Height};
use tracing::{debug, info};

/// Zählwerte eines End-of-Block-Durchlaufs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub expired: usize,
    pub pruned_claims: usize,
    pub pruned_markers: usize,
}

impl<B: StateBackend> RelayModule<B> {
    /// End-of-Block: Pending-Claims mit `height >= expires_at` laufen ab (aufsteigend nach
    /// kodiertem ClaimKey). Danach werden Claims, Root-Index und Replay-Marker ab ihrem
    /// festgeschriebenen `prune_at` entfernt; die Pruning-Grenze steigt auf die höchste
    /// bereinigte Session. Idempotent.
    pub fn end_block(&mut self, height: Height) -> Result<SweepStats, PorError> {
        let mut stats = SweepStats::default();
        let mut pruned_start: Option<Height> = None;

        for mut claim in self.state.claims()? {
            if claim.state == ClaimState::Pending && height >= claim.expires_at {
                claim.state = ClaimState::Expired;
                self.state.put_claim(&claim)?;
                stats.expired += 1;
                info!(
                    submitter = %claim.submitter,
                    chain = %claim.session_header.chain_id,
                    start = claim.session_header.session_start_height,
                    height,
                    "claim expired"
                );
                self.events.push(RelayEvent::ClaimExpired { claim: claim.key() });
            }
            if claim.state.is_terminal() && height >= claim.prune_at {
                let key = claim.key();
                if self.state.root_owner(&claim.merkle_root)?.as_ref() == Some(&key) {
                    let _ = self.state.del_root_owner(&claim.merkle_root)?;
                }
                let _ = self.state.del_claim(&key)?;
                stats.pruned_claims += 1;
                pruned_start = pruned_start.max(Some(claim.session_header.session_start_height));
            }
        }

        for (hash, marker) in self.state.markers()? {
            if height >= marker.prune_at {
                let _ = self.state.del_marker(&hash)?;
                stats.pruned_markers += 1;
                pruned_start = pruned_start.max(Some(marker.session_start_height));
            }
        }

        if let Some(start) = pruned_start {
            self.state.raise_prune_floor(start)?;
        }

        if stats.pruned_claims + stats.pruned_markers > 0 {
            debug!(
                height,
                claims = stats.pruned_claims,
                markers = stats.pruned_markers,
                "pruned finished sessions"
            );
        }
        Ok(stats)
    }
}
