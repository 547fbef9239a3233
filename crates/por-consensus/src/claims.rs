// SPDX-License-Identifier: AGPL-3.0-only

use crate::{BlockEnv, PorError, RelayModule};
use por_state::StateBackend;
use por_types::{validate_claim_sanity, Claim, ClaimMsg, ClaimState};
use tracing::{info, warn};

impl<B: StateBackend> RelayModule<B> {
    /// Nimmt einen Claim an oder lehnt ihn ab. Zustand wird nur bei Erfolg geschrieben.
    pub fn deliver_claim(&mut self, msg: &ClaimMsg, env: &mut BlockEnv<'_>) -> Result<Claim, PorError> {
        match self.check_claim(msg, env) {
            Ok(claim) => {
                self.state.put_claim(&claim)?;
                self.state.put_root_owner(&claim.merkle_root, &claim.key())?;
                info!(
                    submitter = %claim.submitter,
                    chain = %claim.session_header.chain_id,
                    start = claim.session_header.session_start_height,
                    relays = claim.total_relays,
                    height = env.height,
                    "claim accepted"
                );
                Ok(claim)
            }
            Err(e) => {
                warn!(submitter = %msg.submitter, code = e.code(), error = %e, "claim rejected");
                Err(e)
            }
        }
    }

    fn check_claim(&mut self, msg: &ClaimMsg, env: &mut BlockEnv<'_>) -> Result<Claim, PorError> {
        validate_claim_sanity(msg).map_err(PorError::MalformedClaim)?;
        if !msg.signature_valid() {
            return Err(PorError::Signature("claim signature"));
        }

        let params = self.registry.params();
        let header = &msg.header;
        if !params.is_supported(&header.chain_id) {
            return Err(PorError::UnsupportedChain(header.chain_id.clone()));
        }
        let start = header.session_start_height;
        if start % params.session_block_frequency.max(1) != 0 {
            return Err(PorError::MalformedClaim("session start not aligned"));
        }
        let (open, close) = params.claim_window(start);
        if env.height < open || env.height >= close {
            return Err(PorError::Window { height: env.height, open, close });
        }
        let expires_at = env.height.saturating_add(params.claim_expiration);
        let prune_at = params.prune_height(start);
        // ein geändertes Fenster öffnet bereits bereinigte Sessions nicht wieder
        if let Some(floor) = self.state.prune_floor()? {
            if start <= floor {
                return Err(PorError::SessionPruned { start, floor });
            }
        }

        let submitter = msg.submitter;
        if !env.staking.is_staked(&submitter, &header.chain_id) || env.staking.is_jailed(&submitter) {
            return Err(PorError::NotStaked(submitter));
        }
        let session = self.session(header, env.chain, &*env.staking)?;
        if !session.contains(&submitter) {
            return Err(PorError::Selection { submitter });
        }

        let key = msg.key();
        if let Some(existing) = self.state.get_claim(&key)? {
            if existing.state != ClaimState::Expired {
                return Err(PorError::DuplicateClaim);
            }
        }
        // dieselbe Root darf nicht unter einem anderen lebenden Claim stehen
        if let Some(owner) = self.state.root_owner(&msg.merkle_root)? {
            if owner != key {
                let live = self
                    .state
                    .get_claim(&owner)?
                    .is_some_and(|c| {
                        c.state != ClaimState::Expired && c.merkle_root == msg.merkle_root
                    });
                if live {
                    return Err(PorError::Replay { hash: msg.merkle_root });
                }
            }
        }

        Ok(Claim {
            session_header: header.clone(),
            submitter,
            merkle_root: msg.merkle_root,
            total_relays: msg.total_relays,
            submitted_at_height: env.height,
            expires_at,
            prune_at,
            state: ClaimState::Pending,
        })
    }
}
