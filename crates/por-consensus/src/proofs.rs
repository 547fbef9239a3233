// SPDX-License-Identifier: AGPL-3.0-only

use crate::{BlockEnv, PorError, RelayEvent, RelayModule};
use por_crypto::{sample_indices, verify_sum_branch, Hash32};
use por_state::StateBackend;
use por_types::{validate_proof_sanity, Amount, Claim, ClaimKey, ClaimState, ProofMsg};
use tracing::{info, warn};

/// Ergebnis eines angenommenen Proofs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofOutcome {
    pub claim: ClaimKey,
    pub reward: Amount,
    /// Claim unterhalb `minimum_number_of_proofs`: ohne Offenlegung finalisiert
    pub bypassed: bool,
}

impl<B: StateBackend> RelayModule<B> {
    /// Prüft einen Proof gegen den Pending-Claim. Bei Ablehnung bleibt der Claim Pending;
    /// eine Replay-Verbrennung wird dabei nicht zurückgenommen.
    pub fn deliver_proof(
        &mut self,
        msg: &ProofMsg,
        env: &mut BlockEnv<'_>,
    ) -> Result<ProofOutcome, PorError> {
        let res = self.check_and_apply_proof(msg, env);
        match &res {
            Ok(o) => info!(
                submitter = %o.claim.submitter,
                chain = %o.claim.header.chain_id,
                reward = o.reward,
                bypassed = o.bypassed,
                height = env.height,
                "proof accepted"
            ),
            Err(e) => warn!(submitter = %msg.claim.submitter, code = e.code(), error = %e, "proof rejected"),
        }
        res
    }

    fn check_and_apply_proof(
        &mut self,
        msg: &ProofMsg,
        env: &mut BlockEnv<'_>,
    ) -> Result<ProofOutcome, PorError> {
        validate_proof_sanity(msg).map_err(PorError::MalformedProof)?;
        let claim = self.state.get_claim(&msg.claim)?.ok_or(PorError::ClaimNotFound)?;
        if claim.state != ClaimState::Pending {
            return Err(PorError::ClaimNotPending(claim.state));
        }
        if !msg.signature_valid() {
            return Err(PorError::Signature("proof signature"));
        }

        let params = self.registry.params();
        let open = claim.submitted_at_height;
        let close = claim.expires_at;
        if env.height < open || env.height >= close {
            return Err(PorError::Window { height: env.height, open, close });
        }

        if claim.total_relays < params.minimum_number_of_proofs {
            return self.finalize(claim, &[], env, true);
        }

        let entropy = env
            .chain
            .block_hash(claim.submitted_at_height)
            .ok_or(PorError::EntropyUnavailable(claim.submitted_at_height))?;
        let required = sample_indices(
            &claim.merkle_root,
            &entropy,
            claim.total_relays,
            params.minimum_number_of_proofs,
        );
        let disclosed: Vec<u64> = msg.leaves.iter().map(|l| l.index).collect();
        if disclosed != required {
            return Err(PorError::ProofIndexMismatch { expected: required, disclosed });
        }

        // Leaf-Bereich = Receipt-Hash; der Branch erzwingt streng aufsteigende Nachbarn
        for dl in &msg.leaves {
            let leaf = dl.receipt.leaf();
            let chk = verify_sum_branch(claim.total_relays, dl.index, leaf, &dl.branch)
                .ok_or(PorError::MerkleVerification { index: dl.index })?;
            let covers = dl.index >= chk.offset && dl.index - chk.offset < leaf.sum;
            if chk.root.hash != claim.merkle_root || chk.root.sum != claim.total_relays || !covers {
                return Err(PorError::MerkleVerification { index: dl.index });
            }
        }

        for dl in &msg.leaves {
            let r = &dl.receipt;
            if r.session_header != claim.session_header {
                return Err(PorError::ReceiptSessionMismatch);
            }
            if r.servicer_address() != claim.submitter {
                return Err(PorError::Signature("receipt not served by submitter"));
            }
            if !r.requester_signature_valid() {
                return Err(PorError::Signature("requester signature"));
            }
            if !r.servicer_signature_valid() {
                return Err(PorError::Signature("servicer signature"));
            }
        }

        let hashes: Vec<Hash32> = msg.leaves.iter().map(|l| l.receipt.receipt_hash()).collect();
        if let Some(hash) = self.find_replay(&hashes, &claim.key().digest())? {
            let _ = self.burn_for_replay(&claim.submitter, env);
            return Err(PorError::Replay { hash });
        }

        self.finalize(claim, &hashes, env, false)
    }

    fn finalize(
        &mut self,
        mut claim: Claim,
        receipt_hashes: &[Hash32],
        env: &mut BlockEnv<'_>,
        bypassed: bool,
    ) -> Result<ProofOutcome, PorError> {
        let key = claim.key();
        let reward = claim
            .total_relays
            .saturating_mul(self.registry.params().relay_value());
        // Marker zuerst: ein Abbruch danach lässt den Claim Pending
        self.record_markers(receipt_hashes, &claim, env.height)?;
        claim.state = ClaimState::Proven;
        self.state.put_claim(&claim)?;
        env.staking.reward(&claim.submitter, reward);
        self.events.push(RelayEvent::Reward {
            claim: key.clone(),
            relays: claim.total_relays,
            amount: reward,
        });
        Ok(ProofOutcome { claim: key, reward, bypassed })
    }
}
