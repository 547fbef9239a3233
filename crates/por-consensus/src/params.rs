// SPDX-License-Identifier: AGPL-3.0-only

//! Governance-Parameter des Moduls und die ACL, die festlegt, wer welchen Parameter ändern darf.

use crate::consts::*;
use por_types::{Address, ChainId, Height};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofOfRelayParams {
    pub session_node_count: u64,
    pub session_block_frequency: u64,
    pub proof_waiting_period: u64,
    pub claim_submission_window: u64,
    pub claim_expiration: u64,
    pub minimum_number_of_proofs: u64,
    pub replay_attack_burn_multiplier: u64,
    pub relays_to_tokens_multiplier: u64,
    pub supported_blockchains: Vec<ChainId>,
}

impl Default for ProofOfRelayParams {
    fn default() -> Self {
        Self::recommended()
    }
}

impl ProofOfRelayParams {
    pub fn recommended() -> Self {
        Self {
            session_node_count: RECOMMENDED_SESSION_NODE_COUNT,
            session_block_frequency: RECOMMENDED_SESSION_BLOCK_FREQUENCY,
            proof_waiting_period: RECOMMENDED_PROOF_WAITING_PERIOD,
            claim_submission_window: RECOMMENDED_CLAIM_SUBMISSION_WINDOW,
            claim_expiration: RECOMMENDED_CLAIM_EXPIRATION,
            minimum_number_of_proofs: RECOMMENDED_MINIMUM_NUMBER_OF_PROOFS,
            replay_attack_burn_multiplier: RECOMMENDED_REPLAY_ATTACK_BURN_MULTIPLIER,
            relays_to_tokens_multiplier: RECOMMENDED_RELAYS_TO_TOKENS_MULTIPLIER,
            supported_blockchains: RECOMMENDED_CHAINS
                .iter()
                .filter_map(|c| ChainId::new(*c).ok())
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        if self.session_node_count == 0 || self.session_node_count > MAX_SESSION_NODE_COUNT {
            return Err(ParamError::Invalid("session_node_count out of range"));
        }
        if self.session_block_frequency == 0 {
            return Err(ParamError::Invalid("session_block_frequency must be >= 1"));
        }
        if self.claim_submission_window == 0 {
            return Err(ParamError::Invalid("claim_submission_window must be >= 1"));
        }
        if self.claim_expiration == 0 {
            return Err(ParamError::Invalid("claim_expiration must be >= 1"));
        }
        if self.minimum_number_of_proofs == 0
            || self.minimum_number_of_proofs > MAX_MINIMUM_NUMBER_OF_PROOFS
        {
            return Err(ParamError::Invalid("minimum_number_of_proofs out of range"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for c in &self.supported_blockchains {
            if !seen.insert(c) {
                return Err(ParamError::Invalid("duplicate supported chain"));
            }
        }
        Ok(())
    }

    pub fn is_supported(&self, chain: &ChainId) -> bool {
        self.supported_blockchains.contains(chain)
    }

    /// Claim-Fenster `[open, close)` für eine Session-Starthöhe
    pub fn claim_window(&self, session_start: Height) -> (Height, Height) {
        let open = session_start
            .saturating_add(self.session_block_frequency)
            .saturating_add(self.proof_waiting_period);
        let close = open.saturating_add(self.claim_submission_window);
        (open, close)
    }

    /// Ab dieser Höhe kann für die Session kein Claim mehr existieren (weder einreichbar noch beweisbar).
    /// Wird bei Annahme eines Claims festgeschrieben.
    pub fn prune_height(&self, session_start: Height) -> Height {
        let (_, close) = self.claim_window(session_start);
        close.saturating_add(self.claim_expiration)
    }

    /// Wert eines einzelnen Relays in Token-Einheiten
    pub fn relay_value(&self) -> u64 {
        self.relays_to_tokens_multiplier
    }

    pub fn replay_burn_amount(&self) -> u64 {
        self.relay_value()
            .saturating_mul(self.replay_attack_burn_multiplier)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamKey {
    SessionNodeCount,
    SessionBlockFrequency,
    ProofWaitingPeriod,
    ClaimSubmissionWindow,
    ClaimExpiration,
    MinimumNumberOfProofs,
    ReplayAttackBurnMultiplier,
    RelaysToTokensMultiplier,
    SupportedBlockchains,
}

impl ParamKey {
    pub const ALL: [ParamKey; 9] = [
        ParamKey::SessionNodeCount,
        ParamKey::SessionBlockFrequency,
        ParamKey::ProofWaitingPeriod,
        ParamKey::ClaimSubmissionWindow,
        ParamKey::ClaimExpiration,
        ParamKey::MinimumNumberOfProofs,
        ParamKey::ReplayAttackBurnMultiplier,
        ParamKey::RelaysToTokensMultiplier,
        ParamKey::SupportedBlockchains,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParamKey::SessionNodeCount => "session_node_count",
            ParamKey::SessionBlockFrequency => "session_block_frequency",
            ParamKey::ProofWaitingPeriod => "proof_waiting_period",
            ParamKey::ClaimSubmissionWindow => "claim_submission_window",
            ParamKey::ClaimExpiration => "claim_expiration",
            ParamKey::MinimumNumberOfProofs => "minimum_number_of_proofs",
            ParamKey::ReplayAttackBurnMultiplier => "replay_attack_burn_multiplier",
            ParamKey::RelaysToTokensMultiplier => "relays_to_tokens_multiplier",
            ParamKey::SupportedBlockchains => "supported_blockchains",
        }
    }
}

impl FromStr for ParamKey {
    type Err = ParamError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParamKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or(ParamError::UnknownKey)
    }
}

impl core::fmt::Display for ParamKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Einzelne Parameteränderung (ein Schlüssel pro Update)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamUpdate {
    SessionNodeCount(u64),
    SessionBlockFrequency(u64),
    ProofWaitingPeriod(u64),
    ClaimSubmissionWindow(u64),
    ClaimExpiration(u64),
    MinimumNumberOfProofs(u64),
    ReplayAttackBurnMultiplier(u64),
    RelaysToTokensMultiplier(u64),
    SupportedBlockchains(Vec<ChainId>),
}

impl ParamUpdate {
    pub fn key(&self) -> ParamKey {
        match self {
            ParamUpdate::SessionNodeCount(_) => ParamKey::SessionNodeCount,
            ParamUpdate::SessionBlockFrequency(_) => ParamKey::SessionBlockFrequency,
            ParamUpdate::ProofWaitingPeriod(_) => ParamKey::ProofWaitingPeriod,
            ParamUpdate::ClaimSubmissionWindow(_) => ParamKey::ClaimSubmissionWindow,
            ParamUpdate::ClaimExpiration(_) => ParamKey::ClaimExpiration,
            ParamUpdate::MinimumNumberOfProofs(_) => ParamKey::MinimumNumberOfProofs,
            ParamUpdate::ReplayAttackBurnMultiplier(_) => ParamKey::ReplayAttackBurnMultiplier,
            ParamUpdate::RelaysToTokensMultiplier(_) => ParamKey::RelaysToTokensMultiplier,
            ParamUpdate::SupportedBlockchains(_) => ParamKey::SupportedBlockchains,
        }
    }

    fn apply(self, p: &mut ProofOfRelayParams) {
        match self {
            ParamUpdate::SessionNodeCount(v) => p.session_node_count = v,
            ParamUpdate::SessionBlockFrequency(v) => p.session_block_frequency = v,
            ParamUpdate::ProofWaitingPeriod(v) => p.proof_waiting_period = v,
            ParamUpdate::ClaimSubmissionWindow(v) => p.claim_submission_window = v,
            ParamUpdate::ClaimExpiration(v) => p.claim_expiration = v,
            ParamUpdate::MinimumNumberOfProofs(v) => p.minimum_number_of_proofs = v,
            ParamUpdate::ReplayAttackBurnMultiplier(v) => p.replay_attack_burn_multiplier = v,
            ParamUpdate::RelaysToTokensMultiplier(v) => p.relays_to_tokens_multiplier = v,
            ParamUpdate::SupportedBlockchains(v) => p.supported_blockchains = v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    Unauthorized { key: ParamKey, signer: Address },
    Invalid(&'static str),
    UnknownKey,
}

impl core::fmt::Display for ParamError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unauthorized { key, signer } => {
                write!(f, "{signer} is not authorized to change {key}")
            }
            Self::Invalid(why) => write!(f, "invalid params: {why}"),
            Self::UnknownKey => write!(f, "unknown parameter key"),
        }
    }
}
impl std::error::Error for ParamError {}

/// Parameter + ACL (Parametername → Besitzer-Adresse)
#[derive(Clone, Debug, Default)]
pub struct ParamRegistry {
    params: ProofOfRelayParams,
    acl: BTreeMap<ParamKey, Address>,
}

impl ParamRegistry {
    pub fn new(params: ProofOfRelayParams, acl: BTreeMap<ParamKey, Address>) -> Result<Self, ParamError> {
        params.validate()?;
        Ok(Self { params, acl })
    }

    pub fn params(&self) -> &ProofOfRelayParams {
        &self.params
    }

    pub fn owner(&self, key: ParamKey) -> Option<&Address> {
        self.acl.get(&key)
    }

    /// Prüft die ACL, wendet das Update auf eine Kopie an und übernimmt sie nur, wenn sie gültig ist.
    pub fn update(&mut self, signer: &Address, update: ParamUpdate) -> Result<ParamKey, ParamError> {
        let key = update.key();
        if self.acl.get(&key) != Some(signer) {
            return Err(ParamError::Unauthorized { key, signer: *signer });
        }
        let mut next = self.params.clone();
        update.apply(&mut next);
        next.validate()?;
        self.params = next;
        Ok(key)
    }
}
