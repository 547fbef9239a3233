// SPDX-License-Identifier: AGPL-3.0-only

use por_codec::CodecError;
use por_crypto::Hash32;
use por_state::StateError;
use por_types::{Address, Amount, ChainId, ClaimState, Height};

/// Ablehnungsgrund einer einzelnen Claim-/Proof-Transaktion. Nie fatal für den Block.
#[derive(Debug)]
pub enum PorError {
    Selection { submitter: Address },
    UnsupportedChain(ChainId),
    NotStaked(Address),
    Window { height: Height, open: Height, close: Height },
    DuplicateClaim,
    MalformedClaim(&'static str),
    MalformedProof(&'static str),
    ClaimNotFound,
    ClaimNotPending(ClaimState),
    EntropyUnavailable(Height),
    ProofIndexMismatch { expected: Vec<u64>, disclosed: Vec<u64> },
    MerkleVerification { index: u64 },
    Signature(&'static str),
    ReceiptSessionMismatch,
    Replay { hash: Hash32 },
    InsufficientStake { requested: Amount, available: Amount },
    /// Einträge der Session wurden bereits entfernt
    SessionPruned { start: Height, floor: Height },
    State(StateError),
    Codec(CodecError),
}

impl PorError {
    /// Stabiler Fehlercode für `TxResult` (0 = OK ist reserviert)
    pub fn code(&self) -> u32 {
        match self {
            Self::Selection { .. } => 1,
            Self::UnsupportedChain(_) => 2,
            Self::NotStaked(_) => 3,
            Self::Window { .. } => 4,
            Self::DuplicateClaim => 5,
            Self::MalformedClaim(_) => 6,
            Self::MalformedProof(_) => 7,
            Self::ClaimNotFound => 8,
            Self::ClaimNotPending(_) => 9,
            Self::EntropyUnavailable(_) => 10,
            Self::ProofIndexMismatch { .. } => 11,
            Self::MerkleVerification { .. } => 12,
            Self::Signature(_) => 13,
            Self::ReceiptSessionMismatch => 14,
            Self::Replay { .. } => 15,
            Self::InsufficientStake { .. } => 16,
            Self::State(_) => 17,
            Self::Codec(_) => 18,
            Self::SessionPruned { .. } => 19,
        }
    }

    /// Später erneut einreichbar, ohne die Nachricht zu ändern
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EntropyUnavailable(_) => true,
            Self::Window { height, open, .. } => height < open,
            _ => false,
        }
    }
}

impl core::fmt::Display for PorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Selection { submitter } => write!(f, "submitter {submitter} not part of session"),
            Self::UnsupportedChain(c) => write!(f, "unsupported chain {c}"),
            Self::NotStaked(a) => write!(f, "service node {a} not staked or jailed"),
            Self::Window { height, open, close } => {
                write!(f, "height {height} outside window [{open}, {close})")
            }
            Self::DuplicateClaim => write!(f, "claim already exists for session"),
            Self::MalformedClaim(why) => write!(f, "malformed claim: {why}"),
            Self::MalformedProof(why) => write!(f, "malformed proof: {why}"),
            Self::ClaimNotFound => write!(f, "claim not found"),
            Self::ClaimNotPending(s) => write!(f, "claim not pending ({s:?})"),
            Self::EntropyUnavailable(h) => write!(f, "block hash at height {h} not available"),
            Self::ProofIndexMismatch { expected, disclosed } => {
                write!(f, "proof index mismatch: expected {expected:?}, disclosed {disclosed:?}")
            }
            Self::MerkleVerification { index } => {
                write!(f, "branch for index {index} does not reconstruct claimed root")
            }
            Self::Signature(what) => write!(f, "invalid signature: {what}"),
            Self::ReceiptSessionMismatch => write!(f, "receipt belongs to a different session"),
            Self::Replay { hash } => write!(f, "replayed evidence {}", hex_short(hash)),
            Self::InsufficientStake { requested, available } => {
                write!(f, "burn of {requested} exceeds remaining stake {available}")
            }
            Self::SessionPruned { start, floor } => {
                write!(f, "session {start} already pruned (floor {floor})")
            }
            Self::State(e) => write!(f, "state: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
        }
    }
}
impl std::error::Error for PorError {}

impl From<StateError> for PorError {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}
impl From<CodecError> for PorError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

fn hex_short(h: &Hash32) -> String {
    h.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn codes_are_unique_and_nonzero() {
        let all = [
            PorError::Selection { submitter: Address::default() },
            PorError::UnsupportedChain(ChainId::new("x").expect("chain")),
            PorError::NotStaked(Address::default()),
            PorError::Window { height: 0, open: 1, close: 2 },
            PorError::DuplicateClaim,
            PorError::MalformedClaim("x"),
            PorError::MalformedProof("x"),
            PorError::ClaimNotFound,
            PorError::ClaimNotPending(ClaimState::Proven),
            PorError::EntropyUnavailable(3),
            PorError::ProofIndexMismatch { expected: vec![], disclosed: vec![] },
            PorError::MerkleVerification { index: 0 },
            PorError::Signature("x"),
            PorError::ReceiptSessionMismatch,
            PorError::Replay { hash: [0u8; 32] },
            PorError::InsufficientStake { requested: 2, available: 1 },
            PorError::State(StateError::Corrupt("x")),
            PorError::Codec(CodecError::Truncated),
            PorError::SessionPruned { start: 4, floor: 8 },
        ];
        let codes: BTreeSet<u32> = all.iter().map(PorError::code).collect();
        assert_eq!(codes.len(), all.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn display_is_informative() {
        let e = PorError::Window { height: 9, open: 10, close: 13 };
        assert_eq!(e.to_string(), "height 9 outside window [10, 13)");
        assert!(e.is_retryable());
        assert!(!PorError::Window { height: 13, open: 10, close: 13 }.is_retryable());
        assert!(PorError::Replay { hash: [0xab; 32] }.to_string().contains("abababab"));
    }
}
