// SPDX-License-Identifier: AGPL-3.0-only

// Empfohlene Default-Konstanten für Proof-of-Relay (v0)
// Netzabhängige Werte kommen aus Genesis/Config; diese dienen nur als Richtwert.

pub const RECOMMENDED_SESSION_NODE_COUNT: u64 = 5;
pub const RECOMMENDED_SESSION_BLOCK_FREQUENCY: u64 = 4; // Blöcke pro Session
pub const RECOMMENDED_PROOF_WAITING_PERIOD: u64 = 3;
pub const RECOMMENDED_CLAIM_SUBMISSION_WINDOW: u64 = 3;
pub const RECOMMENDED_CLAIM_EXPIRATION: u64 = 120;
pub const RECOMMENDED_MINIMUM_NUMBER_OF_PROOFS: u64 = 10;
pub const RECOMMENDED_REPLAY_ATTACK_BURN_MULTIPLIER: u64 = 3;
pub const RECOMMENDED_RELAYS_TO_TOKENS_MULTIPLIER: u64 = 1_000;
pub const RECOMMENDED_CHAINS: [&str; 2] = ["0001", "0021"];

// harte Obergrenzen (Validierung)
pub const MAX_SESSION_NODE_COUNT: u64 = 64;
pub const MAX_MINIMUM_NUMBER_OF_PROOFS: u64 = por_types::MAX_PROOF_LEAVES as u64;

// Kapazität des Session-Caches im Modul
pub const SESSION_CACHE_CAPACITY: usize = 4096;
