// SPDX-License-Identifier: AGPL-3.0-only
#![forbid(unsafe_code)]
#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]

//! Deterministischer On-Chain-Teil von Proof-of-Relay: Claim-Verwaltung, Proof-Prüfung,
//! Anti-Replay und Ablauf. Läuft single-threaded in Transaktionsreihenfolge; keine Uhr,
//! kein Zufall, nur geordnete Container.

pub mod consts;
pub mod error;
pub mod keeper;
pub mod params;

mod claims;
mod expiry;
mod proofs;
mod replay;

pub use error::PorError;
pub use expiry::SweepStats;
pub use keeper::{BlockEnv, ChainView, InMemoryChain, InMemoryStaking, StakingKeeper};
pub use params::{ParamError, ParamKey, ParamRegistry, ParamUpdate, ProofOfRelayParams};
pub use proofs::ProofOutcome;

use por_codec::decode_exact;
use por_crypto::Hash32;
use por_session::{derive_session, SessionCache};
use por_state::{RelayState, StateBackend};
use por_types::{Address, Amount, ClaimKey, RelayTx, Session, SessionHeader};
use tracing::info;

/// Ereignisse eines Blocks, in Ausführungsreihenfolge
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    Reward {
        claim: ClaimKey,
        relays: u64,
        amount: Amount,
    },
    Burn {
        address: Address,
        requested: Amount,
        burned: Amount,
    },
    ClaimExpired {
        claim: ClaimKey,
    },
}

/// Ergebnis einer Transaktion; `code == 0` heißt angenommen
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxResult {
    pub code: u32,
    pub log: String,
}

impl TxResult {
    pub fn ok(log: impl Into<String>) -> Self {
        Self { code: 0, log: log.into() }
    }
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl From<&PorError> for TxResult {
    fn from(e: &PorError) -> Self {
        Self { code: e.code(), log: e.to_string() }
    }
}

pub struct RelayModule<B: StateBackend> {
    pub(crate) state: RelayState<B>,
    pub(crate) registry: ParamRegistry,
    pub(crate) sessions: SessionCache,
    pub(crate) events: Vec<RelayEvent>,
}

impl<B: StateBackend> RelayModule<B> {
    pub fn new(backend: B, registry: ParamRegistry) -> Self {
        Self {
            state: RelayState::new(backend),
            registry,
            sessions: SessionCache::new(consts::SESSION_CACHE_CAPACITY),
            events: Vec::new(),
        }
    }

    pub fn params(&self) -> &ProofOfRelayParams {
        self.registry.params()
    }

    pub fn state(&self) -> &RelayState<B> {
        &self.state
    }

    /// Governance-Änderung; verwirft alle gecachten Sessions
    pub fn update_param(&mut self, signer: &Address, update: ParamUpdate) -> Result<(), ParamError> {
        let key = self.registry.update(signer, update)?;
        self.sessions.clear();
        info!(param = %key, signer = %signer, "param updated");
        Ok(())
    }

    /// Session zu `header`, abgeleitet aus dem Blockhash und der Knotenmenge zur Starthöhe
    pub fn session(
        &mut self,
        header: &SessionHeader,
        chain: &dyn ChainView,
        staking: &dyn StakingKeeper,
    ) -> Result<Session, PorError> {
        if let Some(s) = self.sessions.get(header) {
            return Ok(s);
        }
        let start = header.session_start_height;
        let block_hash = chain
            .block_hash(start)
            .ok_or(PorError::EntropyUnavailable(start))?;
        let count = usize::try_from(self.registry.params().session_node_count).unwrap_or(usize::MAX);
        let session = derive_session(header, &block_hash, &staking.service_nodes_at(start), count);
        self.sessions.insert(session.clone());
        Ok(session)
    }

    /// Dekodiert und führt eine Transaktion aus; Fehler werden zum `TxResult`, nie zum Abbruch
    pub fn deliver_tx(&mut self, bytes: &[u8], env: &mut BlockEnv<'_>) -> TxResult {
        let tx: RelayTx = match decode_exact(bytes) {
            Ok(tx) => tx,
            Err(e) => return TxResult::from(&PorError::from(e)),
        };
        match tx {
            RelayTx::Claim(msg) => match self.deliver_claim(&msg, env) {
                Ok(c) => TxResult::ok(format!("claim accepted: {} relays", c.total_relays)),
                Err(e) => TxResult::from(&e),
            },
            RelayTx::Proof(msg) => match self.deliver_proof(&msg, env) {
                Ok(o) => TxResult::ok(format!("proof accepted: reward {}", o.reward)),
                Err(e) => TxResult::from(&e),
            },
        }
    }

    /// Entnimmt die seit dem letzten Aufruf angefallenen Ereignisse
    pub fn take_events(&mut self) -> Vec<RelayEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn app_hash(&self) -> Result<Hash32, PorError> {
        Ok(self.state.root()?)
    }
}
