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

//! Session-Generator: reine Funktion (Header, Blockhash, Kandidaten) → geordnete Knotenauswahl.
//! Keine Uhr, kein lokaler Zufall; alle Eingaben stammen aus committetem Chain-State.

use lru::LruCache;
use por_crypto::{blake3_domain, xor32, Hash32};
use por_types::{Address, Amount, ChainId, Height, PublicKey, Session, SessionHeader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use tracing::warn;

const SEED_DOMAIN: &[u8] = b"por:session:seed:v1\x01";
const DIST_DOMAIN: &[u8] = b"por:session:dist:v1\x01";
const ADDR_KEY_DOMAIN: &[u8] = b"por:session:addrkey:v1\x01";

/// Service-Node aus Sicht des Staking-Moduls (Snapshot zur Session-Starthöhe)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCandidate {
    pub address: Address,
    pub stake: Amount,
    #[serde(default)]
    pub jailed: bool,
    pub chains: Vec<ChainId>,
}

impl NodeCandidate {
    pub fn is_eligible(&self, chain: &ChainId) -> bool {
        self.stake > 0 && !self.jailed && self.chains.contains(chain)
    }
}

/// Starthöhe der Session, in die `height` fällt (Abrunden auf Vielfache von `freq`, freq>=1)
pub fn session_start_height(height: Height, session_block_frequency: u64) -> Height {
    let f = core::cmp::max(1u64, session_block_frequency);
    (height / f) * f
}

/// seed = H(domain || block_hash(32) || len(chain)_le32 || chain || app_pk(32))
pub fn derive_session_seed(block_hash: &Hash32, chain_id: &ChainId, app_pk: &PublicKey) -> Hash32 {
    let chain = chain_id.as_str().as_bytes();
    let len = u32::try_from(chain.len()).unwrap_or(u32::MAX);
    blake3_domain(
        SEED_DOMAIN,
        &[block_hash, &len.to_le_bytes(), chain, &app_pk.0],
    )
}

/// distance = H(dist || seed || addr) XOR H(addrkey || addr); als 256-bit Big-Endian-Zahl zu lesen,
/// d.h. der Byte-Vergleich entspricht dem Zahlenvergleich.
pub fn node_distance(seed: &Hash32, addr: &Address) -> Hash32 {
    let a = blake3_domain(DIST_DOMAIN, &[seed, &addr.0]);
    let b = blake3_domain(ADDR_KEY_DOMAIN, &[&addr.0]);
    xor32(&a, &b)
}

/// Wählt die `session_node_count` Knoten mit kleinster Distanz (Tie-Break: Adressbytes).
/// Mehrfach gelistete Adressen zählen einmal; die Eingabereihenfolge ist ohne Einfluss.
pub fn derive_session(
    header: &SessionHeader,
    block_hash: &Hash32,
    candidates: &[NodeCandidate],
    session_node_count: usize,
) -> Session {
    let eligible: BTreeSet<Address> = candidates
        .iter()
        .filter(|c| c.is_eligible(&header.chain_id))
        .map(|c| c.address)
        .collect();

    let seed = derive_session_seed(block_hash, &header.chain_id, &header.app_public_key);
    let mut scored: Vec<(Hash32, Address)> = eligible
        .into_iter()
        .map(|a| (node_distance(&seed, &a), a))
        .collect();
    scored.sort_unstable();

    let service_nodes: Vec<Address> = scored
        .into_iter()
        .take(session_node_count)
        .map(|(_, a)| a)
        .collect();

    if service_nodes.len() < session_node_count {
        warn!(
            chain = %header.chain_id,
            start = header.session_start_height,
            selected = service_nodes.len(),
            wanted = session_node_count,
            "degraded session: not enough eligible service nodes"
        );
    }

    Session {
        header: header.clone(),
        service_nodes,
    }
}

/// LRU-Memo abgeleiteter Sessions. Muss geleert werden, sobald sich
/// sessionrelevante Parameter ändern.
pub struct SessionCache {
    inner: LruCache<SessionHeader, Session>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(cap),
        }
    }

    pub fn get(&mut self, header: &SessionHeader) -> Option<Session> {
        self.inner.get(header).cloned()
    }

    pub fn insert(&mut self, session: Session) {
        let _ = self.inner.put(session.header.clone(), session);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(1024)
    }
}
