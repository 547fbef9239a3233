// SPDX-License-Identifier: AGPL-3.0-only

//! Schnittstellen zu externen Modulen (Staking, Chain) und einfache In-Memory-Varianten
//! für Tooling und Tests.

use por_crypto::Hash32;
use por_session::NodeCandidate;
use por_types::{Address, Amount, ChainId, Height};
use std::collections::BTreeMap;

/// Ausgaben des Staking-Moduls, die dieses Modul konsumiert
pub trait StakingKeeper {
    /// Service-Node-Menge wie zur Höhe `height` committet
    fn service_nodes_at(&self, height: Height) -> Vec<NodeCandidate>;
    fn is_staked(&self, addr: &Address, chain: &ChainId) -> bool;
    fn is_jailed(&self, addr: &Address) -> bool;
    fn stake_of(&self, addr: &Address) -> Amount;
    /// Verbrennt bis zu `amount`; liefert die tatsächlich verbrannte Menge
    fn burn_stake(&mut self, addr: &Address, amount: Amount) -> Amount;
    fn reward(&mut self, addr: &Address, amount: Amount);
}

pub trait ChainView {
    /// Hash des committeten Blocks auf `height`; `None`, solange er nicht existiert
    fn block_hash(&self, height: Height) -> Option<Hash32>;
}

/// Ausführungskontext eines Blocks
pub struct BlockEnv<'a> {
    pub height: Height,
    pub chain: &'a dyn ChainView,
    pub staking: &'a mut dyn StakingKeeper,
}

/// Staking-Snapshot im Speicher. Historie wird nicht geführt: `service_nodes_at` liefert
/// für jede Höhe den aktuellen Stand.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStaking {
    nodes: BTreeMap<Address, NodeCandidate>,
    rewards: BTreeMap<Address, Amount>,
}

impl InMemoryStaking {
    pub fn new(nodes: impl IntoIterator<Item = NodeCandidate>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.address, n)).collect(),
            rewards: BTreeMap::new(),
        }
    }
    pub fn set_jailed(&mut self, addr: &Address, jailed: bool) {
        if let Some(n) = self.nodes.get_mut(addr) {
            n.jailed = jailed;
        }
    }
    pub fn rewards_of(&self, addr: &Address) -> Amount {
        self.rewards.get(addr).copied().unwrap_or(0)
    }
}

impl StakingKeeper for InMemoryStaking {
    fn service_nodes_at(&self, _height: Height) -> Vec<NodeCandidate> {
        self.nodes.values().cloned().collect()
    }
    fn is_staked(&self, addr: &Address, chain: &ChainId) -> bool {
        self.nodes
            .get(addr)
            .is_some_and(|n| n.stake > 0 && n.chains.contains(chain))
    }
    fn is_jailed(&self, addr: &Address) -> bool {
        self.nodes.get(addr).is_some_and(|n| n.jailed)
    }
    fn stake_of(&self, addr: &Address) -> Amount {
        self.nodes.get(addr).map_or(0, |n| n.stake)
    }
    fn burn_stake(&mut self, addr: &Address, amount: Amount) -> Amount {
        match self.nodes.get_mut(addr) {
            Some(n) => {
                let burned = amount.min(n.stake);
                n.stake -= burned;
                burned
            }
            None => 0,
        }
    }
    fn reward(&mut self, addr: &Address, amount: Amount) {
        let e = self.rewards.entry(*addr).or_insert(0);
        *e = e.saturating_add(amount);
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryChain {
    hashes: BTreeMap<Height, Hash32>,
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, height: Height, hash: Hash32) {
        let _ = self.hashes.insert(height, hash);
    }
    /// Synthetische Blockhashes H(height) für `0..=tip`
    pub fn synthetic(tip: Height) -> Self {
        let mut c = Self::new();
        for h in 0..=tip {
            c.insert(h, por_crypto::blake3_32(&h.to_le_bytes()));
        }
        c
    }
    pub fn tip(&self) -> Option<Height> {
        self.hashes.keys().next_back().copied()
    }
}

impl ChainView for InMemoryChain {
    fn block_hash(&self, height: Height) -> Option<Hash32> {
        self.hashes.get(&height).copied()
    }
}
