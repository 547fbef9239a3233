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

//! Off-chain-Evidenz eines Service-Nodes: sammelt gegengezeichnete Relay-Quittungen je Session,
//! baut daraus den Merkle-Summenbaum und erzeugt Claim- und Proof-Nachrichten.
//!
//! Viele Aufzeichner teilen sich den Store; Baumaufbau und Versiegelung laufen exklusiv
//! gegenüber `record`, damit Root und Proof denselben Stand sehen.

pub mod file_store;

pub use file_store::{EvidenceFileStore, SessionRecord};

use por_codec::MAX_DECODE_LEN;
use por_crypto::{sample_indices, Hash32, SchnorrKeypair, SumNode, SumTree};
use por_types::{
    Address, ClaimKey, ClaimMsg, DisclosedLeaf, ProofMsg, PublicKey, RelayReceipt, Session, SessionHeader,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Nach so vielen angenommenen Quittungen schreibt der Collector geänderte Sessions weg
pub const COLLECTOR_FLUSH_EVERY: u64 = 256;

/// Obergrenze je Session; eine gespeicherte Session muss wieder dekodierbar sein
pub const MAX_SESSION_RECEIPTS: usize = MAX_DECODE_LEN;

#[derive(Debug)]
pub enum EvidenceError {
    /// dieser Node ist nicht Mitglied der Session
    NotSelected,
    /// Quittung für eine nicht geöffnete Session
    UnknownSession,
    /// Quittung wurde von einem anderen Service-Node gezeichnet
    WrongServicer,
    InvalidSignature(&'static str),
    /// Session wurde bereits beansprucht; der Baum ist eingefroren
    Sealed,
    /// Session hat die Obergrenze an Quittungen erreicht
    SessionFull(usize),
    /// Quittungen lassen sich nicht zu einem geordneten Baum fügen
    Corrupt(&'static str),
    NoEvidence,
    /// Schlüssel passt nicht zum Node, für den der Store geführt wird
    WrongKey,
    Io(anyhow::Error),
}

impl fmt::Display for EvidenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceError::NotSelected => write!(f, "node not selected for session"),
            EvidenceError::UnknownSession => write!(f, "session not opened"),
            EvidenceError::WrongServicer => write!(f, "receipt served by another node"),
            EvidenceError::InvalidSignature(what) => write!(f, "invalid {}", what),
            EvidenceError::Sealed => write!(f, "session already claimed"),
            EvidenceError::SessionFull(limit) => write!(f, "session holds {} receipts already", limit),
            EvidenceError::Corrupt(what) => write!(f, "corrupt evidence: {}", what),
            EvidenceError::NoEvidence => write!(f, "no receipts for session"),
            EvidenceError::WrongKey => write!(f, "keypair does not belong to this node"),
            EvidenceError::Io(e) => write!(f, "evidence storage: {}", e),
        }
    }
}

impl std::error::Error for EvidenceError {}

impl From<anyhow::Error> for EvidenceError {
    fn from(e: anyhow::Error) -> Self {
        EvidenceError::Io(e)
    }
}

/// Evidenz einer Session; Quittungen nach `receipt_hash` geordnet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEvidence {
    pub session: Session,
    pub receipts: BTreeMap<Hash32, RelayReceipt>,
    pub sealed: bool,
}

impl SessionEvidence {
    fn new(session: Session) -> Self {
        Self { session, receipts: BTreeMap::new(), sealed: false }
    }

    /// Leaf i = i-te Quittung in Hash-Reihenfolge; unabhängig von der Eingangsreihenfolge
    pub fn tree(&self) -> Result<SumTree, EvidenceError> {
        SumTree::from_leaves(self.receipts.values().map(RelayReceipt::leaf).collect())
            .ok_or(EvidenceError::Corrupt("receipts not strictly ordered"))
    }

    fn to_record(&self) -> SessionRecord {
        SessionRecord {
            session: self.session.clone(),
            sealed: self.sealed,
            receipts: self.receipts.values().cloned().collect(),
        }
    }

    fn from_record(rec: SessionRecord) -> Self {
        Self {
            session: rec.session,
            sealed: rec.sealed,
            receipts: rec.receipts.into_iter().map(|r| (r.receipt_hash(), r)).collect(),
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<SessionHeader, SessionEvidence>,
    dirty: BTreeSet<SessionHeader>,
}

pub struct EvidenceStore {
    node_key: PublicKey,
    node_address: Address,
    inner: RwLock<Inner>,
    files: Option<EvidenceFileStore>,
    max_receipts: usize,
}

impl EvidenceStore {
    /// Nur im Speicher
    pub fn new(node_key: PublicKey) -> Self {
        Self {
            node_key,
            node_address: node_key.address(),
            inner: RwLock::new(Inner::default()),
            files: None,
            max_receipts: MAX_SESSION_RECEIPTS,
        }
    }

    /// Mit Ablage unter `dir`; bereits gespeicherte Sessions werden geladen
    pub fn open<P: AsRef<Path>>(dir: P, node_key: PublicKey, fsync: bool) -> Result<Self, EvidenceError> {
        let files = EvidenceFileStore::open(dir, fsync)?;
        let mut inner = Inner::default();
        for rec in files.load_all()? {
            let ev = SessionEvidence::from_record(rec);
            inner.sessions.insert(ev.session.header.clone(), ev);
        }
        info!(sessions = inner.sessions.len(), node = %node_key.address(), "evidence store opened");
        Ok(Self {
            node_key,
            node_address: node_key.address(),
            inner: RwLock::new(inner),
            files: Some(files),
            max_receipts: MAX_SESSION_RECEIPTS,
        })
    }

    /// Senkt die Obergrenze je Session; höher als `MAX_SESSION_RECEIPTS` geht nicht
    pub fn with_receipt_limit(mut self, limit: usize) -> Self {
        self.max_receipts = limit.min(MAX_SESSION_RECEIPTS);
        self
    }

    pub fn node_address(&self) -> Address {
        self.node_address
    }

    /// Öffnet eine Session, der dieser Node angehört. Eine bereits offene Session bleibt unverändert.
    pub async fn open_session(&self, session: Session) -> Result<(), EvidenceError> {
        if !session.contains(&self.node_address) {
            return Err(EvidenceError::NotSelected);
        }
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(&session.header) {
            return Ok(());
        }
        let header = session.header.clone();
        debug!(chain = %header.chain_id, start = header.session_start_height, "session opened");
        inner.sessions.insert(header.clone(), SessionEvidence::new(session));
        inner.dirty.insert(header);
        Ok(())
    }

    /// Nimmt eine Quittung auf. `Ok(false)` bei einer bereits bekannten Quittung.
    pub async fn record(&self, receipt: RelayReceipt) -> Result<bool, EvidenceError> {
        if receipt.service_node_public_key != self.node_key {
            return Err(EvidenceError::WrongServicer);
        }
        if !receipt.requester_signature_valid() {
            return Err(EvidenceError::InvalidSignature("requester signature"));
        }
        if !receipt.servicer_signature_valid() {
            return Err(EvidenceError::InvalidSignature("servicer signature"));
        }
        let hash = receipt.receipt_hash();
        let mut inner = self.inner.write().await;
        let header = receipt.session_header.clone();
        let ev = inner
            .sessions
            .get_mut(&header)
            .ok_or(EvidenceError::UnknownSession)?;
        if ev.receipts.contains_key(&hash) {
            return Ok(false);
        }
        if ev.sealed {
            return Err(EvidenceError::Sealed);
        }
        if ev.receipts.len() >= self.max_receipts {
            return Err(EvidenceError::SessionFull(self.max_receipts));
        }
        ev.receipts.insert(hash, receipt);
        inner.dirty.insert(header);
        Ok(true)
    }

    pub async fn receipt_count(&self, header: &SessionHeader) -> Option<usize> {
        self.inner.read().await.sessions.get(header).map(|e| e.receipts.len())
    }

    pub async fn sessions(&self) -> Vec<SessionHeader> {
        self.inner.read().await.sessions.keys().cloned().collect()
    }

    pub async fn snapshot(&self, header: &SessionHeader) -> Option<SessionEvidence> {
        self.inner.read().await.sessions.get(header).cloned()
    }

    /// Root und Anzahl Leaves des aktuellen Stands
    pub async fn build_merkle_sum_tree(&self, header: &SessionHeader) -> Result<(SumNode, u64), EvidenceError> {
        let inner = self.inner.read().await;
        let ev = inner.sessions.get(header).ok_or(EvidenceError::UnknownSession)?;
        let tree = ev.tree()?;
        Ok((tree.root(), tree.leaf_count() as u64))
    }

    /// Versiegelt die Session und erzeugt die signierte Claim-Nachricht
    pub async fn claim_message(
        &self,
        header: &SessionHeader,
        kp: &SchnorrKeypair,
    ) -> Result<ClaimMsg, EvidenceError> {
        self.check_key(kp)?;
        let mut inner = self.inner.write().await;
        let ev = inner.sessions.get_mut(header).ok_or(EvidenceError::UnknownSession)?;
        if ev.receipts.is_empty() {
            return Err(EvidenceError::NoEvidence);
        }
        let root = ev.tree()?.root();
        if !ev.sealed {
            ev.sealed = true;
            inner.dirty.insert(header.clone());
        }
        drop(inner);
        self.flush().await?;
        info!(
            chain = %header.chain_id,
            start = header.session_start_height,
            relays = root.sum,
            "claim prepared"
        );
        Ok(ClaimMsg::new_signed(header.clone(), root, kp))
    }

    /// Proof zum Claim dieser Session. Unterhalb `min_proofs` werden keine Leaves offengelegt.
    pub async fn proof_message(
        &self,
        header: &SessionHeader,
        entropy: &Hash32,
        min_proofs: u64,
        kp: &SchnorrKeypair,
    ) -> Result<ProofMsg, EvidenceError> {
        self.check_key(kp)?;
        let inner = self.inner.read().await;
        let ev = inner.sessions.get(header).ok_or(EvidenceError::UnknownSession)?;
        if ev.receipts.is_empty() {
            return Err(EvidenceError::NoEvidence);
        }
        let tree = ev.tree()?;
        let root = tree.root();
        let claim = ClaimKey { header: header.clone(), submitter: self.node_address };
        if root.sum < min_proofs {
            return Ok(ProofMsg::new_signed(claim, Vec::new(), kp));
        }
        let ordered: Vec<&RelayReceipt> = ev.receipts.values().collect();
        let mut leaves = Vec::new();
        for index in sample_indices(&root.hash, entropy, root.sum, min_proofs) {
            let pos = usize::try_from(index).map_err(|_| EvidenceError::NoEvidence)?;
            let (Some(branch), Some(receipt)) = (tree.branch(pos), ordered.get(pos)) else {
                return Err(EvidenceError::NoEvidence);
            };
            leaves.push(DisclosedLeaf { index, branch, receipt: (*receipt).clone() });
        }
        Ok(ProofMsg::new_signed(claim, leaves, kp))
    }

    /// Entfernt die Session aus Speicher und Ablage
    pub async fn discard(&self, header: &SessionHeader) -> Result<bool, EvidenceError> {
        let mut inner = self.inner.write().await;
        inner.dirty.remove(header);
        let existed = inner.sessions.remove(header).is_some();
        if let Some(files) = &self.files {
            files.remove(header)?;
        }
        Ok(existed)
    }

    /// Schreibt geänderte Sessions weg; liefert die Anzahl geschriebener Sessions.
    /// Eine Session bleibt markiert, bis sie geschrieben ist.
    pub async fn flush(&self) -> Result<usize, EvidenceError> {
        let mut inner = self.inner.write().await;
        let Some(files) = &self.files else {
            inner.dirty.clear();
            return Ok(0);
        };
        let pending: Vec<SessionHeader> = inner.dirty.iter().cloned().collect();
        let mut written = 0;
        for header in pending {
            if let Some(ev) = inner.sessions.get(&header) {
                files.put(&ev.to_record())?;
                written += 1;
            }
            inner.dirty.remove(&header);
        }
        Ok(written)
    }

    fn check_key(&self, kp: &SchnorrKeypair) -> Result<(), EvidenceError> {
        if PublicKey::from_keypair(kp) != self.node_key {
            return Err(EvidenceError::WrongKey);
        }
        Ok(())
    }
}

/// Liest Quittungen vom Kanal bis zum Schließen; liefert die Anzahl neu aufgenommener Quittungen
pub fn spawn_collector(store: Arc<EvidenceStore>, mut rx: mpsc::Receiver<RelayReceipt>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut accepted = 0u64;
        while let Some(receipt) = rx.recv().await {
            match store.record(receipt).await {
                Ok(true) => {
                    accepted += 1;
                    if accepted % COLLECTOR_FLUSH_EVERY == 0 {
                        if let Err(e) = store.flush().await {
                            warn!(error = %e, "evidence flush failed");
                        }
                    }
                }
                Ok(false) => debug!("duplicate receipt ignored"),
                Err(e) => warn!(error = %e, "receipt rejected"),
            }
        }
        if let Err(e) = store.flush().await {
            warn!(error = %e, "evidence flush failed");
        }
        debug!(accepted, "collector finished");
        accepted
    })
}
