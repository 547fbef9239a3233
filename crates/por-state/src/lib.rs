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

use por_codec::{decode_exact, encode_to_vec, CodecError};
use por_crypto::{blake3_domain, merkle_root_hashes, Hash32};
use por_types::{Claim, ClaimKey, Height, ReplayMarker};
use std::collections::BTreeMap;
#[cfg(feature = "rocksdb")]
use rocksdb::{Direction, IteratorMode, Options, DB};

// Key-Layout
pub const PREFIX_CLAIM: u8 = 0x01;
pub const PREFIX_REPLAY: u8 = 0x02;
pub const PREFIX_ROOT: u8 = 0x03;
/// Einzelwert: höchste Session-Starthöhe, deren Einträge entfernt wurden
pub const KEY_PRUNE_FLOOR: u8 = 0x04;

const STATE_LEAF_DOMAIN: &[u8] = b"por:state:leaf:v1\x01";

#[derive(Debug)]
pub enum StateError {
    Backend(String),
    Codec(CodecError),
    Corrupt(&'static str),
}

impl core::fmt::Display for StateError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Backend(e) => write!(f, "backend: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Corrupt(what) => write!(f, "corrupt state: {what}"),
        }
    }
}
impl std::error::Error for StateError {}
impl From<CodecError> for StateError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

pub type KvPair = (Vec<u8>, Vec<u8>);

/// Geordneter Byte-Key/Value-Speicher. `iter_prefix` liefert aufsteigend nach Key-Bytes,
/// damit jede Iteration auf allen Validatoren dieselbe Reihenfolge hat.
pub trait StateBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError>;
    fn put(&mut self, key: &[u8], val: &[u8]) -> Result<(), StateError>;
    fn del(&mut self, key: &[u8]) -> Result<bool, StateError>;
    fn iter_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = Result<KvPair, StateError>> + 'a>;
}

#[derive(Default)]
pub struct InMemoryBackend {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}
impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.map.len()
    }
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
impl StateBackend for InMemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.map.get(key).cloned())
    }
    fn put(&mut self, key: &[u8], val: &[u8]) -> Result<(), StateError> {
        let _ = self.map.insert(key.to_vec(), val.to_vec());
        Ok(())
    }
    fn del(&mut self, key: &[u8]) -> Result<bool, StateError> {
        Ok(self.map.remove(key).is_some())
    }
    fn iter_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = Result<KvPair, StateError>> + 'a> {
        let p = prefix.to_vec();
        Box::new(
            self.map
                .range(p.clone()..)
                .take_while(move |(k, _)| k.starts_with(&p))
                .map(|(k, v)| Ok((k.clone(), v.clone()))),
        )
    }
}

#[cfg(feature = "rocksdb")]
pub struct RocksDbBackend {
    db: DB,
}

#[cfg(feature = "rocksdb")]
impl RocksDbBackend {
    pub fn open(path: &std::path::Path) -> Result<Self, StateError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(Self { db })
    }
}

#[cfg(feature = "rocksdb")]
impl StateBackend for RocksDbBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        self.db
            .get(key)
            .map_err(|e| StateError::Backend(e.to_string()))
    }
    fn put(&mut self, key: &[u8], val: &[u8]) -> Result<(), StateError> {
        self.db
            .put(key, val)
            .map_err(|e| StateError::Backend(e.to_string()))
    }
    fn del(&mut self, key: &[u8]) -> Result<bool, StateError> {
        let existed = self.get(key)?.is_some();
        self.db
            .delete(key)
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(existed)
    }
    fn iter_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = Result<KvPair, StateError>> + 'a> {
        // RocksDB iteriert byteweise aufsteigend (Default-Comparator)
        let mut out: Vec<Result<KvPair, StateError>> = Vec::new();
        for kv in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            match kv {
                Ok((k, v)) => {
                    if !k.starts_with(prefix) {
                        break;
                    }
                    out.push(Ok((k.to_vec(), v.to_vec())));
                }
                Err(e) => {
                    out.push(Err(StateError::Backend(e.to_string())));
                    break;
                }
            }
        }
        Box::new(out.into_iter())
    }
}

fn prefixed(prefix: u8, body: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + body.len());
    k.push(prefix);
    k.extend_from_slice(body);
    k
}

fn claim_key_bytes(key: &ClaimKey) -> Result<Vec<u8>, StateError> {
    Ok(prefixed(PREFIX_CLAIM, &encode_to_vec(key)?))
}

fn hash_suffix(k: &[u8]) -> Result<Hash32, StateError> {
    let body = k.get(1..).ok_or(StateError::Corrupt("short key"))?;
    <Hash32>::try_from(body).map_err(|_| StateError::Corrupt("bad hash key"))
}

/// Typisierter Proof-of-Relay-State über einem geordneten Backend
pub struct RelayState<B: StateBackend> {
    backend: B,
}

impl<B: StateBackend> RelayState<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
    pub fn backend(&self) -> &B {
        &self.backend
    }
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // --- Claims ---

    pub fn get_claim(&self, key: &ClaimKey) -> Result<Option<Claim>, StateError> {
        match self.backend.get(&claim_key_bytes(key)?)? {
            Some(v) => Ok(Some(decode_exact(&v)?)),
            None => Ok(None),
        }
    }

    pub fn put_claim(&mut self, claim: &Claim) -> Result<(), StateError> {
        let k = claim_key_bytes(&claim.key())?;
        self.backend.put(&k, &encode_to_vec(claim)?)
    }

    pub fn del_claim(&mut self, key: &ClaimKey) -> Result<bool, StateError> {
        self.backend.del(&claim_key_bytes(key)?)
    }

    /// Alle Claims, aufsteigend nach kodiertem ClaimKey
    pub fn claims(&self) -> Result<Vec<Claim>, StateError> {
        let mut out = Vec::new();
        for kv in self.backend.iter_prefix(&[PREFIX_CLAIM]) {
            let (_, v) = kv?;
            out.push(decode_exact::<Claim>(&v)?);
        }
        Ok(out)
    }

    // --- Anti-Replay ---

    pub fn get_marker(&self, receipt_hash: &Hash32) -> Result<Option<ReplayMarker>, StateError> {
        match self.backend.get(&prefixed(PREFIX_REPLAY, receipt_hash))? {
            Some(v) => Ok(Some(decode_exact(&v)?)),
            None => Ok(None),
        }
    }

    pub fn put_marker(&mut self, receipt_hash: &Hash32, m: &ReplayMarker) -> Result<(), StateError> {
        self.backend
            .put(&prefixed(PREFIX_REPLAY, receipt_hash), &encode_to_vec(m)?)
    }

    pub fn del_marker(&mut self, receipt_hash: &Hash32) -> Result<bool, StateError> {
        self.backend.del(&prefixed(PREFIX_REPLAY, receipt_hash))
    }

    pub fn markers(&self) -> Result<Vec<(Hash32, ReplayMarker)>, StateError> {
        let mut out = Vec::new();
        for kv in self.backend.iter_prefix(&[PREFIX_REPLAY]) {
            let (k, v) = kv?;
            out.push((hash_suffix(&k)?, decode_exact::<ReplayMarker>(&v)?));
        }
        Ok(out)
    }

    // --- Root-Index (Merkle-Root → ClaimKey) ---

    pub fn root_owner(&self, root: &Hash32) -> Result<Option<ClaimKey>, StateError> {
        match self.backend.get(&prefixed(PREFIX_ROOT, root))? {
            Some(v) => Ok(Some(decode_exact(&v)?)),
            None => Ok(None),
        }
    }

    pub fn put_root_owner(&mut self, root: &Hash32, key: &ClaimKey) -> Result<(), StateError> {
        self.backend
            .put(&prefixed(PREFIX_ROOT, root), &encode_to_vec(key)?)
    }

    pub fn del_root_owner(&mut self, root: &Hash32) -> Result<bool, StateError> {
        self.backend.del(&prefixed(PREFIX_ROOT, root))
    }

    // --- Pruning-Grenze ---

    pub fn prune_floor(&self) -> Result<Option<Height>, StateError> {
        match self.backend.get(&[KEY_PRUNE_FLOOR])? {
            Some(v) => Ok(Some(decode_exact(&v)?)),
            None => Ok(None),
        }
    }

    /// Hebt die Grenze auf `start` an; sinkt nie
    pub fn raise_prune_floor(&mut self, start: Height) -> Result<(), StateError> {
        if self.prune_floor()?.is_some_and(|f| f >= start) {
            return Ok(());
        }
        self.backend.put(&[KEY_PRUNE_FLOOR], &encode_to_vec(&start)?)
    }

    /// Deterministischer State-Root: Merkle über H(domain || len(k)_le32 || k || v) aller Einträge in Key-Reihenfolge
    pub fn root(&self) -> Result<Hash32, StateError> {
        let mut leaves: Vec<Hash32> = Vec::new();
        for kv in self.backend.iter_prefix(&[]) {
            let (k, v) = kv?;
            let klen = u32::try_from(k.len()).map_err(|_| StateError::Corrupt("key too long"))?;
            leaves.push(blake3_domain(
                STATE_LEAF_DOMAIN,
                &[&klen.to_le_bytes(), &k, &v],
            ));
        }
        Ok(merkle_root_hashes(&leaves))
    }
}
