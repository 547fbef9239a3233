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

//! Wire- und State-Typen des Proof-of-Relay-Moduls.
//!
//! Alle Digests sind domain-separiert (`por:<objekt>:v1\x01`) und laufen über die
//! kanonische Codec-Kodierung; Signaturen sind BIP-340 Schnorr über diese Digests.

use por_codec::{encode_to_vec, CodecError, Decodable, Encodable};
use por_crypto::{
    blake3_domain, schnorr_sign, schnorr_verify, sum_leaf, Hash32, SchnorrKeypair, SumNode,
    ZERO_HASH,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

pub type Height = u64;
pub type Amount = u64;

// Stateless Limits
pub const MAX_CHAIN_ID_LEN: usize = 16;
pub const MAX_PROOF_LEAVES: usize = 64;
// reicht für 2^64 Leaves
pub const MAX_BRANCH_LEN: usize = 64;

const ADDR_DOMAIN: &[u8] = b"por:addr:v1\x01";
const HEADER_DOMAIN: &[u8] = b"por:session:header:v1\x01";
const RELAY_REQUEST_DOMAIN: &[u8] = b"por:relay:request:v1\x01";
const RELAY_SERVICER_DOMAIN: &[u8] = b"por:relay:servicer:v1\x01";
const RECEIPT_DOMAIN: &[u8] = b"por:relay:receipt:v1\x01";
const CLAIM_KEY_DOMAIN: &[u8] = b"por:claim:key:v1\x01";
const CLAIM_MSG_DOMAIN: &[u8] = b"por:claim:msg:v1\x01";
const PROOF_MSG_DOMAIN: &[u8] = b"por:proof:msg:v1\x01";

fn digest_encoded<T: Encodable>(domain: &[u8], v: &T) -> Hash32 {
    // Vec<u8> als Writer schlägt nicht fehl
    let buf = encode_to_vec(v).unwrap_or_default();
    blake3_domain(domain, &[&buf])
}

macro_rules! hex_array_serde {
    ($t:ident, $n:expr) => {
        impl Serialize for $t {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(&hex::encode(self.0))
            }
        }
        impl<'de> Deserialize<'de> for $t {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                $t::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
        impl $t {
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let mut out = [0u8; $n];
                hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)?;
                Ok($t(out))
            }
        }
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }
        impl Encodable for $t {
            fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
                self.0.encode(w)
            }
            fn encoded_len(&self) -> usize {
                $n
            }
        }
        impl Decodable for $t {
            fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
                Ok($t(<[u8; $n]>::decode(r)?))
            }
        }
    };
}

/// x-only secp256k1 Public Key (32 Byte)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PublicKey(pub [u8; 32]);
hex_array_serde!(PublicKey, 32);

impl PublicKey {
    pub fn from_keypair(kp: &SchnorrKeypair) -> Self {
        Self(kp.public_xonly_bytes())
    }
    pub fn address(&self) -> Address {
        Address::from_public_key(self)
    }
}

/// Service-Node-Adresse: erste 20 Byte von H(addr-domain || xonly_pk)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);
hex_array_serde!(Address, 20);

impl Address {
    pub fn from_public_key(pk: &PublicKey) -> Self {
        let h = blake3_domain(ADDR_DOMAIN, &[&pk.0]);
        let mut a = [0u8; 20];
        for (d, s) in a.iter_mut().zip(h.iter()) {
            *d = *s;
        }
        Self(a)
    }
}

/// BIP-340 Signatur (64 Byte)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub const EMPTY: Signature = Signature([0u8; 64]);
}
impl Encodable for Signature {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.0.encode(w)
    }
    fn encoded_len(&self) -> usize {
        64
    }
}
impl Decodable for Signature {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self(<[u8; 64]>::decode(r)?))
    }
}

/// Kennung der bedienten Blockchain (1..=16 Byte UTF-8)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId(String);

impl TryFrom<String> for ChainId {
    type Error = &'static str;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}
impl From<ChainId> for String {
    fn from(c: ChainId) -> Self {
        c.0
    }
}

impl ChainId {
    pub fn new(s: impl Into<String>) -> Result<Self, &'static str> {
        let s = s.into();
        validate_chain_id_str(&s)?;
        Ok(Self(s))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
impl Encodable for ChainId {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.0.encode(w)
    }
    fn encoded_len(&self) -> usize {
        self.0.encoded_len()
    }
}
impl Decodable for ChainId {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let s = String::decode(r)?;
        if s.is_empty() || s.len() > MAX_CHAIN_ID_LEN {
            return Err(CodecError::InvalidLength(s.len()));
        }
        Ok(Self(s))
    }
}

fn validate_chain_id_str(s: &str) -> Result<(), &'static str> {
    if s.is_empty() {
        return Err("empty chain id");
    }
    if s.len() > MAX_CHAIN_ID_LEN {
        return Err("chain id too long");
    }
    Ok(())
}

// ============================
// Session
// ============================

/// Identität einer Session: (Chain, Anwendung, Starthöhe)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionHeader {
    pub chain_id: ChainId,
    pub app_public_key: PublicKey,
    pub session_start_height: Height,
}
impl Encodable for SessionHeader {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.chain_id.encode(w)?;
        self.app_public_key.encode(w)?;
        self.session_start_height.encode(w)
    }
    fn encoded_len(&self) -> usize {
        self.chain_id.encoded_len() + 32 + self.session_start_height.encoded_len()
    }
}
impl Decodable for SessionHeader {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            chain_id: ChainId::decode(r)?,
            app_public_key: PublicKey::decode(r)?,
            session_start_height: u64::decode(r)?,
        })
    }
}
impl SessionHeader {
    pub fn digest(&self) -> Hash32 {
        digest_encoded(HEADER_DOMAIN, self)
    }
}

/// Abgeleitete Session; Reihenfolge der Knoten = Auswahlreihenfolge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub header: SessionHeader,
    pub service_nodes: Vec<Address>,
}
impl Session {
    /// `false` bei degradierter Session (weniger geeignete Knoten als angefordert)
    pub fn is_complete(&self, session_node_count: usize) -> bool {
        self.service_nodes.len() >= session_node_count
    }
    pub fn contains(&self, addr: &Address) -> bool {
        self.service_nodes.contains(addr)
    }
}
impl Encodable for Session {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.header.encode(w)?;
        self.service_nodes.encode(w)
    }
    fn encoded_len(&self) -> usize {
        self.header.encoded_len() + self.service_nodes.encoded_len()
    }
}
impl Decodable for Session {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            header: SessionHeader::decode(r)?,
            service_nodes: Vec::<Address>::decode(r)?,
        })
    }
}

// ============================
// Relay Receipt
// ============================

/// Von Anwendung und Service-Node gegengezeichneter Nachweis eines einzelnen Relays
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayReceipt {
    pub session_header: SessionHeader,
    pub entropy_nonce: u64,
    pub payload_hash: Hash32,
    pub service_node_public_key: PublicKey,
    pub requester_signature: Signature,
    pub service_node_signature: Signature,
}

impl RelayReceipt {
    /// Digest, den die Anwendung signiert: H(domain || header || nonce_le || payload_hash)
    pub fn request_digest(&self) -> Hash32 {
        let hdr = encode_to_vec(&self.session_header).unwrap_or_default();
        blake3_domain(
            RELAY_REQUEST_DOMAIN,
            &[&hdr, &self.entropy_nonce.to_le_bytes(), &self.payload_hash],
        )
    }

    /// Digest, den der Service-Node signiert: bindet Request, Requester-Signatur und eigenen Key
    pub fn servicer_digest(&self) -> Hash32 {
        blake3_domain(
            RELAY_SERVICER_DOMAIN,
            &[
                &self.request_digest(),
                &self.requester_signature.0,
                &self.service_node_public_key.0,
            ],
        )
    }

    /// Identität des Relays für Merkle-Leaves und Anti-Replay.
    /// Unabhängig von Signaturen und Servicer: derselbe Request zählt genau einmal.
    pub fn receipt_hash(&self) -> Hash32 {
        blake3_domain(RECEIPT_DOMAIN, &[&self.request_digest()])
    }

    pub fn leaf(&self) -> SumNode {
        sum_leaf(&self.receipt_hash(), 1)
    }

    pub fn servicer_address(&self) -> Address {
        self.service_node_public_key.address()
    }

    pub fn requester_signature_valid(&self) -> bool {
        schnorr_verify(
            &self.request_digest(),
            &self.requester_signature.0,
            &self.session_header.app_public_key.0,
        )
    }

    pub fn servicer_signature_valid(&self) -> bool {
        schnorr_verify(
            &self.servicer_digest(),
            &self.service_node_signature.0,
            &self.service_node_public_key.0,
        )
    }

    /// Erzeugt eine vollständig signierte Quittung (Anwendung + Service-Node)
    pub fn new_signed(
        session_header: SessionHeader,
        entropy_nonce: u64,
        payload_hash: Hash32,
        app: &SchnorrKeypair,
        servicer: &SchnorrKeypair,
    ) -> Self {
        let mut r = Self {
            session_header,
            entropy_nonce,
            payload_hash,
            service_node_public_key: PublicKey::from_keypair(servicer),
            requester_signature: Signature::EMPTY,
            service_node_signature: Signature::EMPTY,
        };
        r.requester_signature = Signature(schnorr_sign(&r.request_digest(), app));
        r.service_node_signature = Signature(schnorr_sign(&r.servicer_digest(), servicer));
        r
    }
}

impl Encodable for RelayReceipt {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.session_header.encode(w)?;
        self.entropy_nonce.encode(w)?;
        self.payload_hash.encode(w)?;
        self.service_node_public_key.encode(w)?;
        self.requester_signature.encode(w)?;
        self.service_node_signature.encode(w)
    }
    fn encoded_len(&self) -> usize {
        self.session_header.encoded_len() + self.entropy_nonce.encoded_len() + 32 + 32 + 64 + 64
    }
}
impl Decodable for RelayReceipt {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            session_header: SessionHeader::decode(r)?,
            entropy_nonce: u64::decode(r)?,
            payload_hash: <[u8; 32]>::decode(r)?,
            service_node_public_key: PublicKey::decode(r)?,
            requester_signature: Signature::decode(r)?,
            service_node_signature: Signature::decode(r)?,
        })
    }
}

// ============================
// Claim
// ============================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimState {
    Pending,
    Proven,
    Expired,
}
impl ClaimState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ClaimState::Pending)
    }
}
impl Encodable for ClaimState {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        let tag: u8 = match self {
            ClaimState::Pending => 0,
            ClaimState::Proven => 1,
            ClaimState::Expired => 2,
        };
        tag.encode(w)
    }
    fn encoded_len(&self) -> usize {
        1
    }
}
impl Decodable for ClaimState {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        match u8::decode(r)? {
            0 => Ok(ClaimState::Pending),
            1 => Ok(ClaimState::Proven),
            2 => Ok(ClaimState::Expired),
            t => Err(CodecError::InvalidTag(t)),
        }
    }
}

/// Eindeutiger Schlüssel eines Claims: (Session, Einreicher)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClaimKey {
    pub header: SessionHeader,
    pub submitter: Address,
}
impl ClaimKey {
    pub fn digest(&self) -> Hash32 {
        digest_encoded(CLAIM_KEY_DOMAIN, self)
    }
}
impl Encodable for ClaimKey {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.header.encode(w)?;
        self.submitter.encode(w)
    }
    fn encoded_len(&self) -> usize {
        self.header.encoded_len() + 20
    }
}
impl Decodable for ClaimKey {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            header: SessionHeader::decode(r)?,
            submitter: Address::decode(r)?,
        })
    }
}

/// On-Chain-Eintrag pro (Session, Service-Node)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    pub session_header: SessionHeader,
    pub submitter: Address,
    pub merkle_root: Hash32,
    pub total_relays: u64,
    pub submitted_at_height: Height,
    /// Ende des Proof-Fensters, festgelegt bei Annahme
    pub expires_at: Height,
    /// ab dieser Höhe wird der Claim entfernt, festgelegt bei Annahme
    pub prune_at: Height,
    pub state: ClaimState,
}
impl Claim {
    pub fn key(&self) -> ClaimKey {
        ClaimKey {
            header: self.session_header.clone(),
            submitter: self.submitter,
        }
    }
}
impl Encodable for Claim {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.session_header.encode(w)?;
        self.submitter.encode(w)?;
        self.merkle_root.encode(w)?;
        self.total_relays.encode(w)?;
        self.submitted_at_height.encode(w)?;
        self.expires_at.encode(w)?;
        self.prune_at.encode(w)?;
        self.state.encode(w)
    }
    fn encoded_len(&self) -> usize {
        self.session_header.encoded_len()
            + 20
            + 32
            + self.total_relays.encoded_len()
            + self.submitted_at_height.encoded_len()
            + self.expires_at.encoded_len()
            + self.prune_at.encoded_len()
            + 1
    }
}
impl Decodable for Claim {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            session_header: SessionHeader::decode(r)?,
            submitter: Address::decode(r)?,
            merkle_root: <[u8; 32]>::decode(r)?,
            total_relays: u64::decode(r)?,
            submitted_at_height: u64::decode(r)?,
            expires_at: u64::decode(r)?,
            prune_at: u64::decode(r)?,
            state: ClaimState::decode(r)?,
        })
    }
}

/// Claim-Transaktion eines Service-Nodes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimMsg {
    pub header: SessionHeader,
    pub merkle_root: Hash32,
    pub total_relays: u64,
    pub submitter: Address,
    pub signer_public_key: PublicKey,
    pub signature: Signature,
}

impl ClaimMsg {
    pub fn new_signed(
        header: SessionHeader,
        root: SumNode,
        kp: &SchnorrKeypair,
    ) -> Self {
        let pk = PublicKey::from_keypair(kp);
        let mut m = Self {
            header,
            merkle_root: root.hash,
            total_relays: root.sum,
            submitter: pk.address(),
            signer_public_key: pk,
            signature: Signature::EMPTY,
        };
        m.signature = Signature(schnorr_sign(&m.sign_digest(), kp));
        m
    }

    pub fn key(&self) -> ClaimKey {
        ClaimKey {
            header: self.header.clone(),
            submitter: self.submitter,
        }
    }

    pub fn sign_digest(&self) -> Hash32 {
        let mut buf = Vec::with_capacity(self.encoded_len());
        let _ = self.header.encode(&mut buf);
        let _ = self.merkle_root.encode(&mut buf);
        let _ = self.total_relays.encode(&mut buf);
        let _ = self.submitter.encode(&mut buf);
        let _ = self.signer_public_key.encode(&mut buf);
        blake3_domain(CLAIM_MSG_DOMAIN, &[&buf])
    }

    /// Signer-Key muss zur Einreicher-Adresse gehören und die Signatur tragen
    pub fn signature_valid(&self) -> bool {
        self.signer_public_key.address() == self.submitter
            && schnorr_verify(
                &self.sign_digest(),
                &self.signature.0,
                &self.signer_public_key.0,
            )
    }
}
impl Encodable for ClaimMsg {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.header.encode(w)?;
        self.merkle_root.encode(w)?;
        self.total_relays.encode(w)?;
        self.submitter.encode(w)?;
        self.signer_public_key.encode(w)?;
        self.signature.encode(w)
    }
    fn encoded_len(&self) -> usize {
        self.header.encoded_len() + 32 + self.total_relays.encoded_len() + 20 + 32 + 64
    }
}
impl Decodable for ClaimMsg {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            header: SessionHeader::decode(r)?,
            merkle_root: <[u8; 32]>::decode(r)?,
            total_relays: u64::decode(r)?,
            submitter: Address::decode(r)?,
            signer_public_key: PublicKey::decode(r)?,
            signature: Signature::decode(r)?,
        })
    }
}

// ============================
// Proof
// ============================

/// Offengelegtes Leaf samt Branch (Geschwister von unten nach oben)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisclosedLeaf {
    pub index: u64,
    pub branch: Vec<SumNode>,
    pub receipt: RelayReceipt,
}
impl Encodable for DisclosedLeaf {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.index.encode(w)?;
        self.branch.encode(w)?;
        self.receipt.encode(w)
    }
    fn encoded_len(&self) -> usize {
        self.index.encoded_len() + self.branch.encoded_len() + self.receipt.encoded_len()
    }
}
impl Decodable for DisclosedLeaf {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            index: u64::decode(r)?,
            branch: Vec::<SumNode>::decode(r)?,
            receipt: RelayReceipt::decode(r)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofMsg {
    pub claim: ClaimKey,
    pub leaves: Vec<DisclosedLeaf>,
    pub signer_public_key: PublicKey,
    pub signature: Signature,
}

impl ProofMsg {
    pub fn new_signed(claim: ClaimKey, leaves: Vec<DisclosedLeaf>, kp: &SchnorrKeypair) -> Self {
        let mut m = Self {
            claim,
            leaves,
            signer_public_key: PublicKey::from_keypair(kp),
            signature: Signature::EMPTY,
        };
        m.signature = Signature(schnorr_sign(&m.sign_digest(), kp));
        m
    }

    pub fn sign_digest(&self) -> Hash32 {
        let mut buf = Vec::with_capacity(self.encoded_len());
        let _ = self.claim.encode(&mut buf);
        let _ = self.leaves.encode(&mut buf);
        let _ = self.signer_public_key.encode(&mut buf);
        blake3_domain(PROOF_MSG_DOMAIN, &[&buf])
    }

    /// Nur der Einreicher des Claims darf ihn beweisen
    pub fn signature_valid(&self) -> bool {
        self.signer_public_key.address() == self.claim.submitter
            && schnorr_verify(
                &self.sign_digest(),
                &self.signature.0,
                &self.signer_public_key.0,
            )
    }
}
impl Encodable for ProofMsg {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.claim.encode(w)?;
        self.leaves.encode(w)?;
        self.signer_public_key.encode(w)?;
        self.signature.encode(w)
    }
    fn encoded_len(&self) -> usize {
        self.claim.encoded_len() + self.leaves.encoded_len() + 32 + 64
    }
}
impl Decodable for ProofMsg {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            claim: ClaimKey::decode(r)?,
            leaves: Vec::<DisclosedLeaf>::decode(r)?,
            signer_public_key: PublicKey::decode(r)?,
            signature: Signature::decode(r)?,
        })
    }
}

// ============================
// Anti-Replay
// ============================

/// Marker pro bereits belohntem Receipt-Hash
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayMarker {
    /// `ClaimKey::digest()` des Claims, der das Receipt verbraucht hat
    pub claim: Hash32,
    pub session_start_height: Height,
    pub recorded_at: Height,
    /// `prune_at` des verbrauchenden Claims
    pub prune_at: Height,
}
impl Encodable for ReplayMarker {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.claim.encode(w)?;
        self.session_start_height.encode(w)?;
        self.recorded_at.encode(w)?;
        self.prune_at.encode(w)
    }
    fn encoded_len(&self) -> usize {
        32 + self.session_start_height.encoded_len()
            + self.recorded_at.encoded_len()
            + self.prune_at.encoded_len()
    }
}
impl Decodable for ReplayMarker {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            claim: <[u8; 32]>::decode(r)?,
            session_start_height: u64::decode(r)?,
            recorded_at: u64::decode(r)?,
            prune_at: u64::decode(r)?,
        })
    }
}

// ============================
// Transaktionen
// ============================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayTx {
    Claim(ClaimMsg),
    Proof(ProofMsg),
}
impl Encodable for RelayTx {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        match self {
            RelayTx::Claim(c) => {
                0u8.encode(w)?;
                c.encode(w)
            }
            RelayTx::Proof(p) => {
                1u8.encode(w)?;
                p.encode(w)
            }
        }
    }
    fn encoded_len(&self) -> usize {
        1 + match self {
            RelayTx::Claim(c) => c.encoded_len(),
            RelayTx::Proof(p) => p.encoded_len(),
        }
    }
}
impl Decodable for RelayTx {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        match u8::decode(r)? {
            0 => Ok(RelayTx::Claim(ClaimMsg::decode(r)?)),
            1 => Ok(RelayTx::Proof(ProofMsg::decode(r)?)),
            t => Err(CodecError::InvalidTag(t)),
        }
    }
}

// ============================
// Stateless Sanity
// ============================

pub fn validate_chain_id(c: &ChainId) -> Result<(), &'static str> {
    validate_chain_id_str(c.as_str())
}

pub fn validate_claim_sanity(m: &ClaimMsg) -> Result<(), &'static str> {
    validate_chain_id(&m.header.chain_id)?;
    if m.total_relays == 0 {
        return Err("zero relays");
    }
    if m.merkle_root == ZERO_HASH {
        return Err("zero merkle root");
    }
    Ok(())
}

pub fn validate_proof_sanity(p: &ProofMsg) -> Result<(), &'static str> {
    validate_chain_id(&p.claim.header.chain_id)?;
    if p.leaves.len() > MAX_PROOF_LEAVES {
        return Err("too many disclosed leaves");
    }
    for l in &p.leaves {
        if l.branch.len() > MAX_BRANCH_LEN {
            return Err("branch too long");
        }
    }
    Ok(())
}
