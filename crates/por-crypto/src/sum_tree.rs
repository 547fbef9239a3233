// SPDX-License-Identifier: AGPL-3.0-only

//! Merkle-Summenbaum: jeder Knoten trägt neben dem Hash die Summe der Gewichte darunter
//! sowie den kleinsten und größten Leaf-Wert seines Teilbaums. Die Root bindet damit Inhalt,
//! Anzahl *und* Reihenfolge; über die kumulativen Summen wird ein Ziel-Wert in `[0, root.sum)`
//! eindeutig einem Leaf zugeordnet.
//!
//! Geschwister müssen streng aufsteigend sein (`left.max < right.min`). Jeder geprüfte Branch
//! erzwingt das entlang seines Pfads; doppelte Leaves fallen daher bei jeder Prüfung auf,
//! die eines davon trifft.
//!
//! Form: Paare werden links→rechts zusammengefasst, ein ungerades letztes Element wird
//! unverändert eine Ebene nach oben gereicht (keine Duplikation, die Summe bliebe sonst nicht erhalten).

use crate::{blake3_domain, Hash32, ZERO_HASH};
use por_codec::{CodecError, Decodable, Encodable};
use std::collections::BTreeSet;
use std::io::{Read, Write};

const SUM_LEAF_DOMAIN: &[u8] = b"por:sum:leaf:v1\x01";
const SUM_PAIR_DOMAIN: &[u8] = b"por:sum:pair:v1\x01";
const SAMPLE_INDEX_DOMAIN: &[u8] = b"por:proof:index:v1\x01";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct SumNode {
    pub hash: Hash32,
    pub sum: u64,
    /// kleinster Leaf-Wert im Teilbaum
    pub min: Hash32,
    /// größter Leaf-Wert im Teilbaum
    pub max: Hash32,
}

impl SumNode {
    pub const EMPTY: SumNode = SumNode { hash: ZERO_HASH, sum: 0, min: ZERO_HASH, max: ZERO_HASH };
}

impl Encodable for SumNode {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.hash.encode(w)?;
        self.sum.encode(w)?;
        self.min.encode(w)?;
        self.max.encode(w)
    }
    fn encoded_len(&self) -> usize {
        32 + self.sum.encoded_len() + 64
    }
}
impl Decodable for SumNode {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            hash: <[u8; 32]>::decode(r)?,
            sum: u64::decode(r)?,
            min: <[u8; 32]>::decode(r)?,
            max: <[u8; 32]>::decode(r)?,
        })
    }
}

/// Leaf: H(domain || data(32) || weight_le(8)), sum = weight, min = max = data
pub fn sum_leaf(data: &Hash32, weight: u64) -> SumNode {
    SumNode {
        hash: blake3_domain(SUM_LEAF_DOMAIN, &[data, &weight.to_le_bytes()]),
        sum: weight,
        min: *data,
        max: *data,
    }
}

/// Paar-Hash ohne Ordnungsprüfung:
/// H(domain || l.hash || l.sum_le || l.min || l.max || r.hash || r.sum_le || r.min || r.max)
pub fn sum_pair_hash(left: &SumNode, right: &SumNode) -> Hash32 {
    blake3_domain(
        SUM_PAIR_DOMAIN,
        &[
            &left.hash,
            &left.sum.to_le_bytes(),
            &left.min,
            &left.max,
            &right.hash,
            &right.sum.to_le_bytes(),
            &right.min,
            &right.max,
        ],
    )
}

/// Innerer Knoten; `None`, wenn die Bereiche nicht streng aufsteigend sind
pub fn sum_parent(left: &SumNode, right: &SumNode) -> Option<SumNode> {
    if left.min > left.max || right.min > right.max || left.max >= right.min {
        return None;
    }
    Some(SumNode {
        hash: sum_pair_hash(left, right),
        sum: left.sum.checked_add(right.sum)?,
        min: left.min,
        max: right.max,
    })
}

fn next_level(level: &[SumNode]) -> Option<Vec<SumNode>> {
    let mut next = Vec::with_capacity(level.len().div_ceil(2));
    for pair in level.chunks(2) {
        match pair {
            [l, r] => next.push(sum_parent(l, r)?),
            [single] => next.push(*single),
            _ => {}
        }
    }
    Some(next)
}

/// Vollständig materialisierter Baum (nur off-chain, beim Erzeuger der Evidenz)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SumTree {
    // levels[0] = Leaves, letzte Ebene = Root
    levels: Vec<Vec<SumNode>>,
}

impl SumTree {
    /// `None`, wenn die Leaves nicht streng aufsteigend nach Wert sind (auch bei Duplikaten)
    pub fn from_leaves(leaves: Vec<SumNode>) -> Option<Self> {
        let mut levels = vec![leaves];
        loop {
            let next = match levels.last() {
                Some(cur) if cur.len() > 1 => next_level(cur)?,
                _ => break,
            };
            levels.push(next);
        }
        Some(Self { levels })
    }

    pub fn root(&self) -> SumNode {
        self.levels
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or(SumNode::EMPTY)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }

    pub fn leaf(&self, index: usize) -> Option<SumNode> {
        self.levels.first().and_then(|l| l.get(index)).copied()
    }

    /// Geschwister-Knoten von unten nach oben; beförderte Ebenen tragen kein Element bei
    pub fn branch(&self, index: usize) -> Option<Vec<SumNode>> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut out = Vec::new();
        let mut pos = index;
        for level in &self.levels {
            if let Some(sib) = level.get(pos ^ 1) {
                out.push(*sib);
            }
            pos /= 2;
        }
        Some(out)
    }

    /// Ordnet einen Zielwert `target < root.sum` dem Leaf zu, dessen kumulatives
    /// Intervall `[offset, offset + sum)` ihn enthält.
    pub fn locate(&self, target: u64) -> Option<usize> {
        if target >= self.root().sum {
            return None;
        }
        let mut pos = 0usize;
        let mut rest = target;
        for level in self.levels.iter().rev().skip(1) {
            let left_pos = pos.checked_mul(2)?;
            let left = level.get(left_pos)?;
            match level.get(left_pos + 1) {
                Some(_) if rest >= left.sum => {
                    rest -= left.sum;
                    pos = left_pos + 1;
                }
                _ => pos = left_pos,
            }
        }
        Some(pos)
    }
}

/// Ergebnis einer Branch-Rekonstruktion
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BranchCheck {
    /// rekonstruierte Root (Hash + Gesamtsumme)
    pub root: SumNode,
    /// Summe aller links vom Leaf liegenden Gewichte
    pub offset: u64,
}

/// Rekonstruiert die Root aus Leaf + Branch. Die Baumform ist durch `leaf_count` und `index`
/// vollständig bestimmt; ein Branch mit zu vielen oder zu wenigen Elementen wird abgelehnt,
/// ebenso jedes Paar, dessen Bereiche sich überlappen oder falsch herum liegen.
pub fn verify_sum_branch(
    leaf_count: u64,
    index: u64,
    leaf: SumNode,
    branch: &[SumNode],
) -> Option<BranchCheck> {
    if index >= leaf_count {
        return None;
    }
    let mut node = leaf;
    let mut pos = index;
    let mut n = leaf_count;
    let mut offset = 0u64;
    let mut it = branch.iter();
    while n > 1 {
        if pos % 2 == 1 {
            let sib = it.next()?;
            offset = offset.checked_add(sib.sum)?;
            node = sum_parent(sib, &node)?;
        } else if pos + 1 < n {
            let sib = it.next()?;
            node = sum_parent(&node, sib)?;
        }
        pos /= 2;
        n = n.div_ceil(2);
    }
    if it.next().is_some() {
        return None;
    }
    Some(BranchCheck { root: node, offset })
}

fn first_u64_be(h: &Hash32) -> u64 {
    let mut b = [0u8; 8];
    for (d, s) in b.iter_mut().zip(h.iter()) {
        *d = *s;
    }
    u64::from_be_bytes(b)
}

/// Leitet `count` paarweise verschiedene Prüf-Indizes in `[0, total)` ab.
/// h0 = H(domain || root || entropy); ziel_i = be_u64(h_i[0..8]) mod total; h_{i+1} = H(domain || h_i).
/// Bereits gezogene Ziele werden übersprungen; Reihenfolge = Ableitungsreihenfolge.
pub fn sample_indices(root: &Hash32, entropy: &Hash32, total: u64, count: u64) -> Vec<u64> {
    if total == 0 || count == 0 {
        return Vec::new();
    }
    let want = count.min(total);
    let mut seen: BTreeSet<u64> = BTreeSet::new();
    let mut out: Vec<u64> = Vec::with_capacity(usize::try_from(want).unwrap_or(0).min(1024));
    let mut h = blake3_domain(SAMPLE_INDEX_DOMAIN, &[root, entropy]);
    while (out.len() as u64) < want {
        let idx = first_u64_be(&h) % total;
        if seen.insert(idx) {
            out.push(idx);
        }
        h = blake3_domain(SAMPLE_INDEX_DOMAIN, &[&h]);
    }
    out
}
