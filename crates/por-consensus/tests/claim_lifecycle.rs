// SPDX-License-Identifier: AGPL-3.0-only

use por_codec::encode_to_vec;
use por_consensus::{
    BlockEnv, ChainView, InMemoryChain, InMemoryStaking, ParamKey, ParamRegistry, ParamUpdate,
    PorError, ProofOfRelayParams, RelayEvent, RelayModule, StakingKeeper,
};
use por_crypto::{
    blake3_32, sample_indices, sum_pair_hash, Hash32, SchnorrKeypair, SumNode, SumTree, ZERO_HASH,
};
use por_session::NodeCandidate;
use por_state::{InMemoryBackend, KvPair, StateBackend, StateError, PREFIX_CLAIM};
use por_types::{
    Address, ChainId, Claim, ClaimMsg, ClaimState, DisclosedLeaf, ProofMsg, PublicKey,
    RelayReceipt, RelayTx, SessionHeader,
};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

// freq=4, waiting=2, window=3 → Session ab 4: Claim-Fenster [10, 13)
const START: u64 = 4;
const OPEN: u64 = 10;
const CLOSE: u64 = 13;
const EXPIRATION: u64 = 10;
const STAKE: u64 = 1_000;

fn chain() -> ChainId {
    ChainId::new("0021").expect("chain")
}

fn kp(tag: &str) -> SchnorrKeypair {
    SchnorrKeypair::from_secret_key_bytes(&blake3_32(tag.as_bytes())).expect("seckey")
}

fn addr(k: &SchnorrKeypair) -> Address {
    PublicKey::from_keypair(k).address()
}

fn params() -> ProofOfRelayParams {
    ProofOfRelayParams {
        session_node_count: 8,
        session_block_frequency: 4,
        proof_waiting_period: 2,
        claim_submission_window: 3,
        claim_expiration: EXPIRATION,
        minimum_number_of_proofs: 2,
        replay_attack_burn_multiplier: 3,
        relays_to_tokens_multiplier: 100,
        supported_blockchains: vec![chain()],
    }
}

struct Net {
    app: SchnorrKeypair,
    nodes: Vec<SchnorrKeypair>,
    staking: InMemoryStaking,
    chain: InMemoryChain,
    module: RelayModule<InMemoryBackend>,
}

impl Net {
    fn with(params: ProofOfRelayParams, stake: u64) -> Self {
        let nodes: Vec<SchnorrKeypair> = (0..8).map(|i| kp(&format!("node-{i}"))).collect();
        let staking = InMemoryStaking::new(nodes.iter().map(|k| NodeCandidate {
            address: addr(k),
            stake,
            jailed: false,
            chains: vec![chain()],
        }));
        let registry = ParamRegistry::new(params, BTreeMap::new()).expect("registry");
        Self {
            app: kp("app"),
            nodes,
            staking,
            chain: InMemoryChain::synthetic(200),
            module: RelayModule::new(InMemoryBackend::new(), registry),
        }
    }

    fn new() -> Self {
        Self::with(params(), STAKE)
    }

    fn node(&self, i: usize) -> &SchnorrKeypair {
        self.nodes.get(i).expect("node")
    }

    fn header(&self) -> SessionHeader {
        SessionHeader {
            chain_id: chain(),
            app_public_key: PublicKey::from_keypair(&self.app),
            session_start_height: START,
        }
    }

    fn claim(&mut self, height: u64, msg: &ClaimMsg) -> Result<Claim, PorError> {
        let mut env = BlockEnv { height, chain: &self.chain, staking: &mut self.staking };
        self.module.deliver_claim(msg, &mut env)
    }

    fn prove(&mut self, height: u64, msg: &ProofMsg) -> Result<u64, PorError> {
        let mut env = BlockEnv { height, chain: &self.chain, staking: &mut self.staking };
        self.module.deliver_proof(msg, &mut env).map(|o| o.reward)
    }

    fn entropy(&self, height: u64) -> Hash32 {
        self.chain.block_hash(height).expect("block hash")
    }
}

/// Evidenz eines Service-Nodes: Receipts nach Hash sortiert, Summenbaum darüber
struct Evidence {
    receipts: Vec<RelayReceipt>,
    tree: SumTree,
}

impl Evidence {
    fn from_receipts(mut receipts: Vec<RelayReceipt>) -> Self {
        receipts.sort_by_key(|r| r.receipt_hash());
        let tree = SumTree::from_leaves(receipts.iter().map(|r| r.leaf()).collect())
            .expect("ordered leaves");
        Self { receipts, tree }
    }

    fn build(net: &Net, node: &SchnorrKeypair, nonces: std::ops::Range<u64>) -> Self {
        let receipts = nonces
            .map(|n| {
                RelayReceipt::new_signed(net.header(), n, blake3_32(&n.to_le_bytes()), &net.app, node)
            })
            .collect();
        Self::from_receipts(receipts)
    }

    fn claim_msg(&self, header: SessionHeader, node: &SchnorrKeypair) -> ClaimMsg {
        ClaimMsg::new_signed(header, self.tree.root(), node)
    }

    fn proof_msg(&self, claim: &ClaimMsg, entropy: &Hash32, min: u64, node: &SchnorrKeypair) -> ProofMsg {
        let root = self.tree.root();
        let leaves = sample_indices(&root.hash, entropy, root.sum, min)
            .into_iter()
            .map(|i| DisclosedLeaf {
                index: i,
                branch: self.tree.branch(i as usize).expect("branch"),
                receipt: self.receipts.get(i as usize).expect("receipt").clone(),
            })
            .collect();
        ProofMsg::new_signed(claim.key(), leaves, node)
    }
}

#[test]
fn claim_window_is_inclusive_at_open_and_exclusive_at_close() {
    let mut net = Net::new();
    let msgs: Vec<ClaimMsg> = (0..4)
        .map(|i| {
            let node = net.node(i);
            Evidence::build(&net, node, (i as u64 * 100)..(i as u64 * 100 + 3)).claim_msg(net.header(), node)
        })
        .collect();

    let early = net.claim(OPEN - 1, &msgs[0]);
    assert!(matches!(early, Err(PorError::Window { height: 9, open: OPEN, close: CLOSE })));

    let c = net.claim(OPEN, &msgs[0]).expect("accepted at open");
    assert_eq!(c.state, ClaimState::Pending);
    assert_eq!(c.submitted_at_height, OPEN);
    assert_eq!(c.total_relays, 3);

    net.claim(CLOSE - 1, &msgs[1]).expect("accepted at close-1");

    let late = net.claim(CLOSE, &msgs[2]);
    assert!(matches!(late, Err(PorError::Window { .. })));
}

#[test]
fn duplicate_claim_rejected_and_state_untouched() {
    let mut net = Net::new();
    let node = net.node(0);
    let ev = Evidence::build(&net, node, 0..3);
    let msg = ev.claim_msg(net.header(), node);
    net.claim(OPEN, &msg).expect("first");
    let before = net.module.app_hash().expect("hash");
    let dup = net.claim(OPEN + 1, &msg);
    assert!(matches!(dup, Err(PorError::DuplicateClaim)));
    assert_eq!(net.module.app_hash().expect("hash"), before);
}

#[test]
fn claim_checks_reject_bad_inputs() {
    let mut net = Net::new();
    let node = kp("node-0");
    let ev = Evidence::build(&net, &node, 0..3);

    // falsche Chain
    let mut h = net.header();
    h.chain_id = ChainId::new("0099").expect("chain");
    assert!(matches!(
        net.claim(OPEN, &ev.claim_msg(h, &node)),
        Err(PorError::UnsupportedChain(_))
    ));

    // Start nicht auf Session-Grenze
    let mut h = net.header();
    h.session_start_height = 5;
    assert!(matches!(
        net.claim(OPEN, &ev.claim_msg(h, &node)),
        Err(PorError::MalformedClaim(_))
    ));

    // manipulierte Relay-Anzahl bricht die Signatur
    let mut msg = ev.claim_msg(net.header(), &node);
    msg.total_relays += 1;
    assert!(matches!(net.claim(OPEN, &msg), Err(PorError::Signature(_))));

    // leerer Claim
    let mut empty = ev.claim_msg(net.header(), &node);
    empty.merkle_root = ZERO_HASH;
    assert!(matches!(net.claim(OPEN, &empty), Err(PorError::MalformedClaim(_))));

    // eingesperrter Knoten
    net.staking.set_jailed(&addr(&node), true);
    assert!(matches!(
        net.claim(OPEN, &ev.claim_msg(net.header(), &node)),
        Err(PorError::NotStaked(_))
    ));

    // unbekannter Knoten
    let outsider = kp("outsider");
    let ev2 = Evidence::build(&net, &outsider, 0..3);
    assert!(matches!(
        net.claim(OPEN, &ev2.claim_msg(net.header(), &outsider)),
        Err(PorError::NotStaked(_))
    ));
}

#[test]
fn submitter_outside_session_gets_selection_error() {
    let mut net = Net::with(ProofOfRelayParams { session_node_count: 2, ..params() }, STAKE);
    let header = net.header();
    let session = {
        let Net { module, chain, staking, .. } = &mut net;
        module.session(&header, chain, staking).expect("session")
    };
    assert_eq!(session.service_nodes.len(), 2);
    let outsider = net
        .nodes
        .iter()
        .find(|k| !session.contains(&addr(k)))
        .expect("someone is not selected")
        .clone();
    let ev = Evidence::build(&net, &outsider, 0..3);
    let res = net.claim(OPEN, &ev.claim_msg(header, &outsider));
    assert!(matches!(res, Err(PorError::Selection { .. })));
}

#[test]
fn same_root_under_other_submitter_is_replay_without_burn() {
    let mut net = Net::new();
    let a = net.node(0).clone();
    let b = net.node(1).clone();
    let ev = Evidence::build(&net, &a, 0..3);
    net.claim(OPEN, &ev.claim_msg(net.header(), &a)).expect("a");
    let copied = ClaimMsg::new_signed(net.header(), ev.tree.root(), &b);
    assert!(matches!(net.claim(OPEN, &copied), Err(PorError::Replay { .. })));
    assert_eq!(net.staking.stake_of(&addr(&b)), STAKE);
    assert!(net.module.take_events().is_empty());
}

#[test]
fn valid_proof_rewards_and_finalizes() {
    let mut net = Net::new();
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..5);
    let claim = ev.claim_msg(net.header(), &node);
    net.claim(OPEN, &claim).expect("claim");

    let proof = ev.proof_msg(&claim, &net.entropy(OPEN), 2, &node);
    assert_eq!(proof.leaves.len(), 2);
    assert_eq!(net.prove(OPEN + 1, &proof).expect("proof"), 500);
    assert_eq!(net.staking.rewards_of(&addr(&node)), 500);

    let stored = net.module.state().get_claim(&claim.key()).expect("get").expect("some");
    assert_eq!(stored.state, ClaimState::Proven);
    assert_eq!(net.module.state().markers().expect("markers").len(), 2);
    assert_eq!(
        net.module.take_events(),
        vec![RelayEvent::Reward { claim: claim.key(), relays: 5, amount: 500 }]
    );

    assert!(matches!(
        net.prove(OPEN + 2, &proof),
        Err(PorError::ClaimNotPending(ClaimState::Proven))
    ));
}

#[test]
fn proof_needs_entropy_block() {
    let mut net = Net::new();
    net.chain = InMemoryChain::synthetic(OPEN - 1);
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..5);
    let claim = ev.claim_msg(net.header(), &node);
    net.claim(OPEN, &claim).expect("claim");

    let guess = ev.proof_msg(&claim, &[0u8; 32], 2, &node);
    let err = net.prove(OPEN, &guess).expect_err("no entropy yet");
    assert!(matches!(err, PorError::EntropyUnavailable(OPEN)));
    assert!(err.is_retryable());

    net.chain.insert(OPEN, blake3_32(b"block@10"));
    let proof = ev.proof_msg(&claim, &net.entropy(OPEN), 2, &node);
    net.prove(OPEN + 1, &proof).expect("proof with real entropy");
}

#[test]
fn wrong_indices_rejected() {
    let mut net = Net::new();
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..6);
    let claim = ev.claim_msg(net.header(), &node);
    net.claim(OPEN, &claim).expect("claim");

    let good = ev.proof_msg(&claim, &net.entropy(OPEN), 2, &node);
    let mut leaves = good.leaves.clone();
    leaves.reverse();
    let swapped = ProofMsg::new_signed(claim.key(), leaves, &node);
    assert!(matches!(net.prove(OPEN + 1, &swapped), Err(PorError::ProofIndexMismatch { .. })));

    let short = ProofMsg::new_signed(claim.key(), good.leaves[..1].to_vec(), &node);
    assert!(matches!(net.prove(OPEN + 1, &short), Err(PorError::ProofIndexMismatch { .. })));

    // Proof einer anderen Entropie
    let other = ev.proof_msg(&claim, &net.entropy(OPEN + 1), 2, &node);
    if other.leaves.iter().map(|l| l.index).ne(good.leaves.iter().map(|l| l.index)) {
        assert!(matches!(net.prove(OPEN + 1, &other), Err(PorError::ProofIndexMismatch { .. })));
    }
    net.prove(OPEN + 1, &good).expect("good proof still accepted");
}

#[test]
fn single_byte_mutation_fails_merkle_check() {
    let mut net = Net::new();
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..7);
    let claim = ev.claim_msg(net.header(), &node);
    net.claim(OPEN, &claim).expect("claim");
    let good = ev.proof_msg(&claim, &net.entropy(OPEN), 2, &node);

    let mut leaves = good.leaves.clone();
    if let Some(sib) = leaves.get_mut(0).and_then(|l| l.branch.get_mut(0)) {
        sib.hash[5] ^= 0x01;
    }
    let bad_branch = ProofMsg::new_signed(claim.key(), leaves, &node);
    assert!(matches!(net.prove(OPEN + 1, &bad_branch), Err(PorError::MerkleVerification { .. })));

    let mut leaves = good.leaves.clone();
    if let Some(l) = leaves.get_mut(1) {
        l.receipt.payload_hash[0] ^= 0x80;
    }
    let bad_leaf = ProofMsg::new_signed(claim.key(), leaves, &node);
    assert!(matches!(net.prove(OPEN + 1, &bad_leaf), Err(PorError::MerkleVerification { .. })));

    // Claim bleibt Pending und ist weiterhin beweisbar
    net.prove(OPEN + 1, &good).expect("good proof");
}

#[test]
fn foreign_signer_cannot_prove() {
    let mut net = Net::new();
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..3);
    let claim = ev.claim_msg(net.header(), &node);
    net.claim(OPEN, &claim).expect("claim");
    let thief = net.node(1).clone();
    let stolen = ev.proof_msg(&claim, &net.entropy(OPEN), 2, &thief);
    assert!(matches!(net.prove(OPEN + 1, &stolen), Err(PorError::Signature(_))));
}

#[test]
fn claim_expires_exactly_at_deadline_and_cannot_be_proven() {
    let mut net = Net::new();
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..4);
    let claim = ev.claim_msg(net.header(), &node);
    net.claim(OPEN, &claim).expect("claim");
    let proof = ev.proof_msg(&claim, &net.entropy(OPEN), 2, &node);

    let deadline = OPEN + EXPIRATION;
    for h in OPEN..deadline {
        assert_eq!(net.module.end_block(h).expect("sweep").expired, 0);
    }
    let state = |net: &Net| {
        net.module.state().get_claim(&claim.key()).expect("get").expect("some").state
    };
    assert_eq!(state(&net), ClaimState::Pending);

    // am Stichtag ist das Proof-Fenster schon zu
    assert!(matches!(net.prove(deadline, &proof), Err(PorError::Window { .. })));

    assert_eq!(net.module.end_block(deadline).expect("sweep").expired, 1);
    assert_eq!(state(&net), ClaimState::Expired);
    assert_eq!(
        net.module.take_events(),
        vec![RelayEvent::ClaimExpired { claim: claim.key() }]
    );
    // idempotent
    assert_eq!(net.module.end_block(deadline).expect("sweep").expired, 0);
    assert!(matches!(
        net.prove(deadline, &proof),
        Err(PorError::ClaimNotPending(ClaimState::Expired))
    ));
    assert_eq!(net.staking.rewards_of(&addr(&node)), 0);
    assert_eq!(net.staking.stake_of(&addr(&node)), STAKE);
}

#[test]
fn expired_claim_can_be_resubmitted_within_window() {
    let p = ProofOfRelayParams { claim_expiration: 1, ..params() };
    let mut net = Net::with(p, STAKE);
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..3);
    let claim = ev.claim_msg(net.header(), &node);
    net.claim(OPEN, &claim).expect("claim");
    net.module.end_block(OPEN + 1).expect("sweep");
    net.claim(OPEN + 2, &claim).expect("resubmit after expiry");
}

#[test]
fn replayed_receipt_burns_exactly_once() {
    let mut net = Net::new();
    let a = net.node(0).clone();
    let b = net.node(1).clone();
    // Derselbe Request (Nonce 1000) von zwei Servicern gegengezeichnet
    let shared = |srv: &SchnorrKeypair, net: &Net| {
        RelayReceipt::new_signed(net.header(), 1000, blake3_32(b"shared"), &net.app, srv)
    };
    let own = |srv: &SchnorrKeypair, net: &Net, n: u64| {
        RelayReceipt::new_signed(net.header(), n, blake3_32(&n.to_le_bytes()), &net.app, srv)
    };
    let ev_a = Evidence::from_receipts(vec![shared(&a, &net), own(&a, &net, 1)]);
    let ev_b = Evidence::from_receipts(vec![shared(&b, &net), own(&b, &net, 2)]);
    assert_ne!(ev_a.tree.root(), ev_b.tree.root());

    let claim_a = ev_a.claim_msg(net.header(), &a);
    let claim_b = ev_b.claim_msg(net.header(), &b);
    net.claim(OPEN, &claim_a).expect("claim a");
    net.claim(OPEN, &claim_b).expect("claim b");

    let proof_a = ev_a.proof_msg(&claim_a, &net.entropy(OPEN), 2, &a);
    net.prove(OPEN + 1, &proof_a).expect("first disclosure");
    let _ = net.module.take_events();

    let proof_b = ev_b.proof_msg(&claim_b, &net.entropy(OPEN), 2, &b);
    let err = net.prove(OPEN + 1, &proof_b).expect_err("replay");
    assert!(matches!(err, PorError::Replay { .. }));

    let burns: Vec<RelayEvent> = net
        .module
        .take_events()
        .into_iter()
        .filter(|e| matches!(e, RelayEvent::Burn { .. }))
        .collect();
    assert_eq!(
        burns,
        vec![RelayEvent::Burn { address: addr(&b), requested: 300, burned: 300 }]
    );
    assert_eq!(net.staking.stake_of(&addr(&b)), STAKE - 300);
    assert_eq!(net.staking.stake_of(&addr(&a)), STAKE);

    let stored = net.module.state().get_claim(&claim_b.key()).expect("get").expect("some");
    assert_eq!(stored.state, ClaimState::Pending);
}

#[test]
fn replay_burn_is_capped_at_remaining_stake() {
    let mut net = Net::with(params(), 120);
    let a = net.node(0).clone();
    let b = net.node(1).clone();
    let shared = |srv: &SchnorrKeypair, net: &Net| {
        RelayReceipt::new_signed(net.header(), 7, blake3_32(b"dup"), &net.app, srv)
    };
    let extra = |srv: &SchnorrKeypair, net: &Net, n: u64| {
        RelayReceipt::new_signed(net.header(), n, blake3_32(b"x"), &net.app, srv)
    };
    let ev_a = Evidence::from_receipts(vec![shared(&a, &net), extra(&a, &net, 8)]);
    let ev_b = Evidence::from_receipts(vec![shared(&b, &net), extra(&b, &net, 9)]);
    let claim_a = ev_a.claim_msg(net.header(), &a);
    let claim_b = ev_b.claim_msg(net.header(), &b);
    net.claim(OPEN, &claim_a).expect("claim a");
    net.claim(OPEN, &claim_b).expect("claim b");
    net.prove(OPEN + 1, &ev_a.proof_msg(&claim_a, &net.entropy(OPEN), 2, &a)).expect("a");
    let _ = net.module.take_events();

    let err = net.prove(OPEN + 1, &ev_b.proof_msg(&claim_b, &net.entropy(OPEN), 2, &b));
    assert!(matches!(err, Err(PorError::Replay { .. })));
    assert_eq!(
        net.module.take_events(),
        vec![RelayEvent::Burn { address: addr(&b), requested: 300, burned: 120 }]
    );
    assert_eq!(net.staking.stake_of(&addr(&b)), 0);
}

#[test]
fn small_claim_bypasses_disclosure() {
    let mut net = Net::new();
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..1);
    let claim = ev.claim_msg(net.header(), &node);
    net.claim(OPEN, &claim).expect("claim");

    // Entropie ist für den Bypass irrelevant
    net.chain = InMemoryChain::new();
    let empty = ProofMsg::new_signed(claim.key(), vec![], &node);
    assert_eq!(net.prove(OPEN, &empty).expect("bypass"), 100);
    assert!(net.module.state().markers().expect("markers").is_empty());
}

#[test]
fn deliver_tx_reports_codes() {
    let mut net = Net::new();
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..3);
    let claim = ev.claim_msg(net.header(), &node);
    let bytes = encode_to_vec(&RelayTx::Claim(claim.clone())).expect("encode");

    let mut env = BlockEnv { height: OPEN, chain: &net.chain, staking: &mut net.staking };
    let ok = net.module.deliver_tx(&bytes, &mut env);
    assert!(ok.is_ok(), "{ok:?}");
    let dup = net.module.deliver_tx(&bytes, &mut env);
    assert_eq!(dup.code, PorError::DuplicateClaim.code());
    let garbage = net.module.deliver_tx(&[0xff, 0x01], &mut env);
    assert_eq!(garbage.code, 18);
    let mut trailing = bytes.clone();
    trailing.push(0);
    assert_eq!(net.module.deliver_tx(&trailing, &mut env).code, 18);
}

#[test]
fn finished_sessions_are_pruned() {
    let mut net = Net::new();
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..4);
    let claim = ev.claim_msg(net.header(), &node);
    net.claim(OPEN, &claim).expect("claim");
    net.prove(OPEN + 1, &ev.proof_msg(&claim, &net.entropy(OPEN), 2, &node)).expect("proof");
    assert_ne!(net.module.app_hash().expect("hash"), ZERO_HASH);

    let prune_at = net.module.params().prune_height(START);
    assert_eq!(prune_at, CLOSE + EXPIRATION);
    let stats = net.module.end_block(prune_at - 1).expect("sweep");
    assert_eq!(stats.pruned_claims, 0);
    let stats = net.module.end_block(prune_at).expect("sweep");
    assert_eq!(stats.pruned_claims, 1);
    assert_eq!(stats.pruned_markers, 2);
    assert!(net.module.state().claims().expect("claims").is_empty());
    assert!(net.module.state().markers().expect("markers").is_empty());
    assert_eq!(net.module.state().prune_floor().expect("floor"), Some(START));
}

#[test]
fn param_update_requires_acl_and_refreshes_sessions() {
    let gov = kp("gov");
    let mut acl = BTreeMap::new();
    acl.insert(ParamKey::SessionNodeCount, addr(&gov));
    let mut net = Net::new();
    net.module = RelayModule::new(
        InMemoryBackend::new(),
        ParamRegistry::new(params(), acl).expect("registry"),
    );
    let header = net.header();
    let full = {
        let Net { module, chain, staking, .. } = &mut net;
        module.session(&header, chain, staking).expect("session")
    };
    assert_eq!(full.service_nodes.len(), 8);

    let stranger = addr(net.node(0));
    assert!(net.module.update_param(&stranger, ParamUpdate::SessionNodeCount(3)).is_err());
    net.module
        .update_param(&addr(&gov), ParamUpdate::SessionNodeCount(3))
        .expect("update");
    let small = {
        let Net { module, chain, staking, .. } = &mut net;
        module.session(&header, chain, staking).expect("session")
    };
    assert_eq!(small.service_nodes.len(), 3);
    // Präfix der größeren Auswahl
    assert_eq!(&small.service_nodes[..], &full.service_nodes[..3]);
}

fn gov_net(keys: &[ParamKey]) -> (Net, SchnorrKeypair) {
    let gov = kp("gov");
    let acl = keys.iter().map(|k| (*k, addr(&gov))).collect();
    let mut net = Net::new();
    net.module = RelayModule::new(
        InMemoryBackend::new(),
        ParamRegistry::new(params(), acl).expect("registry"),
    );
    (net, gov)
}

#[test]
fn wider_window_does_not_reopen_pruned_session() {
    let (mut net, gov) = gov_net(&[ParamKey::ClaimSubmissionWindow]);
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..4);
    let claim = ev.claim_msg(net.header(), &node);
    net.claim(OPEN, &claim).expect("claim");
    net.prove(OPEN + 1, &ev.proof_msg(&claim, &net.entropy(OPEN), 2, &node)).expect("proof");
    let prune_at = CLOSE + EXPIRATION;
    assert_eq!(net.module.end_block(prune_at).expect("sweep").pruned_claims, 1);

    net.module
        .update_param(&addr(&gov), ParamUpdate::ClaimSubmissionWindow(100))
        .expect("update");
    let again = net.claim(prune_at + 1, &claim);
    assert!(matches!(again, Err(PorError::SessionPruned { start: START, floor: START })));
    assert_eq!(net.staking.rewards_of(&addr(&node)), 400);

    // jüngere Sessions sind nicht betroffen
    let mut next = net.header();
    next.session_start_height = START + 4;
    let fresh = Evidence::build(&net, &node, 10..12);
    net.claim(prune_at + 1, &fresh.claim_msg(next, &node)).expect("later session");
}

#[test]
fn claim_keeps_deadlines_from_acceptance() {
    let (mut net, gov) = gov_net(&[ParamKey::ClaimExpiration]);
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..4);
    let claim = ev.claim_msg(net.header(), &node);
    let stored = net.claim(OPEN, &claim).expect("claim");
    assert_eq!(stored.expires_at, OPEN + EXPIRATION);
    assert_eq!(stored.prune_at, CLOSE + EXPIRATION);

    net.module
        .update_param(&addr(&gov), ParamUpdate::ClaimExpiration(1))
        .expect("update");
    assert_eq!(net.module.end_block(OPEN + 2).expect("sweep").expired, 0);
    let proof = ev.proof_msg(&claim, &net.entropy(OPEN), 2, &node);
    assert_eq!(net.prove(OPEN + 2, &proof).expect("proof"), 400);
    assert_eq!(net.module.end_block(CLOSE + 1).expect("sweep").pruned_claims, 0);
    assert_eq!(net.module.end_block(CLOSE + EXPIRATION).expect("sweep").pruned_claims, 1);
}

/// Summenbaum ohne Ordnungsprüfung; so müsste ein Einreicher wiederholte Receipts verpacken
fn unchecked_levels(leaves: Vec<SumNode>) -> Vec<Vec<SumNode>> {
    let mut levels = vec![leaves];
    while let Some(cur) = levels.last().filter(|l| l.len() > 1) {
        let next: Vec<SumNode> = cur
            .chunks(2)
            .map(|pair| match pair {
                [l, r] => SumNode {
                    hash: sum_pair_hash(l, r),
                    sum: l.sum + r.sum,
                    min: l.min,
                    max: r.max,
                },
                [one] => *one,
                _ => unreachable!("chunks(2)"),
            })
            .collect();
        levels.push(next);
    }
    levels
}

fn unchecked_branch(levels: &[Vec<SumNode>], index: usize) -> Vec<SumNode> {
    let mut out = Vec::new();
    let mut pos = index;
    for level in levels {
        if let Some(sib) = level.get(pos ^ 1) {
            out.push(*sib);
        }
        pos /= 2;
    }
    out
}

#[test]
fn repeated_receipts_cannot_inflate_claim() {
    let mut net = Net::new();
    let node = net.node(0).clone();
    let genuine = Evidence::build(&net, &node, 0..5).receipts;
    // jedes echte Receipt zehnmal, weiterhin nach Hash sortiert
    let repeated: Vec<RelayReceipt> = genuine
        .iter()
        .flat_map(|r| std::iter::repeat(r.clone()).take(10))
        .collect();
    let levels = unchecked_levels(repeated.iter().map(|r| r.leaf()).collect());
    let root = *levels.last().and_then(|l| l.first()).expect("root");
    assert_eq!(root.sum, 50);

    let claim = ClaimMsg::new_signed(net.header(), root, &node);
    net.claim(OPEN, &claim).expect("claim is accepted until proven");

    let entropy = net.entropy(OPEN);
    let leaves = sample_indices(&root.hash, &entropy, 50, 2)
        .into_iter()
        .map(|i| DisclosedLeaf {
            index: i,
            branch: unchecked_branch(&levels, i as usize),
            receipt: repeated.get(i as usize).expect("receipt").clone(),
        })
        .collect();
    let proof = ProofMsg::new_signed(claim.key(), leaves, &node);
    assert!(matches!(net.prove(OPEN + 1, &proof), Err(PorError::MerkleVerification { .. })));
    assert_eq!(net.staking.rewards_of(&addr(&node)), 0);
    let stored = net.module.state().get_claim(&claim.key()).expect("get").expect("some");
    assert_eq!(stored.state, ClaimState::Pending);
}

/// In-Memory-Backend, dessen Claim-Schreibzugriffe sich abschalten lassen
struct FlakyBackend {
    inner: InMemoryBackend,
    fail_claims: Rc<Cell<bool>>,
}

impl StateBackend for FlakyBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        self.inner.get(key)
    }
    fn put(&mut self, key: &[u8], val: &[u8]) -> Result<(), StateError> {
        if self.fail_claims.get() && key.first() == Some(&PREFIX_CLAIM) {
            return Err(StateError::Backend("disk full".into()));
        }
        self.inner.put(key, val)
    }
    fn del(&mut self, key: &[u8]) -> Result<bool, StateError> {
        self.inner.del(key)
    }
    fn iter_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = Result<KvPair, StateError>> + 'a> {
        self.inner.iter_prefix(prefix)
    }
}

#[test]
fn interrupted_finalize_can_be_retried_without_burn() {
    let mut net = Net::new();
    let fail = Rc::new(Cell::new(false));
    let mut module = RelayModule::new(
        FlakyBackend { inner: InMemoryBackend::new(), fail_claims: fail.clone() },
        ParamRegistry::new(params(), BTreeMap::new()).expect("registry"),
    );
    let node = net.node(0).clone();
    let ev = Evidence::build(&net, &node, 0..5);
    let claim = ev.claim_msg(net.header(), &node);
    let proof = ev.proof_msg(&claim, &net.entropy(OPEN), 2, &node);

    let mut env = BlockEnv { height: OPEN, chain: &net.chain, staking: &mut net.staking };
    module.deliver_claim(&claim, &mut env).expect("claim");

    fail.set(true);
    let mut env = BlockEnv { height: OPEN + 1, chain: &net.chain, staking: &mut net.staking };
    assert!(matches!(module.deliver_proof(&proof, &mut env), Err(PorError::State(_))));
    // Marker stehen, der Claim ist weiter Pending, keine Belohnung
    assert_eq!(module.state().markers().expect("markers").len(), 2);
    let stored = module.state().get_claim(&claim.key()).expect("get").expect("some");
    assert_eq!(stored.state, ClaimState::Pending);
    assert_eq!(net.staking.rewards_of(&addr(&node)), 0);

    fail.set(false);
    let mut env = BlockEnv { height: OPEN + 1, chain: &net.chain, staking: &mut net.staking };
    assert_eq!(module.deliver_proof(&proof, &mut env).expect("retry").reward, 500);
    assert_eq!(net.staking.stake_of(&addr(&node)), STAKE);
    assert_eq!(net.staking.rewards_of(&addr(&node)), 500);
    assert!(module.take_events().iter().all(|e| matches!(e, RelayEvent::Reward { .. })));
}
