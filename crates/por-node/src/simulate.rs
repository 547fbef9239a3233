// SPDX-License-Identifier: AGPL-3.0-only

//! Lokaler Durchlauf einer Session: Auswahl, Quittungen sammeln, Claim, Proof, Ablauf.
//! Deterministisch aus dem Seed; Blockhashes sind synthetisch.

use crate::config::NodeConfig;
use anyhow::{anyhow, bail, Result};
use por_codec::encode_to_vec;
use por_consensus::{BlockEnv, ChainView, InMemoryChain, InMemoryStaking, RelayEvent, RelayModule};
use por_crypto::{blake3_32, SchnorrKeypair};
use por_evidence::{spawn_collector, EvidenceStore};
use por_session::NodeCandidate;
use por_state::StateBackend;
use por_types::{PublicKey, RelayReceipt, RelayTx, SessionHeader};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

const SIM_STAKE: u64 = 1_000_000;

fn keypair(seed: &str, label: &str) -> Result<SchnorrKeypair> {
    SchnorrKeypair::from_secret_key_bytes(&blake3_32(format!("{seed}/{label}").as_bytes()))
        .map_err(|e| anyhow!("derive key {label}: {e}"))
}

fn event_json(e: &RelayEvent) -> Value {
    match e {
        RelayEvent::Reward { claim, relays, amount } => json!({
            "type": "reward",
            "submitter": claim.submitter.to_string(),
            "relays": relays,
            "amount": amount,
        }),
        RelayEvent::Burn { address, requested, burned } => json!({
            "type": "burn",
            "address": address.to_string(),
            "requested": requested,
            "burned": burned,
        }),
        RelayEvent::ClaimExpired { claim } => json!({
            "type": "claim_expired",
            "submitter": claim.submitter.to_string(),
        }),
    }
}

pub async fn run_simulation<B: StateBackend>(
    cfg: &NodeConfig,
    backend: B,
    relays: u64,
    seed: &str,
) -> Result<Value> {
    let params = cfg.params.clone();
    let chain_id = params
        .supported_blockchains
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("no supported chain configured"))?;

    let node_total = params.session_node_count.saturating_mul(2);
    let nodes: Vec<SchnorrKeypair> = (0..node_total)
        .map(|i| keypair(seed, &format!("node-{i}")))
        .collect::<Result<_>>()?;
    let app = keypair(seed, "app")?;

    let start = params.session_block_frequency;
    let (open, _close) = params.claim_window(start);
    let prune_at = params.prune_height(start);
    let chain = InMemoryChain::synthetic(prune_at.saturating_add(1));
    let mut staking = InMemoryStaking::new(nodes.iter().map(|k| NodeCandidate {
        address: PublicKey::from_keypair(k).address(),
        stake: SIM_STAKE,
        jailed: false,
        chains: vec![chain_id.clone()],
    }));
    let mut module = RelayModule::new(backend, cfg.registry()?);

    let header = SessionHeader {
        chain_id,
        app_public_key: PublicKey::from_keypair(&app),
        session_start_height: start,
    };
    let session = module
        .session(&header, &chain, &staking)
        .map_err(|e| anyhow!("derive session: {e}"))?;
    let Some(first) = session.service_nodes.first() else {
        bail!("no eligible service nodes");
    };
    let servicer = nodes
        .iter()
        .find(|k| PublicKey::from_keypair(k).address() == *first)
        .ok_or_else(|| anyhow!("selected node not in key set"))?;
    let servicer_pk = PublicKey::from_keypair(servicer);

    let store = Arc::new(EvidenceStore::new(servicer_pk));
    store.open_session(session.clone()).await?;
    let (tx, rx) = mpsc::channel(64);
    let collector = spawn_collector(store.clone(), rx);
    for nonce in 0..relays {
        let receipt = RelayReceipt::new_signed(
            header.clone(),
            nonce,
            blake3_32(&nonce.to_le_bytes()),
            &app,
            servicer,
        );
        tx.send(receipt).await.map_err(|_| anyhow!("collector stopped"))?;
    }
    drop(tx);
    let collected = collector.await?;
    info!(collected, servicer = %servicer_pk.address(), "relays collected");

    let claim = store.claim_message(&header, servicer).await?;
    let claim_res = {
        let mut env = BlockEnv { height: open, chain: &chain, staking: &mut staking };
        module.deliver_tx(&encode_to_vec(&RelayTx::Claim(claim.clone()))?, &mut env)
    };
    if !claim_res.is_ok() {
        bail!("claim rejected: {}", claim_res.log);
    }

    let entropy = chain
        .block_hash(open)
        .ok_or_else(|| anyhow!("no block hash at {open}"))?;
    let proof = store
        .proof_message(&header, &entropy, params.minimum_number_of_proofs, servicer)
        .await?;
    let proof_res = {
        let mut env = BlockEnv { height: open, chain: &chain, staking: &mut staking };
        module.deliver_tx(&encode_to_vec(&RelayTx::Proof(proof.clone()))?, &mut env)
    };

    let sweep = module
        .end_block(prune_at)
        .map_err(|e| anyhow!("end block: {e}"))?;
    let events: Vec<Value> = module.take_events().iter().map(event_json).collect();
    let app_hash = module.app_hash().map_err(|e| anyhow!("app hash: {e}"))?;

    Ok(json!({
        "type": "simulation",
        "session": session,
        "servicer": servicer_pk.address().to_string(),
        "collected": collected,
        "claim": {
            "height": open,
            "merkle_root": hex::encode(claim.merkle_root),
            "total_relays": claim.total_relays,
            "code": claim_res.code,
        },
        "proof": {
            "disclosed": proof.leaves.len(),
            "code": proof_res.code,
            "log": proof_res.log,
        },
        "reward": staking.rewards_of(&servicer_pk.address()),
        "events": events,
        "sweep": {
            "height": prune_at,
            "expired": sweep.expired,
            "pruned_claims": sweep.pruned_claims,
            "pruned_markers": sweep.pruned_markers,
        },
        "app_hash": hex::encode(app_hash),
    }))
}
