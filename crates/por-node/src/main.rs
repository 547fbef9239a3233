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

mod config;
mod simulate;

use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use config::NodeConfig;
use por_consensus::ParamKey;
use por_crypto::Hash32;
use por_evidence::EvidenceStore;
use por_session::{derive_session, NodeCandidate};
use por_types::{ChainId, PublicKey, SessionHeader};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

#[cfg(not(feature = "rocksdb"))]
use por_state::InMemoryBackend;
#[cfg(feature = "rocksdb")]
use por_state::RocksDbBackend;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_hex32(s: &str) -> Result<Hash32> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)
        .map_err(|e| anyhow!("invalid 32-byte hex '{s}': {e}"))?;
    Ok(out)
}

fn new_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("tokio runtime: {e}"))
}

#[derive(Debug, Parser)]
#[command(name = "por-node", version, about = "Proof-of-Relay Werkzeuge")]
struct NodeOpts {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Gib die wirksamen Parameter und ACL als JSON aus
    Params(ParamsArgs),
    /// Leite eine Session aus einem JSON-Snapshot (Header, Blockhash, Kandidaten) ab
    Session(SessionArgs),
    /// Berechne die Merkle-Summen-Root einer gespeicherten Session
    EvidenceRoot(EvidenceRootArgs),
    /// Spiele eine Session lokal durch: Quittungen, Claim, Proof, Ablauf
    Simulate(SimulateArgs),
}

#[derive(Debug, Clone, Args)]
struct ParamsArgs {
    /// Pfad zur Node-Konfiguration (TOML); ohne: empfohlene Werte
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct SessionArgs {
    /// JSON-Datei mit `header`, `block_hash` und `candidates`
    #[arg(long)]
    snapshot: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct EvidenceRootArgs {
    /// Evidenz-Verzeichnis (Default: `evidence_dir` aus der Konfiguration)
    #[arg(long)]
    dir: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Public Key des Service-Nodes (32-Byte Hex)
    #[arg(long)]
    node: String,
    #[arg(long)]
    chain: String,
    /// Public Key der Anwendung (32-Byte Hex)
    #[arg(long)]
    app: String,
    #[arg(long)]
    start: u64,
}

#[derive(Debug, Clone, Args)]
struct SimulateArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Anzahl Relays des ausgewählten Service-Nodes
    #[arg(long, default_value_t = 32)]
    relays: u64,
    /// Seed für alle Schlüssel
    #[arg(long, default_value = "devnet")]
    seed: String,
    /// Verzeichnis für den RocksDB-State (nur mit Feature `rocksdb`)
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SessionSnapshot {
    header: SessionHeader,
    block_hash: String,
    candidates: Vec<NodeCandidate>,
}

fn run_params(args: &ParamsArgs) -> Result<()> {
    let cfg = NodeConfig::load(args.config.as_deref())?;
    let registry = cfg.registry()?;
    let acl: serde_json::Map<String, serde_json::Value> = ParamKey::ALL
        .iter()
        .filter_map(|k| registry.owner(*k).map(|a| (k.to_string(), json!(a.to_string()))))
        .collect();
    let (open, close) = cfg.params.claim_window(0);
    println!(
        "{}",
        json!({
            "type": "params",
            "params": registry.params(),
            "acl": acl,
            "claim_window_offset": { "open": open, "close": close },
            "evidence_dir": cfg.evidence_dir,
            "fsync": cfg.fsync,
        })
    );
    Ok(())
}

fn run_session(args: &SessionArgs) -> Result<()> {
    let cfg = NodeConfig::load(args.config.as_deref())?;
    let raw = std::fs::read_to_string(&args.snapshot)
        .map_err(|e| anyhow!("read snapshot {}: {e}", args.snapshot.display()))?;
    let snap: SessionSnapshot =
        serde_json::from_str(&raw).map_err(|e| anyhow!("parse snapshot: {e}"))?;
    let block_hash = parse_hex32(&snap.block_hash)?;
    if !cfg.params.is_supported(&snap.header.chain_id) {
        bail!("chain {} not supported", snap.header.chain_id);
    }
    let count = usize::try_from(cfg.params.session_node_count)?;
    let session = derive_session(&snap.header, &block_hash, &snap.candidates, count);
    println!(
        "{}",
        json!({
            "type": "session",
            "header": session.header,
            "service_nodes": session.service_nodes,
            "complete": session.is_complete(count),
        })
    );
    Ok(())
}

fn run_evidence_root(args: &EvidenceRootArgs) -> Result<()> {
    let cfg = NodeConfig::load(args.config.as_deref())?;
    let fsync = cfg.fsync;
    let dir = args.dir.clone().unwrap_or(cfg.evidence_dir);
    let node = PublicKey(parse_hex32(&args.node)?);
    let header = SessionHeader {
        chain_id: ChainId::new(args.chain.clone()).map_err(|e| anyhow!("chain: {e}"))?,
        app_public_key: PublicKey(parse_hex32(&args.app)?),
        session_start_height: args.start,
    };
    let rt = new_runtime()?;
    rt.block_on(async move {
        let store = EvidenceStore::open(&dir, node, fsync)?;
        let ev = store
            .snapshot(&header)
            .await
            .ok_or_else(|| anyhow!("no evidence for session"))?;
        let (root, leaves) = store.build_merkle_sum_tree(&header).await?;
        println!(
            "{}",
            json!({
                "type": "evidence_root",
                "header": header,
                "root": hex::encode(root.hash),
                "total_relays": root.sum,
                "leaves": leaves,
                "sealed": ev.sealed,
            })
        );
        Ok::<(), anyhow::Error>(())
    })
}

fn run_simulate(args: &SimulateArgs) -> Result<()> {
    let cfg = NodeConfig::load(args.config.as_deref())?;
    #[cfg(feature = "rocksdb")]
    let backend = {
        let dir = args
            .state_dir
            .clone()
            .unwrap_or_else(|| cfg.evidence_dir.join("state.rocks"));
        RocksDbBackend::open(&dir).map_err(|e| anyhow!("open rocksdb: {e}"))?
    };
    #[cfg(not(feature = "rocksdb"))]
    let backend = {
        if args.state_dir.is_some() {
            bail!("--state-dir requires the rocksdb feature");
        }
        InMemoryBackend::new()
    };
    let rt = new_runtime()?;
    let out = rt.block_on(simulate::run_simulation(&cfg, backend, args.relays, &args.seed))?;
    println!("{out}");
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let opts = NodeOpts::parse();
    info!(command = ?opts.command, "por-node");
    match &opts.command {
        Command::Params(args) => run_params(args),
        Command::Session(args) => run_session(args),
        Command::EvidenceRoot(args) => run_evidence_root(args),
        Command::Simulate(args) => run_simulate(args),
    }
}
