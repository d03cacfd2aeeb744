// Path: crates/node/src/main.rs
//! The Meridian validator node binary.
//!
//! With `--private-net` (or `private_net = true` in the config file) the
//! binary runs a self-contained four-validator committee over loopback
//! gossip and an in-memory store, producing blocks end to end. Joining an
//! external network means embedding [`meridian_consensus::ConsensusService`]
//! with real transport and storage behind the `meridian-api` traits.

mod config;
mod gossip;
mod store;

use anyhow::{bail, Context};
use clap::Parser;
use config::NodeConfig;
use gossip::LoopbackGossip;
use meridian_consensus::{ConsensusService, DbftMachine, InboundEvent};
use meridian_crypto::ValidatorKeypair;
use meridian_types::app::{AccountId, Transaction, Validator, ValidatorSet};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use store::{AcceptAllVerifier, InMemoryStore};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "meridian-node", about = "Meridian dBFT validator node")]
struct Cli {
    /// Path to the node configuration file.
    #[arg(long, default_value = "meridian.toml")]
    config: PathBuf,

    /// Run a self-contained four-validator private net.
    #[arg(long)]
    private_net: bool,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        NodeConfig::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        NodeConfig::default()
    };
    if cli.private_net {
        config.consensus.private_net = true;
    }
    config.consensus.validate()?;

    if !config.consensus.private_net {
        bail!(
            "external networking is not wired into this binary; run with --private-net, \
             or embed ConsensusService behind your own transport and store"
        );
    }

    run_private_net(config).await
}

/// Spawns four validators over loopback gossip, each with its own store, and
/// a transaction injector feeding every mempool identically.
async fn run_private_net(config: NodeConfig) -> anyhow::Result<()> {
    const COMMITTEE: usize = 4;

    let mut keypairs: Vec<ValidatorKeypair> =
        (0..COMMITTEE).map(|_| ValidatorKeypair::generate()).collect();
    // An operator-supplied secret pins the first committee seat, so a dev
    // node keeps a stable identity across restarts.
    if let Some(secret) = config.validator_secret_bytes()? {
        keypairs[0] = ValidatorKeypair::from_secret_bytes(secret)?;
    }
    let validators = ValidatorSet::new(
        keypairs
            .iter()
            .map(|kp| Validator {
                account_id: kp.account_id(),
                public_key: kp.public_key_bytes(),
            })
            .collect(),
    )?;
    info!(
        target: "node",
        committee = COMMITTEE,
        quorum = validators.quorum(),
        block_ms = config.consensus.milliseconds_per_block,
        "starting private net"
    );

    let user = ValidatorKeypair::generate();
    let mut balances = HashMap::new();
    balances.insert(user.account_id(), config.genesis_balance);
    for kp in &keypairs {
        balances.insert(kp.account_id(), config.genesis_balance);
    }

    let (senders, receivers): (Vec<_>, Vec<_>) = (0..COMMITTEE)
        .map(|_| mpsc::channel::<InboundEvent>(256))
        .unzip();

    let mut handles = Vec::new();
    let mut stores = Vec::new();
    for (index, (keypair, inbound)) in keypairs.into_iter().zip(receivers).enumerate() {
        let machine = DbftMachine::new(
            config.consensus.clone(),
            validators.clone(),
            Some(keypair),
        )?;
        let store = Arc::new(InMemoryStore::new(
            balances.clone(),
            Arc::new(AcceptAllVerifier),
        ));
        stores.push(store.clone());
        let gossip = Arc::new(LoopbackGossip::new(index, senders.clone()));
        let service = ConsensusService::new(machine, store, gossip, inbound);
        handles.push(tokio::spawn(service.run()));
    }

    let monitor = tokio::spawn(report_progress(
        stores,
        config.consensus.milliseconds_per_block,
    ));

    let injector = tokio::spawn(inject_transactions(
        user.account_id(),
        config.consensus.milliseconds_per_block,
        senders.clone(),
    ));

    info!(target: "node", "private net running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!(target: "node", "shutting down");

    injector.abort();
    monitor.abort();
    drop(senders);
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Periodically logs how far each node's chain has grown.
async fn report_progress(stores: Vec<Arc<InMemoryStore>>, interval_ms: u64) {
    let period = tokio::time::Duration::from_millis(interval_ms.saturating_mul(10).max(1_000));
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let mut counts = Vec::with_capacity(stores.len());
        for store in &stores {
            counts.push(store.block_count().await);
        }
        info!(target: "node", ?counts, "chain progress");
    }
}

/// Feeds one small transfer per block interval into every node's mempool, so
/// candidate blocks carry transactions. Every pool sees the same stream.
async fn inject_transactions(
    sender_account: AccountId,
    interval_ms: u64,
    peers: Vec<mpsc::Sender<InboundEvent>>,
) {
    let mut nonce = 0u32;
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(interval_ms.max(1)));
    loop {
        ticker.tick().await;
        nonce += 1;
        let tx = Transaction {
            version: 0,
            nonce,
            sender: sender_account,
            native_commitment: 100,
            network_fee: 1,
            inputs: vec![],
            script: vec![0x51],
            witness: vec![],
        };
        for peer in &peers {
            if peer
                .send(InboundEvent::Transaction(tx.clone()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}
