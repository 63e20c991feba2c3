use anyhow::{Context, Result};
use bitcoin::Network;
use clap::Parser;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use trusted_broadcast::{
    ElectrumChain, InMemoryKeyStore, PollDriver, RequestStore, TrustedBroadcastService,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "testnet")]
    network: Network,

    #[arg(long, default_value = "ssl://electrum.blockstream.info:60002")]
    electrum_url: String,

    /// JSON request store to register at startup
    #[arg(long, default_value = "trusted_broadcasts.json")]
    requests: PathBuf,

    /// File with one WIF signing key per line
    #[arg(long)]
    keys: PathBuf,

    #[arg(long, default_value_t = 1)]
    min_confirmations: u32,

    #[arg(long, default_value_t = 30)]
    poll_interval_secs: u64,

    /// Poll a single time and exit
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    log::info!("[MAIN] network {}, electrum {}", args.network, args.electrum_url);

    let keys = std::fs::read_to_string(&args.keys)
        .with_context(|| format!("reading key file {:?}", args.keys))?;
    let keys = InMemoryKeyStore::from_wif_lines(&keys)?;

    let chain = Arc::new(ElectrumChain::new(&args.electrum_url)?);
    let service = TrustedBroadcastService::new(chain.clone(), chain, keys, args.network)
        .with_min_confirmations(args.min_confirmations);

    let store = RequestStore::new(&args.requests);
    let mut registered = 0;
    for stored in store.load()? {
        let cycle = stored.cycle;
        let transaction_type = stored.transaction_type;
        match service.broadcast(cycle, transaction_type, stored.request) {
            Ok(_) => registered += 1,
            Err(e) => log::error!(
                "[MAIN] skipping {} of cycle {}: {}",
                transaction_type,
                cycle,
                e
            ),
        }
    }
    log::info!("[MAIN] {} requests registered", registered);

    let mut driver = PollDriver::new(
        Arc::new(service),
        Duration::from_secs(args.poll_interval_secs),
    );

    if args.once {
        let sent = driver.tick();
        println!("Broadcast {} transactions", sent.len());
        for tx in sent {
            println!("{}", tx.compute_txid());
        }
        return Ok(());
    }

    driver.run_forever()
}
