//! Cobre command-line front end.
//!
//! The node id comes from the `NODE_ID` environment variable; it selects
//! the TCP port, the chain database directory, and the wallet file.

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::error;

use cobre_core::address::{Address, validate_address};
use cobre_core::types::Transaction;
use cobre_network::protocol::{Message, TxPayload};
use cobre_node::server::send_to_peer;
use cobre_node::{Blockchain, NodeConfig, Server, UtxoSet};
use cobre_wallet::WalletStore;

/// Cobre: a minimal UTXO blockchain node.
#[derive(Parser, Debug)]
#[command(name = "cobre", version, about = "Cobre blockchain node and wallet")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a blockchain and send the genesis reward to ADDRESS
    Createblockchain {
        #[arg(long)]
        address: String,
    },
    /// Generate a new key pair and save it into the wallet file
    Createwallet,
    /// List all addresses from the wallet file
    Listaddresses,
    /// Get the balance of ADDRESS
    Getbalance {
        #[arg(long)]
        address: String,
    },
    /// Send AMOUNT of coins from FROM to TO; mine on this node with --mine
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        mine: bool,
    },
    /// Print all the blocks of the blockchain
    Printchain,
    /// Rebuild the UTXO set
    Reindexutxo,
    /// Start a node; --miner enables mining to ADDRESS
    Startnode {
        #[arg(long)]
        miner: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        error!("{e:#}");
        process::exit(1);
    }
}

fn init_logging() {
    use tracing_subscriber::filter::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn node_config() -> Result<NodeConfig> {
    let node_id =
        std::env::var("NODE_ID").context("NODE_ID environment variable is not set")?;
    Ok(NodeConfig::new(&node_id))
}

fn open_chain(config: &NodeConfig) -> Result<Arc<Blockchain>> {
    Ok(Arc::new(Blockchain::open(&config.data_dir)?))
}

fn open_wallets(config: &NodeConfig) -> Result<WalletStore> {
    Ok(WalletStore::load_or_create(WalletStore::wallet_file(
        &config.node_id,
    ))?)
}

async fn run(command: Command) -> Result<()> {
    let config = node_config()?;

    match command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                bail!("invalid address: {address}");
            }
            let chain = Arc::new(Blockchain::create(&config.data_dir, &address)?);
            UtxoSet::new(chain).reindex()?;
            println!("Done! Genesis reward sent to {address}");
        }

        Command::Createwallet => {
            let mut wallets = open_wallets(&config)?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}");
        }

        Command::Listaddresses => {
            let wallets = open_wallets(&config)?;
            for address in wallets.addresses() {
                println!("{address}");
            }
        }

        Command::Getbalance { address } => {
            if !validate_address(&address) {
                bail!("invalid address: {address}");
            }
            let utxo = UtxoSet::new(open_chain(&config)?);
            let pubkey_hash = Address::decode(&address)?.pubkey_hash();
            let balance: u64 = utxo
                .find_utxo(&pubkey_hash)?
                .iter()
                .map(|out| out.value)
                .sum();
            println!("Balance of '{address}': {balance}");
        }

        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            if !validate_address(&from) {
                bail!("invalid sender address: {from}");
            }
            if !validate_address(&to) {
                bail!("invalid recipient address: {to}");
            }

            let chain = open_chain(&config)?;
            let utxo = UtxoSet::new(Arc::clone(&chain));
            let wallets = open_wallets(&config)?;
            let wallet = wallets.get(&from)?;

            let tx = utxo.new_transaction(wallet.keypair(), &to, amount)?;
            if mine {
                // The sender collects the block subsidy on top of the
                // transfer when mining locally.
                let coinbase = Transaction::new_coinbase(&from, "")?;
                let block = chain.mine_block(vec![coinbase, tx])?;
                utxo.update(&block)?;
            } else {
                let message = Message::Tx(TxPayload {
                    addr_from: config.node_address(),
                    transaction: tx.serialize()?,
                });
                send_to_peer(&config.bootstrap_addr, &message).await?;
            }
            println!("Sent {amount} from {from} to {to}");
        }

        Command::Printchain => {
            let chain = open_chain(&config)?;
            for block in chain.iter() {
                let block = block?;
                println!("============ Block {} ============", block.hash);
                match &block.prev_hash {
                    Some(prev) => println!("Prev. block: {prev}"),
                    None => println!("Prev. block: (genesis)"),
                }
                println!("Height: {}", block.height);
                println!("PoW: {}", chain.validate_pow(&block)?);
                for tx in &block.transactions {
                    println!("{tx}");
                }
                println!();
            }
        }

        Command::Reindexutxo => {
            let utxo = UtxoSet::new(open_chain(&config)?);
            utxo.reindex()?;
            let count = utxo.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }

        Command::Startnode { miner } => {
            if let Some(miner_addr) = &miner {
                if !validate_address(miner_addr) {
                    bail!("invalid miner address: {miner_addr}");
                }
                println!("Mining is on. Address to receive rewards: {miner_addr}");
            }
            println!("Starting node {}", config.node_id);

            let chain = open_chain(&config)?;
            let mut config = config;
            config.mining_addr = miner;
            let server = Server::new(&config, chain);
            server.run().await?;
        }
    }

    Ok(())
}
