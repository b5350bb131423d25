/// Command-line interface
///
/// Thin surface over the wallet engine: wallet lifecycle, address and
/// balance queries, UTXO updates and sending.
pub mod handlers;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use handlers::CliHandler;

#[derive(Parser)]
#[command(name = "hdvault")]
#[command(about = "Hierarchical-deterministic wallet engine for UTXO-based chains")]
#[command(version)]
pub struct Cli {
    /// Data directory holding the wallet database
    #[arg(long, default_value = ".hdvault", global = true)]
    pub data_dir: PathBuf,

    /// Esplora-style provider base URL, e.g. https://blockstream.info/api
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List all wallets
    List,
    /// Create a new wallet
    Create {
        /// Wallet name
        name: String,
        /// Master or single key (xprv/xpub/WIF/hex)
        #[arg(long)]
        key: Option<String>,
        /// Hex seed for the master key
        #[arg(long, conflicts_with = "key")]
        seed: Option<String>,
        /// BIP39 mnemonic phrase for the master key
        #[arg(long, conflicts_with_all = ["key", "seed"])]
        mnemonic: Option<String>,
        /// Network name (bitcoin, testnet, signet, regtest)
        #[arg(long)]
        network: Option<String>,
        /// Key scheme: bip44 or single
        #[arg(long, default_value = "bip44")]
        scheme: String,
        /// Account id for the first account
        #[arg(long, default_value_t = 0)]
        account: u32,
        /// Wallet owner, for reference only
        #[arg(long, default_value = "")]
        owner: String,
    },
    /// Create a multisig wallet from cosigner keys
    CreateMultisig {
        /// Wallet name
        name: String,
        /// Cosigner keys (two or more)
        #[arg(long, num_args = 2.., required = true)]
        keys: Vec<String>,
        /// Signatures required to spend
        #[arg(long)]
        required: u8,
        /// Sort cosigner keys by public key bytes (BIP67)
        #[arg(long)]
        sort_keys: bool,
        /// Network name
        #[arg(long)]
        network: Option<String>,
    },
    /// Check whether a wallet exists
    Exists {
        wallet: String,
    },
    /// Delete a wallet and its keys
    Delete {
        wallet: String,
        /// Delete even when keys still hold a balance
        #[arg(long)]
        force: bool,
    },
    /// Show or generate receive addresses
    Address {
        wallet: String,
        /// Use the change branch
        #[arg(long)]
        change: bool,
        /// Number of addresses
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Show wallet balance
    Balance {
        wallet: String,
    },
    /// Update UTXOs and balances from the provider
    Update {
        wallet: String,
    },
    /// Scan for used addresses (gap-limit discovery)
    Scan {
        wallet: String,
        /// Keys generated per round
        #[arg(long, default_value_t = 10)]
        depth: usize,
    },
    /// Send an amount to an address
    Send {
        wallet: String,
        /// Destination address
        to: String,
        /// Amount in satoshi
        amount: u64,
        /// Fixed fee in satoshi; estimated when absent
        #[arg(long)]
        fee: Option<u64>,
        /// Compose and sign only, do not broadcast
        #[arg(long)]
        offline: bool,
    },
    /// Sweep all funds to a single address
    Sweep {
        wallet: String,
        /// Destination address
        to: String,
        /// Compose and sign only, do not broadcast
        #[arg(long)]
        offline: bool,
    },
    /// Show wallet details and keys
    Info {
        wallet: String,
    },
}
