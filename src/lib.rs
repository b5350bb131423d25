/// Hierarchical-deterministic wallet engine for UTXO-based chains
///
/// This library derives and persists BIP32/BIP44 key trees rooted at a
/// master seed, composes multi-signature wallets over cosigner key sets,
/// reconciles on-chain unspent outputs with the derived keys, and
/// composes, signs and submits transactions.
pub mod cli;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod network;
pub mod storage;
pub mod transaction;
pub mod wallet;

// Re-export common types for convenience
pub use error::{WalletError, WalletResult};
pub use keys::HdKey;
pub use ledger::UtxoScope;
pub use network::{ChainService, NetworkParams};
pub use storage::Store;
pub use transaction::TxDraft;
pub use wallet::{Wallet, WalletKey};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging for the wallet
pub fn init_logging() {
    tracing_subscriber::fmt::init();
}
