/// Unified error types for the wallet engine
///
/// Every failure a caller may want to branch on gets its own variant;
/// driver-level failures are wrapped in the nested `StoreError` and
/// `KeyError` enums.
use thiserror::Error;

/// Main wallet error type
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet '{0}' already exists")]
    DuplicateName(String),

    #[error("account {account} already exists for network {network}")]
    DuplicateAccount { account: u32, network: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid derivation path: {0}")]
    InvalidPath(String),

    #[error("key depth {key_depth} does not match path depth {path_depth} for path {path}")]
    DepthMismatch {
        key_depth: u8,
        path_depth: usize,
        path: String,
    },

    #[error("wallet scheme '{0}' does not support this operation")]
    UnsupportedScheme(String),

    #[error("network mismatch: expected {expected}, found {found}")]
    NetworkMismatch { expected: String, found: String },

    #[error("key mismatch: {0}")]
    KeyMismatch(String),

    #[error("key {key_id} ({address}) still has unspent outputs")]
    NonEmptyWallet { key_id: u64, address: String },

    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("unknown UTXO {tx_hash}:{output_n}")]
    UnknownUtxo { tx_hash: String, output_n: u32 },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("input {input_n} has {got} of {required} required signatures")]
    SignatureIncomplete {
        input_n: u32,
        got: usize,
        required: usize,
    },

    #[error("transaction verification failed")]
    VerifyFailed,

    #[error("UTXO scan exceeded a recursion depth of {0}")]
    ScanDepthExceeded(u32),

    #[error("storage operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("key operation failed: {0}")]
    Key(#[from] KeyError),
}

/// Storage driver errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key material errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("BIP32 derivation error: {0}")]
    Bip32(#[from] bitcoin::bip32::Error),

    #[error("ECDSA error: {0}")]
    Secp(#[from] secp256k1::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid mnemonic: {0}")]
    Mnemonic(#[from] bip39::Error),

    #[error("random number generation failed")]
    Entropy,

    #[error("cannot derive hardened child from a public-only key")]
    HardenedFromPublic,
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for key operations
pub type KeyResult<T> = Result<T, KeyError>;
