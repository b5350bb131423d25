/// Storage layer module
///
/// Persisted row types and the sled-backed store that holds them.
pub mod records;
pub mod store;

// Re-exports for convenience
pub use records::{
    KeyFilter, KeyRecord, KeyType, MultisigChildRecord, Scheme, TxInputRecord, TxOutputRecord,
    TxRecord, WalletRecord,
};
pub use store::Store;
