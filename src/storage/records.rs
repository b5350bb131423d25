/// Persisted row types
///
/// One struct per table. Rows are plain data; all invariants are enforced
/// by the store and the wallet layer.
use crate::error::WalletError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Key structure of a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Bip44,
    Single,
    Multisig,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scheme::Bip44 => "bip44",
            Scheme::Single => "single",
            Scheme::Multisig => "multisig",
        };
        f.write_str(name)
    }
}

impl FromStr for Scheme {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bip44" => Ok(Scheme::Bip44),
            "single" => Ok(Scheme::Single),
            "multisig" => Ok(Scheme::Multisig),
            other => Err(WalletError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Shape of a persisted key row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Bip32,
    Single,
    Multisig,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyType::Bip32 => "bip32",
            KeyType::Single => "single",
            KeyType::Multisig => "multisig",
        };
        f.write_str(name)
    }
}

/// Wallet table row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub id: u64,
    pub name: String,
    pub owner: String,
    pub network: String,
    pub purpose: u32,
    pub scheme: Scheme,
    pub main_key_id: Option<u64>,
    pub parent_id: Option<u64>,
    pub sort_keys: bool,
    pub multisig_n_required: Option<u8>,
    pub balance: u64,
}

/// Key table row.
///
/// For `multisig` rows `public` holds the redeem script and `wif` the
/// synthetic `multisig-<address>` marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: u64,
    pub wallet_id: u64,
    pub name: String,
    pub path: String,
    pub depth: u8,
    pub purpose: u32,
    pub account_id: u32,
    pub change: u32,
    pub address_index: u32,
    pub network: String,
    pub parent_id: Option<u64>,
    pub key_type: KeyType,
    pub is_private: bool,
    pub public: String,
    pub private: Option<String>,
    pub wif: String,
    pub address: String,
    pub compressed: bool,
    pub used: bool,
    pub balance: u64,
}

/// Cosigner child ordering inside a multisig key's redeem script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultisigChildRecord {
    pub parent_key_id: u64,
    pub child_key_id: u64,
    pub key_order: u32,
}

/// Transaction table row; `hash` is unique per wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub id: u64,
    pub wallet_id: u64,
    pub hash: String,
    pub confirmations: u32,
    pub block_height: Option<u32>,
    pub date: Option<u64>,
    pub fee: Option<u64>,
}

/// Transaction input row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxInputRecord {
    pub id: u64,
    pub transaction_id: u64,
    pub input_n: u32,
    pub key_id: Option<u64>,
    pub prev_hash: String,
    pub value: Option<u64>,
}

/// Transaction output row; `key_id` is nullable so key deletion does not
/// corrupt transaction history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxOutputRecord {
    pub id: u64,
    pub transaction_id: u64,
    pub output_n: u32,
    pub key_id: Option<u64>,
    pub value: u64,
    pub script: String,
    pub spent: bool,
}

/// Composable key query filter; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    pub key_id: Option<u64>,
    pub name: Option<String>,
    pub account_id: Option<u32>,
    pub purpose: Option<u32>,
    pub change: Option<u32>,
    pub depth: Option<u8>,
    pub used: Option<bool>,
    pub is_private: Option<bool>,
    pub has_balance: Option<bool>,
    pub network: Option<String>,
}

impl KeyFilter {
    pub fn matches(&self, key: &KeyRecord) -> bool {
        if let Some(id) = self.key_id {
            if key.id != id {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if &key.name != name {
                return false;
            }
        }
        if let Some(account_id) = self.account_id {
            if key.account_id != account_id {
                return false;
            }
        }
        if let Some(purpose) = self.purpose {
            if key.purpose != purpose {
                return false;
            }
        }
        if let Some(change) = self.change {
            if key.change != change {
                return false;
            }
        }
        if let Some(depth) = self.depth {
            if key.depth != depth {
                return false;
            }
        }
        if let Some(used) = self.used {
            if key.used != used {
                return false;
            }
        }
        if let Some(is_private) = self.is_private {
            if key.is_private != is_private {
                return false;
            }
        }
        if let Some(has_balance) = self.has_balance {
            if (key.balance != 0) != has_balance {
                return false;
            }
        }
        if let Some(network) = &self.network {
            if &key.network != network {
                return false;
            }
        }
        true
    }
}
