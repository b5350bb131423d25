/// Wallet key view
///
/// Pairs a persisted key row with its network parameters and gives access
/// to the underlying key material. The cryptographic handle is rebuilt
/// from the stored wif only when actually needed.
use crate::error::{WalletError, WalletResult};
use crate::keys::HdKey;
use crate::network::NetworkParams;
use crate::storage::{KeyRecord, KeyType, Store};
use serde::Serialize;

/// Read-mostly view over one persisted key
#[derive(Debug, Clone)]
pub struct WalletKey {
    record: KeyRecord,
    params: &'static NetworkParams,
}

/// Serializable key projection for CLI output
#[derive(Debug, Serialize)]
pub struct KeyDetails {
    pub id: u64,
    pub key_type: KeyType,
    pub is_private: bool,
    pub name: String,
    pub public: String,
    pub wif: String,
    pub account_id: u32,
    pub parent_id: Option<u64>,
    pub depth: u8,
    pub change: u32,
    pub address_index: u32,
    pub address: String,
    pub path: String,
    pub balance: u64,
    pub balance_str: String,
}

impl WalletKey {
    /// Wrap a key row
    pub fn from_record(record: KeyRecord) -> WalletResult<Self> {
        let params = NetworkParams::from_name(&record.network)?;
        Ok(Self { record, params })
    }

    /// Load a key row by id
    pub fn load(store: &Store, key_id: u64) -> WalletResult<Self> {
        let record = store
            .key_by_id(key_id)?
            .ok_or_else(|| WalletError::NotFound(format!("key {key_id}")))?;
        Self::from_record(record)
    }

    pub fn id(&self) -> u64 {
        self.record.id
    }

    pub fn record(&self) -> &KeyRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut KeyRecord {
        &mut self.record
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn path(&self) -> &str {
        &self.record.path
    }

    pub fn address(&self) -> &str {
        &self.record.address
    }

    pub fn wif(&self) -> &str {
        &self.record.wif
    }

    pub fn depth(&self) -> u8 {
        self.record.depth
    }

    pub fn change(&self) -> u32 {
        self.record.change
    }

    pub fn account_id(&self) -> u32 {
        self.record.account_id
    }

    pub fn address_index(&self) -> u32 {
        self.record.address_index
    }

    pub fn key_type(&self) -> KeyType {
        self.record.key_type
    }

    pub fn is_private(&self) -> bool {
        self.record.is_private
    }

    pub fn network(&self) -> &'static NetworkParams {
        self.params
    }

    /// Balance in satoshi
    pub fn balance(&self) -> u64 {
        self.record.balance
    }

    /// Balance formatted in currency denomination
    pub fn balance_str(&self) -> String {
        self.params.print_value(self.record.balance)
    }

    /// Rebuild the key handle from the stored wif. Multisig rows hold a
    /// redeem script instead of key material and cannot produce one.
    pub fn hd_key(&self) -> WalletResult<HdKey> {
        if self.record.key_type == KeyType::Multisig {
            return Err(WalletError::KeyMismatch(
                "multisig keys have no single key handle".into(),
            ));
        }
        Ok(HdKey::import(&self.record.wif, self.params)?)
    }

    /// Full BIP44 path of this key, truncated to `max_depth` levels past
    /// the master: `m/purpose'/cointype'/account'/change/address_index`
    pub fn full_path(&self, max_depth: usize) -> Vec<String> {
        let mut levels = vec![if self.record.is_private {
            "m".to_string()
        } else {
            "M".to_string()
        }];
        levels.push(format!("{}'", self.record.purpose));
        levels.push(format!("{}'", self.params.bip44_cointype));
        levels.push(format!("{}'", self.record.account_id));
        levels.push(self.record.change.to_string());
        levels.push(self.record.address_index.to_string());
        levels.truncate(max_depth + 1);
        levels
    }

    /// Canonical projection of this key
    pub fn details(&self) -> KeyDetails {
        KeyDetails {
            id: self.record.id,
            key_type: self.record.key_type,
            is_private: self.record.is_private,
            name: self.record.name.clone(),
            public: self.record.public.clone(),
            wif: self.record.wif.clone(),
            account_id: self.record.account_id,
            parent_id: self.record.parent_id,
            depth: self.record.depth,
            change: self.record.change,
            address_index: self.record.address_index,
            address: self.record.address.clone(),
            path: self.record.path.clone(),
            balance: self.record.balance,
            balance_str: self.balance_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record() -> KeyRecord {
        KeyRecord {
            id: 7,
            wallet_id: 1,
            name: "Key 5".to_string(),
            path: "m/44'/0'/0'/0/5".to_string(),
            depth: 5,
            purpose: 44,
            account_id: 0,
            change: 0,
            address_index: 5,
            network: "bitcoin".to_string(),
            parent_id: Some(4),
            key_type: KeyType::Bip32,
            is_private: true,
            public: String::new(),
            private: None,
            wif: String::new(),
            address: String::new(),
            compressed: true,
            used: false,
            balance: 8_970_937,
        }
    }

    #[test]
    fn test_full_path() {
        let key = WalletKey::from_record(test_record()).unwrap();
        assert_eq!(
            key.full_path(5),
            vec!["m", "44'", "0'", "0'", "0", "5"]
        );
        assert_eq!(key.full_path(3), vec!["m", "44'", "0'", "0'"]);
    }

    #[test]
    fn test_balance_formatting() {
        let key = WalletKey::from_record(test_record()).unwrap();
        assert_eq!(key.balance(), 8_970_937);
        assert_eq!(key.balance_str(), "0.08970937 BTC");
    }

    #[test]
    fn test_unknown_network_rejected() {
        let mut record = test_record();
        record.network = "dogecoin".to_string();
        assert!(WalletKey::from_record(record).is_err());
    }
}
