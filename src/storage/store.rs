/// Persistent wallet store
///
/// One sled tree per table plus index trees backing the uniqueness
/// constraints: `wallets.name`, `(keys.wallet_id, keys.path)`,
/// `(keys.wallet_id, keys.wif)` and `(keys.wallet_id, keys.public)`.
/// Row ids come from the database id allocator and are monotonically
/// increasing, which gives "oldest key first" ordering for free.
use crate::error::{StoreError, StoreResult, WalletError, WalletResult};
use crate::storage::records::{
    KeyFilter, KeyRecord, MultisigChildRecord, TxInputRecord, TxOutputRecord, TxRecord,
    WalletRecord,
};
use sled::{Db, IVec, Tree};
use std::path::Path;
use tracing::debug;

/// Handle to the wallet database; clones share the same underlying store
#[derive(Clone)]
pub struct Store {
    db: Db,
    wallets: Tree,
    wallets_by_name: Tree,
    keys: Tree,
    keys_by_wallet: Tree,
    keys_by_path: Tree,
    keys_by_address: Tree,
    keys_by_wif: Tree,
    keys_by_public: Tree,
    multisig_children: Tree,
    transactions: Tree,
    tx_by_hash: Tree,
    tx_by_wallet: Tree,
    tx_inputs: Tree,
    inputs_by_tx: Tree,
    tx_outputs: Tree,
    outputs_by_tx: Tree,
}

fn composite(id: u64, suffix: &[u8]) -> Vec<u8> {
    let mut key = id.to_be_bytes().to_vec();
    key.extend_from_slice(suffix);
    key
}

fn position_key(parent_id: u64, n: u32) -> Vec<u8> {
    composite(parent_id, &n.to_be_bytes())
}

fn decode_id(value: &IVec) -> u64 {
    let bytes: [u8; 8] = value
        .as_ref()
        .try_into()
        .expect("index values are 8-byte ids");
    u64::from_be_bytes(bytes)
}

impl Store {
    /// Open (or create) the database at the given directory
    pub fn open(path: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(path)?;
        let db = sled::open(path.join("wallets.db"))?;
        Ok(Self {
            wallets: db.open_tree("wallets")?,
            wallets_by_name: db.open_tree("wallets_by_name")?,
            keys: db.open_tree("keys")?,
            keys_by_wallet: db.open_tree("keys_by_wallet")?,
            keys_by_path: db.open_tree("keys_by_path")?,
            keys_by_address: db.open_tree("keys_by_address")?,
            keys_by_wif: db.open_tree("keys_by_wif")?,
            keys_by_public: db.open_tree("keys_by_public")?,
            multisig_children: db.open_tree("multisig_children")?,
            transactions: db.open_tree("transactions")?,
            tx_by_hash: db.open_tree("tx_by_hash")?,
            tx_by_wallet: db.open_tree("tx_by_wallet")?,
            tx_inputs: db.open_tree("tx_inputs")?,
            inputs_by_tx: db.open_tree("inputs_by_tx")?,
            tx_outputs: db.open_tree("tx_outputs")?,
            outputs_by_tx: db.open_tree("outputs_by_tx")?,
            db,
        })
    }

    fn next_id(&self) -> StoreResult<u64> {
        Ok(self.db.generate_id()?)
    }

    fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn load<T: serde::de::DeserializeOwned>(value: IVec) -> StoreResult<T> {
        Ok(serde_json::from_slice(&value)?)
    }

    fn fetch<T: serde::de::DeserializeOwned>(tree: &Tree, key: &[u8]) -> StoreResult<Option<T>> {
        tree.get(key)?.map(Self::load).transpose()
    }

    // --- wallets ---

    /// Insert a wallet row, assigning its id. Fails on a duplicate name.
    pub fn create_wallet(&self, mut record: WalletRecord) -> WalletResult<WalletRecord> {
        if self.wallet_by_name(&record.name)?.is_some() {
            return Err(WalletError::DuplicateName(record.name));
        }
        record.id = self.next_id()?;
        self.wallets
            .insert(record.id.to_be_bytes(), serde_json::to_vec(&record).map_err(StoreError::from)?)
            .map_err(StoreError::from)?;
        self.wallets_by_name
            .insert(record.name.as_bytes(), &record.id.to_be_bytes()[..])
            .map_err(StoreError::from)?;
        self.flush()?;
        debug!("created wallet {} '{}'", record.id, record.name);
        Ok(record)
    }

    pub fn wallet_by_id(&self, id: u64) -> StoreResult<Option<WalletRecord>> {
        Self::fetch(&self.wallets, &id.to_be_bytes())
    }

    pub fn wallet_by_name(&self, name: &str) -> StoreResult<Option<WalletRecord>> {
        match self.wallets_by_name.get(name.as_bytes())? {
            Some(id) => self.wallet_by_id(decode_id(&id)),
            None => Ok(None),
        }
    }

    /// Rewrite a wallet row, maintaining the name index on rename
    pub fn update_wallet(&self, record: &WalletRecord) -> StoreResult<()> {
        if let Some(existing) = self.wallet_by_id(record.id)? {
            if existing.name != record.name {
                self.wallets_by_name.remove(existing.name.as_bytes())?;
                self.wallets_by_name
                    .insert(record.name.as_bytes(), &record.id.to_be_bytes()[..])?;
            }
        }
        self.wallets
            .insert(record.id.to_be_bytes(), serde_json::to_vec(record)?)?;
        self.flush()
    }

    /// All wallet rows, id order
    pub fn wallets(&self) -> StoreResult<Vec<WalletRecord>> {
        let mut rows = Vec::new();
        for item in self.wallets.iter() {
            let (_, value) = item?;
            rows.push(Self::load(value)?);
        }
        Ok(rows)
    }

    /// Cosigner child wallets of a multisig parent, ordered by name
    pub fn child_wallets(&self, parent_id: u64) -> StoreResult<Vec<WalletRecord>> {
        let mut rows: Vec<WalletRecord> = self
            .wallets()?
            .into_iter()
            .filter(|w| w.parent_id == Some(parent_id))
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    // --- keys ---

    /// Insert a key row unless one already exists for this wallet with the
    /// same path, wif or public bytes; returns the row and whether it was
    /// inserted. Derivation is idempotent through this check.
    pub fn upsert_key(&self, mut record: KeyRecord) -> StoreResult<(KeyRecord, bool)> {
        for (tree, value) in [
            (&self.keys_by_path, record.path.as_str()),
            (&self.keys_by_wif, record.wif.as_str()),
            (&self.keys_by_public, record.public.as_str()),
        ] {
            let index_key = composite(record.wallet_id, value.as_bytes());
            if let Some(id) = tree.get(&index_key)? {
                if let Some(existing) = self.key_by_id(decode_id(&id))? {
                    debug!("key already exists for wallet {}: {}", record.wallet_id, value);
                    return Ok((existing, false));
                }
            }
        }
        record.id = self.next_id()?;
        self.keys
            .insert(record.id.to_be_bytes(), serde_json::to_vec(&record)?)?;
        self.index_key_row(&record)?;
        self.flush()?;
        Ok((record, true))
    }

    fn index_key_row(&self, record: &KeyRecord) -> StoreResult<()> {
        let id = record.id.to_be_bytes();
        self.keys_by_wallet
            .insert(composite(record.wallet_id, &id), &id[..])?;
        self.keys_by_path
            .insert(composite(record.wallet_id, record.path.as_bytes()), &id[..])?;
        self.keys_by_address
            .insert(composite(record.wallet_id, record.address.as_bytes()), &id[..])?;
        self.keys_by_wif
            .insert(composite(record.wallet_id, record.wif.as_bytes()), &id[..])?;
        self.keys_by_public
            .insert(composite(record.wallet_id, record.public.as_bytes()), &id[..])?;
        Ok(())
    }

    fn unindex_key_row(&self, record: &KeyRecord) -> StoreResult<()> {
        self.keys_by_wallet
            .remove(composite(record.wallet_id, &record.id.to_be_bytes()))?;
        self.keys_by_path
            .remove(composite(record.wallet_id, record.path.as_bytes()))?;
        self.keys_by_address
            .remove(composite(record.wallet_id, record.address.as_bytes()))?;
        self.keys_by_wif
            .remove(composite(record.wallet_id, record.wif.as_bytes()))?;
        self.keys_by_public
            .remove(composite(record.wallet_id, record.public.as_bytes()))?;
        Ok(())
    }

    pub fn key_by_id(&self, id: u64) -> StoreResult<Option<KeyRecord>> {
        Self::fetch(&self.keys, &id.to_be_bytes())
    }

    fn key_by_index(&self, tree: &Tree, wallet_id: u64, value: &str) -> StoreResult<Option<KeyRecord>> {
        match tree.get(composite(wallet_id, value.as_bytes()))? {
            Some(id) => self.key_by_id(decode_id(&id)),
            None => Ok(None),
        }
    }

    pub fn key_by_path(&self, wallet_id: u64, path: &str) -> StoreResult<Option<KeyRecord>> {
        self.key_by_index(&self.keys_by_path, wallet_id, path)
    }

    pub fn key_by_address(&self, wallet_id: u64, address: &str) -> StoreResult<Option<KeyRecord>> {
        self.key_by_index(&self.keys_by_address, wallet_id, address)
    }

    pub fn key_by_wif(&self, wallet_id: u64, wif: &str) -> StoreResult<Option<KeyRecord>> {
        self.key_by_index(&self.keys_by_wif, wallet_id, wif)
    }

    pub fn key_by_public(&self, wallet_id: u64, public: &str) -> StoreResult<Option<KeyRecord>> {
        self.key_by_index(&self.keys_by_public, wallet_id, public)
    }

    pub fn key_by_name(&self, wallet_id: u64, name: &str) -> StoreResult<Option<KeyRecord>> {
        Ok(self
            .wallet_keys(wallet_id)?
            .into_iter()
            .find(|k| k.name == name))
    }

    /// Closest persisted ancestor of a path, found by repeatedly
    /// truncating the last segment
    pub fn closest_ancestor(&self, wallet_id: u64, path: &str) -> StoreResult<Option<KeyRecord>> {
        let mut current = path.to_string();
        loop {
            if let Some(key) = self.key_by_path(wallet_id, &current)? {
                return Ok(Some(key));
            }
            match current.rsplit_once('/') {
                Some((parent, _)) => current = parent.to_string(),
                None => return Ok(None),
            }
        }
    }

    /// All keys of a wallet in id (creation) order
    pub fn wallet_keys(&self, wallet_id: u64) -> StoreResult<Vec<KeyRecord>> {
        let mut rows = Vec::new();
        for item in self.keys_by_wallet.scan_prefix(wallet_id.to_be_bytes()) {
            let (_, id) = item?;
            if let Some(key) = self.key_by_id(decode_id(&id))? {
                rows.push(key);
            }
        }
        Ok(rows)
    }

    /// Keys of a wallet matching the filter, id order
    pub fn keys_filtered(&self, wallet_id: u64, filter: &KeyFilter) -> StoreResult<Vec<KeyRecord>> {
        Ok(self
            .wallet_keys(wallet_id)?
            .into_iter()
            .filter(|k| filter.matches(k))
            .collect())
    }

    /// Rewrite a key row, refreshing indexes for re-encoded columns
    /// (private-key upgrades change `wif`)
    pub fn update_key(&self, record: &KeyRecord) -> StoreResult<()> {
        if let Some(existing) = self.key_by_id(record.id)? {
            if existing.wif != record.wif
                || existing.address != record.address
                || existing.public != record.public
                || existing.path != record.path
            {
                self.unindex_key_row(&existing)?;
                self.index_key_row(record)?;
            }
        }
        self.keys
            .insert(record.id.to_be_bytes(), serde_json::to_vec(record)?)?;
        self.flush()
    }

    // --- multisig child links ---

    pub fn add_multisig_link(&self, link: &MultisigChildRecord) -> StoreResult<()> {
        self.multisig_children.insert(
            position_key(link.parent_key_id, link.key_order),
            serde_json::to_vec(link)?,
        )?;
        self.flush()
    }

    /// Child links of a multisig key in `key_order`
    pub fn multisig_children(&self, parent_key_id: u64) -> StoreResult<Vec<MultisigChildRecord>> {
        let mut rows = Vec::new();
        for item in self
            .multisig_children
            .scan_prefix(parent_key_id.to_be_bytes())
        {
            let (_, value) = item?;
            rows.push(Self::load(value)?);
        }
        Ok(rows)
    }

    // --- transactions ---

    /// Insert a transaction row, assigning its id; `(wallet, hash)` must
    /// not already exist
    pub fn insert_transaction(&self, mut record: TxRecord) -> StoreResult<TxRecord> {
        record.id = self.next_id()?;
        self.transactions
            .insert(record.id.to_be_bytes(), serde_json::to_vec(&record)?)?;
        self.tx_by_hash.insert(
            composite(record.wallet_id, record.hash.as_bytes()),
            &record.id.to_be_bytes()[..],
        )?;
        self.tx_by_wallet.insert(
            composite(record.wallet_id, &record.id.to_be_bytes()),
            &record.id.to_be_bytes()[..],
        )?;
        self.flush()?;
        Ok(record)
    }

    pub fn transaction_by_id(&self, id: u64) -> StoreResult<Option<TxRecord>> {
        Self::fetch(&self.transactions, &id.to_be_bytes())
    }

    pub fn transaction_by_hash(&self, wallet_id: u64, hash: &str) -> StoreResult<Option<TxRecord>> {
        match self.tx_by_hash.get(composite(wallet_id, hash.as_bytes()))? {
            Some(id) => self.transaction_by_id(decode_id(&id)),
            None => Ok(None),
        }
    }

    pub fn update_transaction(&self, record: &TxRecord) -> StoreResult<()> {
        self.transactions
            .insert(record.id.to_be_bytes(), serde_json::to_vec(record)?)?;
        self.flush()
    }

    pub fn wallet_transactions(&self, wallet_id: u64) -> StoreResult<Vec<TxRecord>> {
        let mut rows = Vec::new();
        for item in self.tx_by_wallet.scan_prefix(wallet_id.to_be_bytes()) {
            let (_, id) = item?;
            if let Some(tx) = self.transaction_by_id(decode_id(&id))? {
                rows.push(tx);
            }
        }
        Ok(rows)
    }

    // --- transaction inputs ---

    pub fn insert_input(&self, mut record: TxInputRecord) -> StoreResult<TxInputRecord> {
        record.id = self.next_id()?;
        self.tx_inputs
            .insert(record.id.to_be_bytes(), serde_json::to_vec(&record)?)?;
        self.inputs_by_tx.insert(
            position_key(record.transaction_id, record.input_n),
            &record.id.to_be_bytes()[..],
        )?;
        self.flush()?;
        Ok(record)
    }

    pub fn input_by_position(
        &self,
        transaction_id: u64,
        input_n: u32,
    ) -> StoreResult<Option<TxInputRecord>> {
        match self.inputs_by_tx.get(position_key(transaction_id, input_n))? {
            Some(id) => Self::fetch(&self.tx_inputs, id.as_ref()),
            None => Ok(None),
        }
    }

    pub fn inputs_for_transaction(&self, transaction_id: u64) -> StoreResult<Vec<TxInputRecord>> {
        let mut rows = Vec::new();
        for item in self.inputs_by_tx.scan_prefix(transaction_id.to_be_bytes()) {
            let (_, id) = item?;
            if let Some(input) = Self::fetch(&self.tx_inputs, id.as_ref())? {
                rows.push(input);
            }
        }
        Ok(rows)
    }

    pub fn update_input(&self, record: &TxInputRecord) -> StoreResult<()> {
        self.tx_inputs
            .insert(record.id.to_be_bytes(), serde_json::to_vec(record)?)?;
        self.flush()
    }

    /// Whether any stored input of this wallet spends `(prev_hash, n)`
    pub fn input_spending(&self, wallet_id: u64, prev_hash: &str, n: u32) -> StoreResult<bool> {
        for tx in self.wallet_transactions(wallet_id)? {
            for input in self.inputs_for_transaction(tx.id)? {
                if input.prev_hash == prev_hash && input.input_n == n {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    // --- transaction outputs ---

    pub fn insert_output(&self, mut record: TxOutputRecord) -> StoreResult<TxOutputRecord> {
        record.id = self.next_id()?;
        self.tx_outputs
            .insert(record.id.to_be_bytes(), serde_json::to_vec(&record)?)?;
        self.outputs_by_tx.insert(
            position_key(record.transaction_id, record.output_n),
            &record.id.to_be_bytes()[..],
        )?;
        self.flush()?;
        Ok(record)
    }

    pub fn output_by_position(
        &self,
        transaction_id: u64,
        output_n: u32,
    ) -> StoreResult<Option<TxOutputRecord>> {
        match self
            .outputs_by_tx
            .get(position_key(transaction_id, output_n))?
        {
            Some(id) => Self::fetch(&self.tx_outputs, id.as_ref()),
            None => Ok(None),
        }
    }

    pub fn outputs_for_transaction(&self, transaction_id: u64) -> StoreResult<Vec<TxOutputRecord>> {
        let mut rows = Vec::new();
        for item in self.outputs_by_tx.scan_prefix(transaction_id.to_be_bytes()) {
            let (_, id) = item?;
            if let Some(output) = Self::fetch(&self.tx_outputs, id.as_ref())? {
                rows.push(output);
            }
        }
        Ok(rows)
    }

    pub fn update_output(&self, record: &TxOutputRecord) -> StoreResult<()> {
        self.tx_outputs
            .insert(record.id.to_be_bytes(), serde_json::to_vec(record)?)?;
        self.flush()
    }

    /// All outputs of a wallet joined with their transaction rows
    pub fn wallet_outputs(&self, wallet_id: u64) -> StoreResult<Vec<(TxOutputRecord, TxRecord)>> {
        let mut rows = Vec::new();
        for tx in self.wallet_transactions(wallet_id)? {
            for output in self.outputs_for_transaction(tx.id)? {
                rows.push((output, tx.clone()));
            }
        }
        Ok(rows)
    }

    // --- cascade delete ---

    /// Delete a wallet row and all its keys. Output and input rows keep
    /// their transaction history but lose their key references; multisig
    /// child links touching the deleted keys are removed.
    pub fn delete_wallet_cascade(&self, wallet_id: u64) -> StoreResult<()> {
        let keys = self.wallet_keys(wallet_id)?;
        let key_ids: Vec<u64> = keys.iter().map(|k| k.id).collect();

        for (mut output, _) in self.wallet_outputs(wallet_id)? {
            if output.key_id.map_or(false, |id| key_ids.contains(&id)) {
                output.key_id = None;
                self.update_output(&output)?;
            }
        }
        for tx in self.wallet_transactions(wallet_id)? {
            for mut input in self.inputs_for_transaction(tx.id)? {
                if input.key_id.map_or(false, |id| key_ids.contains(&id)) {
                    input.key_id = None;
                    self.update_input(&input)?;
                }
            }
        }

        let mut stale_links = Vec::new();
        for item in self.multisig_children.iter() {
            let (index_key, value) = item?;
            let link: MultisigChildRecord = Self::load(value)?;
            if key_ids.contains(&link.parent_key_id) || key_ids.contains(&link.child_key_id) {
                stale_links.push(index_key);
            }
        }
        for index_key in stale_links {
            self.multisig_children.remove(index_key)?;
        }

        for key in &keys {
            self.unindex_key_row(key)?;
            self.keys.remove(key.id.to_be_bytes())?;
        }

        if let Some(wallet) = self.wallet_by_id(wallet_id)? {
            self.wallets_by_name.remove(wallet.name.as_bytes())?;
        }
        self.wallets.remove(wallet_id.to_be_bytes())?;
        self.flush()?;
        debug!("deleted wallet {wallet_id} and {} keys", keys.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::records::{KeyType, Scheme};
    use tempfile::TempDir;

    fn test_store() -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (store, dir)
    }

    fn wallet_record(name: &str) -> WalletRecord {
        WalletRecord {
            id: 0,
            name: name.to_string(),
            owner: String::new(),
            network: "bitcoin".to_string(),
            purpose: 44,
            scheme: Scheme::Bip44,
            main_key_id: None,
            parent_id: None,
            sort_keys: false,
            multisig_n_required: None,
            balance: 0,
        }
    }

    fn key_record(wallet_id: u64, path: &str, wif: &str) -> KeyRecord {
        KeyRecord {
            id: 0,
            wallet_id,
            name: path.to_string(),
            path: path.to_string(),
            depth: path.split('/').count() as u8 - 1,
            purpose: 44,
            account_id: 0,
            change: 0,
            address_index: 0,
            network: "bitcoin".to_string(),
            parent_id: None,
            key_type: KeyType::Bip32,
            is_private: true,
            public: format!("public-{wif}"),
            private: None,
            wif: wif.to_string(),
            address: format!("address-{wif}"),
            compressed: true,
            used: false,
            balance: 0,
        }
    }

    #[test]
    fn test_wallet_name_unique() {
        let (store, _dir) = test_store();
        store.create_wallet(wallet_record("main")).unwrap();
        assert!(matches!(
            store.create_wallet(wallet_record("main")),
            Err(WalletError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_upsert_key_idempotent() {
        let (store, _dir) = test_store();
        let wallet = store.create_wallet(wallet_record("main")).unwrap();
        let (first, inserted) = store
            .upsert_key(key_record(wallet.id, "m/44'/0'", "xprv-a"))
            .unwrap();
        assert!(inserted);
        let (second, inserted) = store
            .upsert_key(key_record(wallet.id, "m/44'/0'", "xprv-a"))
            .unwrap();
        assert!(!inserted);
        assert_eq!(first.id, second.id);
        assert_eq!(store.wallet_keys(wallet.id).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_dedupes_on_wif_across_paths() {
        let (store, _dir) = test_store();
        let wallet = store.create_wallet(wallet_record("main")).unwrap();
        let (first, _) = store
            .upsert_key(key_record(wallet.id, "m", "xprv-a"))
            .unwrap();
        let (second, inserted) = store
            .upsert_key(key_record(wallet.id, "m/44'", "xprv-a"))
            .unwrap();
        assert!(!inserted);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_same_key_different_wallets() {
        let (store, _dir) = test_store();
        let a = store.create_wallet(wallet_record("a")).unwrap();
        let b = store.create_wallet(wallet_record("b")).unwrap();
        let (_, inserted_a) = store.upsert_key(key_record(a.id, "m", "xprv-a")).unwrap();
        let (_, inserted_b) = store.upsert_key(key_record(b.id, "m", "xprv-a")).unwrap();
        assert!(inserted_a && inserted_b);
    }

    #[test]
    fn test_closest_ancestor() {
        let (store, _dir) = test_store();
        let wallet = store.create_wallet(wallet_record("main")).unwrap();
        store.upsert_key(key_record(wallet.id, "m", "k0")).unwrap();
        store
            .upsert_key(key_record(wallet.id, "m/44'/0'", "k2"))
            .unwrap();
        let ancestor = store
            .closest_ancestor(wallet.id, "m/44'/0'/0'/0/5")
            .unwrap()
            .unwrap();
        assert_eq!(ancestor.path, "m/44'/0'");
        let root = store
            .closest_ancestor(wallet.id, "m/49'/0'")
            .unwrap()
            .unwrap();
        assert_eq!(root.path, "m");
        assert!(store.closest_ancestor(wallet.id, "n/0").unwrap().is_none());
    }

    #[test]
    fn test_keys_filtered() {
        let (store, _dir) = test_store();
        let wallet = store.create_wallet(wallet_record("main")).unwrap();
        let mut payment = key_record(wallet.id, "m/44'/0'/0'/0/0", "k5");
        payment.depth = 5;
        payment.change = 0;
        store.upsert_key(payment).unwrap();
        let mut change = key_record(wallet.id, "m/44'/0'/0'/1/0", "k6");
        change.depth = 5;
        change.change = 1;
        store.upsert_key(change).unwrap();

        let filter = KeyFilter {
            change: Some(1),
            depth: Some(5),
            ..KeyFilter::default()
        };
        let rows = store.keys_filtered(wallet.id, &filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].path, "m/44'/0'/0'/1/0");
    }

    #[test]
    fn test_rename_reindexes() {
        let (store, _dir) = test_store();
        let mut wallet = store.create_wallet(wallet_record("before")).unwrap();
        wallet.name = "after".to_string();
        store.update_wallet(&wallet).unwrap();
        assert!(store.wallet_by_name("before").unwrap().is_none());
        assert_eq!(store.wallet_by_name("after").unwrap().unwrap().id, wallet.id);
    }

    #[test]
    fn test_cascade_delete_nulls_output_refs() {
        let (store, _dir) = test_store();
        let wallet = store.create_wallet(wallet_record("main")).unwrap();
        let (key, _) = store.upsert_key(key_record(wallet.id, "m", "k0")).unwrap();
        let tx = store
            .insert_transaction(TxRecord {
                id: 0,
                wallet_id: wallet.id,
                hash: "aa".repeat(32),
                confirmations: 1,
                block_height: None,
                date: None,
                fee: None,
            })
            .unwrap();
        let output = store
            .insert_output(TxOutputRecord {
                id: 0,
                transaction_id: tx.id,
                output_n: 0,
                key_id: Some(key.id),
                value: 1000,
                script: String::new(),
                spent: false,
            })
            .unwrap();

        store.delete_wallet_cascade(wallet.id).unwrap();
        assert!(store.wallet_by_id(wallet.id).unwrap().is_none());
        assert!(store.key_by_id(key.id).unwrap().is_none());
        let kept = store
            .output_by_position(tx.id, output.output_n)
            .unwrap()
            .unwrap();
        assert_eq!(kept.key_id, None);
    }
}
