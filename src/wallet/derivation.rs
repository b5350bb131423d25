/// Key materialization
///
/// Turns a requested derivation path into persisted key rows. Before
/// deriving, the engine walks the path upward through the store to find
/// the closest already-persisted ancestor, so repeated calls and process
/// restarts only pay for the missing segments.
use crate::error::{KeyError, WalletError, WalletResult};
use crate::keys::path::{normalize_path, PathSegment};
use crate::keys::HdKey;
use crate::network::NetworkParams;
use crate::storage::{KeyRecord, KeyType, Store};
use crate::wallet::wallet_key::WalletKey;
use tracing::debug;

/// Context shared by the keys created in one materialization pass
#[derive(Debug, Clone)]
pub struct DeriveScope {
    pub wallet_id: u64,
    pub account_id: u32,
    pub change: u32,
    pub purpose: u32,
    pub network: &'static NetworkParams,
    pub name: String,
}

/// A key to persist, with its placement metadata
pub struct KeySpec<'a> {
    pub wallet_id: u64,
    pub name: &'a str,
    pub key: &'a HdKey,
    pub account_id: u32,
    pub change: u32,
    pub purpose: u32,
    pub path: String,
    pub parent_id: Option<u64>,
    pub key_type: KeyType,
}

/// Derives missing path segments and persists them through the store
pub struct DerivationEngine<'a> {
    store: &'a Store,
}

impl<'a> DerivationEngine<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Persist one key row. Returns the existing row when the wallet
    /// already holds this key (matched on wif or public bytes), making
    /// derivation idempotent.
    ///
    /// A non-master extended key must be imported at its real BIP32
    /// depth; the one exception is a depth-3 account key declared at
    /// path `m`, whose implied account path is synthesized.
    pub fn store_key(&self, spec: KeySpec<'_>) -> WalletResult<WalletKey> {
        let key = spec.key;
        if let Some(existing) = self.store.key_by_wif(spec.wallet_id, &key.wif())? {
            debug!("key {} already stored as id {}", spec.path, existing.id);
            return WalletKey::from_record(existing);
        }

        let mut path = normalize_path(&spec.path)?;
        if spec.key_type != KeyType::Single && key.is_extended() {
            let declared_depth = path.split('/').count() - 1;
            if key.depth() as usize != declared_depth {
                if path == "m" && key.depth() == 3 {
                    path = format!(
                        "m/{}'/{}'/{}'",
                        spec.purpose,
                        key.network().bip44_cointype,
                        spec.account_id
                    );
                } else {
                    return Err(WalletError::DepthMismatch {
                        key_depth: key.depth(),
                        path_depth: declared_depth,
                        path,
                    });
                }
            }
        }

        let record = KeyRecord {
            id: 0,
            wallet_id: spec.wallet_id,
            name: spec.name.to_string(),
            path,
            depth: key.depth(),
            purpose: spec.purpose,
            account_id: spec.account_id,
            change: spec.change,
            address_index: key.child_index(),
            network: key.network().name.to_string(),
            parent_id: spec.parent_id,
            key_type: spec.key_type,
            is_private: key.is_private(),
            public: key.public_hex(),
            private: key.private_hex(),
            wif: key.wif(),
            address: key.address(),
            compressed: key.compressed(),
            used: false,
            balance: 0,
        };
        let (record, inserted) = self.store.upsert_key(record)?;
        if inserted {
            debug!("stored key {} at {}", record.id, record.path);
        }
        WalletKey::from_record(record)
    }

    /// Materialize every key along `rel_path` below `parent`, returning
    /// the leaf. `basepath` is the parent's absolute path.
    pub fn materialize(
        &self,
        parent: &WalletKey,
        rel_path: &[String],
        basepath: &str,
        scope: &DeriveScope,
    ) -> WalletResult<WalletKey> {
        let basepath = normalize_path(basepath)?;
        let mut segments: Vec<String> = Vec::new();
        for level in rel_path {
            segments.push(normalize_path(level)?);
        }
        if segments.is_empty() {
            return Ok(parent.clone());
        }
        let target = format!("{}/{}", basepath, segments.join("/"));

        // Restart from the closest persisted ancestor
        let mut parent = parent.clone();
        let mut basepath = basepath;
        if let Some(ancestor) = self.store.closest_ancestor(scope.wallet_id, &target)? {
            if ancestor.path == target {
                return WalletKey::from_record(ancestor);
            }
            if ancestor.path != basepath {
                if let Some(remainder) = target.strip_prefix(&format!("{}/", ancestor.path)) {
                    segments = remainder.split('/').map(str::to_string).collect();
                    basepath = ancestor.path.clone();
                    parent = WalletKey::from_record(ancestor)?;
                }
            }
        }

        let mut parsed = Vec::with_capacity(segments.len());
        for segment in &segments {
            parsed.push(PathSegment::parse(segment)?);
        }
        let mut hd = parent.hd_key()?.with_network(scope.network)?;
        if !hd.is_private() && parsed.iter().any(|s| s.hardened) {
            return Err(WalletError::Key(KeyError::HardenedFromPublic));
        }

        let mut parent_id = parent.id();
        let mut full_path = basepath;
        let mut leaf = parent;
        for segment in &parsed {
            hd = hd.subkey(segment)?;
            full_path = format!("{full_path}/{segment}");
            leaf = self.store_key(KeySpec {
                wallet_id: scope.wallet_id,
                name: &scope.name,
                key: &hd,
                account_id: scope.account_id,
                change: scope.change,
                purpose: scope.purpose,
                path: full_path.clone(),
                parent_id: Some(parent_id),
                key_type: KeyType::Bip32,
            })?;
            parent_id = leaf.id();
        }
        debug!("materialized {} down to key {}", full_path, parent_id);
        Ok(leaf)
    }
}
