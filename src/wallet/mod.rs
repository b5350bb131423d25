/// Wallet management
///
/// The `Wallet` type ties a persisted wallet row to its key tree: BIP44
/// account and address derivation, multisig composition over cosigner
/// wallets, key import and lookup. The store handle travels on the wallet;
/// every operation reads and writes through it.
pub mod derivation;
pub mod multisig;
pub mod wallet_key;

use crate::error::{KeyError, WalletError, WalletResult};
use crate::keys::path::{normalize_path, parse_path};
use crate::keys::HdKey;
use crate::network::{NetworkParams, DEFAULT_NETWORK};
use crate::storage::{
    KeyFilter, KeyRecord, KeyType, MultisigChildRecord, Scheme, Store, WalletRecord,
};
use derivation::{DerivationEngine, DeriveScope, KeySpec};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

pub use multisig::{decode_redeem_script, p2sh_address, redeem_script, sort_pubkeys};
pub use wallet_key::{KeyDetails, WalletKey};

/// Options for `Wallet::create`
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Master or single key in any supported encoding; generated when
    /// absent (bip44/single schemes)
    pub key: Option<String>,
    /// Hex seed for the master key
    pub seed: Option<String>,
    /// BIP39 mnemonic phrase for the master key
    pub mnemonic: Option<String>,
    pub owner: String,
    pub network: Option<String>,
    pub account_id: u32,
    pub purpose: u32,
    pub scheme: Scheme,
    pub parent_id: Option<u64>,
    pub sort_keys: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            key: None,
            seed: None,
            mnemonic: None,
            owner: String::new(),
            network: None,
            account_id: 0,
            purpose: 44,
            scheme: Scheme::Bip44,
            parent_id: None,
            sort_keys: false,
        }
    }
}

/// Options for `Wallet::create_multisig`
#[derive(Debug, Clone)]
pub struct MultisigOptions {
    pub owner: String,
    pub network: Option<String>,
    pub account_id: u32,
    pub purpose: u32,
    pub sort_keys: bool,
}

impl Default for MultisigOptions {
    fn default() -> Self {
        Self {
            owner: String::new(),
            network: None,
            account_id: 0,
            purpose: 45,
            sort_keys: false,
        }
    }
}

/// Account and network selector shared by key operations; `None` fields
/// fall back to the wallet defaults
#[derive(Debug, Clone, Default)]
pub struct KeyScope {
    pub account_id: Option<u32>,
    pub network: Option<String>,
}

/// Options for `Wallet::import_key`
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub account_id: u32,
    pub name: Option<String>,
    pub network: Option<String>,
    pub purpose: u32,
    pub key_type: Option<KeyType>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            account_id: 0,
            name: None,
            network: None,
            purpose: 44,
            key_type: None,
        }
    }
}

/// Serializable wallet projection for CLI output
#[derive(Debug, Serialize)]
pub struct WalletDetails {
    pub id: u64,
    pub name: String,
    pub owner: String,
    pub scheme: Scheme,
    pub network: String,
    pub balance: u64,
    pub balance_str: String,
    pub balances: HashMap<String, u64>,
    pub main_key_id: Option<u64>,
    pub cosigner_wallet_ids: Vec<u64>,
    pub multisig_n_required: Option<u8>,
    pub sort_keys: bool,
}

/// An open wallet session
pub struct Wallet {
    pub(crate) store: Store,
    pub(crate) record: WalletRecord,
    pub(crate) network: &'static NetworkParams,
    pub(crate) main_key: Option<WalletKey>,
    pub(crate) cosigner_ids: Vec<u64>,
    pub(crate) default_account_id: u32,
    pub(crate) balances: HashMap<String, u64>,
}

/// Import a key, detecting its network when none is specified
fn import_key_auto(encoded: &str, network: Option<&str>) -> WalletResult<HdKey> {
    if let Some(name) = network {
        let params = NetworkParams::from_name(name)?;
        return Ok(HdKey::import(encoded, params)?);
    }
    for params in NetworkParams::all() {
        if let Ok(key) = HdKey::import(encoded, params) {
            return Ok(key);
        }
    }
    Err(WalletError::Key(KeyError::InvalidKey(format!(
        "could not import key for any known network: {encoded}"
    ))))
}

impl Wallet {
    // --- construction ---

    /// Create a wallet and persist it. A master key is generated unless
    /// `key`, `seed` or `mnemonic` is supplied.
    pub fn create(store: &Store, name: &str, options: CreateOptions) -> WalletResult<Wallet> {
        if store.wallet_by_name(name)?.is_some() {
            return Err(WalletError::DuplicateName(name.to_string()));
        }

        let explicit_params = options
            .network
            .as_deref()
            .map(NetworkParams::from_name)
            .transpose()?;
        let key = if let Some(encoded) = &options.key {
            Some(import_key_auto(encoded, options.network.as_deref())?)
        } else if let Some(seed) = &options.seed {
            let params = explicit_params
                .unwrap_or(NetworkParams::from_name(DEFAULT_NETWORK)?);
            let seed = hex::decode(seed)
                .map_err(|e| KeyError::InvalidKey(format!("seed is not hex: {e}")))?;
            Some(HdKey::from_seed(&seed, params)?)
        } else if let Some(phrase) = &options.mnemonic {
            let params = explicit_params
                .unwrap_or(NetworkParams::from_name(DEFAULT_NETWORK)?);
            Some(HdKey::from_mnemonic(phrase, "", params)?)
        } else if options.scheme == Scheme::Multisig {
            None
        } else {
            let params = explicit_params
                .unwrap_or(NetworkParams::from_name(DEFAULT_NETWORK)?);
            Some(HdKey::generate(params)?)
        };

        let params = match (&key, explicit_params) {
            (Some(key), _) => key.network(),
            (None, Some(params)) => params,
            (None, None) => NetworkParams::from_name(DEFAULT_NETWORK)?,
        };
        if options.scheme == Scheme::Bip44 {
            let key = key.as_ref().ok_or_else(|| {
                WalletError::Key(KeyError::InvalidKey("bip44 wallet needs a key".into()))
            })?;
            if key.is_extended() && key.depth() > 4 {
                return Err(WalletError::Key(KeyError::InvalidKey(
                    "cannot create a wallet from a key of depth 5 or more".into(),
                )));
            }
        }

        let record = store.create_wallet(WalletRecord {
            id: 0,
            name: name.to_string(),
            owner: options.owner.clone(),
            network: params.name.to_string(),
            purpose: options.purpose,
            scheme: options.scheme,
            main_key_id: None,
            parent_id: options.parent_id,
            sort_keys: options.sort_keys,
            multisig_n_required: None,
            balance: 0,
        })?;
        info!("created wallet '{}' ({})", name, options.scheme);

        let engine = DerivationEngine::new(store);
        let mut record = record;
        let main_key = match options.scheme {
            Scheme::Multisig => None,
            scheme => {
                let key = key.as_ref().ok_or_else(|| {
                    WalletError::Key(KeyError::InvalidKey("wallet needs a key".into()))
                })?;
                let key_type = match scheme {
                    Scheme::Single => KeyType::Single,
                    _ => KeyType::Bip32,
                };
                let main = engine.store_key(KeySpec {
                    wallet_id: record.id,
                    name,
                    key,
                    account_id: options.account_id,
                    change: 0,
                    purpose: options.purpose,
                    path: "m".to_string(),
                    parent_id: None,
                    key_type,
                })?;
                record.main_key_id = Some(main.id());
                store.update_wallet(&record)?;
                Some(main)
            }
        };

        let mut wallet = Self::from_record(store.clone(), record)?;
        if options.scheme == Scheme::Bip44 {
            if let Some(main) = main_key {
                if main.depth() == 0 {
                    let scope = DeriveScope {
                        wallet_id: wallet.id(),
                        account_id: options.account_id,
                        change: 0,
                        purpose: options.purpose,
                        network: params,
                        name: name.to_string(),
                    };
                    engine.materialize(
                        &main,
                        &[
                            format!("{}'", options.purpose),
                            format!("{}'", params.bip44_cointype),
                        ],
                        "m",
                        &scope,
                    )?;
                    wallet.new_account(None, Some(options.account_id), None)?;
                }
            }
        }
        Ok(wallet)
    }

    /// Create a multisig wallet: one cosigner wallet per supplied key and
    /// a parent that composes their child keys into P2SH addresses.
    pub fn create_multisig(
        store: &Store,
        name: &str,
        key_list: &[String],
        sigs_required: u8,
        options: MultisigOptions,
    ) -> WalletResult<Wallet> {
        if key_list.len() < 2 {
            return Err(WalletError::Key(KeyError::InvalidKey(
                "multisig needs at least two cosigner keys".into(),
            )));
        }
        if sigs_required < 2 || sigs_required as usize > key_list.len() {
            return Err(WalletError::Key(KeyError::InvalidKey(format!(
                "cannot require {sigs_required} signatures from {} keys",
                key_list.len()
            ))));
        }

        let mut cokeys = Vec::with_capacity(key_list.len());
        for encoded in key_list {
            cokeys.push(import_key_auto(encoded, options.network.as_deref())?);
        }
        if options.sort_keys {
            cokeys.sort_by_key(|k| k.public_key().to_bytes());
        }

        let parent = Self::create(
            store,
            name,
            CreateOptions {
                owner: options.owner.clone(),
                network: options.network.clone(),
                account_id: options.account_id,
                purpose: options.purpose,
                scheme: Scheme::Multisig,
                sort_keys: options.sort_keys,
                ..CreateOptions::default()
            },
        )?;

        for (n, cokey) in cokeys.iter().enumerate() {
            if cokey.network().name != parent.network.name {
                return Err(WalletError::NetworkMismatch {
                    expected: parent.network.name.to_string(),
                    found: cokey.network().name.to_string(),
                });
            }
            let scheme = if cokey.is_extended() {
                Scheme::Bip44
            } else {
                Scheme::Single
            };
            Self::create(
                store,
                &format!("{name}-cosigner-{n}"),
                CreateOptions {
                    key: Some(cokey.wif()),
                    owner: options.owner.clone(),
                    network: Some(parent.network.name.to_string()),
                    account_id: options.account_id,
                    purpose: options.purpose,
                    scheme,
                    parent_id: Some(parent.id()),
                    ..CreateOptions::default()
                },
            )?;
        }

        let mut record = parent.record;
        record.multisig_n_required = Some(sigs_required);
        record.sort_keys = options.sort_keys;
        store.update_wallet(&record)?;
        Self::open_id(store.clone(), record.id)
    }

    /// Open an existing wallet by name or numeric id
    pub fn open(store: Store, term: &str) -> WalletResult<Wallet> {
        let record = if let Ok(id) = term.parse::<u64>() {
            store.wallet_by_id(id)?
        } else {
            store.wallet_by_name(term)?
        };
        let record = record.ok_or_else(|| WalletError::NotFound(format!("wallet '{term}'")))?;
        Self::from_record(store, record)
    }

    /// Open an existing wallet by id
    pub fn open_id(store: Store, id: u64) -> WalletResult<Wallet> {
        let record = store
            .wallet_by_id(id)?
            .ok_or_else(|| WalletError::NotFound(format!("wallet {id}")))?;
        Self::from_record(store, record)
    }

    fn from_record(store: Store, record: WalletRecord) -> WalletResult<Wallet> {
        let network = NetworkParams::from_name(&record.network)?;
        let main_key = record
            .main_key_id
            .map(|id| WalletKey::load(&store, id))
            .transpose()?;
        let cosigner_ids = store
            .child_wallets(record.id)?
            .into_iter()
            .map(|w| w.id)
            .collect();
        let default_account_id = main_key.as_ref().map(|k| k.account_id()).unwrap_or(0);
        Ok(Wallet {
            store,
            record,
            network,
            main_key,
            cosigner_ids,
            default_account_id,
            balances: HashMap::new(),
        })
    }

    // --- accessors ---

    pub fn id(&self) -> u64 {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn owner(&self) -> &str {
        &self.record.owner
    }

    pub fn scheme(&self) -> Scheme {
        self.record.scheme
    }

    pub fn purpose(&self) -> u32 {
        self.record.purpose
    }

    pub fn network(&self) -> &'static NetworkParams {
        self.network
    }

    pub fn main_key(&self) -> Option<&WalletKey> {
        self.main_key.as_ref()
    }

    pub fn cosigner_ids(&self) -> &[u64] {
        &self.cosigner_ids
    }

    pub fn sort_keys(&self) -> bool {
        self.record.sort_keys
    }

    pub fn multisig_n_required(&self) -> Option<u8> {
        self.record.multisig_n_required
    }

    /// Rename the wallet; the new name must be free
    pub fn rename(&mut self, name: &str) -> WalletResult<()> {
        if self.store.wallet_by_name(name)?.is_some() {
            return Err(WalletError::DuplicateName(name.to_string()));
        }
        self.record.name = name.to_string();
        self.store.update_wallet(&self.record)?;
        Ok(())
    }

    pub fn set_owner(&mut self, owner: &str) -> WalletResult<()> {
        self.record.owner = owner.to_string();
        self.store.update_wallet(&self.record)?;
        Ok(())
    }

    /// Wallet balance for a network (default: the wallet's own), from the
    /// last `balance_update`
    pub fn balance(&self, network: Option<&str>) -> u64 {
        let network = network.unwrap_or(self.network.name);
        self.balances.get(network).copied().unwrap_or(0)
    }

    pub fn balance_str(&self, network: Option<&str>) -> String {
        let name = network.unwrap_or(self.network.name);
        let params = NetworkParams::from_name(name).unwrap_or(self.network);
        params.print_value(self.balance(network))
    }

    /// Canonical projection of this wallet
    pub fn details(&self) -> WalletDetails {
        WalletDetails {
            id: self.record.id,
            name: self.record.name.clone(),
            owner: self.record.owner.clone(),
            scheme: self.record.scheme,
            network: self.record.network.clone(),
            balance: self.balance(None),
            balance_str: self.balance_str(None),
            balances: self.balances.clone(),
            main_key_id: self.record.main_key_id,
            cosigner_wallet_ids: self.cosigner_ids.clone(),
            multisig_n_required: self.record.multisig_n_required,
            sort_keys: self.record.sort_keys,
        }
    }

    /// Resolve network and account defaults for a key operation; also
    /// returns the account key row when one exists
    pub(crate) fn account_defaults(
        &self,
        scope: &KeyScope,
    ) -> WalletResult<(&'static NetworkParams, u32, Option<KeyRecord>)> {
        let params = match scope.network.as_deref() {
            Some(name) => NetworkParams::from_name(name)?,
            None => self.network,
        };
        let mut account_id = scope.account_id;
        if scope.network.is_none() && account_id.is_none() {
            account_id = Some(self.default_account_id);
        }
        let acckey = self
            .store
            .keys_filtered(
                self.id(),
                &KeyFilter {
                    purpose: Some(self.record.purpose),
                    depth: Some(3),
                    network: Some(params.name.to_string()),
                    account_id,
                    ..KeyFilter::default()
                },
            )?
            .into_iter()
            .next();
        let account_id = account_id
            .or(acckey.as_ref().map(|k| k.account_id))
            .unwrap_or(0);
        Ok((params, account_id, acckey))
    }

    // --- accounts and keys ---

    /// Create a new account: the hardened depth-3 key plus its payment
    /// and change branches. Requires a private depth-0 master.
    pub fn new_account(
        &mut self,
        name: Option<&str>,
        account_id: Option<u32>,
        network: Option<&str>,
    ) -> WalletResult<WalletKey> {
        if self.record.scheme != Scheme::Bip44 {
            return Err(WalletError::UnsupportedScheme(
                self.record.scheme.to_string(),
            ));
        }
        let main = self
            .main_key
            .clone()
            .ok_or_else(|| WalletError::NotFound("main key".into()))?;
        if main.depth() != 0 || !main.is_private() {
            return Err(WalletError::KeyMismatch(
                "a private master key of depth 0 is required to create accounts".into(),
            ));
        }
        let params = match network {
            Some(name) => NetworkParams::from_name(name)?,
            None => self.network,
        };

        let account_id = match account_id {
            Some(id) => id,
            None => self
                .store
                .keys_filtered(
                    self.id(),
                    &KeyFilter {
                        purpose: Some(self.record.purpose),
                        network: Some(params.name.to_string()),
                        ..KeyFilter::default()
                    },
                )?
                .iter()
                .map(|k| k.account_id)
                .max()
                .map(|id| id + 1)
                .unwrap_or(0),
        };
        let existing = self.store.keys_filtered(
            self.id(),
            &KeyFilter {
                purpose: Some(self.record.purpose),
                depth: Some(3),
                account_id: Some(account_id),
                network: Some(params.name.to_string()),
                ..KeyFilter::default()
            },
        )?;
        if !existing.is_empty() {
            return Err(WalletError::DuplicateAccount {
                account: account_id,
                network: params.name.to_string(),
            });
        }

        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Account #{account_id}"));
        let engine = DerivationEngine::new(&self.store);
        let scope = DeriveScope {
            wallet_id: self.id(),
            account_id,
            change: 0,
            purpose: self.record.purpose,
            network: params,
            name: name.clone(),
        };

        // Root key for this network's cointype, derived on first use
        let cointype_root = match self
            .store
            .keys_filtered(
                self.id(),
                &KeyFilter {
                    depth: Some(2),
                    network: Some(params.name.to_string()),
                    ..KeyFilter::default()
                },
            )?
            .into_iter()
            .next()
        {
            Some(record) => WalletKey::from_record(record)?,
            None => {
                let purpose_key = self
                    .store
                    .keys_filtered(
                        self.id(),
                        &KeyFilter {
                            depth: Some(1),
                            ..KeyFilter::default()
                        },
                    )?
                    .into_iter()
                    .next()
                    .ok_or_else(|| WalletError::NotFound("purpose key".into()))?;
                let purpose_key = WalletKey::from_record(purpose_key)?;
                let basepath = purpose_key.path().to_string();
                engine.materialize(
                    &purpose_key,
                    &[format!("{}'", params.bip44_cointype)],
                    &basepath,
                    &scope,
                )?
            }
        };

        let basepath = cointype_root.path().to_string();
        let account_key =
            engine.materialize(&cointype_root, &[format!("{account_id}'")], &basepath, &scope)?;
        let account_path = account_key.path().to_string();
        engine.materialize(
            &account_key,
            &["0".to_string()],
            &account_path,
            &DeriveScope {
                name: format!("{name} Payments"),
                ..scope.clone()
            },
        )?;
        engine.materialize(
            &account_key,
            &["1".to_string()],
            &account_path,
            &DeriveScope {
                change: 1,
                name: format!("{name} Change"),
                ..scope
            },
        )?;
        info!("created account {account_id} on {}", params.name);
        Ok(account_key)
    }

    /// Derive the next key at the canonical depth. For multisig wallets
    /// this requests one child key from every cosigner wallet and links
    /// them under a synthetic redeem-script key.
    pub fn new_key(
        &mut self,
        name: Option<&str>,
        scope: &KeyScope,
        change: u32,
        max_depth: u8,
    ) -> WalletResult<WalletKey> {
        match self.record.scheme {
            Scheme::Single => self
                .main_key
                .clone()
                .ok_or_else(|| WalletError::NotFound("main key".into())),
            Scheme::Bip44 => self.new_key_bip44(name, scope, change, max_depth),
            Scheme::Multisig => self.new_key_multisig(name, scope, change, max_depth),
        }
    }

    fn new_key_bip44(
        &mut self,
        name: Option<&str>,
        scope: &KeyScope,
        change: u32,
        max_depth: u8,
    ) -> WalletResult<WalletKey> {
        let (params, account_id, acckey) = self.account_defaults(scope)?;
        let acckey = match acckey {
            Some(record) => record,
            None => {
                self.new_account(None, Some(account_id), Some(params.name))?;
                self.store
                    .keys_filtered(
                        self.id(),
                        &KeyFilter {
                            purpose: Some(self.record.purpose),
                            depth: Some(3),
                            account_id: Some(account_id),
                            network: Some(params.name.to_string()),
                            ..KeyFilter::default()
                        },
                    )?
                    .into_iter()
                    .next()
                    .ok_or_else(|| WalletError::NotFound("account key".into()))?
            }
        };

        let address_index = self
            .store
            .keys_filtered(
                self.id(),
                &KeyFilter {
                    purpose: Some(self.record.purpose),
                    depth: Some(max_depth),
                    account_id: Some(account_id),
                    change: Some(change),
                    network: Some(params.name.to_string()),
                    ..KeyFilter::default()
                },
            )?
            .iter()
            .map(|k| k.address_index)
            .max()
            .map(|n| n + 1)
            .unwrap_or(0);

        let name = name.map(str::to_string).unwrap_or_else(|| {
            if change == 1 {
                format!("Change {address_index}")
            } else {
                format!("Key {address_index}")
            }
        });
        let account_key = WalletKey::from_record(acckey)?;
        let basepath = account_key.path().to_string();
        DerivationEngine::new(&self.store).materialize(
            &account_key,
            &[change.to_string(), address_index.to_string()],
            &basepath,
            &DeriveScope {
                wallet_id: self.id(),
                account_id,
                change,
                purpose: self.record.purpose,
                network: params,
                name,
            },
        )
    }

    fn new_key_multisig(
        &mut self,
        name: Option<&str>,
        scope: &KeyScope,
        change: u32,
        max_depth: u8,
    ) -> WalletResult<WalletKey> {
        let (params, account_id, _) = self.account_defaults(scope)?;
        if params.name != self.network.name {
            return Err(WalletError::NetworkMismatch {
                expected: self.network.name.to_string(),
                found: params.name.to_string(),
            });
        }
        let n_required = self
            .record
            .multisig_n_required
            .ok_or_else(|| WalletError::NotFound("multisig signature requirement".into()))?;

        // One fresh child key from every cosigner wallet
        let mut children = Vec::with_capacity(self.cosigner_ids.len());
        for cosigner_id in self.cosigner_ids.clone() {
            let mut cosigner = Wallet::open_id(self.store.clone(), cosigner_id)?;
            if cosigner.network.name != self.network.name {
                return Err(WalletError::NetworkMismatch {
                    expected: self.network.name.to_string(),
                    found: cosigner.network.name.to_string(),
                });
            }
            let child = cosigner.new_key(None, &KeyScope::default(), change, max_depth)?;
            let public = child.hd_key()?.public_key();
            children.push((child.id(), public));
        }
        if self.record.sort_keys {
            children.sort_by_key(|(_, public)| public.to_bytes());
        }

        let pubkeys: Vec<bitcoin::PublicKey> = children.iter().map(|(_, k)| *k).collect();
        let redeem = multisig::redeem_script(&pubkeys, n_required)?;
        let address = multisig::p2sh_address(&redeem, self.network)?;
        let child_ids: Vec<String> = children.iter().map(|(id, _)| id.to_string()).collect();
        let path = format!("multisig-{}-of-{}", n_required, child_ids.join("/"));
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Multisig Key {}", child_ids.join("/")));

        let (record, _) = self.store.upsert_key(KeyRecord {
            id: 0,
            wallet_id: self.id(),
            name,
            path,
            depth: 0,
            purpose: self.record.purpose,
            account_id,
            change,
            address_index: 0,
            network: self.network.name.to_string(),
            parent_id: None,
            key_type: KeyType::Multisig,
            is_private: false,
            public: hex::encode(redeem.as_bytes()),
            private: None,
            wif: format!("multisig-{address}"),
            address: address.to_string(),
            compressed: true,
            used: false,
            balance: 0,
        })?;
        for (key_order, (child_key_id, _)) in children.iter().enumerate() {
            self.store.add_multisig_link(&MultisigChildRecord {
                parent_key_id: record.id,
                child_key_id: *child_key_id,
                key_order: key_order as u32,
            })?;
        }
        WalletKey::from_record(record)
    }

    /// Create a new change key; wrapper for `new_key` with `change=1`
    pub fn new_key_change(&mut self, name: Option<&str>, scope: &KeyScope) -> WalletResult<WalletKey> {
        self.new_key(name, scope, 1, 5)
    }

    fn address_key_depth(&self) -> u8 {
        match self.record.scheme {
            Scheme::Bip44 => 5,
            _ => 0,
        }
    }

    /// Oldest unused keys strictly after the last used key, deriving new
    /// ones when exhausted
    pub fn get_key_batch(
        &mut self,
        scope: &KeyScope,
        change: u32,
        count: usize,
    ) -> WalletResult<Vec<WalletKey>> {
        let (params, account_id, _) = self.account_defaults(scope)?;
        let depth = self.address_key_depth();
        let base_filter = KeyFilter {
            account_id: Some(account_id),
            network: Some(params.name.to_string()),
            change: Some(change),
            depth: Some(depth),
            ..KeyFilter::default()
        };
        let last_used_id = self
            .store
            .keys_filtered(
                self.id(),
                &KeyFilter {
                    used: Some(true),
                    ..base_filter.clone()
                },
            )?
            .iter()
            .map(|k| k.id)
            .max()
            .unwrap_or(0);
        let mut unused: std::collections::VecDeque<KeyRecord> = self
            .store
            .keys_filtered(
                self.id(),
                &KeyFilter {
                    used: Some(false),
                    ..base_filter
                },
            )?
            .into_iter()
            .filter(|k| k.id > last_used_id)
            .collect();

        let scope = KeyScope {
            account_id: Some(account_id),
            network: Some(params.name.to_string()),
        };
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            match unused.pop_front() {
                Some(record) => keys.push(WalletKey::from_record(record)?),
                None => keys.push(self.new_key(None, &scope, change, 5)?),
            }
        }
        Ok(keys)
    }

    /// Oldest unused key, deriving one if necessary
    pub fn get_key(&mut self, scope: &KeyScope, change: u32) -> WalletResult<WalletKey> {
        let mut keys = self.get_key_batch(scope, change, 1)?;
        keys.pop()
            .ok_or_else(|| WalletError::NotFound("unused key".into()))
    }

    /// Oldest unused change key
    pub fn get_key_change(&mut self, scope: &KeyScope) -> WalletResult<WalletKey> {
        self.get_key(scope, 1)
    }

    /// All currently unused keys at the canonical depth
    pub fn get_unused_keys(&self, scope: &KeyScope, change: u32) -> WalletResult<Vec<WalletKey>> {
        let (params, account_id, _) = self.account_defaults(scope)?;
        self.store
            .keys_filtered(
                self.id(),
                &KeyFilter {
                    account_id: Some(account_id),
                    network: Some(params.name.to_string()),
                    change: Some(change),
                    depth: Some(self.address_key_depth()),
                    used: Some(false),
                    ..KeyFilter::default()
                },
            )?
            .into_iter()
            .map(WalletKey::from_record)
            .collect()
    }

    /// Resolve a key by id, address, wif or name within this wallet
    pub fn key(&self, term: &str) -> WalletResult<WalletKey> {
        if let Ok(id) = term.parse::<u64>() {
            if let Some(record) = self.store.key_by_id(id)? {
                if record.wallet_id == self.id() {
                    return WalletKey::from_record(record);
                }
            }
        }
        if let Some(record) = self.store.key_by_address(self.id(), term)? {
            return WalletKey::from_record(record);
        }
        if let Some(record) = self.store.key_by_wif(self.id(), term)? {
            return WalletKey::from_record(record);
        }
        if let Some(record) = self.store.key_by_name(self.id(), term)? {
            return WalletKey::from_record(record);
        }
        Err(WalletError::NotFound(format!("key '{term}'")))
    }

    /// Load a key by id, checking wallet ownership
    pub fn key_by_id(&self, id: u64) -> WalletResult<WalletKey> {
        let record = self
            .store
            .key_by_id(id)?
            .filter(|k| k.wallet_id == self.id())
            .ok_or_else(|| WalletError::NotFound(format!("key {id}")))?;
        WalletKey::from_record(record)
    }

    /// Keys matching a filter, id order
    pub fn keys(&self, filter: &KeyFilter) -> WalletResult<Vec<WalletKey>> {
        self.store
            .keys_filtered(self.id(), filter)?
            .into_iter()
            .map(WalletKey::from_record)
            .collect()
    }

    /// Account keys (depth 3) for a network
    pub fn keys_accounts(&self, network: Option<&str>) -> WalletResult<Vec<WalletKey>> {
        self.keys(&KeyFilter {
            depth: Some(3),
            network: network.map(str::to_string),
            ..KeyFilter::default()
        })
    }

    /// Address keys at the canonical depth
    pub fn keys_addresses(
        &self,
        scope: &KeyScope,
        change: Option<u32>,
        used: Option<bool>,
    ) -> WalletResult<Vec<WalletKey>> {
        let (params, account_id, _) = self.account_defaults(scope)?;
        self.keys(&KeyFilter {
            account_id: Some(account_id),
            network: Some(params.name.to_string()),
            depth: Some(self.address_key_depth()),
            change,
            used,
            ..KeyFilter::default()
        })
    }

    /// Payment address keys (change=0)
    pub fn keys_address_payment(&self, scope: &KeyScope) -> WalletResult<Vec<WalletKey>> {
        self.keys_addresses(scope, Some(0), None)
    }

    /// Change address keys (change=1)
    pub fn keys_address_change(&self, scope: &KeyScope) -> WalletResult<Vec<WalletKey>> {
        self.keys_addresses(scope, Some(1), None)
    }

    /// Addresses of keys matching the filter
    pub fn addresslist(&self, filter: &KeyFilter) -> WalletResult<Vec<String>> {
        Ok(self
            .store
            .keys_filtered(self.id(), filter)?
            .into_iter()
            .map(|k| k.address)
            .collect())
    }

    /// Distinct networks used by this wallet's keys
    pub fn networks(&self) -> WalletResult<Vec<&'static NetworkParams>> {
        let mut names: Vec<String> = self
            .store
            .wallet_keys(self.id())?
            .into_iter()
            .map(|k| k.network)
            .collect();
        names.sort();
        names.dedup();
        names
            .iter()
            .map(|name| NetworkParams::from_name(name))
            .collect()
    }

    /// Account ids defined for a network
    pub fn accounts(&self, network: Option<&str>) -> WalletResult<Vec<u32>> {
        let mut ids: Vec<u32> = self
            .keys_accounts(network)?
            .iter()
            .map(|k| k.account_id())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    // --- key import ---

    /// Materialize a key at an arbitrary path. With checks enabled the
    /// path must use this wallet's purpose, a known cointype, and
    /// hardened purpose/cointype/account levels.
    pub fn key_for_path(
        &mut self,
        path: &str,
        name: Option<&str>,
        account_id: u32,
        change: u32,
        enable_checks: bool,
    ) -> WalletResult<WalletKey> {
        let normalized = normalize_path(path)?;
        if normalized != "m" && normalized != "M" && enable_checks {
            let parsed = parse_path(&normalized)?;
            if let Some(purpose) = parsed.purpose {
                if purpose.index != self.record.purpose {
                    return Err(WalletError::InvalidPath(format!(
                        "path purpose {} differs from wallet purpose {}",
                        purpose.index, self.record.purpose
                    )));
                }
                if !purpose.hardened {
                    return Err(WalletError::InvalidPath(
                        "purpose level must be hardened".into(),
                    ));
                }
            }
            if let Some(cointype) = parsed.cointype {
                let known = self
                    .networks()?
                    .iter()
                    .any(|p| p.bip44_cointype == cointype.index);
                if !known {
                    return Err(WalletError::InvalidPath(format!(
                        "cointype {} not available in this wallet",
                        cointype.index
                    )));
                }
                if !cointype.hardened {
                    return Err(WalletError::InvalidPath(
                        "cointype level must be hardened".into(),
                    ));
                }
            }
            if let Some(account) = parsed.account {
                if !account.hardened {
                    return Err(WalletError::InvalidPath(
                        "account level must be hardened".into(),
                    ));
                }
            }
        }

        if let Some(existing) = self.store.key_by_path(self.id(), &normalized)? {
            return WalletKey::from_record(existing);
        }
        let ancestor = self
            .store
            .closest_ancestor(self.id(), &normalized)?
            .ok_or_else(|| WalletError::NotFound("path ancestor key".into()))?;
        let basepath = ancestor.path.clone();
        let rel: Vec<String> = normalized
            .strip_prefix(&format!("{basepath}/"))
            .unwrap_or(&normalized)
            .split('/')
            .map(str::to_string)
            .collect();
        let parent = WalletKey::from_record(ancestor)?;
        DerivationEngine::new(&self.store).materialize(
            &parent,
            &rel,
            &basepath,
            &DeriveScope {
                wallet_id: self.id(),
                account_id,
                change,
                purpose: self.record.purpose,
                network: self.network,
                name: name.unwrap_or(&self.record.name).to_string(),
            },
        )
    }

    /// Import a key into this wallet. A private depth-0 master imported
    /// into a bip44 wallet with a public account main key replaces the
    /// main key; other keys become single or bip32 rows.
    pub fn import_key(&mut self, encoded: &str, options: ImportOptions) -> WalletResult<WalletKey> {
        let hdkey = import_key_auto(encoded, options.network.as_deref())?;

        if let Some(main) = &self.main_key {
            if self.record.scheme == Scheme::Bip44
                && main.depth() == 3
                && !main.is_private()
                && hdkey.is_private()
                && hdkey.is_extended()
                && hdkey.depth() == 0
            {
                let name = options.name.as_deref().unwrap_or("Masterkey (imported)");
                return self.import_master_key(&hdkey, name);
            }
        }

        let key_type = options.key_type.unwrap_or(KeyType::Single);
        let (path, default_name) = if key_type == KeyType::Single {
            let next = self
                .store
                .wallet_keys(self.id())?
                .iter()
                .filter_map(|k| k.path.strip_prefix("import_key_")?.parse::<u32>().ok())
                .max()
                .map(|n| n + 1)
                .unwrap_or(1);
            let path = format!("import_key_{next:05}");
            (path.clone(), path)
        } else {
            ("m".to_string(), self.record.name.clone())
        };
        let name = options.name.unwrap_or(default_name);

        DerivationEngine::new(&self.store).store_key(KeySpec {
            wallet_id: self.id(),
            name: &name,
            key: &hdkey,
            account_id: options.account_id,
            change: 0,
            purpose: options.purpose,
            path,
            parent_id: None,
            key_type,
        })
    }

    /// Replace a public account main key with the private master that
    /// derives it, re-materializing the purpose and cointype levels
    pub fn import_master_key(&mut self, hdkey: &HdKey, name: &str) -> WalletResult<WalletKey> {
        let main = self
            .main_key
            .clone()
            .ok_or_else(|| WalletError::NotFound("main key".into()))?;
        if !hdkey.is_private() || hdkey.depth() != 0 || !hdkey.is_extended() {
            return Err(WalletError::KeyMismatch(
                "a private BIP32 master key of depth 0 is required".into(),
            ));
        }
        if main.depth() != 3 || main.is_private() || main.key_type() != KeyType::Bip32 {
            return Err(WalletError::KeyMismatch(
                "current main key is not a public BIP32 account key".into(),
            ));
        }
        let account_key = hdkey.account_key(self.record.purpose, main.account_id())?;
        if main.wif() != account_key.wif_public() {
            return Err(WalletError::KeyMismatch(
                "master key does not derive the current main account key".into(),
            ));
        }
        if hdkey.network().name != self.network.name {
            return Err(WalletError::NetworkMismatch {
                expected: self.network.name.to_string(),
                found: hdkey.network().name.to_string(),
            });
        }

        let engine = DerivationEngine::new(&self.store);
        let master = engine.store_key(KeySpec {
            wallet_id: self.id(),
            name,
            key: hdkey,
            account_id: main.account_id(),
            change: 0,
            purpose: self.record.purpose,
            path: "m".to_string(),
            parent_id: None,
            key_type: KeyType::Bip32,
        })?;
        self.record.main_key_id = Some(master.id());
        self.store.update_wallet(&self.record)?;
        engine.materialize(
            &master,
            &[
                format!("{}'", self.record.purpose),
                format!("{}'", self.network.bip44_cointype),
            ],
            "m",
            &DeriveScope {
                wallet_id: self.id(),
                account_id: main.account_id(),
                change: 0,
                purpose: self.record.purpose,
                network: self.network,
                name: name.to_string(),
            },
        )?;
        self.main_key = Some(master.clone());
        self.default_account_id = master.account_id();
        info!("imported master key into wallet '{}'", self.record.name);
        Ok(master)
    }

    /// Upgrade a public-only key row with its private key. The public
    /// bytes must match.
    pub fn key_add_private(&mut self, key_id: u64, private: &str) -> WalletResult<WalletKey> {
        let mut record = self
            .store
            .key_by_id(key_id)?
            .filter(|k| k.wallet_id == self.id())
            .ok_or_else(|| WalletError::NotFound(format!("key {key_id}")))?;
        let params = NetworkParams::from_name(&record.network)?;
        let private_key = HdKey::import(private, params)?;
        if private_key.public_hex() != record.public {
            return Err(WalletError::KeyMismatch(
                "private key does not match the stored public key".into(),
            ));
        }
        record.is_private = true;
        record.private = private_key.private_hex();
        record.wif = private_key.wif();
        self.store.update_key(&record)?;
        if self.record.main_key_id == Some(key_id) {
            self.main_key = Some(WalletKey::from_record(record.clone())?);
        }
        WalletKey::from_record(record)
    }
}

// --- module-level wallet management ---

/// List all wallets in the store
pub fn wallets_list(store: &Store) -> WalletResult<Vec<WalletRecord>> {
    Ok(store.wallets()?)
}

/// Check whether a wallet exists by name or numeric id
pub fn wallet_exists(store: &Store, term: &str) -> WalletResult<bool> {
    if let Ok(id) = term.parse::<u64>() {
        if store.wallet_by_id(id)?.is_some() {
            return Ok(true);
        }
    }
    Ok(store.wallet_by_name(term)?.is_some())
}

/// Open a wallet, creating it first when absent
pub fn wallet_create_or_open(
    store: &Store,
    name: &str,
    options: CreateOptions,
) -> WalletResult<Wallet> {
    if wallet_exists(store, name)? {
        Wallet::open(store.clone(), name)
    } else {
        Wallet::create(store, name, options)
    }
}

/// Open a multisig wallet, creating it first when absent
pub fn wallet_create_or_open_multisig(
    store: &Store,
    name: &str,
    key_list: &[String],
    sigs_required: u8,
    options: MultisigOptions,
) -> WalletResult<Wallet> {
    if wallet_exists(store, name)? {
        Wallet::open(store.clone(), name)
    } else {
        Wallet::create_multisig(store, name, key_list, sigs_required, options)
    }
}

/// Delete a wallet, its keys and its cosigner wallets. Without `force`
/// the delete is refused while any key still holds a balance. Cosigner
/// wallets are enumerated before anything is removed.
pub fn wallet_delete(store: &Store, term: &str, force: bool) -> WalletResult<()> {
    let record = if let Ok(id) = term.parse::<u64>() {
        store.wallet_by_id(id)?
    } else {
        store.wallet_by_name(term)?
    };
    let record = record.ok_or_else(|| WalletError::NotFound(format!("wallet '{term}'")))?;

    // Collect the whole cosigner tree up front
    let mut to_delete = vec![record];
    let mut cursor = 0;
    while cursor < to_delete.len() {
        let children = store.child_wallets(to_delete[cursor].id)?;
        to_delete.extend(children);
        cursor += 1;
    }

    if !force {
        for wallet in &to_delete {
            for key in store.wallet_keys(wallet.id)? {
                if key.balance != 0 {
                    return Err(WalletError::NonEmptyWallet {
                        key_id: key.id,
                        address: key.address,
                    });
                }
            }
        }
    }

    // Children first so parents never dangle
    for wallet in to_delete.iter().rev() {
        store.delete_wallet_cascade(wallet.id)?;
        info!("deleted wallet '{}'", wallet.name);
    }
    Ok(())
}

/// Delete a wallet if it exists; no-op otherwise
pub fn wallet_delete_if_exists(store: &Store, term: &str, force: bool) -> WalletResult<bool> {
    if wallet_exists(store, term)? {
        wallet_delete(store, term, force)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SEED: &str = "000102030405060708090a0b0c0d0e0f";
    const VECTOR1_XPRV: &str = "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi";

    fn test_store() -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (store, dir)
    }

    fn seeded_wallet(store: &Store, name: &str) -> Wallet {
        Wallet::create(
            store,
            name,
            CreateOptions {
                seed: Some(SEED.to_string()),
                ..CreateOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_create_bip44_structure() {
        let (store, _dir) = test_store();
        let wallet = seeded_wallet(&store, "main");
        assert_eq!(wallet.scheme(), Scheme::Bip44);
        assert_eq!(wallet.main_key().unwrap().wif(), VECTOR1_XPRV);
        for path in ["m", "m/44'", "m/44'/0'", "m/44'/0'/0'", "m/44'/0'/0'/0", "m/44'/0'/0'/1"] {
            assert!(
                store.key_by_path(wallet.id(), path).unwrap().is_some(),
                "missing {path}"
            );
        }
        assert_eq!(store.wallet_keys(wallet.id()).unwrap().len(), 6);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (store, _dir) = test_store();
        seeded_wallet(&store, "main");
        let result = Wallet::create(&store, "main", CreateOptions::default());
        assert!(matches!(result, Err(WalletError::DuplicateName(_))));
    }

    #[test]
    fn test_new_key_sequence() {
        let (store, _dir) = test_store();
        let mut wallet = seeded_wallet(&store, "main");
        let first = wallet.new_key(None, &KeyScope::default(), 0, 5).unwrap();
        let second = wallet.new_key(None, &KeyScope::default(), 0, 5).unwrap();
        assert_eq!(first.path(), "m/44'/0'/0'/0/0");
        assert_eq!(second.path(), "m/44'/0'/0'/0/1");
        assert_ne!(first.address(), second.address());
        assert_eq!(second.name(), "Key 1");
    }

    #[test]
    fn test_new_key_matches_direct_derivation() {
        let (store, _dir) = test_store();
        let mut wallet = seeded_wallet(&store, "main");
        let key = wallet.new_key(None, &KeyScope::default(), 0, 5).unwrap();

        let params = NetworkParams::from_name("bitcoin").unwrap();
        let mut expected = HdKey::from_seed(&hex::decode(SEED).unwrap(), params).unwrap();
        for segment in ["44'", "0'", "0'", "0", "0"] {
            expected = expected
                .subkey(&crate::keys::path::PathSegment::parse(segment).unwrap())
                .unwrap();
        }
        assert_eq!(key.address(), expected.address());
    }

    #[test]
    fn test_new_account_ids_and_duplicates() {
        let (store, _dir) = test_store();
        let mut wallet = seeded_wallet(&store, "main");
        let second = wallet.new_account(None, None, None).unwrap();
        assert_eq!(second.account_id(), 1);
        assert_eq!(second.path(), "m/44'/0'/1'");
        assert!(matches!(
            wallet.new_account(None, Some(1), None),
            Err(WalletError::DuplicateAccount { account: 1, .. })
        ));
        assert_eq!(wallet.accounts(None).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_single_scheme_returns_main_key() {
        let (store, _dir) = test_store();
        let params = NetworkParams::from_name("bitcoin").unwrap();
        let master = HdKey::from_seed(&hex::decode(SEED).unwrap(), params).unwrap();
        let wif = bitcoin::PrivateKey::new(master.secret_key().unwrap(), bitcoin::NetworkKind::Main)
            .to_wif();
        let mut wallet = Wallet::create(
            &store,
            "single",
            CreateOptions {
                key: Some(wif.clone()),
                scheme: Scheme::Single,
                ..CreateOptions::default()
            },
        )
        .unwrap();
        let key = wallet.new_key(None, &KeyScope::default(), 0, 5).unwrap();
        assert_eq!(key.key_type(), KeyType::Single);
        assert_eq!(key.wif(), wif);
        assert_eq!(key.id(), wallet.main_key().unwrap().id());
    }

    #[test]
    fn test_get_key_skips_used() {
        let (store, _dir) = test_store();
        let mut wallet = seeded_wallet(&store, "main");
        let first = wallet.get_key(&KeyScope::default(), 0).unwrap();
        // Mark it used; the next get_key must move past it
        let mut record = first.record().clone();
        record.used = true;
        store.update_key(&record).unwrap();
        let second = wallet.get_key(&KeyScope::default(), 0).unwrap();
        assert!(second.id() > first.id());
        assert_eq!(second.path(), "m/44'/0'/0'/0/1");
    }

    #[test]
    fn test_key_lookup_terms() {
        let (store, _dir) = test_store();
        let mut wallet = seeded_wallet(&store, "main");
        let key = wallet
            .new_key(Some("payday"), &KeyScope::default(), 0, 5)
            .unwrap();
        assert_eq!(wallet.key(&key.id().to_string()).unwrap().id(), key.id());
        assert_eq!(wallet.key(key.address()).unwrap().id(), key.id());
        assert_eq!(wallet.key(key.wif()).unwrap().id(), key.id());
        assert_eq!(wallet.key("payday").unwrap().id(), key.id());
        assert!(matches!(
            wallet.key("missing"),
            Err(WalletError::NotFound(_))
        ));
    }

    #[test]
    fn test_key_for_path_checks() {
        let (store, _dir) = test_store();
        let mut wallet = seeded_wallet(&store, "main");
        let key = wallet
            .key_for_path("m/44'/0'/0'/0/9", None, 0, 0, true)
            .unwrap();
        assert_eq!(key.address_index(), 9);
        assert!(wallet
            .key_for_path("m/49'/0'/0'/0/0", None, 0, 0, true)
            .is_err());
        assert!(wallet
            .key_for_path("m/44'/0'/0/0/0", None, 0, 0, true)
            .is_err());
        assert!(wallet
            .key_for_path("m/49'/0'/0'/0/0", None, 0, 0, false)
            .is_ok());
    }

    #[test]
    fn test_import_single_key_paths() {
        let (store, _dir) = test_store();
        let mut wallet = seeded_wallet(&store, "main");
        let params = NetworkParams::from_name("bitcoin").unwrap();
        let key_a = HdKey::generate(params).unwrap();
        let wif_a = bitcoin::PrivateKey::new(key_a.secret_key().unwrap(), bitcoin::NetworkKind::Main)
            .to_wif();
        let key_b = HdKey::generate(params).unwrap();
        let wif_b = bitcoin::PrivateKey::new(key_b.secret_key().unwrap(), bitcoin::NetworkKind::Main)
            .to_wif();

        let first = wallet.import_key(&wif_a, ImportOptions::default()).unwrap();
        let second = wallet.import_key(&wif_b, ImportOptions::default()).unwrap();
        assert_eq!(first.path(), "import_key_00001");
        assert_eq!(second.path(), "import_key_00002");
        assert_eq!(first.key_type(), KeyType::Single);
    }

    #[test]
    fn test_import_master_key_flow() {
        let (store, _dir) = test_store();
        let params = NetworkParams::from_name("bitcoin").unwrap();
        let master = HdKey::from_seed(&hex::decode(SEED).unwrap(), params).unwrap();
        let account_xpub = master.account_key(44, 0).unwrap().wif_public();

        // Watch-only wallet from the public account key
        let mut wallet = Wallet::create(
            &store,
            "watch",
            CreateOptions {
                key: Some(account_xpub),
                ..CreateOptions::default()
            },
        )
        .unwrap();
        assert_eq!(wallet.main_key().unwrap().depth(), 3);
        assert!(!wallet.main_key().unwrap().is_private());

        let imported = wallet
            .import_key(VECTOR1_XPRV, ImportOptions::default())
            .unwrap();
        assert_eq!(imported.depth(), 0);
        assert!(imported.is_private());
        assert_eq!(wallet.main_key().unwrap().id(), imported.id());

        // A master that does not derive the account key is rejected
        let mut other = Wallet::create(
            &store,
            "watch2",
            CreateOptions {
                key: Some(master.account_key(44, 1).unwrap().wif_public()),
                ..CreateOptions::default()
            },
        )
        .unwrap();
        assert!(matches!(
            other.import_key(VECTOR1_XPRV, ImportOptions::default()),
            Err(WalletError::KeyMismatch(_))
        ));
    }

    #[test]
    fn test_key_add_private_upgrade() {
        let (store, _dir) = test_store();
        let params = NetworkParams::from_name("bitcoin").unwrap();
        let master = HdKey::from_seed(&hex::decode(SEED).unwrap(), params).unwrap();
        let account = master.account_key(44, 0).unwrap();

        let mut wallet = Wallet::create(
            &store,
            "watch",
            CreateOptions {
                key: Some(account.wif_public()),
                ..CreateOptions::default()
            },
        )
        .unwrap();
        let main_id = wallet.main_key().unwrap().id();
        let upgraded = wallet.key_add_private(main_id, &account.wif()).unwrap();
        assert!(upgraded.is_private());
        assert_eq!(upgraded.wif(), account.wif());

        // Mismatched private key is rejected
        let wrong = master.account_key(44, 1).unwrap();
        assert!(matches!(
            wallet.key_add_private(main_id, &wrong.wif()),
            Err(WalletError::KeyMismatch(_))
        ));
    }

    #[test]
    fn test_create_multisig_wallets_and_keys() {
        let (store, _dir) = test_store();
        let params = NetworkParams::from_name("bitcoin").unwrap();
        let xpubs: Vec<String> = (1u8..=3)
            .map(|i| {
                HdKey::from_seed(&[i; 32], params)
                    .unwrap()
                    .account_key(45, 0)
                    .unwrap()
                    .wif_public()
            })
            .collect();
        let mut wallet = Wallet::create_multisig(
            &store,
            "shared",
            &xpubs,
            2,
            MultisigOptions {
                sort_keys: true,
                ..MultisigOptions::default()
            },
        )
        .unwrap();
        assert_eq!(wallet.scheme(), Scheme::Multisig);
        assert_eq!(wallet.cosigner_ids().len(), 3);
        assert_eq!(wallet.multisig_n_required(), Some(2));

        let key = wallet.new_key(None, &KeyScope::default(), 0, 5).unwrap();
        assert_eq!(key.key_type(), KeyType::Multisig);
        assert!(key.address().starts_with('3'));
        assert!(key.wif().starts_with("multisig-"));

        // Redeem script decodes to the linked children in key order
        let links = store.multisig_children(key.id()).unwrap();
        assert_eq!(links.len(), 3);
        let script_bytes = hex::decode(&key.record().public).unwrap();
        let script = bitcoin::ScriptBuf::from_bytes(script_bytes);
        let (n_required, pubkeys) = decode_redeem_script(&script).unwrap();
        assert_eq!(n_required, 2);
        for (link, pubkey) in links.iter().zip(&pubkeys) {
            let child = store.key_by_id(link.child_key_id).unwrap().unwrap();
            assert_eq!(child.public, hex::encode(pubkey.to_bytes()));
        }
        let address = p2sh_address(&script, params).unwrap();
        assert_eq!(address.to_string(), key.address());
    }

    #[test]
    fn test_sorted_multisig_is_order_independent() {
        let (store, _dir) = test_store();
        let params = NetworkParams::from_name("bitcoin").unwrap();
        let xpubs: Vec<String> = (1u8..=3)
            .map(|i| {
                HdKey::from_seed(&[i; 32], params)
                    .unwrap()
                    .account_key(45, 0)
                    .unwrap()
                    .wif_public()
            })
            .collect();
        let mut reversed = xpubs.clone();
        reversed.reverse();

        let sorted_options = || MultisigOptions {
            sort_keys: true,
            ..MultisigOptions::default()
        };
        let mut forward =
            Wallet::create_multisig(&store, "ms-fwd", &xpubs, 2, sorted_options()).unwrap();
        let mut backward =
            Wallet::create_multisig(&store, "ms-rev", &reversed, 2, sorted_options()).unwrap();
        let addr_fwd = forward.new_key(None, &KeyScope::default(), 0, 5).unwrap();
        let addr_rev = backward.new_key(None, &KeyScope::default(), 0, 5).unwrap();
        assert_eq!(addr_fwd.address(), addr_rev.address());
    }

    #[test]
    fn test_multisig_rejects_mixed_networks() {
        let (store, _dir) = test_store();
        let bitcoin_params = NetworkParams::from_name("bitcoin").unwrap();
        let testnet_params = NetworkParams::from_name("testnet").unwrap();
        let keys = vec![
            HdKey::from_seed(&[1; 32], bitcoin_params)
                .unwrap()
                .account_key(45, 0)
                .unwrap()
                .wif_public(),
            HdKey::from_seed(&[2; 32], testnet_params)
                .unwrap()
                .account_key(45, 0)
                .unwrap()
                .wif_public(),
        ];
        let result = Wallet::create_multisig(
            &store,
            "mixed",
            &keys,
            2,
            MultisigOptions {
                network: Some("bitcoin".to_string()),
                ..MultisigOptions::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_wallet_delete_flow() {
        let (store, _dir) = test_store();
        let wallet = seeded_wallet(&store, "doomed");
        let wallet_id = wallet.id();

        // Give one key a balance; delete must refuse without force
        let mut key = store
            .key_by_path(wallet_id, "m/44'/0'/0'")
            .unwrap()
            .unwrap();
        key.balance = 500;
        store.update_key(&key).unwrap();
        assert!(matches!(
            wallet_delete(&store, "doomed", false),
            Err(WalletError::NonEmptyWallet { .. })
        ));
        assert!(wallet_exists(&store, "doomed").unwrap());

        wallet_delete(&store, "doomed", true).unwrap();
        assert!(!wallet_exists(&store, "doomed").unwrap());
        assert!(store.wallet_keys(wallet_id).unwrap().is_empty());
    }

    #[test]
    fn test_wallet_delete_cascades_to_cosigners() {
        let (store, _dir) = test_store();
        let params = NetworkParams::from_name("bitcoin").unwrap();
        let xpubs: Vec<String> = (1u8..=2)
            .map(|i| {
                HdKey::from_seed(&[i; 32], params)
                    .unwrap()
                    .account_key(45, 0)
                    .unwrap()
                    .wif_public()
            })
            .collect();
        Wallet::create_multisig(&store, "shared", &xpubs, 2, MultisigOptions::default()).unwrap();
        assert!(wallet_exists(&store, "shared-cosigner-0").unwrap());

        wallet_delete(&store, "shared", true).unwrap();
        assert!(!wallet_exists(&store, "shared").unwrap());
        assert!(!wallet_exists(&store, "shared-cosigner-0").unwrap());
        assert!(!wallet_exists(&store, "shared-cosigner-1").unwrap());
    }

    #[test]
    fn test_create_or_open() {
        let (store, _dir) = test_store();
        let created = seeded_wallet(&store, "main");
        let reopened = wallet_create_or_open(&store, "main", CreateOptions::default()).unwrap();
        assert_eq!(created.id(), reopened.id());
    }

    #[test]
    fn test_rename_and_owner() {
        let (store, _dir) = test_store();
        let mut wallet = seeded_wallet(&store, "before");
        seeded_wallet(&store, "taken");
        assert!(matches!(
            wallet.rename("taken"),
            Err(WalletError::DuplicateName(_))
        ));
        wallet.rename("after").unwrap();
        wallet.set_owner("alice").unwrap();
        let reopened = Wallet::open(store.clone(), "after").unwrap();
        assert_eq!(reopened.owner(), "alice");
    }
}
