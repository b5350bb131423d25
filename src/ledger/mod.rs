/// UTXO ledger
///
/// Reconciles provider-reported unspent outputs with the persisted key
/// tree: marks disappeared outputs spent, ingests new ones, keeps key and
/// wallet balances in sync, and drives gap-limit style address scanning.
///
/// Reconciliation and ingestion run as one logical step with the spent
/// pass strictly first; output `spent` flags only ever move from false to
/// true.
use crate::error::{WalletError, WalletResult};
use crate::network::{ChainService, UtxoInfo};
use crate::storage::{KeyFilter, Scheme, TxInputRecord, TxOutputRecord, TxRecord};
use crate::wallet::{KeyScope, Wallet};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Filter for UTXO and balance operations; `None` fields use wallet
/// defaults (canonical address depth, default account)
#[derive(Debug, Clone, Default)]
pub struct UtxoScope {
    pub account_id: Option<u32>,
    pub network: Option<String>,
    pub key_id: Option<u64>,
    pub change: Option<u32>,
    pub depth: Option<u8>,
    pub used: Option<bool>,
}

impl UtxoScope {
    pub fn for_key(key_id: u64) -> Self {
        Self {
            key_id: Some(key_id),
            ..Self::default()
        }
    }

    fn key_scope(&self) -> KeyScope {
        KeyScope {
            account_id: self.account_id,
            network: self.network.clone(),
        }
    }
}

/// A stored unspent output joined with its transaction and owning key
#[derive(Debug, Clone)]
pub struct StoredUtxo {
    pub output: TxOutputRecord,
    pub tx_hash: String,
    pub confirmations: u32,
    pub key_id: u64,
    pub address: String,
    pub network: String,
}

/// One row of wallet transaction history; inputs carry negative values
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub tx_hash: String,
    pub confirmations: u32,
    pub address: String,
    pub value: i64,
    pub spent: Option<bool>,
}

impl Wallet {
    fn address_filter(&self, scope: &UtxoScope, account_id: u32, network: &str) -> KeyFilter {
        KeyFilter {
            key_id: scope.key_id,
            account_id: Some(account_id),
            network: Some(network.to_string()),
            change: scope.change,
            depth: Some(scope.depth.unwrap_or(match self.scheme() {
                Scheme::Bip44 => 5,
                _ => 0,
            })),
            used: scope.used,
            ..KeyFilter::default()
        }
    }

    /// Fetch unspent outputs from the provider and reconcile them into
    /// the store. Returns the number of newly recorded outputs.
    pub fn utxos_update(
        &mut self,
        chain: &dyn ChainService,
        scope: &UtxoScope,
    ) -> WalletResult<usize> {
        let (params, account_id, _) = self.account_defaults(&scope.key_scope())?;
        let addresses =
            self.addresslist(&self.address_filter(scope, account_id, params.name))?;
        let utxos = chain.get_utxos(&addresses)?;
        self.ingest_utxos(utxos, scope)
    }

    /// Reconcile an externally supplied UTXO list (offline operation)
    pub fn utxos_update_offline(
        &mut self,
        utxos: Vec<UtxoInfo>,
        scope: &UtxoScope,
    ) -> WalletResult<usize> {
        self.ingest_utxos(utxos, scope)
    }

    fn ingest_utxos(&mut self, utxos: Vec<UtxoInfo>, scope: &UtxoScope) -> WalletResult<usize> {
        // Spent pass first: anything we hold as unspent that the provider
        // no longer lists has been spent elsewhere.
        let provider_set: HashSet<(String, u32)> = utxos
            .iter()
            .map(|u| (u.tx_hash.clone(), u.output_n))
            .collect();
        for stored in self.utxos(scope, 0)? {
            if !provider_set.contains(&(stored.tx_hash.clone(), stored.output.output_n)) {
                let mut output = stored.output;
                output.spent = true;
                self.store.update_output(&output)?;
                debug!("marked {}:{} spent", stored.tx_hash, output.output_n);
            }
        }

        // Ingest pass: record new outputs, refresh confirmations.
        let mut new_outputs = 0;
        for utxo in utxos {
            let Some(mut key) = self.store.key_by_address(self.id(), &utxo.address)? else {
                warn!("provider returned utxo for unknown address {}", utxo.address);
                continue;
            };
            if !key.used {
                key.used = true;
                self.store.update_key(&key)?;
            }

            let tx = match self.store.transaction_by_hash(self.id(), &utxo.tx_hash)? {
                Some(mut tx) => {
                    tx.confirmations = utxo.confirmations;
                    self.store.update_transaction(&tx)?;
                    tx
                }
                None => self.store.insert_transaction(TxRecord {
                    id: 0,
                    wallet_id: self.id(),
                    hash: utxo.tx_hash.clone(),
                    confirmations: utxo.confirmations,
                    block_height: None,
                    date: None,
                    fee: None,
                })?,
            };

            match self.store.output_by_position(tx.id, utxo.output_n)? {
                Some(mut output) => {
                    if output.key_id.is_none() {
                        output.key_id = Some(key.id);
                        new_outputs += 1;
                        self.store.update_output(&output)?;
                    }
                }
                None => {
                    self.store.insert_output(TxOutputRecord {
                        id: 0,
                        transaction_id: tx.id,
                        output_n: utxo.output_n,
                        key_id: Some(key.id),
                        value: utxo.value,
                        script: utxo.script.clone(),
                        spent: false,
                    })?;
                    new_outputs += 1;
                }
            }
        }

        info!("recorded {new_outputs} new utxos for wallet '{}'", self.name());
        self.balance_update(scope, 0)?;
        Ok(new_outputs)
    }

    /// Stored unspent outputs matching the scope
    pub fn utxos(&self, scope: &UtxoScope, min_confirms: u32) -> WalletResult<Vec<StoredUtxo>> {
        let (params, account_id, _) = self.account_defaults(&scope.key_scope())?;
        let mut utxos = Vec::new();
        for (output, tx) in self.store.wallet_outputs(self.id())? {
            if output.spent || tx.confirmations < min_confirms {
                continue;
            }
            let Some(key_id) = output.key_id else { continue };
            let Some(key) = self.store.key_by_id(key_id)? else {
                continue;
            };
            if key.account_id != account_id || key.network != params.name {
                continue;
            }
            if scope.key_id.map_or(false, |id| id != key_id) {
                continue;
            }
            if scope.change.map_or(false, |c| c != key.change) {
                continue;
            }
            utxos.push(StoredUtxo {
                output,
                tx_hash: tx.hash,
                confirmations: tx.confirmations,
                key_id,
                address: key.address,
                network: key.network,
            });
        }
        utxos.sort_by(|a, b| b.confirmations.cmp(&a.confirmations));
        Ok(utxos)
    }

    /// Synthesize spent flags for providers that omit them: an output is
    /// spent when a stored input references `(prev_hash=tx.hash, n)`
    pub fn update_from_transactions(&mut self, key_ids: &[u64]) -> WalletResult<()> {
        for (mut output, tx) in self.store.wallet_outputs(self.id())? {
            if output.spent {
                continue;
            }
            let Some(key_id) = output.key_id else { continue };
            if !key_ids.contains(&key_id) {
                continue;
            }
            if self
                .store
                .input_spending(self.id(), &tx.hash, output.output_n)?
            {
                output.spent = true;
                self.store.update_output(&output)?;
            }
        }
        Ok(())
    }

    /// Recompute key balances from stored unspent outputs; keys without
    /// outputs get balance 0. Without key or account filters the
    /// wallet-level per-network balances are refreshed too.
    pub fn balance_update(&mut self, scope: &UtxoScope, min_confirms: u32) -> WalletResult<u64> {
        let (params, account_id, _) = self.account_defaults(&scope.key_scope())?;

        let mut key_balances: HashMap<u64, u64> = HashMap::new();
        let mut network_totals: HashMap<String, u64> = HashMap::new();
        for (output, tx) in self.store.wallet_outputs(self.id())? {
            if output.spent || tx.confirmations < min_confirms {
                continue;
            }
            let Some(key_id) = output.key_id else { continue };
            let Some(key) = self.store.key_by_id(key_id)? else {
                continue;
            };
            if scope.key_id.map_or(false, |id| id != key_id) {
                continue;
            }
            if scope.account_id.map_or(false, |a| a != key.account_id) {
                continue;
            }
            if scope.network.as_deref().map_or(false, |n| n != key.network) {
                continue;
            }
            *key_balances.entry(key_id).or_insert(0) += output.value;
            *network_totals.entry(key.network.clone()).or_insert(0) += output.value;
        }

        // Write per-key balances, zeroing keys with no unspent outputs
        let filter = KeyFilter {
            key_id: scope.key_id,
            account_id: scope.account_id.or(Some(account_id)),
            network: Some(params.name.to_string()),
            ..KeyFilter::default()
        };
        let mut updated = 0;
        for mut key in self.store.keys_filtered(self.id(), &filter)? {
            let balance = key_balances.get(&key.id).copied().unwrap_or(0);
            if key.balance != balance {
                key.balance = balance;
                self.store.update_key(&key)?;
            }
            updated += 1;
        }

        if scope.key_id.is_none() && scope.account_id.is_none() {
            match &scope.network {
                Some(network) => {
                    let total = network_totals.get(network).copied().unwrap_or(0);
                    self.balances.insert(network.clone(), total);
                }
                None => {
                    for total in self.balances.values_mut() {
                        *total = 0;
                    }
                    self.balances.extend(network_totals);
                }
            }
            self.record.balance = self.balance(None);
            self.store.update_wallet(&self.record)?;
        }
        debug!("updated balance for {updated} keys");
        Ok(self.balance(None))
    }

    /// Wallet-level balance straight from the provider, without touching
    /// per-key UTXO state
    pub fn balance_update_from_provider(
        &mut self,
        chain: &dyn ChainService,
        scope: &UtxoScope,
    ) -> WalletResult<u64> {
        let (params, account_id, _) = self.account_defaults(&scope.key_scope())?;
        let addresses =
            self.addresslist(&self.address_filter(scope, account_id, params.name))?;
        let balance = chain.get_balance(&addresses)?;
        self.balances.insert(params.name.to_string(), balance);
        self.record.balance = self.balance(None);
        self.store.update_wallet(&self.record)?;
        Ok(balance)
    }

    /// Ingest full transactions (inputs and outputs) for the scoped
    /// addresses. When the provider omits spent flags they are
    /// synthesized from the stored inputs.
    pub fn transactions_update(
        &mut self,
        chain: &dyn ChainService,
        scope: &UtxoScope,
    ) -> WalletResult<()> {
        let (params, account_id, _) = self.account_defaults(&scope.key_scope())?;
        let addresses =
            self.addresslist(&self.address_filter(scope, account_id, params.name))?;
        let txs = chain.get_transactions(&addresses)?;

        let mut no_spent_info = false;
        let mut touched_keys: HashSet<u64> = HashSet::new();
        for tx_info in txs {
            let tx = match self.store.transaction_by_hash(self.id(), &tx_info.hash)? {
                Some(mut tx) => {
                    tx.confirmations = tx_info.confirmations;
                    tx.block_height = tx_info.block_height;
                    self.store.update_transaction(&tx)?;
                    tx
                }
                None => self.store.insert_transaction(TxRecord {
                    id: 0,
                    wallet_id: self.id(),
                    hash: tx_info.hash.clone(),
                    confirmations: tx_info.confirmations,
                    block_height: tx_info.block_height,
                    date: tx_info.date,
                    fee: tx_info.fee,
                })?,
            };

            for input in &tx_info.inputs {
                let key_id = match self.store.key_by_address(self.id(), &input.address)? {
                    Some(mut key) => {
                        if !key.used {
                            key.used = true;
                            self.store.update_key(&key)?;
                        }
                        touched_keys.insert(key.id);
                        Some(key.id)
                    }
                    None => None,
                };
                if self.store.input_by_position(tx.id, input.input_n)?.is_none() {
                    self.store.insert_input(TxInputRecord {
                        id: 0,
                        transaction_id: tx.id,
                        input_n: input.input_n,
                        key_id,
                        prev_hash: input.prev_hash.clone(),
                        value: Some(input.value),
                    })?;
                }
            }

            for output in &tx_info.outputs {
                let key_id = match self.store.key_by_address(self.id(), &output.address)? {
                    Some(mut key) => {
                        if !key.used {
                            key.used = true;
                            self.store.update_key(&key)?;
                        }
                        touched_keys.insert(key.id);
                        Some(key.id)
                    }
                    None => None,
                };
                if self
                    .store
                    .output_by_position(tx.id, output.output_n)?
                    .is_none()
                {
                    if output.spent.is_none() {
                        no_spent_info = true;
                    }
                    self.store.insert_output(TxOutputRecord {
                        id: 0,
                        transaction_id: tx.id,
                        output_n: output.output_n,
                        key_id,
                        value: output.value,
                        script: output.script.clone(),
                        spent: output.spent.unwrap_or(false),
                    })?;
                }
            }
        }

        if no_spent_info {
            let key_ids: Vec<u64> = touched_keys.into_iter().collect();
            self.update_from_transactions(&key_ids)?;
        }
        Ok(())
    }

    /// Stored transaction history for the scope; input rows carry
    /// negative values
    pub fn transactions(&self, scope: &UtxoScope) -> WalletResult<Vec<LedgerEntry>> {
        let (params, account_id, _) = self.account_defaults(&scope.key_scope())?;
        let mut entries = Vec::new();
        for tx in self.store.wallet_transactions(self.id())? {
            for input in self.store.inputs_for_transaction(tx.id)? {
                let Some(key_id) = input.key_id else { continue };
                let Some(key) = self.store.key_by_id(key_id)? else {
                    continue;
                };
                if key.account_id != account_id || key.network != params.name {
                    continue;
                }
                if scope.key_id.map_or(false, |id| id != key_id) {
                    continue;
                }
                entries.push(LedgerEntry {
                    tx_hash: tx.hash.clone(),
                    confirmations: tx.confirmations,
                    address: key.address,
                    value: -(input.value.unwrap_or(0) as i64),
                    spent: None,
                });
            }
            for output in self.store.outputs_for_transaction(tx.id)? {
                let Some(key_id) = output.key_id else { continue };
                let Some(key) = self.store.key_by_id(key_id)? else {
                    continue;
                };
                if key.account_id != account_id || key.network != params.name {
                    continue;
                }
                if scope.key_id.map_or(false, |id| id != key_id) {
                    continue;
                }
                entries.push(LedgerEntry {
                    tx_hash: tx.hash.clone(),
                    confirmations: tx.confirmations,
                    address: key.address,
                    value: output.value as i64,
                    spent: Some(output.spent),
                });
            }
        }
        entries.sort_by(|a, b| {
            (b.confirmations, &b.tx_hash).cmp(&(a.confirmations, &a.tx_hash))
        });
        Ok(entries)
    }

    /// Generate and probe addresses until no more funded ones turn up
    /// (gap-limit style discovery)
    pub fn scan(
        &mut self,
        chain: &dyn ChainService,
        scan_depth: usize,
        scope: &KeyScope,
        change: Option<u32>,
    ) -> WalletResult<()> {
        self.scan_inner(chain, scan_depth, scope, change, 0)
    }

    fn scan_inner(
        &mut self,
        chain: &dyn ChainService,
        scan_depth: usize,
        scope: &KeyScope,
        change: Option<u32>,
        recursion: u32,
    ) -> WalletResult<()> {
        if recursion > 10 {
            return Err(WalletError::ScanDepthExceeded(10));
        }
        if !matches!(self.scheme(), Scheme::Bip44 | Scheme::Multisig) {
            return Err(WalletError::UnsupportedScheme(self.scheme().to_string()));
        }
        for branch in [0u32, 1] {
            if change.map_or(false, |c| c != branch) {
                continue;
            }
            let keys = self.get_key_batch(scope, branch, scan_depth)?;
            let mut new_utxos = 0;
            for key in keys {
                new_utxos += self.utxos_update(
                    chain,
                    &UtxoScope {
                        key_id: Some(key.id()),
                        change: Some(branch),
                        account_id: scope.account_id,
                        network: scope.network.clone(),
                        ..UtxoScope::default()
                    },
                )?;
            }
            if new_utxos > 0 {
                self.scan_inner(chain, scan_depth, scope, Some(branch), recursion + 1)?;
            }
        }
        Ok(())
    }
}
