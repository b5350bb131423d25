/// Transaction composer
///
/// Builds a `TxDraft` from the wallet's unspent outputs: fee estimation,
/// input selection, change allocation and signer-slot assembly. Selection
/// heuristic: prefer the smallest single UTXO covering the target, else
/// accumulate the largest remaining ones.
use crate::error::{KeyError, WalletError, WalletResult};
use crate::ledger::{StoredUtxo, UtxoScope};
use crate::network::ChainService;
use crate::storage::{KeyRecord, KeyType};
use crate::transaction::{DraftInput, DraftKey, DraftOutput, ScriptType, TxDraft};
use crate::wallet::{decode_redeem_script, KeyScope, Wallet};
use bitcoin::{Address, ScriptBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Byte-size heuristic used before the real input count is known
fn estimated_size(n_inputs: usize, n_outputs: usize) -> u64 {
    100 + 150 * n_inputs as u64 + 50 * (n_outputs as u64 + 1)
}

/// A requested output: destination address and amount
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub address: String,
    pub value: u64,
}

impl OutputSpec {
    pub fn new(address: &str, value: u64) -> Self {
        Self {
            address: address.to_string(),
            value,
        }
    }
}

/// An externally chosen input; missing key and value are resolved from
/// the store
#[derive(Debug, Clone, Default)]
pub struct InputSpec {
    pub prev_hash: String,
    pub output_n: u32,
    pub key_id: Option<u64>,
    pub value: Option<u64>,
    pub unlocking_script: Option<String>,
}

/// Options for `transaction_create`
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub account_id: Option<u32>,
    pub network: Option<String>,
    /// Fixed fee; estimated from the provider when absent
    pub fee: Option<u64>,
    pub min_confirms: u32,
    pub max_utxos: Option<usize>,
    /// Reconstruct an existing transaction: no fee estimation, no change
    pub import_only: bool,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            account_id: None,
            network: None,
            fee: None,
            min_confirms: 1,
            max_utxos: None,
            import_only: false,
        }
    }
}

impl ComposeOptions {
    fn key_scope(&self) -> KeyScope {
        KeyScope {
            account_id: self.account_id,
            network: self.network.clone(),
        }
    }
}

/// Pick UTXOs covering `target`: the smallest single sufficient output,
/// or the largest outputs accumulated until the target is reached
fn select_inputs(
    target: u64,
    utxos: &[StoredUtxo],
    max_utxos: Option<usize>,
) -> Vec<StoredUtxo> {
    let mut sufficient: Vec<&StoredUtxo> = utxos
        .iter()
        .filter(|u| u.output.value >= target)
        .collect();
    sufficient.sort_by_key(|u| u.output.value);
    if let Some(utxo) = sufficient.first() {
        return vec![(*utxo).clone()];
    }
    if max_utxos.map_or(false, |max| max <= 1) {
        debug!("no single utxo covers {target} and max_utxos forbids combining");
        return Vec::new();
    }

    let mut lessers: Vec<&StoredUtxo> = utxos
        .iter()
        .filter(|u| u.output.value < target)
        .collect();
    lessers.sort_by(|a, b| b.output.value.cmp(&a.output.value));
    if let Some(max) = max_utxos {
        lessers.truncate(max);
    }
    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in lessers {
        if total >= target {
            break;
        }
        total += utxo.output.value;
        selected.push(utxo.clone());
    }
    if total < target {
        return Vec::new();
    }
    selected
}

impl Wallet {
    /// Build the signer slots for an input spending one of this wallet's
    /// keys, verifying that the key reproduces the stored address
    fn draft_input(
        &self,
        key: &KeyRecord,
        prev_hash: &str,
        output_n: u32,
        value: u64,
    ) -> WalletResult<DraftInput> {
        let (script_type, keys, sigs_required, redeem) = match key.key_type {
            KeyType::Multisig => {
                let redeem = ScriptBuf::from_bytes(hex::decode(&key.public).map_err(|e| {
                    KeyError::InvalidKey(format!("stored redeem script is not hex: {e}"))
                })?);
                let (n_required, pubkeys) = decode_redeem_script(&redeem)?;
                let derived = crate::wallet::p2sh_address(&redeem, self.network())?;
                if derived.to_string() != key.address {
                    return Err(WalletError::KeyMismatch(format!(
                        "redeem script address {derived} does not match key address {}",
                        key.address
                    )));
                }
                let mut slots = Vec::with_capacity(pubkeys.len());
                for public in pubkeys {
                    // Private child material lives in the cosigner wallets
                    let mut secret = None;
                    let public_hex = hex::encode(public.to_bytes());
                    for wallet_id in
                        std::iter::once(self.id()).chain(self.cosigner_ids().iter().copied())
                    {
                        if let Some(child) = self.store.key_by_public(wallet_id, &public_hex)? {
                            if child.is_private {
                                let child_key = crate::wallet::WalletKey::from_record(child)?;
                                secret = child_key.hd_key()?.secret_key();
                                break;
                            }
                        }
                    }
                    slots.push(DraftKey { public, secret });
                }
                let sigs_required = self.multisig_n_required().unwrap_or(n_required);
                (ScriptType::P2shMultisig, slots, sigs_required, Some(redeem))
            }
            KeyType::Bip32 | KeyType::Single => {
                let public = bitcoin::PublicKey::from_str(&key.public).map_err(|e| {
                    KeyError::InvalidKey(format!("stored public key is invalid: {e}"))
                })?;
                let derived = Address::p2pkh(
                    public.pubkey_hash(),
                    crate::network::NetworkParams::from_name(&key.network)?.network,
                );
                if derived.to_string() != key.address {
                    return Err(WalletError::KeyMismatch(format!(
                        "derived address {derived} does not match key address {}",
                        key.address
                    )));
                }
                let secret = if key.is_private {
                    crate::wallet::WalletKey::from_record(key.clone())?
                        .hd_key()?
                        .secret_key()
                } else {
                    None
                };
                (
                    ScriptType::P2pkh,
                    vec![DraftKey { public, secret }],
                    1,
                    None,
                )
            }
        };
        Ok(DraftInput {
            prev_hash: prev_hash.to_string(),
            output_n,
            key_id: Some(key.id),
            value,
            address: key.address.clone(),
            script_type,
            keys,
            sigs_required,
            redeem_script: redeem,
            signatures: Vec::new(),
            unlocking_script: None,
        })
    }

    /// Compose an unsigned transaction. Inputs are selected from the
    /// wallet's unspent outputs unless supplied; the fee is estimated
    /// through `chain` unless fixed in the options.
    pub fn transaction_create(
        &mut self,
        chain: Option<&dyn ChainService>,
        outputs: &[OutputSpec],
        inputs: Option<&[InputSpec]>,
        options: &ComposeOptions,
    ) -> WalletResult<TxDraft> {
        let (params, account_id, _) = self.account_defaults(&options.key_scope())?;
        if let (Some(supplied), Some(max)) = (inputs, options.max_utxos) {
            if supplied.len() > max {
                return Err(WalletError::KeyMismatch(format!(
                    "{} inputs supplied but max_utxos is {max}",
                    supplied.len()
                )));
            }
        }

        let mut draft = TxDraft::new(params);
        for spec in outputs {
            let address = Address::from_str(&spec.address)
                .map_err(|e| KeyError::InvalidAddress(e.to_string()))?
                .require_network(params.network)
                .map_err(|e| KeyError::InvalidAddress(e.to_string()))?;
            draft.outputs.push(DraftOutput {
                address: address.to_string(),
                value: spec.value,
                script_pubkey: address.script_pubkey(),
            });
        }
        let total_output = draft.total_output();

        // Fee determination
        let mut fee_per_output = None;
        if options.import_only {
            draft.fee = None;
        } else if let Some(fee) = options.fee {
            draft.fee = Some(fee);
        } else if inputs.is_none() {
            let chain = chain.ok_or_else(|| {
                WalletError::ServiceUnavailable(
                    "fee estimation needs a provider; set a fixed fee for offline use".into(),
                )
            })?;
            let fee_per_kb = chain.estimate_fee()?;
            draft.fee_per_kb = Some(fee_per_kb);
            draft.fee = Some(estimated_size(1, outputs.len()) * fee_per_kb / 1024);
            fee_per_output = Some(50 * fee_per_kb / 1024);
        } else {
            draft.fee = Some(0);
        }

        // Input assembly
        let scope = UtxoScope {
            account_id: Some(account_id),
            network: Some(params.name.to_string()),
            ..UtxoScope::default()
        };
        match inputs {
            None => {
                let utxos = self.utxos(&scope, options.min_confirms)?;
                let available: u64 = utxos.iter().map(|u| u.output.value).sum();
                let target = total_output + draft.fee.unwrap_or(0);
                let selected = select_inputs(target, &utxos, options.max_utxos);
                if selected.is_empty() {
                    return Err(WalletError::InsufficientFunds {
                        available,
                        required: target,
                    });
                }
                for utxo in selected {
                    let key = self
                        .store
                        .key_by_id(utxo.key_id)?
                        .ok_or_else(|| WalletError::NotFound(format!("key {}", utxo.key_id)))?;
                    draft.inputs.push(self.draft_input(
                        &key,
                        &utxo.tx_hash,
                        utxo.output.output_n,
                        utxo.output.value,
                    )?);
                }
            }
            Some(specs) => {
                for spec in specs {
                    let (key_id, value) = match (spec.key_id, spec.value) {
                        (Some(key_id), Some(value)) => (key_id, value),
                        _ => {
                            let tx = self
                                .store
                                .transaction_by_hash(self.id(), &spec.prev_hash)?
                                .ok_or_else(|| WalletError::UnknownUtxo {
                                    tx_hash: spec.prev_hash.clone(),
                                    output_n: spec.output_n,
                                })?;
                            let output = self
                                .store
                                .output_by_position(tx.id, spec.output_n)?
                                .ok_or_else(|| WalletError::UnknownUtxo {
                                    tx_hash: spec.prev_hash.clone(),
                                    output_n: spec.output_n,
                                })?;
                            let key_id =
                                output.key_id.ok_or_else(|| WalletError::UnknownUtxo {
                                    tx_hash: spec.prev_hash.clone(),
                                    output_n: spec.output_n,
                                })?;
                            (key_id, output.value)
                        }
                    };
                    let key = self
                        .store
                        .key_by_id(key_id)?
                        .ok_or_else(|| WalletError::NotFound(format!("key {key_id}")))?;
                    let mut input =
                        self.draft_input(&key, &spec.prev_hash, spec.output_n, value)?;
                    if let Some(script) = &spec.unlocking_script {
                        let bytes = hex::decode(script).map_err(|e| {
                            KeyError::InvalidKey(format!("unlocking script is not hex: {e}"))
                        })?;
                        input.unlocking_script = Some(ScriptBuf::from_bytes(bytes));
                    }
                    draft.inputs.push(input);
                }
            }
        }

        // Change handling
        let total_input = draft.total_input();
        if options.import_only {
            draft.change = 0;
            draft.fee = Some(total_input.saturating_sub(total_output));
        } else {
            let fee = draft.fee.unwrap_or(0);
            if total_input < total_output + fee {
                return Err(WalletError::InsufficientFunds {
                    available: total_input,
                    required: total_output + fee,
                });
            }
            let change = total_input - (total_output + fee);
            if change > 0 && fee_per_output.map_or(false, |dust| change < dust) {
                // Dust change costs more to spend than it is worth
                debug!("absorbing dust change {change} into the fee");
                draft.change = 0;
                draft.fee = Some(total_input - total_output);
            } else if change > 0 {
                let change_key = self.get_key_change(&options.key_scope())?;
                let address = Address::from_str(change_key.address())
                    .map_err(|e| KeyError::InvalidAddress(e.to_string()))?
                    .require_network(params.network)
                    .map_err(|e| KeyError::InvalidAddress(e.to_string()))?;
                draft.outputs.push(DraftOutput {
                    address: address.to_string(),
                    value: change,
                    script_pubkey: address.script_pubkey(),
                });
                draft.change = change;
            }
        }

        info!(
            "composed transaction: {} inputs, {} outputs, fee {:?}",
            draft.inputs.len(),
            draft.outputs.len(),
            draft.fee
        );
        Ok(draft)
    }

    /// Import a raw transaction and rebuild it as a draft against this
    /// wallet's stored outputs
    pub fn transaction_import(&mut self, raw: &str) -> WalletResult<TxDraft> {
        let decoded = crate::transaction::codec::import_raw(raw, self.network())?;
        let inputs: Vec<InputSpec> = decoded
            .inputs
            .into_iter()
            .map(|(prev_hash, output_n)| InputSpec {
                prev_hash,
                output_n,
                ..InputSpec::default()
            })
            .collect();
        let outputs: Vec<OutputSpec> = decoded
            .outputs
            .into_iter()
            .map(|(address, value)| OutputSpec { address, value })
            .collect();
        self.transaction_create(
            None,
            &outputs,
            Some(&inputs),
            &ComposeOptions {
                import_only: true,
                ..ComposeOptions::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::UtxoInfo;
    use crate::storage::Store;
    use crate::wallet::CreateOptions;
    use tempfile::TempDir;

    const SEED: &str = "000102030405060708090a0b0c0d0e0f";
    const TX_HASH: &str = "9df91f89a3eb4259ce04af66ad4caf3c9a297feea5e0b3bc506898b6728c5003";
    const TX_HASH_B: &str = "0de18022aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn setup_funded(values: &[(String, u64)]) -> (Store, Wallet, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let mut wallet = Wallet::create(
            &store,
            "spender",
            CreateOptions {
                seed: Some(SEED.to_string()),
                ..CreateOptions::default()
            },
        )
        .unwrap();
        let utxos: Vec<UtxoInfo> = values
            .iter()
            .enumerate()
            .map(|(n, (address, value))| UtxoInfo {
                address: address.clone(),
                tx_hash: if n % 2 == 0 { TX_HASH } else { TX_HASH_B }.to_string(),
                output_n: n as u32,
                value: *value,
                confirmations: 10,
                script: String::new(),
            })
            .collect();
        wallet
            .utxos_update_offline(utxos, &UtxoScope::default())
            .unwrap();
        (store, wallet, dir)
    }

    fn dest_address() -> String {
        // An address outside the wallet
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let secret = bitcoin::secp256k1::SecretKey::from_slice(&[0x42; 32]).unwrap();
        let public = bitcoin::PublicKey::new(secret.public_key(&secp));
        Address::p2pkh(public.pubkey_hash(), bitcoin::Network::Bitcoin).to_string()
    }

    #[test]
    fn test_compose_with_fixed_fee_and_change() {
        let (_store, mut wallet, _dir) = setup_funded(&[]);
        let key = wallet.get_key(&KeyScope::default(), 0).unwrap();
        wallet
            .utxos_update_offline(
                vec![UtxoInfo {
                    address: key.address().to_string(),
                    tx_hash: TX_HASH.to_string(),
                    output_n: 0,
                    value: 8_970_937,
                    confirmations: 10,
                    script: String::new(),
                }],
                &UtxoScope::default(),
            )
            .unwrap();

        let draft = wallet
            .transaction_create(
                None,
                &[OutputSpec::new(&dest_address(), 1_000_000)],
                None,
                &ComposeOptions {
                    fee: Some(10_000),
                    ..ComposeOptions::default()
                },
            )
            .unwrap();
        assert_eq!(draft.inputs.len(), 1);
        assert_eq!(draft.inputs[0].prev_hash, TX_HASH);
        assert_eq!(draft.outputs.len(), 2);
        assert_eq!(draft.change, 7_960_937);
        // Value is conserved: inputs = outputs + fee
        assert_eq!(
            draft.total_input(),
            draft.total_output() + draft.fee.unwrap()
        );
        // Change goes to a fresh change-branch key
        let change_key = wallet.key(&draft.outputs[1].address).unwrap();
        assert_eq!(change_key.change(), 1);
    }

    #[test]
    fn test_insufficient_funds() {
        let (_store, mut wallet, _dir) = setup_funded(&[]);
        let key = wallet.get_key(&KeyScope::default(), 0).unwrap();
        wallet
            .utxos_update_offline(
                vec![UtxoInfo {
                    address: key.address().to_string(),
                    tx_hash: TX_HASH.to_string(),
                    output_n: 0,
                    value: 5_000,
                    confirmations: 10,
                    script: String::new(),
                }],
                &UtxoScope::default(),
            )
            .unwrap();
        let result = wallet.transaction_create(
            None,
            &[OutputSpec::new(&dest_address(), 100_000)],
            None,
            &ComposeOptions {
                fee: Some(1_000),
                ..ComposeOptions::default()
            },
        );
        assert!(matches!(
            result,
            Err(WalletError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_selection_prefers_single_sufficient_utxo() {
        let (_store, mut wallet, _dir) = setup_funded(&[]);
        let keys = wallet.get_key_batch(&KeyScope::default(), 0, 3).unwrap();
        let utxos: Vec<UtxoInfo> = [(0u32, 30_000u64), (1, 80_000), (2, 200_000)]
            .iter()
            .map(|(n, value)| UtxoInfo {
                address: keys[*n as usize].address().to_string(),
                tx_hash: TX_HASH.to_string(),
                output_n: *n,
                value: *value,
                confirmations: 5,
                script: String::new(),
            })
            .collect();
        wallet
            .utxos_update_offline(utxos, &UtxoScope::default())
            .unwrap();

        // 60k fits inside the 80k output; the smallest sufficient wins
        let draft = wallet
            .transaction_create(
                None,
                &[OutputSpec::new(&dest_address(), 60_000)],
                None,
                &ComposeOptions {
                    fee: Some(1_000),
                    ..ComposeOptions::default()
                },
            )
            .unwrap();
        assert_eq!(draft.inputs.len(), 1);
        assert_eq!(draft.inputs[0].value, 80_000);

        // 250k needs a combination, largest first
        let draft = wallet
            .transaction_create(
                None,
                &[OutputSpec::new(&dest_address(), 250_000)],
                None,
                &ComposeOptions {
                    fee: Some(1_000),
                    ..ComposeOptions::default()
                },
            )
            .unwrap();
        assert_eq!(draft.inputs.len(), 2);

        // max_utxos=1 forbids the combination
        let result = wallet.transaction_create(
            None,
            &[OutputSpec::new(&dest_address(), 250_000)],
            None,
            &ComposeOptions {
                fee: Some(1_000),
                max_utxos: Some(1),
                ..ComposeOptions::default()
            },
        );
        assert!(matches!(
            result,
            Err(WalletError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_supplied_inputs_resolved_from_store() {
        let (_store, mut wallet, _dir) = setup_funded(&[]);
        let key = wallet.get_key(&KeyScope::default(), 0).unwrap();
        wallet
            .utxos_update_offline(
                vec![UtxoInfo {
                    address: key.address().to_string(),
                    tx_hash: TX_HASH.to_string(),
                    output_n: 0,
                    value: 100_000,
                    confirmations: 10,
                    script: String::new(),
                }],
                &UtxoScope::default(),
            )
            .unwrap();

        let draft = wallet
            .transaction_create(
                None,
                &[OutputSpec::new(&dest_address(), 50_000)],
                Some(&[InputSpec {
                    prev_hash: TX_HASH.to_string(),
                    output_n: 0,
                    ..InputSpec::default()
                }]),
                &ComposeOptions {
                    fee: Some(1_000),
                    ..ComposeOptions::default()
                },
            )
            .unwrap();
        assert_eq!(draft.inputs[0].key_id, Some(key.id()));
        assert_eq!(draft.inputs[0].value, 100_000);

        // Unknown outpoints are rejected
        let result = wallet.transaction_create(
            None,
            &[OutputSpec::new(&dest_address(), 50_000)],
            Some(&[InputSpec {
                prev_hash: TX_HASH_B.to_string(),
                output_n: 9,
                ..InputSpec::default()
            }]),
            &ComposeOptions {
                fee: Some(1_000),
                ..ComposeOptions::default()
            },
        );
        assert!(matches!(result, Err(WalletError::UnknownUtxo { .. })));
    }
}
