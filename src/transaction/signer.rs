/// Transaction signing and submission
///
/// Gathers candidate private keys for every input (attached material,
/// caller-supplied keys, cosigner wallets), signs, verifies and submits.
/// Spent flags are written only after the provider accepts the broadcast.
use crate::error::{WalletError, WalletResult};
use crate::ledger::UtxoScope;
use crate::network::ChainService;
use crate::transaction::{codec, ComposeOptions, InputSpec, OutputSpec, TxDraft};
use crate::wallet::{Wallet, WalletKey};
use bitcoin::secp256k1::SecretKey;
use tracing::{info, warn};

/// Result of a send operation
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Verified but not broadcast
    Offline,
    /// Accepted by the provider
    Sent { txid: String },
}

/// Options for the high-level send operations
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub account_id: Option<u32>,
    pub network: Option<String>,
    pub fee: Option<u64>,
    pub min_confirms: u32,
    pub max_utxos: Option<usize>,
    pub offline: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            account_id: None,
            network: None,
            fee: None,
            min_confirms: 4,
            max_utxos: None,
            offline: false,
        }
    }
}

impl SendOptions {
    fn compose(&self) -> ComposeOptions {
        ComposeOptions {
            account_id: self.account_id,
            network: self.network.clone(),
            fee: self.fee,
            min_confirms: self.min_confirms,
            max_utxos: self.max_utxos,
            import_only: false,
        }
    }
}

/// Options for `sweep`
#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub account_id: Option<u32>,
    pub network: Option<String>,
    pub input_key_id: Option<u64>,
    pub max_utxos: usize,
    pub min_confirms: u32,
    pub fee_per_kb: Option<u64>,
    pub offline: bool,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            account_id: None,
            network: None,
            input_key_id: None,
            max_utxos: 999,
            min_confirms: 1,
            fee_per_kb: None,
            offline: false,
        }
    }
}

impl Wallet {
    /// Sign every input with the keys this wallet can reach: material
    /// already attached to the input, extra keys supplied by the caller,
    /// and private cosigner keys matching a required signer
    pub fn transaction_sign(
        &self,
        draft: &mut TxDraft,
        extra_keys: &[String],
    ) -> WalletResult<()> {
        let mut extra: Vec<SecretKey> = Vec::with_capacity(extra_keys.len());
        for encoded in extra_keys {
            let key = crate::keys::HdKey::import(encoded, self.network())?;
            match key.secret_key() {
                Some(secret) => extra.push(secret),
                None => warn!("supplied extra key is not private, skipping"),
            }
        }

        for index in 0..draft.inputs.len() {
            let mut candidates = extra.clone();
            for slot in &draft.inputs[index].keys {
                match slot.secret {
                    Some(secret) => candidates.push(secret),
                    None => {
                        // Look for the private key in this wallet or any
                        // cosigner wallet
                        let public_hex = hex::encode(slot.public.to_bytes());
                        for wallet_id in
                            std::iter::once(self.id()).chain(self.cosigner_ids().iter().copied())
                        {
                            if let Some(record) =
                                self.store.key_by_public(wallet_id, &public_hex)?
                            {
                                if record.is_private {
                                    let key = WalletKey::from_record(record)?;
                                    if let Some(secret) = key.hd_key()?.secret_key() {
                                        candidates.push(secret);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
            }
            codec::sign_input(draft, index, &candidates)?;
        }
        Ok(())
    }

    /// Verify and broadcast a signed draft, then mark its inputs' source
    /// outputs spent. With `offline` the draft is only verified.
    pub fn transaction_send(
        &mut self,
        chain: &dyn ChainService,
        draft: &TxDraft,
        offline: bool,
    ) -> WalletResult<SendOutcome> {
        if !codec::verify(draft)? {
            return Err(WalletError::VerifyFailed);
        }
        if offline {
            return Ok(SendOutcome::Offline);
        }

        let raw = codec::raw_hex(draft)?;
        let txid = chain.send_raw(&raw)?;

        // Broadcast accepted: the source outputs are now spent
        for input in &draft.inputs {
            if let Some(tx) = self.store.transaction_by_hash(self.id(), &input.prev_hash)? {
                if let Some(mut output) = self.store.output_by_position(tx.id, input.output_n)? {
                    output.spent = true;
                    self.store.update_output(&output)?;
                }
            }
        }
        self.balance_update(&UtxoScope::default(), 0)?;
        info!("sent transaction {txid}");
        Ok(SendOutcome::Sent { txid })
    }

    /// Compose, sign and submit. When the fee was estimated, the exact
    /// size-based fee is compared afterwards and the transaction is
    /// rebuilt once if the estimate was more than 10% off.
    pub fn send(
        &mut self,
        chain: &dyn ChainService,
        outputs: &[OutputSpec],
        inputs: Option<&[InputSpec]>,
        extra_keys: &[String],
        options: &SendOptions,
    ) -> WalletResult<SendOutcome> {
        if let (Some(supplied), Some(max)) = (inputs, options.max_utxos) {
            if supplied.len() > max {
                return Err(WalletError::KeyMismatch(format!(
                    "{} inputs supplied but max_utxos is {max}",
                    supplied.len()
                )));
            }
        }

        let compose = options.compose();
        let mut draft = self.transaction_create(Some(chain), outputs, inputs, &compose)?;
        self.transaction_sign(&mut draft, extra_keys)?;

        if options.fee.is_none() && draft.change > 0 {
            if let Some(fee_per_kb) = draft.fee_per_kb {
                let exact = codec::exact_fee(&draft, fee_per_kb)?;
                let estimated = draft.fee.unwrap_or(0);
                let off_by = estimated.abs_diff(exact);
                if exact > 0 && off_by * 10 > exact {
                    info!(
                        "fee estimate {estimated} is more than 10% from exact {exact}, recomposing"
                    );
                    let corrected = ComposeOptions {
                        fee: Some(exact),
                        ..compose
                    };
                    draft = self.transaction_create(Some(chain), outputs, inputs, &corrected)?;
                    self.transaction_sign(&mut draft, extra_keys)?;
                }
            }
        }
        self.transaction_send(chain, &draft, options.offline)
    }

    /// Send a single amount to a single address
    pub fn send_to(
        &mut self,
        chain: &dyn ChainService,
        to_address: &str,
        amount: u64,
        options: &SendOptions,
    ) -> WalletResult<SendOutcome> {
        self.send(
            chain,
            &[OutputSpec::new(to_address, amount)],
            None,
            &[],
            options,
        )
    }

    /// Sweep every unspent output above the dust threshold into one
    /// output at `to_address`
    pub fn sweep(
        &mut self,
        chain: &dyn ChainService,
        to_address: &str,
        options: &SweepOptions,
    ) -> WalletResult<SendOutcome> {
        let scope = UtxoScope {
            account_id: options.account_id,
            network: options.network.clone(),
            key_id: options.input_key_id,
            ..UtxoScope::default()
        };
        let mut utxos = self.utxos(&scope, options.min_confirms)?;
        utxos.truncate(options.max_utxos);

        let mut inputs = Vec::new();
        let mut total = 0u64;
        for utxo in utxos {
            if utxo.output.value < self.network().dust_threshold {
                continue;
            }
            total += utxo.output.value;
            inputs.push(InputSpec {
                prev_hash: utxo.tx_hash,
                output_n: utxo.output.output_n,
                key_id: Some(utxo.key_id),
                value: Some(utxo.output.value),
                unlocking_script: None,
            });
        }
        if inputs.is_empty() {
            return Err(WalletError::InsufficientFunds {
                available: 0,
                required: self.network().dust_threshold,
            });
        }

        let fee_per_kb = match options.fee_per_kb {
            Some(rate) => rate,
            None => chain.estimate_fee()?,
        };
        let tr_size = 125 + 125 * inputs.len() as u64;
        let fee = tr_size * fee_per_kb / 1024;
        if total <= fee {
            return Err(WalletError::InsufficientFunds {
                available: total,
                required: fee,
            });
        }

        self.send(
            chain,
            &[OutputSpec::new(to_address, total - fee)],
            Some(&inputs),
            &[],
            &SendOptions {
                account_id: options.account_id,
                network: options.network.clone(),
                fee: Some(fee),
                min_confirms: options.min_confirms,
                max_utxos: None,
                offline: options.offline,
            },
        )
    }
}
