/// Transaction codec
///
/// Bridges `TxDraft` and the consensus wire format: builds the raw
/// transaction, computes legacy sighashes, signs and verifies inputs,
/// assembles unlocking scripts and derives the exact size-based fee.
use crate::error::{KeyError, WalletError, WalletResult};
use crate::network::NetworkParams;
use crate::transaction::{DraftInput, InputSignature, ScriptType, TxDraft};
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{ecdsa::Signature, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use std::str::FromStr;

fn parse_txid(hash: &str) -> WalletResult<Txid> {
    Txid::from_str(hash)
        .map_err(|e| WalletError::Key(KeyError::InvalidKey(format!("bad txid {hash}: {e}"))))
}

/// Locking script the input commits to when hashed: the previous P2PKH
/// script for single keys, the redeem script for P2SH multisig
pub fn script_code(input: &DraftInput) -> WalletResult<ScriptBuf> {
    match input.script_type {
        ScriptType::P2pkh => {
            let key = input.keys.first().ok_or_else(|| {
                WalletError::KeyMismatch("p2pkh input without a key".into())
            })?;
            Ok(ScriptBuf::new_p2pkh(&key.public.pubkey_hash()))
        }
        ScriptType::P2shMultisig => input
            .redeem_script
            .clone()
            .ok_or_else(|| WalletError::KeyMismatch("multisig input without redeem script".into())),
    }
}

/// Build the consensus transaction; unlocking scripts are included only
/// when `signed` is set
pub fn build_tx(draft: &TxDraft, signed: bool) -> WalletResult<Transaction> {
    let mut inputs = Vec::with_capacity(draft.inputs.len());
    for input in &draft.inputs {
        let script_sig = if signed {
            assemble_script_sig(input)?
        } else {
            ScriptBuf::new()
        };
        inputs.push(TxIn {
            previous_output: OutPoint::new(parse_txid(&input.prev_hash)?, input.output_n),
            script_sig,
            sequence: Sequence::MAX,
            witness: Witness::new(),
        });
    }
    let outputs = draft
        .outputs
        .iter()
        .map(|output| TxOut {
            value: Amount::from_sat(output.value),
            script_pubkey: output.script_pubkey.clone(),
        })
        .collect();
    Ok(Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs,
        output: outputs,
    })
}

fn input_sighash(draft: &TxDraft, index: usize) -> WalletResult<Message> {
    let tx = build_tx(draft, false)?;
    let code = script_code(&draft.inputs[index])?;
    let cache = SighashCache::new(&tx);
    let sighash = cache
        .legacy_signature_hash(index, &code, EcdsaSighashType::All.to_u32())
        .map_err(|e| WalletError::KeyMismatch(format!("sighash: {e}")))?;
    Ok(Message::from_digest(sighash.to_byte_array()))
}

/// Sign one input with every matching secret key; returns the number of
/// signatures added
pub fn sign_input(
    draft: &mut TxDraft,
    index: usize,
    secrets: &[SecretKey],
) -> WalletResult<usize> {
    let message = input_sighash(draft, index)?;
    let secp = Secp256k1::new();
    let input = &mut draft.inputs[index];
    let mut added = 0;
    for secret in secrets {
        let public = PublicKey::new(secret.public_key(&secp));
        let expected = input.keys.iter().any(|k| k.public == public);
        let already = input.signatures.iter().any(|s| s.public == public);
        if !expected || already {
            continue;
        }
        let signature = secp.sign_ecdsa(&message, secret);
        input.signatures.push(InputSignature { public, signature });
        added += 1;
    }
    Ok(added)
}

fn push_signature(builder: Builder, signature: &Signature) -> WalletResult<Builder> {
    let mut bytes = signature.serialize_der().to_vec();
    bytes.push(EcdsaSighashType::All.to_u32() as u8);
    let push = PushBytesBuf::try_from(bytes)
        .map_err(|_| WalletError::KeyMismatch("signature too long".into()))?;
    Ok(builder.push_slice(push))
}

/// Assemble the unlocking script for an input. Fails with
/// `SignatureIncomplete` when too few signatures are present.
pub fn assemble_script_sig(input: &DraftInput) -> WalletResult<ScriptBuf> {
    if let Some(script) = &input.unlocking_script {
        return Ok(script.clone());
    }
    match input.script_type {
        ScriptType::P2pkh => {
            let signature = input.signatures.first().ok_or_else(|| {
                WalletError::SignatureIncomplete {
                    input_n: input.output_n,
                    got: 0,
                    required: 1,
                }
            })?;
            let builder = push_signature(Builder::new(), &signature.signature)?;
            Ok(builder.push_key(&signature.public).into_script())
        }
        ScriptType::P2shMultisig => {
            // Signatures must appear in redeem-script key order
            let mut ordered = Vec::new();
            for key in &input.keys {
                if let Some(sig) = input.signatures.iter().find(|s| s.public == key.public) {
                    ordered.push(sig);
                }
                if ordered.len() == input.sigs_required as usize {
                    break;
                }
            }
            if ordered.len() < input.sigs_required as usize {
                return Err(WalletError::SignatureIncomplete {
                    input_n: input.output_n,
                    got: ordered.len(),
                    required: input.sigs_required as usize,
                });
            }
            let redeem = input.redeem_script.clone().ok_or_else(|| {
                WalletError::KeyMismatch("multisig input without redeem script".into())
            })?;
            // Extra OP_0 consumed by the off-by-one in OP_CHECKMULTISIG
            let mut builder = Builder::new().push_int(0);
            for sig in ordered {
                builder = push_signature(builder, &sig.signature)?;
            }
            let redeem_push = PushBytesBuf::try_from(redeem.to_bytes())
                .map_err(|_| WalletError::KeyMismatch("redeem script too long".into()))?;
            Ok(builder.push_slice(redeem_push).into_script())
        }
    }
}

/// Check every input carries enough valid signatures for its sighash
pub fn verify(draft: &TxDraft) -> WalletResult<bool> {
    let secp = Secp256k1::new();
    for (index, input) in draft.inputs.iter().enumerate() {
        if input.unlocking_script.is_some() && input.signatures.is_empty() {
            // Externally finalized input; nothing to check against
            continue;
        }
        let message = input_sighash(draft, index)?;
        let mut valid = 0usize;
        for signature in &input.signatures {
            if input.keys.iter().any(|k| k.public == signature.public)
                && secp
                    .verify_ecdsa(&message, &signature.signature, &signature.public.inner)
                    .is_ok()
            {
                valid += 1;
            }
        }
        if valid < input.sigs_required as usize {
            return Ok(false);
        }
    }
    Ok(!draft.inputs.is_empty())
}

/// Serialized signed transaction as hex
pub fn raw_hex(draft: &TxDraft) -> WalletResult<String> {
    let tx = build_tx(draft, true)?;
    Ok(bitcoin::consensus::encode::serialize_hex(&tx))
}

/// Transaction id of the signed transaction
pub fn txid(draft: &TxDraft) -> WalletResult<String> {
    let tx = build_tx(draft, true)?;
    Ok(tx.compute_txid().to_string())
}

/// Exact fee for the signed transaction size at the given sat/kB rate
pub fn exact_fee(draft: &TxDraft, fee_per_kb: u64) -> WalletResult<u64> {
    let tx = build_tx(draft, true)?;
    Ok(tx.total_size() as u64 * fee_per_kb / 1024)
}

/// Decoded skeleton of an imported raw transaction
pub struct DecodedTx {
    pub inputs: Vec<(String, u32)>,
    pub outputs: Vec<(String, u64)>,
}

/// Decode a raw transaction into outpoints and addressed outputs
pub fn import_raw(raw_hex: &str, params: &'static NetworkParams) -> WalletResult<DecodedTx> {
    let bytes = hex::decode(raw_hex)
        .map_err(|e| WalletError::Key(KeyError::InvalidKey(format!("raw tx is not hex: {e}"))))?;
    let tx: Transaction = bitcoin::consensus::encode::deserialize(&bytes)
        .map_err(|e| WalletError::Key(KeyError::InvalidKey(format!("raw tx: {e}"))))?;
    let inputs = tx
        .input
        .iter()
        .map(|i| {
            (
                i.previous_output.txid.to_string(),
                i.previous_output.vout,
            )
        })
        .collect();
    let mut outputs = Vec::with_capacity(tx.output.len());
    for output in &tx.output {
        let address = Address::from_script(&output.script_pubkey, params.network)
            .map_err(|e| WalletError::Key(KeyError::InvalidAddress(e.to_string())))?;
        outputs.push((address.to_string(), output.value.to_sat()));
    }
    Ok(DecodedTx { inputs, outputs })
}
