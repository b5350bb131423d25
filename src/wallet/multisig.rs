/// Multisig script composition
///
/// Pure functions from an ordered cosigner public-key list to the redeem
/// script `OP_M pk1..pkN OP_N OP_CHECKMULTISIG` and its P2SH address.
/// With sorted keys the result is the BIP67 canonical form.
use crate::error::{KeyError, WalletError, WalletResult};
use crate::network::NetworkParams;
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_1, OP_PUSHNUM_16};
use bitcoin::script::{Builder, Instruction};
use bitcoin::{Address, PublicKey, Script, ScriptBuf};

/// Sort public keys lexicographically by their serialized bytes (BIP67)
pub fn sort_pubkeys(pubkeys: &mut [PublicKey]) {
    pubkeys.sort_by_key(|k| k.to_bytes());
}

/// Build the `n_required`-of-`pubkeys.len()` redeem script
pub fn redeem_script(pubkeys: &[PublicKey], n_required: u8) -> WalletResult<ScriptBuf> {
    if pubkeys.is_empty() || pubkeys.len() > 15 {
        return Err(WalletError::Key(KeyError::InvalidKey(format!(
            "multisig needs 1 to 15 public keys, got {}",
            pubkeys.len()
        ))));
    }
    if n_required == 0 || n_required as usize > pubkeys.len() {
        return Err(WalletError::Key(KeyError::InvalidKey(format!(
            "cannot require {n_required} signatures from {} keys",
            pubkeys.len()
        ))));
    }
    let mut builder = Builder::new().push_int(n_required as i64);
    for pubkey in pubkeys {
        builder = builder.push_key(pubkey);
    }
    Ok(builder
        .push_int(pubkeys.len() as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script())
}

/// P2SH address committing to the given redeem script
pub fn p2sh_address(script: &Script, params: &'static NetworkParams) -> WalletResult<Address> {
    Address::p2sh(script, params.network)
        .map_err(|e| WalletError::Key(KeyError::InvalidKey(format!("redeem script: {e}"))))
}

/// Decode a multisig redeem script back into `(n_required, public keys)`
pub fn decode_redeem_script(script: &Script) -> WalletResult<(u8, Vec<PublicKey>)> {
    let malformed = |what: &str| WalletError::KeyMismatch(format!("redeem script: {what}"));
    let mut instructions = Vec::new();
    for instruction in script.instructions() {
        instructions.push(instruction.map_err(|_| malformed("unparseable"))?);
    }
    if instructions.len() < 4 {
        return Err(malformed("too short"));
    }

    let pushnum = |instruction: &Instruction<'_>| -> Option<u8> {
        match instruction {
            Instruction::Op(op)
                if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&op.to_u8()) =>
            {
                Some(op.to_u8() - OP_PUSHNUM_1.to_u8() + 1)
            }
            _ => None,
        }
    };

    let n_required = pushnum(&instructions[0]).ok_or_else(|| malformed("missing OP_M"))?;
    let n_total =
        pushnum(&instructions[instructions.len() - 2]).ok_or_else(|| malformed("missing OP_N"))?;
    match instructions[instructions.len() - 1] {
        Instruction::Op(op) if op == OP_CHECKMULTISIG => {}
        _ => return Err(malformed("missing OP_CHECKMULTISIG")),
    }

    let mut pubkeys = Vec::new();
    for instruction in &instructions[1..instructions.len() - 2] {
        match instruction {
            Instruction::PushBytes(bytes) => {
                let key = PublicKey::from_slice(bytes.as_bytes())
                    .map_err(|_| malformed("invalid public key"))?;
                pubkeys.push(key);
            }
            _ => return Err(malformed("unexpected opcode between keys")),
        }
    }
    if pubkeys.len() != n_total as usize || n_required > n_total {
        return Err(malformed("key count does not match OP_N"));
    }
    Ok((n_required, pubkeys))
}
