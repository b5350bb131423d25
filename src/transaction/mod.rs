/// Transaction handling
///
/// A `TxDraft` is the wallet-side picture of a transaction under
/// construction: inputs bound to stored keys, outputs, fee bookkeeping.
/// The composer builds drafts from the UTXO ledger, the codec turns them
/// into consensus transactions and signs them, the signer/sender drives
/// the whole flow.
pub mod codec;
pub mod composer;
pub mod signer;

use crate::network::NetworkParams;
use bitcoin::secp256k1::SecretKey;
use bitcoin::{PublicKey, ScriptBuf};

pub use composer::{ComposeOptions, InputSpec, OutputSpec};
pub use signer::SendOutcome;

/// Locking scheme of a draft input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    P2pkh,
    P2shMultisig,
}

/// A signer slot on an input: the expected public key, plus its secret
/// when this wallet holds it
#[derive(Debug, Clone)]
pub struct DraftKey {
    pub public: PublicKey,
    pub secret: Option<SecretKey>,
}

/// A collected signature, tagged with the key that produced it
#[derive(Debug, Clone)]
pub struct InputSignature {
    pub public: PublicKey,
    pub signature: bitcoin::secp256k1::ecdsa::Signature,
}

/// One input of a draft transaction
#[derive(Debug, Clone)]
pub struct DraftInput {
    pub prev_hash: String,
    pub output_n: u32,
    pub key_id: Option<u64>,
    pub value: u64,
    pub address: String,
    pub script_type: ScriptType,
    /// Signer slots, in redeem-script order for multisig
    pub keys: Vec<DraftKey>,
    pub sigs_required: u8,
    pub redeem_script: Option<ScriptBuf>,
    pub signatures: Vec<InputSignature>,
    /// Externally supplied final unlocking script, used as-is
    pub unlocking_script: Option<ScriptBuf>,
}

/// One output of a draft transaction
#[derive(Debug, Clone)]
pub struct DraftOutput {
    pub address: String,
    pub value: u64,
    pub script_pubkey: ScriptBuf,
}

/// A transaction under construction
#[derive(Debug, Clone)]
pub struct TxDraft {
    pub network: &'static NetworkParams,
    pub inputs: Vec<DraftInput>,
    pub outputs: Vec<DraftOutput>,
    pub fee: Option<u64>,
    pub fee_per_kb: Option<u64>,
    pub change: u64,
}

impl TxDraft {
    pub fn new(network: &'static NetworkParams) -> Self {
        Self {
            network,
            inputs: Vec::new(),
            outputs: Vec::new(),
            fee: None,
            fee_per_kb: None,
            change: 0,
        }
    }

    /// Sum of input values
    pub fn total_input(&self) -> u64 {
        self.inputs.iter().map(|i| i.value).sum()
    }

    /// Sum of output values
    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }
}
