//! End-to-end wallet scenarios against an in-memory chain provider.

use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::Address;
use hdvault::error::WalletError;
use hdvault::keys::path::PathSegment;
use hdvault::keys::HdKey;
use hdvault::ledger::UtxoScope;
use hdvault::network::{ChainService, NetworkParams, TxInfo, UtxoInfo};
use hdvault::storage::Store;
use hdvault::transaction::signer::{SendOptions, SweepOptions};
use hdvault::transaction::SendOutcome;
use hdvault::wallet::{
    wallet_delete, wallet_exists, CreateOptions, KeyScope, MultisigOptions, Wallet,
};
use hdvault::WalletResult;
use std::cell::RefCell;
use std::collections::HashMap;
use tempfile::TempDir;

const SEED: &str = "000102030405060708090a0b0c0d0e0f";
const VECTOR1_XPRV: &str = "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi";
const TX_HASH: &str = "9df91f89a3eb4259ce04af66ad4caf3c9a297feea5e0b3bc506898b6728c5003";

/// In-memory provider: a fixed UTXO table plus a broadcast log
struct MockChain {
    utxos: RefCell<HashMap<String, Vec<UtxoInfo>>>,
    fee_per_kb: u64,
    sent: RefCell<Vec<String>>,
}

impl MockChain {
    fn new(fee_per_kb: u64) -> Self {
        Self {
            utxos: RefCell::new(HashMap::new()),
            fee_per_kb,
            sent: RefCell::new(Vec::new()),
        }
    }

    fn fund(&self, address: &str, tx_hash: &str, output_n: u32, value: u64, confirmations: u32) {
        self.utxos
            .borrow_mut()
            .entry(address.to_string())
            .or_default()
            .push(UtxoInfo {
                address: address.to_string(),
                tx_hash: tx_hash.to_string(),
                output_n,
                value,
                confirmations,
                script: String::new(),
            });
    }

    fn sent_transactions(&self) -> Vec<bitcoin::Transaction> {
        self.sent
            .borrow()
            .iter()
            .map(|raw| {
                bitcoin::consensus::encode::deserialize(&hex::decode(raw).unwrap()).unwrap()
            })
            .collect()
    }
}

impl ChainService for MockChain {
    fn get_utxos(&self, addresses: &[String]) -> WalletResult<Vec<UtxoInfo>> {
        let table = self.utxos.borrow();
        Ok(addresses
            .iter()
            .flat_map(|a| table.get(a).cloned().unwrap_or_default())
            .collect())
    }

    fn get_transactions(&self, _addresses: &[String]) -> WalletResult<Vec<TxInfo>> {
        Ok(Vec::new())
    }

    fn estimate_fee(&self) -> WalletResult<u64> {
        Ok(self.fee_per_kb)
    }

    fn get_balance(&self, addresses: &[String]) -> WalletResult<u64> {
        let table = self.utxos.borrow();
        Ok(addresses
            .iter()
            .flat_map(|a| table.get(a).cloned().unwrap_or_default())
            .map(|u| u.value)
            .sum())
    }

    fn send_raw(&self, raw_hex: &str) -> WalletResult<String> {
        self.sent.borrow_mut().push(raw_hex.to_string());
        let tx: bitcoin::Transaction =
            bitcoin::consensus::encode::deserialize(&hex::decode(raw_hex).unwrap()).unwrap();
        Ok(tx.compute_txid().to_string())
    }
}

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

fn outside_address() -> String {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[0x42; 32]).unwrap();
    let public = bitcoin::PublicKey::new(secret.public_key(&secp));
    Address::p2pkh(public.pubkey_hash(), bitcoin::Network::Bitcoin).to_string()
}

#[test]
fn s1_bip44_first_address_matches_seed_derivation() {
    let (store, _dir) = test_store();
    let mut wallet = seeded_wallet(&store, "w");
    assert_eq!(wallet.main_key().unwrap().wif(), VECTOR1_XPRV);

    let key = wallet.new_key(None, &KeyScope::default(), 0, 5).unwrap();
    assert_eq!(key.path(), "m/44'/0'/0'/0/0");

    // The same address must fall out of a direct derivation of the seed
    let params = NetworkParams::from_name("bitcoin").unwrap();
    let mut direct = HdKey::from_seed(&hex::decode(SEED).unwrap(), params).unwrap();
    for segment in ["44'", "0'", "0'", "0", "0"] {
        direct = direct.subkey(&PathSegment::parse(segment).unwrap()).unwrap();
    }
    assert_eq!(key.address(), direct.address());
}

#[test]
fn s2_new_keys_get_sequential_paths() {
    let (store, _dir) = test_store();
    let mut wallet = seeded_wallet(&store, "w");
    let first = wallet.new_key(None, &KeyScope::default(), 0, 5).unwrap();
    let second = wallet.new_key(None, &KeyScope::default(), 0, 5).unwrap();
    assert_eq!(first.path(), "m/44'/0'/0'/0/0");
    assert_eq!(second.path(), "m/44'/0'/0'/0/1");
    assert_ne!(first.address(), second.address());
}

#[test]
fn s3_utxo_ingestion_updates_balances() {
    let (store, _dir) = test_store();
    let mut wallet = seeded_wallet(&store, "w");
    let key = wallet.get_key(&KeyScope::default(), 0).unwrap();

    let chain = MockChain::new(1024);
    chain.fund(key.address(), TX_HASH, 0, 8_970_937, 10);
    let new = wallet.utxos_update(&chain, &UtxoScope::default()).unwrap();
    assert_eq!(new, 1);

    let stored = store.key_by_id(key.id()).unwrap().unwrap();
    assert_eq!(stored.balance, 8_970_937);
    assert!(stored.used);
    assert_eq!(wallet.balance(Some("bitcoin")), 8_970_937);
}

#[test]
fn s4_send_with_fixed_fee_allocates_change() {
    let (store, _dir) = test_store();
    let mut wallet = seeded_wallet(&store, "w");
    let key = wallet.get_key(&KeyScope::default(), 0).unwrap();

    let chain = MockChain::new(1024);
    chain.fund(key.address(), TX_HASH, 0, 8_970_937, 10);
    wallet.utxos_update(&chain, &UtxoScope::default()).unwrap();

    let dest = outside_address();
    let outcome = wallet
        .send_to(
            &chain,
            &dest,
            1_000_000,
            &SendOptions {
                fee: Some(10_000),
                ..SendOptions::default()
            },
        )
        .unwrap();
    assert!(matches!(outcome, SendOutcome::Sent { .. }));

    let sent = chain.sent_transactions();
    assert_eq!(sent.len(), 1);
    let tx = &sent[0];
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.input[0].previous_output.txid.to_string(), TX_HASH);
    assert_eq!(tx.input[0].previous_output.vout, 0);
    assert_eq!(tx.output.len(), 2);

    let total_out: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
    assert_eq!(total_out + 10_000, 8_970_937);
    let values: Vec<u64> = tx.output.iter().map(|o| o.value.to_sat()).collect();
    assert!(values.contains(&1_000_000));
    assert!(values.contains(&7_960_937));

    // Change goes to a fresh change-branch key of this wallet
    let change_output = tx
        .output
        .iter()
        .find(|o| o.value.to_sat() == 7_960_937)
        .unwrap();
    let change_address =
        Address::from_script(&change_output.script_pubkey, bitcoin::Network::Bitcoin).unwrap();
    let change_key = wallet.key(&change_address.to_string()).unwrap();
    assert_eq!(change_key.change(), 1);

    // The source output is now spent
    let tx_row = store.transaction_by_hash(wallet.id(), TX_HASH).unwrap().unwrap();
    assert!(store.output_by_position(tx_row.id, 0).unwrap().unwrap().spent);
}

#[test]
fn estimated_fee_is_corrected_when_far_off() {
    let (store, _dir) = test_store();
    let mut wallet = seeded_wallet(&store, "w");
    let key = wallet.get_key(&KeyScope::default(), 0).unwrap();

    let fee_per_kb = 10_240; // 10 sat per byte
    let chain = MockChain::new(fee_per_kb);
    chain.fund(key.address(), TX_HASH, 0, 1_000_000, 10);
    wallet.utxos_update(&chain, &UtxoScope::default()).unwrap();

    wallet
        .send_to(&chain, &outside_address(), 200_000, &SendOptions::default())
        .unwrap();
    let sent = chain.sent_transactions();
    let tx = sent.last().unwrap();
    let total_out: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
    let fee = 1_000_000 - total_out;
    // The paid fee tracks the real transaction size at 10 sat/byte
    // (signature length can move the size by a couple of bytes)
    let size_fee = tx.total_size() as u64 * 10;
    assert!(
        fee.abs_diff(size_fee) <= 50,
        "fee {fee} too far from size-based fee {size_fee}"
    );
}

#[test]
fn s5_multisig_flow_signs_with_cosigner_keys() {
    let (store, _dir) = test_store();
    let params = NetworkParams::from_name("bitcoin").unwrap();

    // Two private cosigners, one watch-only account xpub
    let master_a = HdKey::from_seed(&[1; 32], params).unwrap();
    let master_b = HdKey::from_seed(&[2; 32], params).unwrap();
    let master_c = HdKey::from_seed(&[3; 32], params).unwrap();
    let key_list = vec![
        master_a.wif(),
        master_b.wif(),
        master_c.account_key(45, 0).unwrap().wif_public(),
    ];

    let mut wallet = Wallet::create_multisig(
        &store,
        "shared",
        &key_list,
        2,
        MultisigOptions {
            sort_keys: true,
            ..MultisigOptions::default()
        },
    )
    .unwrap();

    let key = wallet.get_key(&KeyScope::default(), 0).unwrap();
    assert!(key.address().starts_with('3'));

    let chain = MockChain::new(1024);
    chain.fund(key.address(), TX_HASH, 0, 500_000, 12);
    wallet.utxos_update(&chain, &UtxoScope::default()).unwrap();
    assert_eq!(wallet.balance(None), 500_000);

    let outcome = wallet
        .send_to(
            &chain,
            &outside_address(),
            100_000,
            &SendOptions {
                fee: Some(5_000),
                ..SendOptions::default()
            },
        )
        .unwrap();
    assert!(matches!(outcome, SendOutcome::Sent { .. }));

    let sent = chain.sent_transactions();
    let tx = sent.last().unwrap();
    // P2SH multisig unlocking script: OP_0, two signatures, redeem script
    assert!(tx.input[0].script_sig.len() > 140);
}

#[test]
fn s5_sorted_multisig_address_is_order_independent() {
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

    let mut forward = Wallet::create_multisig(
        &store,
        "ms-fwd",
        &xpubs,
        2,
        MultisigOptions {
            sort_keys: true,
            ..MultisigOptions::default()
        },
    )
    .unwrap();
    let mut backward = Wallet::create_multisig(
        &store,
        "ms-rev",
        &reversed,
        2,
        MultisigOptions {
            sort_keys: true,
            ..MultisigOptions::default()
        },
    )
    .unwrap();

    let addr_fwd = forward.new_key(None, &KeyScope::default(), 0, 5).unwrap();
    let addr_rev = backward.new_key(None, &KeyScope::default(), 0, 5).unwrap();
    assert_eq!(addr_fwd.address(), addr_rev.address());
}

#[test]
fn s6_delete_refuses_nonzero_balance_without_force() {
    let (store, _dir) = test_store();
    let mut wallet = seeded_wallet(&store, "doomed");
    let key = wallet.get_key(&KeyScope::default(), 0).unwrap();

    let chain = MockChain::new(1024);
    chain.fund(key.address(), TX_HASH, 0, 500, 3);
    wallet.utxos_update(&chain, &UtxoScope::default()).unwrap();

    assert!(matches!(
        wallet_delete(&store, "doomed", false),
        Err(WalletError::NonEmptyWallet { .. })
    ));
    assert!(wallet_exists(&store, "doomed").unwrap());

    wallet_delete(&store, "doomed", true).unwrap();
    assert!(!wallet_exists(&store, "doomed").unwrap());
}

#[test]
fn scan_discovers_funded_addresses_past_a_gap() {
    let (store, _dir) = test_store();
    let mut wallet = seeded_wallet(&store, "w");

    // Fund the eighth payment address before the wallet has derived it
    let params = NetworkParams::from_name("bitcoin").unwrap();
    let mut future = HdKey::from_seed(&hex::decode(SEED).unwrap(), params).unwrap();
    for segment in ["44'", "0'", "0'", "0", "7"] {
        future = future.subkey(&PathSegment::parse(segment).unwrap()).unwrap();
    }
    let chain = MockChain::new(1024);
    chain.fund(&future.address(), TX_HASH, 0, 123_456, 6);

    wallet.scan(&chain, 10, &KeyScope::default(), None).unwrap();
    assert_eq!(wallet.balance(None), 123_456);
    let key = wallet.key(&future.address()).unwrap();
    assert!(key.record().used);
    assert_eq!(key.balance(), 123_456);
}

#[test]
fn sweep_collects_everything_above_dust() {
    let (store, _dir) = test_store();
    let mut wallet = seeded_wallet(&store, "w");
    let keys = wallet.get_key_batch(&KeyScope::default(), 0, 3).unwrap();

    let chain = MockChain::new(1024);
    chain.fund(keys[0].address(), TX_HASH, 0, 60_000, 9);
    chain.fund(keys[1].address(), TX_HASH, 1, 40_000, 9);
    // Dust stays behind
    chain.fund(keys[2].address(), TX_HASH, 2, 100, 9);
    wallet.utxos_update(&chain, &UtxoScope::default()).unwrap();

    let outcome = wallet
        .sweep(&chain, &outside_address(), &SweepOptions::default())
        .unwrap();
    assert!(matches!(outcome, SendOutcome::Sent { .. }));

    let sent = chain.sent_transactions();
    let tx = sent.last().unwrap();
    assert_eq!(tx.input.len(), 2);
    assert_eq!(tx.output.len(), 1);
    let fee = 100_000 - tx.output[0].value.to_sat();
    assert!(fee > 0 && fee < 2_000);
}

#[test]
fn offline_send_does_not_mark_spent() {
    let (store, _dir) = test_store();
    let mut wallet = seeded_wallet(&store, "w");
    let key = wallet.get_key(&KeyScope::default(), 0).unwrap();

    let chain = MockChain::new(1024);
    chain.fund(key.address(), TX_HASH, 0, 50_000, 8);
    wallet.utxos_update(&chain, &UtxoScope::default()).unwrap();

    let outcome = wallet
        .send_to(
            &chain,
            &outside_address(),
            10_000,
            &SendOptions {
                fee: Some(1_000),
                offline: true,
                ..SendOptions::default()
            },
        )
        .unwrap();
    assert!(matches!(outcome, SendOutcome::Offline));
    assert!(chain.sent_transactions().is_empty());

    let tx_row = store.transaction_by_hash(wallet.id(), TX_HASH).unwrap().unwrap();
    assert!(!store.output_by_position(tx_row.id, 0).unwrap().unwrap().spent);
}
