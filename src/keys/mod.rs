/// Key material handling
///
/// `HdKey` wraps the BIP32 extended-key types together with plain
/// single-key imports behind one interface: generation, import from
/// WIF/seed/mnemonic, child derivation and address formatting.
///
/// Key improvements over ad-hoc key juggling:
/// - One type for private/public extended keys and single keys
/// - OS entropy for master key generation
/// - Seed buffers wiped after use
pub mod path;

use crate::error::{KeyError, KeyResult};
use crate::network::NetworkParams;
use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Address, NetworkKind, PrivateKey, PublicKey};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

use path::PathSegment;

#[derive(Clone)]
enum KeyMaterial {
    Xprv(Xpriv),
    Xpub(Xpub),
    Single(PrivateKey),
    SinglePub(PublicKey),
}

/// A derived or imported key bound to its network parameters
#[derive(Clone)]
pub struct HdKey {
    material: KeyMaterial,
    params: &'static NetworkParams,
    secp: Secp256k1<All>,
}

impl HdKey {
    fn new(material: KeyMaterial, params: &'static NetworkParams) -> Self {
        Self {
            material,
            params,
            secp: Secp256k1::new(),
        }
    }

    /// Generate a fresh master key from OS entropy
    pub fn generate(params: &'static NetworkParams) -> KeyResult<Self> {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).map_err(|_| KeyError::Entropy)?;
        let key = Self::from_seed(&seed, params);
        seed.zeroize();
        key
    }

    /// Create a master key from raw seed bytes
    pub fn from_seed(seed: &[u8], params: &'static NetworkParams) -> KeyResult<Self> {
        let xprv = Xpriv::new_master(params.network, seed)?;
        Ok(Self::new(KeyMaterial::Xprv(xprv), params))
    }

    /// Create a master key from a BIP39 mnemonic phrase
    pub fn from_mnemonic(
        phrase: &str,
        passphrase: &str,
        params: &'static NetworkParams,
    ) -> KeyResult<Self> {
        let mnemonic = bip39::Mnemonic::parse(phrase)?;
        let mut seed = mnemonic.to_seed(passphrase);
        let key = Self::from_seed(&seed, params);
        seed.zeroize();
        key
    }

    /// Import a key from any supported string encoding: extended private
    /// or public key, WIF, or hex-encoded public key
    pub fn import(encoded: &str, params: &'static NetworkParams) -> KeyResult<Self> {
        if let Ok(xprv) = Xpriv::from_str(encoded) {
            Self::check_kind(xprv.network, params)?;
            return Ok(Self::new(KeyMaterial::Xprv(xprv), params));
        }
        if let Ok(xpub) = Xpub::from_str(encoded) {
            Self::check_kind(xpub.network, params)?;
            return Ok(Self::new(KeyMaterial::Xpub(xpub), params));
        }
        if let Ok(wif) = PrivateKey::from_wif(encoded) {
            Self::check_kind(wif.network, params)?;
            return Ok(Self::new(KeyMaterial::Single(wif), params));
        }
        if let Ok(bytes) = hex::decode(encoded) {
            if let Ok(public) = PublicKey::from_slice(&bytes) {
                return Ok(Self::new(KeyMaterial::SinglePub(public), params));
            }
        }
        Err(KeyError::InvalidKey(format!(
            "unrecognized key encoding: {encoded}"
        )))
    }

    fn check_kind(kind: NetworkKind, params: &'static NetworkParams) -> KeyResult<()> {
        if kind != NetworkKind::from(params.network) {
            return Err(KeyError::InvalidKey(format!(
                "key network does not match {}",
                params.name
            )));
        }
        Ok(())
    }

    /// Network parameters this key is bound to
    pub fn network(&self) -> &'static NetworkParams {
        self.params
    }

    /// Rebind to another network of the same kind (e.g. testnet keys
    /// formatted for signet). Cross-kind rebinding is rejected.
    pub fn with_network(&self, params: &'static NetworkParams) -> KeyResult<Self> {
        if NetworkKind::from(params.network) != NetworkKind::from(self.params.network) {
            return Err(KeyError::InvalidKey(format!(
                "cannot rebind {} key to {}",
                self.params.name, params.name
            )));
        }
        let mut key = self.clone();
        key.params = params;
        Ok(key)
    }

    /// Whether private material is available
    pub fn is_private(&self) -> bool {
        matches!(
            self.material,
            KeyMaterial::Xprv(_) | KeyMaterial::Single(_)
        )
    }

    /// Whether this is an extended (derivable) key
    pub fn is_extended(&self) -> bool {
        matches!(self.material, KeyMaterial::Xprv(_) | KeyMaterial::Xpub(_))
    }

    /// BIP32 depth; single keys report 0
    pub fn depth(&self) -> u8 {
        match &self.material {
            KeyMaterial::Xprv(k) => k.depth,
            KeyMaterial::Xpub(k) => k.depth,
            _ => 0,
        }
    }

    /// Child index of the last derivation step
    pub fn child_index(&self) -> u32 {
        let child = match &self.material {
            KeyMaterial::Xprv(k) => k.child_number,
            KeyMaterial::Xpub(k) => k.child_number,
            _ => return 0,
        };
        match child {
            ChildNumber::Normal { index } => index,
            ChildNumber::Hardened { index } => index,
        }
    }

    /// Whether the serialized public key is compressed
    pub fn compressed(&self) -> bool {
        match &self.material {
            KeyMaterial::Single(k) => k.compressed,
            KeyMaterial::SinglePub(k) => k.compressed,
            _ => true,
        }
    }

    /// The public key
    pub fn public_key(&self) -> PublicKey {
        match &self.material {
            KeyMaterial::Xprv(k) => PublicKey::new(k.private_key.public_key(&self.secp)),
            KeyMaterial::Xpub(k) => PublicKey::new(k.public_key),
            KeyMaterial::Single(k) => k.public_key(&self.secp),
            KeyMaterial::SinglePub(k) => *k,
        }
    }

    /// Hex-encoded serialized public key
    pub fn public_hex(&self) -> String {
        hex::encode(self.public_key().to_bytes())
    }

    /// Hex-encoded private key, if available
    pub fn private_hex(&self) -> Option<String> {
        match &self.material {
            KeyMaterial::Xprv(k) => Some(hex::encode(k.private_key.secret_bytes())),
            KeyMaterial::Single(k) => Some(hex::encode(k.inner.secret_bytes())),
            _ => None,
        }
    }

    /// The secp256k1 secret key, if private material is available
    pub fn secret_key(&self) -> Option<bitcoin::secp256k1::SecretKey> {
        match &self.material {
            KeyMaterial::Xprv(k) => Some(k.private_key),
            KeyMaterial::Single(k) => Some(k.inner),
            _ => None,
        }
    }

    /// Canonical serialization: extended keys as base58 xprv/xpub, single
    /// private keys as WIF, public-only single keys as hex
    pub fn wif(&self) -> String {
        match &self.material {
            KeyMaterial::Xprv(k) => k.to_string(),
            KeyMaterial::Xpub(k) => k.to_string(),
            KeyMaterial::Single(k) => k.to_wif(),
            KeyMaterial::SinglePub(_) => self.public_hex(),
        }
    }

    /// Public counterpart of `wif()`
    pub fn wif_public(&self) -> String {
        match &self.material {
            KeyMaterial::Xprv(k) => Xpub::from_priv(&self.secp, k).to_string(),
            KeyMaterial::Xpub(k) => k.to_string(),
            _ => self.public_hex(),
        }
    }

    /// P2PKH address on this key's network
    pub fn address(&self) -> String {
        Address::p2pkh(self.public_key().pubkey_hash(), self.params.network).to_string()
    }

    /// Derive one child. Hardened steps require a private parent; single
    /// keys cannot derive at all.
    pub fn subkey(&self, segment: &PathSegment) -> KeyResult<Self> {
        let child = segment.child_number();
        match &self.material {
            KeyMaterial::Xprv(k) => {
                let derived = k.derive_priv(&self.secp, &[child])?;
                Ok(Self::new(KeyMaterial::Xprv(derived), self.params))
            }
            KeyMaterial::Xpub(k) => {
                if segment.hardened {
                    return Err(KeyError::HardenedFromPublic);
                }
                let derived = k.derive_pub(&self.secp, &[child])?;
                Ok(Self::new(KeyMaterial::Xpub(derived), self.params))
            }
            _ => Err(KeyError::InvalidKey(
                "single keys cannot derive children".into(),
            )),
        }
    }

    /// Depth-3 account projection `m/purpose'/cointype'/account'` of a
    /// private master key
    pub fn account_key(&self, purpose: u32, account: u32) -> KeyResult<Self> {
        let KeyMaterial::Xprv(master) = &self.material else {
            return Err(KeyError::InvalidKey(
                "account projection requires a private master key".into(),
            ));
        };
        if master.depth != 0 {
            return Err(KeyError::InvalidKey(
                "account projection requires a depth-0 master key".into(),
            ));
        }
        let path = [
            ChildNumber::from_hardened_idx(purpose)?,
            ChildNumber::from_hardened_idx(self.params.bip44_cointype)?,
            ChildNumber::from_hardened_idx(account)?,
        ];
        let derived = master.derive_priv(&self.secp, &path)?;
        Ok(Self::new(KeyMaterial::Xprv(derived), self.params))
    }

    /// Drop private material, keeping the public key
    pub fn public_clone(&self) -> Self {
        match &self.material {
            KeyMaterial::Xprv(k) => Self::new(
                KeyMaterial::Xpub(Xpub::from_priv(&self.secp, k)),
                self.params,
            ),
            KeyMaterial::Single(k) => {
                Self::new(KeyMaterial::SinglePub(k.public_key(&self.secp)), self.params)
            }
            other => Self::new(other.clone(), self.params),
        }
    }
}

impl fmt::Debug for HdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdKey")
            .field("network", &self.params.name)
            .field("depth", &self.depth())
            .field("public", &self.public_hex())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VECTOR1_SEED: &str = "000102030405060708090a0b0c0d0e0f";
    const VECTOR1_XPRV: &str = "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi";
    const VECTOR1_XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    fn bitcoin_params() -> &'static NetworkParams {
        NetworkParams::from_name("bitcoin").unwrap()
    }

    #[test]
    fn test_master_from_seed_vector() {
        let seed = hex::decode(VECTOR1_SEED).unwrap();
        let key = HdKey::from_seed(&seed, bitcoin_params()).unwrap();
        assert_eq!(key.wif(), VECTOR1_XPRV);
        assert_eq!(key.wif_public(), VECTOR1_XPUB);
        assert_eq!(key.depth(), 0);
        assert!(key.is_private());
    }

    #[test]
    fn test_import_roundtrip() {
        let key = HdKey::import(VECTOR1_XPRV, bitcoin_params()).unwrap();
        assert_eq!(key.wif(), VECTOR1_XPRV);
        let public = HdKey::import(VECTOR1_XPUB, bitcoin_params()).unwrap();
        assert!(!public.is_private());
        assert_eq!(public.public_hex(), key.public_hex());
    }

    #[test]
    fn test_import_rejects_wrong_network() {
        let testnet = NetworkParams::from_name("testnet").unwrap();
        assert!(HdKey::import(VECTOR1_XPRV, testnet).is_err());
    }

    #[test]
    fn test_subkey_derivation() {
        let seed = hex::decode(VECTOR1_SEED).unwrap();
        let master = HdKey::from_seed(&seed, bitcoin_params()).unwrap();
        let child = master
            .subkey(&PathSegment { index: 0, hardened: true })
            .unwrap();
        assert_eq!(child.depth(), 1);
        assert_eq!(child.child_index(), 0);
        // Hardened derivation from the public projection must fail
        let public = master.public_clone();
        assert!(matches!(
            public.subkey(&PathSegment { index: 0, hardened: true }),
            Err(KeyError::HardenedFromPublic)
        ));
        // Normal derivation from public and private parents must agree
        let pub_child = public
            .subkey(&PathSegment { index: 7, hardened: false })
            .unwrap();
        let prv_child = master
            .subkey(&PathSegment { index: 7, hardened: false })
            .unwrap();
        assert_eq!(pub_child.public_hex(), prv_child.public_hex());
    }

    #[test]
    fn test_account_key_projection() {
        let seed = hex::decode(VECTOR1_SEED).unwrap();
        let master = HdKey::from_seed(&seed, bitcoin_params()).unwrap();
        let account = master.account_key(44, 0).unwrap();
        assert_eq!(account.depth(), 3);

        let mut step = master.clone();
        for segment in ["44'", "0'", "0'"] {
            step = step.subkey(&PathSegment::parse(segment).unwrap()).unwrap();
        }
        assert_eq!(account.wif(), step.wif());
    }

    #[test]
    fn test_single_key_import() {
        let seed = hex::decode(VECTOR1_SEED).unwrap();
        let master = HdKey::from_seed(&seed, bitcoin_params()).unwrap();
        let wif = PrivateKey::new(master.secret_key().unwrap(), NetworkKind::Main).to_wif();
        let single = HdKey::import(&wif, bitcoin_params()).unwrap();
        assert!(single.is_private());
        assert!(!single.is_extended());
        assert_eq!(single.depth(), 0);
        assert_eq!(single.wif(), wif);
        assert!(single
            .subkey(&PathSegment { index: 0, hardened: false })
            .is_err());
    }

    #[test]
    fn test_generate_unique() {
        let a = HdKey::generate(bitcoin_params()).unwrap();
        let b = HdKey::generate(bitcoin_params()).unwrap();
        assert_ne!(a.public_hex(), b.public_hex());
    }
}
