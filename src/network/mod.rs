/// Network parameter registry
///
/// Immutable per-network records: BIP44 coin type, address version bytes,
/// dust threshold and currency formatting. Each network is treated
/// independently; a wallet can hold keys for more than one.
pub mod chain;

use crate::error::{WalletError, WalletResult};

pub use chain::{ChainService, HttpChainService, TxInfo, TxInputInfo, TxOutputInfo, UtxoInfo};

/// Default network for new wallets and imported keys without network hints
pub const DEFAULT_NETWORK: &str = "bitcoin";

/// Immutable parameters of a supported network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkParams {
    pub name: &'static str,
    pub network: bitcoin::Network,
    pub bip44_cointype: u32,
    pub p2pkh_prefix: u8,
    pub p2sh_prefix: u8,
    pub dust_threshold: u64,
    pub currency_code: &'static str,
}

const BITCOIN: NetworkParams = NetworkParams {
    name: "bitcoin",
    network: bitcoin::Network::Bitcoin,
    bip44_cointype: 0,
    p2pkh_prefix: 0x00,
    p2sh_prefix: 0x05,
    dust_threshold: 546,
    currency_code: "BTC",
};

const TESTNET: NetworkParams = NetworkParams {
    name: "testnet",
    network: bitcoin::Network::Testnet,
    bip44_cointype: 1,
    p2pkh_prefix: 0x6f,
    p2sh_prefix: 0xc4,
    dust_threshold: 546,
    currency_code: "tBTC",
};

const SIGNET: NetworkParams = NetworkParams {
    name: "signet",
    network: bitcoin::Network::Signet,
    bip44_cointype: 1,
    p2pkh_prefix: 0x6f,
    p2sh_prefix: 0xc4,
    dust_threshold: 546,
    currency_code: "sBTC",
};

const REGTEST: NetworkParams = NetworkParams {
    name: "regtest",
    network: bitcoin::Network::Regtest,
    bip44_cointype: 1,
    p2pkh_prefix: 0x6f,
    p2sh_prefix: 0xc4,
    dust_threshold: 546,
    currency_code: "rBTC",
};

const REGISTRY: [&NetworkParams; 4] = [&BITCOIN, &TESTNET, &SIGNET, &REGTEST];

impl NetworkParams {
    /// All supported networks
    pub fn all() -> &'static [&'static NetworkParams] {
        &REGISTRY
    }

    /// Look up network parameters by name
    pub fn from_name(name: &str) -> WalletResult<&'static NetworkParams> {
        REGISTRY
            .iter()
            .find(|p| p.name == name)
            .copied()
            .ok_or_else(|| WalletError::NotFound(format!("network '{name}'")))
    }

    /// Look up network parameters for a `bitcoin::Network`
    pub fn from_network(network: bitcoin::Network) -> &'static NetworkParams {
        REGISTRY
            .iter()
            .find(|p| p.network == network)
            .copied()
            .unwrap_or(&BITCOIN)
    }

    /// Format a satoshi value in currency denomination, e.g. `0.08970937 BTC`
    pub fn print_value(&self, value: u64) -> String {
        format!(
            "{}.{:08} {}",
            value / 100_000_000,
            value % 100_000_000,
            self.currency_code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let btc = NetworkParams::from_name("bitcoin").unwrap();
        assert_eq!(btc.bip44_cointype, 0);
        assert_eq!(btc.network, bitcoin::Network::Bitcoin);
        assert!(NetworkParams::from_name("dogecoin").is_err());
    }

    #[test]
    fn test_from_network_roundtrip() {
        for name in ["bitcoin", "testnet", "signet", "regtest"] {
            let params = NetworkParams::from_name(name).unwrap();
            assert_eq!(NetworkParams::from_network(params.network).name, name);
        }
    }

    #[test]
    fn test_print_value() {
        let btc = NetworkParams::from_name("bitcoin").unwrap();
        assert_eq!(btc.print_value(8_970_937), "0.08970937 BTC");
        assert_eq!(btc.print_value(150_000_000), "1.50000000 BTC");
    }
}
