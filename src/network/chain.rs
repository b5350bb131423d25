/// Blockchain provider access
///
/// The `ChainService` trait is the wallet's only window onto the chain:
/// unspent outputs, transaction history, fee estimation and broadcast.
/// `HttpChainService` talks to an Esplora-style REST endpoint; tests
/// substitute an in-memory implementation.
use crate::error::{WalletError, WalletResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Unspent output as reported by a provider
#[derive(Debug, Clone)]
pub struct UtxoInfo {
    pub address: String,
    pub tx_hash: String,
    pub output_n: u32,
    pub value: u64,
    pub confirmations: u32,
    pub script: String,
}

/// Transaction input as reported by a provider
#[derive(Debug, Clone)]
pub struct TxInputInfo {
    pub input_n: u32,
    pub prev_hash: String,
    pub address: String,
    pub value: u64,
}

/// Transaction output as reported by a provider; `spent` is `None` when the
/// provider does not track spend status
#[derive(Debug, Clone)]
pub struct TxOutputInfo {
    pub output_n: u32,
    pub address: String,
    pub value: u64,
    pub script: String,
    pub spent: Option<bool>,
}

/// Full transaction record as reported by a provider
#[derive(Debug, Clone)]
pub struct TxInfo {
    pub hash: String,
    pub block_height: Option<u32>,
    pub confirmations: u32,
    pub date: Option<u64>,
    pub fee: Option<u64>,
    pub inputs: Vec<TxInputInfo>,
    pub outputs: Vec<TxOutputInfo>,
}

/// Synchronous blockchain provider interface
pub trait ChainService {
    /// Unspent outputs for the given addresses
    fn get_utxos(&self, addresses: &[String]) -> WalletResult<Vec<UtxoInfo>>;

    /// Transactions touching the given addresses
    fn get_transactions(&self, addresses: &[String]) -> WalletResult<Vec<TxInfo>>;

    /// Fee estimate in satoshi per kilobyte
    fn estimate_fee(&self) -> WalletResult<u64>;

    /// Total confirmed balance of the given addresses
    fn get_balance(&self, addresses: &[String]) -> WalletResult<u64>;

    /// Broadcast a raw transaction, returning the transaction id
    fn send_raw(&self, raw_hex: &str) -> WalletResult<String>;
}

/// Esplora-style REST provider client
pub struct HttpChainService {
    base_url: Url,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
    block_height: Option<u32>,
    block_time: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraPrevout {
    scriptpubkey_address: Option<String>,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraVin {
    txid: String,
    prevout: Option<EsploraPrevout>,
}

#[derive(Debug, Deserialize)]
struct EsploraVout {
    scriptpubkey: String,
    scriptpubkey_address: Option<String>,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    fee: Option<u64>,
    status: EsploraStatus,
    vin: Vec<EsploraVin>,
    vout: Vec<EsploraVout>,
}

#[derive(Debug, Deserialize)]
struct EsploraAddressStats {
    funded_txo_sum: u64,
    spent_txo_sum: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraAddress {
    chain_stats: EsploraAddressStats,
}

fn svc_err(context: &str, e: impl std::fmt::Display) -> WalletError {
    WalletError::ServiceUnavailable(format!("{context}: {e}"))
}

impl HttpChainService {
    /// Create a client for the given Esplora base URL, e.g.
    /// `https://blockstream.info/api`
    pub fn new(base_url: &str) -> WalletResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| svc_err("invalid provider URL", e))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| svc_err("HTTP client setup failed", e))?;
        Ok(Self { base_url, client })
    }

    fn url(&self, path: &str) -> WalletResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| svc_err("invalid provider URL", e))
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> WalletResult<T> {
        let url = self.url(path)?;
        debug!("GET {url}");
        self.client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| svc_err(path, e))?
            .json::<T>()
            .map_err(|e| svc_err(path, e))
    }

    fn tip_height(&self) -> WalletResult<u32> {
        let url = self.url("blocks/tip/height")?;
        let body = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| svc_err("blocks/tip/height", e))?
            .text()
            .map_err(|e| svc_err("blocks/tip/height", e))?;
        body.trim()
            .parse::<u32>()
            .map_err(|e| svc_err("blocks/tip/height", e))
    }

    fn confirmations(tip: u32, status: &EsploraStatus) -> u32 {
        match status.block_height {
            Some(height) if status.confirmed => tip.saturating_sub(height) + 1,
            _ => 0,
        }
    }
}

impl ChainService for HttpChainService {
    fn get_utxos(&self, addresses: &[String]) -> WalletResult<Vec<UtxoInfo>> {
        let tip = self.tip_height()?;
        let mut utxos = Vec::new();
        for address in addresses {
            let found: Vec<EsploraUtxo> = self.get_json(&format!("address/{address}/utxo"))?;
            for u in found {
                utxos.push(UtxoInfo {
                    address: address.clone(),
                    tx_hash: u.txid,
                    output_n: u.vout,
                    value: u.value,
                    confirmations: Self::confirmations(tip, &u.status),
                    script: String::new(),
                });
            }
        }
        Ok(utxos)
    }

    fn get_transactions(&self, addresses: &[String]) -> WalletResult<Vec<TxInfo>> {
        let tip = self.tip_height()?;
        let mut txs: Vec<TxInfo> = Vec::new();
        let mut seen: HashMap<String, ()> = HashMap::new();
        for address in addresses {
            let found: Vec<EsploraTx> = self.get_json(&format!("address/{address}/txs"))?;
            for tx in found {
                if seen.insert(tx.txid.clone(), ()).is_some() {
                    continue;
                }
                let inputs = tx
                    .vin
                    .iter()
                    .enumerate()
                    .map(|(n, vin)| TxInputInfo {
                        input_n: n as u32,
                        prev_hash: vin.txid.clone(),
                        address: vin
                            .prevout
                            .as_ref()
                            .and_then(|p| p.scriptpubkey_address.clone())
                            .unwrap_or_default(),
                        value: vin.prevout.as_ref().map(|p| p.value).unwrap_or(0),
                    })
                    .collect();
                let outputs = tx
                    .vout
                    .iter()
                    .enumerate()
                    .map(|(n, vout)| TxOutputInfo {
                        output_n: n as u32,
                        address: vout.scriptpubkey_address.clone().unwrap_or_default(),
                        value: vout.value,
                        script: vout.scriptpubkey.clone(),
                        spent: None,
                    })
                    .collect();
                txs.push(TxInfo {
                    hash: tx.txid,
                    block_height: tx.status.block_height,
                    confirmations: Self::confirmations(tip, &tx.status),
                    date: tx.status.block_time,
                    fee: tx.fee,
                    inputs,
                    outputs,
                });
            }
        }
        Ok(txs)
    }

    fn estimate_fee(&self) -> WalletResult<u64> {
        // Esplora reports sat/vB per confirmation target; take the
        // two-block target and convert to sat/kB.
        let estimates: HashMap<String, f64> = self.get_json("fee-estimates")?;
        let per_vb = estimates
            .get("2")
            .or_else(|| estimates.get("1"))
            .copied()
            .ok_or_else(|| {
                WalletError::ServiceUnavailable("provider returned no fee estimates".into())
            })?;
        Ok((per_vb * 1000.0).round() as u64)
    }

    fn get_balance(&self, addresses: &[String]) -> WalletResult<u64> {
        let mut balance = 0u64;
        for address in addresses {
            let info: EsploraAddress = self.get_json(&format!("address/{address}"))?;
            balance += info
                .chain_stats
                .funded_txo_sum
                .saturating_sub(info.chain_stats.spent_txo_sum);
        }
        Ok(balance)
    }

    fn send_raw(&self, raw_hex: &str) -> WalletResult<String> {
        let url = self.url("tx")?;
        let txid = self
            .client
            .post(url)
            .body(raw_hex.to_string())
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| svc_err("tx broadcast", e))?
            .text()
            .map_err(|e| svc_err("tx broadcast", e))?;
        let txid = txid.trim().to_string();
        info!("broadcast accepted, txid {txid}");
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_count() {
        let confirmed = EsploraStatus {
            confirmed: true,
            block_height: Some(700_000),
            block_time: None,
        };
        let pending = EsploraStatus {
            confirmed: false,
            block_height: None,
            block_time: None,
        };
        assert_eq!(HttpChainService::confirmations(700_009, &confirmed), 10);
        assert_eq!(HttpChainService::confirmations(700_009, &pending), 0);
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(HttpChainService::new("not a url").is_err());
    }
}
