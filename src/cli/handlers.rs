/// CLI command handlers
///
/// Executes parsed commands against the store and, when configured, the
/// HTTP provider.
use crate::cli::Commands;
use crate::error::{WalletError, WalletResult};
use crate::ledger::UtxoScope;
use crate::network::{ChainService, HttpChainService};
use crate::storage::{KeyFilter, Scheme, Store};
use crate::transaction::signer::{SendOptions, SweepOptions};
use crate::transaction::SendOutcome;
use crate::wallet::{
    wallet_delete, wallet_exists, wallets_list, CreateOptions, KeyScope, MultisigOptions, Wallet,
};
use std::path::Path;

/// Executes CLI commands
pub struct CliHandler {
    store: Store,
    provider: Option<HttpChainService>,
}

impl CliHandler {
    /// Open the store and, when given, the provider client
    pub fn new(data_dir: &Path, provider_url: Option<&str>) -> WalletResult<Self> {
        let store = Store::open(data_dir)?;
        let provider = provider_url.map(HttpChainService::new).transpose()?;
        Ok(Self { store, provider })
    }

    fn provider(&self) -> WalletResult<&dyn ChainService> {
        match &self.provider {
            Some(provider) => Ok(provider),
            None => Err(WalletError::ServiceUnavailable(
                "no provider configured, pass --provider".into(),
            )),
        }
    }

    fn open(&self, wallet: &str) -> WalletResult<Wallet> {
        Wallet::open(self.store.clone(), wallet)
    }

    /// Execute one command
    pub fn execute(&self, command: Commands) -> WalletResult<()> {
        match command {
            Commands::List => self.handle_list(),
            Commands::Create {
                name,
                key,
                seed,
                mnemonic,
                network,
                scheme,
                account,
                owner,
            } => self.handle_create(name, key, seed, mnemonic, network, scheme, account, owner),
            Commands::CreateMultisig {
                name,
                keys,
                required,
                sort_keys,
                network,
            } => self.handle_create_multisig(name, keys, required, sort_keys, network),
            Commands::Exists { wallet } => {
                println!("{}", wallet_exists(&self.store, &wallet)?);
                Ok(())
            }
            Commands::Delete { wallet, force } => {
                wallet_delete(&self.store, &wallet, force)?;
                println!("wallet '{wallet}' deleted");
                Ok(())
            }
            Commands::Address {
                wallet,
                change,
                count,
            } => self.handle_address(wallet, change, count),
            Commands::Balance { wallet } => self.handle_balance(wallet),
            Commands::Update { wallet } => self.handle_update(wallet),
            Commands::Scan { wallet, depth } => self.handle_scan(wallet, depth),
            Commands::Send {
                wallet,
                to,
                amount,
                fee,
                offline,
            } => self.handle_send(wallet, to, amount, fee, offline),
            Commands::Sweep {
                wallet,
                to,
                offline,
            } => self.handle_sweep(wallet, to, offline),
            Commands::Info { wallet } => self.handle_info(wallet),
        }
    }

    fn handle_list(&self) -> WalletResult<()> {
        let wallets = wallets_list(&self.store)?;
        if wallets.is_empty() {
            println!("no wallets");
            return Ok(());
        }
        println!("{:>5}  {:<24} {:<10} {:<10} {}", "id", "name", "scheme", "network", "owner");
        for wallet in wallets {
            println!(
                "{:>5}  {:<24} {:<10} {:<10} {}",
                wallet.id, wallet.name, wallet.scheme.to_string(), wallet.network, wallet.owner
            );
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_create(
        &self,
        name: String,
        key: Option<String>,
        seed: Option<String>,
        mnemonic: Option<String>,
        network: Option<String>,
        scheme: String,
        account: u32,
        owner: String,
    ) -> WalletResult<()> {
        let scheme: Scheme = scheme.parse()?;
        let wallet = Wallet::create(
            &self.store,
            &name,
            CreateOptions {
                key,
                seed,
                mnemonic,
                network,
                scheme,
                account_id: account,
                owner,
                ..CreateOptions::default()
            },
        )?;
        println!(
            "created wallet '{}' (id {}) on {}",
            wallet.name(),
            wallet.id(),
            wallet.network().name
        );
        Ok(())
    }

    fn handle_create_multisig(
        &self,
        name: String,
        keys: Vec<String>,
        required: u8,
        sort_keys: bool,
        network: Option<String>,
    ) -> WalletResult<()> {
        let wallet = Wallet::create_multisig(
            &self.store,
            &name,
            &keys,
            required,
            MultisigOptions {
                network,
                sort_keys,
                ..MultisigOptions::default()
            },
        )?;
        println!(
            "created {}-of-{} multisig wallet '{}' (id {})",
            required,
            keys.len(),
            wallet.name(),
            wallet.id()
        );
        Ok(())
    }

    fn handle_address(&self, wallet: String, change: bool, count: usize) -> WalletResult<()> {
        let mut wallet = self.open(&wallet)?;
        let change = u32::from(change);
        for key in wallet.get_key_batch(&KeyScope::default(), change, count)? {
            println!("{}", key.address());
        }
        Ok(())
    }

    fn handle_balance(&self, wallet: String) -> WalletResult<()> {
        let mut wallet = self.open(&wallet)?;
        wallet.balance_update(&UtxoScope::default(), 0)?;
        println!("{}", wallet.balance_str(None));
        Ok(())
    }

    fn handle_update(&self, wallet: String) -> WalletResult<()> {
        let mut wallet = self.open(&wallet)?;
        let new = wallet.utxos_update(self.provider()?, &UtxoScope::default())?;
        println!("{new} new unspent outputs");
        println!("balance: {}", wallet.balance_str(None));
        Ok(())
    }

    fn handle_scan(&self, wallet: String, depth: usize) -> WalletResult<()> {
        let mut wallet = self.open(&wallet)?;
        wallet.scan(self.provider()?, depth, &KeyScope::default(), None)?;
        println!("scan complete; balance: {}", wallet.balance_str(None));
        Ok(())
    }

    fn handle_send(
        &self,
        wallet: String,
        to: String,
        amount: u64,
        fee: Option<u64>,
        offline: bool,
    ) -> WalletResult<()> {
        let mut wallet = self.open(&wallet)?;
        let outcome = wallet.send_to(
            self.provider()?,
            &to,
            amount,
            &SendOptions {
                fee,
                offline,
                ..SendOptions::default()
            },
        )?;
        match outcome {
            SendOutcome::Sent { txid } => println!("sent: {txid}"),
            SendOutcome::Offline => println!("transaction verified, not broadcast"),
        }
        Ok(())
    }

    fn handle_sweep(&self, wallet: String, to: String, offline: bool) -> WalletResult<()> {
        let mut wallet = self.open(&wallet)?;
        let outcome = wallet.sweep(
            self.provider()?,
            &to,
            &SweepOptions {
                offline,
                ..SweepOptions::default()
            },
        )?;
        match outcome {
            SendOutcome::Sent { txid } => println!("swept: {txid}"),
            SendOutcome::Offline => println!("transaction verified, not broadcast"),
        }
        Ok(())
    }

    fn handle_info(&self, wallet: String) -> WalletResult<()> {
        let wallet = self.open(&wallet)?;
        let details = wallet.details();
        println!("=== WALLET ===");
        println!(" id        {}", details.id);
        println!(" name      {}", details.name);
        println!(" owner     {}", details.owner);
        println!(" scheme    {}", details.scheme);
        println!(" network   {}", details.network);
        println!(" balance   {}", details.balance_str);
        if let Some(required) = details.multisig_n_required {
            println!(
                " multisig  {}-of-{}",
                required,
                details.cosigner_wallet_ids.len()
            );
        }
        println!();
        println!("{:>5}  {:<28} {:<40} {}", "id", "path", "address", "balance");
        for key in wallet.keys(&KeyFilter::default())? {
            println!(
                "{:>5}  {:<28} {:<40} {}",
                key.id(),
                key.path(),
                key.address(),
                key.balance_str()
            );
        }
        Ok(())
    }
}
