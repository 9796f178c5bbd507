// common/src/lib.rs
use std::env;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::utils::{format_units, parse_units};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::sol;
use alloy::transports::Transport;
use alloy_signer_local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use anyhow::{bail, Context, Result};
use dotenv::dotenv;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ─────────────────── Constants ───────────────────

/// Quoted gas estimates undershoot on multi-pool paths; 800k covers every
/// swap observed on the default chain.
pub const SWAP_GAS_LIMIT: u64 = 800_000;

/// Slippage tolerance in basis points (10 = 0.1%).
pub const SLIPPAGE_TOLERANCE_BPS: u32 = 10;

/// Route deadline, seconds from now.
pub const DEADLINE_SECS: u64 = 1800;

/// Single-hop routes only. Raise to allow multi-hop swaps.
pub const MAX_SWAPS_PER_PATH: u32 = 1;

pub const DEFAULT_ROUTER_API_URL: &str = "https://api.uniswap.org/v1";

/// OP Mainnet.
pub const DEFAULT_CHAIN_ID: u64 = 10;

/// Well-known tokens on the default chain, accepted by symbol on the CLI.
pub const KNOWN_TOKENS: &[(&str, &str)] = &[
    ("WETH", "0x4200000000000000000000000000000000000006"),
    ("USDC", "0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
    ("USDC.e", "0x7F5c764cBc14f9669B88837ca1490cCa17c31607"),
    ("USDT", "0x94b008aA00579c1307B0EF2c499aD98a8ce58e58"),
    ("DAI", "0xDA10009cBd5D07dd0CeCc66161FC93D7c9000da1"),
    ("OP", "0x4200000000000000000000000000000000000042"),
    ("WBTC", "0x68f180fcCe6836688e9084f035309E29Bf0A2095"),
];

/// Resolve a CLI token argument: a known symbol or a raw contract address.
pub fn resolve_token(symbol_or_address: &str) -> Result<Address> {
    let input = symbol_or_address.trim();
    for (symbol, address) in KNOWN_TOKENS {
        if input.eq_ignore_ascii_case(symbol) {
            return Ok(Address::from_str(address)?);
        }
    }
    if input.starts_with("0x") {
        return Address::from_str(input)
            .with_context(|| format!("invalid token address '{input}'"));
    }
    let known = KNOWN_TOKENS
        .iter()
        .map(|(s, _)| *s)
        .collect::<Vec<_>>()
        .join(", ");
    bail!("unknown token '{input}'; use one of [{known}] or an ERC-20 contract address")
}

// ─────────────────── Configuration ───────────────────

pub struct Config {
    pub rpc_url: String,
    pub router_api_url: String,
    pub chain_id: u64,
    pub private_key: Option<String>,
    pub mnemonic: Option<String>,
}

pub fn load_config() -> Result<Config> {
    dotenv().ok();
    let rpc_url = env::var("RPC_URL").context("RPC_URL must be set")?;
    let router_api_url =
        env::var("ROUTER_API_URL").unwrap_or_else(|_| DEFAULT_ROUTER_API_URL.to_string());
    let chain_id = match env::var("CHAIN_ID") {
        Ok(raw) => raw.parse().context("CHAIN_ID must be a decimal chain id")?,
        Err(_) => DEFAULT_CHAIN_ID,
    };
    Ok(Config {
        rpc_url,
        router_api_url,
        chain_id,
        private_key: env::var("PRIVATE_KEY").ok().filter(|s| !s.is_empty()),
        mnemonic: env::var("MNEMONIC").ok().filter(|s| !s.is_empty()),
    })
}

pub fn http_client() -> Client {
    Client::new()
}

/// Build the signing key from PRIVATE_KEY (hex) or fall back to MNEMONIC
/// (account index 0).
pub fn signer(cfg: &Config) -> Result<PrivateKeySigner> {
    if let Some(key) = &cfg.private_key {
        return key
            .parse::<PrivateKeySigner>()
            .context("PRIVATE_KEY is not a valid secp256k1 private key");
    }
    if let Some(phrase) = &cfg.mnemonic {
        let signer = MnemonicBuilder::<English>::default()
            .phrase(phrase.as_str())
            .index(0)?
            .build()?;
        return Ok(signer);
    }
    bail!("set PRIVATE_KEY or MNEMONIC in the environment")
}

pub fn init_logger(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("common=debug,swap=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();
}

// ─────────────────── ERC-20 metadata & balances ───────────────────

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function decimals() external view returns (uint8);
        function symbol() external view returns (string memory);
        function name() external view returns (string memory);
        function balanceOf(address account) external view returns (uint256);
    }
}

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u8,
    pub symbol: String,
    pub name: String,
}

/// Fetch a token's metadata and the owner's balance in one concurrent
/// fan-out over four contract reads.
pub async fn token_and_balance<T, P>(
    provider: P,
    token: Address,
    owner: Address,
) -> Result<(TokenInfo, U256)>
where
    T: Transport + Clone,
    P: Provider<T>,
{
    let erc20 = IERC20::new(token, provider);
    let decimals = erc20.decimals();
    let symbol = erc20.symbol();
    let name = erc20.name();
    let balance = erc20.balanceOf(owner);
    let (decimals, symbol, name, balance) = tokio::try_join!(
        decimals.call(),
        symbol.call(),
        name.call(),
        balance.call(),
    )?;
    Ok((
        TokenInfo {
            address: token,
            decimals: decimals._0,
            symbol: symbol._0,
            name: name._0,
        },
        balance._0,
    ))
}

fn display_units(amount: U256, decimals: u8) -> String {
    format_units(amount, decimals).unwrap_or_else(|_| amount.to_string())
}

// ─────────────────── Routing service (/quote) ───────────────────

#[derive(Debug, Clone, Copy, Serialize)]
pub enum TradeType {
    #[serde(rename = "exactIn")]
    ExactInput,
    #[serde(rename = "exactOut")]
    ExactOutput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteParams {
    pub token_in_address: String,
    pub token_out_address: String,
    pub chain_id: u64,
    /// Input amount in base units.
    pub amount: String,
    #[serde(rename = "type")]
    pub trade_type: TradeType,
    pub recipient: String,
    /// Percent, e.g. "0.1".
    pub slippage_tolerance: String,
    /// Absolute unix timestamp.
    pub deadline: u64,
    pub max_swaps_per_path: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodParameters {
    /// ABI-encoded swap call.
    pub calldata: String,
    /// Native value to attach, hex quantity.
    pub value: String,
    /// Router contract the calldata targets.
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteQuote {
    /// Output amount in base units.
    pub quote: String,
    /// Output amount minus gas, in base units.
    pub quote_gas_adjusted: String,
    pub gas_use_estimate: String,
    pub gas_use_estimate_quote_token: String,
    #[serde(rename = "gasUseEstimateUSD")]
    pub gas_use_estimate_usd: String,
    pub gas_price_wei: String,
    #[serde(default)]
    pub method_parameters: Option<MethodParameters>,
    #[serde(default)]
    pub route_string: Option<String>,
}

pub struct RouterClient {
    http: Client,
    base_url: String,
}

impl RouterClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Ask the routing service for the best route. `Ok(None)` means the
    /// service found no route for the pair.
    pub async fn route(&self, params: &RouteParams) -> Result<Option<RouteQuote>> {
        let url = format!("{}/quote", self.base_url.trim_end_matches('/'));
        debug!("requesting route: {url}");
        let response = self.http.get(&url).query(params).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("routing service returned {status}: {body}");
        }

        let quote = response.json::<RouteQuote>().await?;
        Ok(Some(quote))
    }
}

/// A route is only usable once the service has attached encoded call data.
fn require_route(quote: Option<RouteQuote>) -> Result<RouteQuote> {
    match quote {
        Some(quote) if quote.method_parameters.is_some() => Ok(quote),
        _ => bail!("no route loaded"),
    }
}

// ─────────────────── Swap flow (/quote -> send -> receipt) ───────────────────

/// Build the swap transaction from a quote. The gas limit is always
/// `SWAP_GAS_LIMIT`, not the route's own estimate.
fn build_swap_transaction(quote: &RouteQuote, from: Address) -> Result<TransactionRequest> {
    let Some(params) = &quote.method_parameters else {
        bail!("no route loaded");
    };
    let router = Address::from_str(&params.to).context("bad router address in quote")?;
    let calldata = Bytes::from_str(&params.calldata).context("bad calldata in quote")?;
    let value = U256::from_str(&params.value).context("bad value in quote")?;
    let gas_price: u128 = quote
        .gas_price_wei
        .parse()
        .context("bad gasPriceWei in quote")?;

    Ok(TransactionRequest::default()
        .with_from(from)
        .with_to(router)
        .with_input(calldata)
        .with_value(value)
        .with_gas_price(gas_price)
        .with_gas_limit(SWAP_GAS_LIMIT))
}

fn ensure_swap_succeeded(receipt: &TransactionReceipt) -> Result<()> {
    if !receipt.status() {
        bail!(
            "swap transaction {} reverted on chain",
            receipt.transaction_hash
        );
    }
    Ok(())
}

/// Swap `amount` (human units) of `token_in` for `token_out` in a single
/// transaction: load balances, fetch a route, send, confirm, report.
pub async fn swap_flow(
    cfg: &Config,
    token_in: Address,
    token_out: Address,
    amount: &str,
) -> Result<()> {
    let signer = signer(cfg)?;
    let wallet_address = signer.address();
    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(EthereumWallet::from(signer))
        .on_http(cfg.rpc_url.parse().context("RPC_URL is not a valid URL")?);

    // 1. Connect and load token metadata + balances (both tokens at once,
    //    four reads each).
    info!("connecting to chain, loading token balances...");
    let ((token_in, balance_in), (token_out, balance_out)) = tokio::try_join!(
        token_and_balance(provider.clone(), token_in, wallet_address),
        token_and_balance(provider.clone(), token_out, wallet_address),
    )?;

    println!("Wallet {wallet_address} balances:");
    println!(
        "   Input: {} ({}): {}",
        token_in.symbol,
        token_in.name,
        display_units(balance_in, token_in.decimals)
    );
    println!(
        "   Output: {} ({}): {}",
        token_out.symbol,
        token_out.name,
        display_units(balance_out, token_out.decimals)
    );

    let amount_in: U256 = parse_units(amount, token_in.decimals)
        .with_context(|| format!("cannot parse '{amount}' as {} units", token_in.symbol))?
        .into();

    // 2. Load a swap route.
    info!("loading a swap route...");
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let router = RouterClient::new(http_client(), cfg.router_api_url.clone());
    let params = RouteParams {
        token_in_address: token_in.address.to_string(),
        token_out_address: token_out.address.to_string(),
        chain_id: cfg.chain_id,
        amount: amount_in.to_string(),
        trade_type: TradeType::ExactInput,
        recipient: wallet_address.to_string(),
        slippage_tolerance: format!("{}", SLIPPAGE_TOLERANCE_BPS as f64 / 100.0),
        deadline: now + DEADLINE_SECS,
        max_swaps_per_path: MAX_SWAPS_PER_PATH,
    };
    let quote = require_route(router.route(&params).await?)?;

    let quoted_out = U256::from_str(&quote.quote).context("bad quote amount")?;
    let quoted_out_adjusted =
        U256::from_str(&quote.quote_gas_adjusted).context("bad gas-adjusted quote amount")?;
    println!(
        "   You'll get {} of {}",
        display_units(quoted_out, token_out.decimals),
        token_out.symbol
    );
    println!(
        "   Gas Adjusted Quote: {}",
        display_units(quoted_out_adjusted, token_out.decimals)
    );
    println!(
        "   Gas Used Quote Token: {}",
        quote.gas_use_estimate_quote_token
    );
    println!("   Gas Used USD: {}", quote.gas_use_estimate_usd);
    println!("   Gas Used: {}", quote.gas_use_estimate);
    println!("   Gas Price Wei: {}", quote.gas_price_wei);

    // 3. Send and confirm.
    info!("making a swap...");
    let transaction = build_swap_transaction(&quote, wallet_address)?;
    let receipt = provider
        .send_transaction(transaction)
        .await?
        .get_receipt()
        .await?;
    ensure_swap_succeeded(&receipt)?;
    info!("swap confirmed: {}", receipt.transaction_hash);

    // 4. Refetch balances and print the result.
    let erc20_in = IERC20::new(token_in.address, provider.clone());
    let erc20_out = IERC20::new(token_out.address, provider.clone());
    let new_balance_in = erc20_in.balanceOf(wallet_address);
    let new_balance_out = erc20_out.balanceOf(wallet_address);
    let (new_balance_in, new_balance_out) =
        tokio::try_join!(new_balance_in.call(), new_balance_out.call())?;

    println!("Swap completed successfully!");
    println!("Updated balances:");
    println!(
        "   {}: {}",
        token_in.symbol,
        display_units(new_balance_in._0, token_in.decimals)
    );
    println!(
        "   {}: {}",
        token_out.symbol,
        display_units(new_balance_out._0, token_out.decimals)
    );

    Ok(())
}

// ─────────────────── Tests ───────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::TxKind;

    const FROM: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
    const ROUTER: &str = "0xE592427A0AEce92De3Edee1F18E0157C05861564";

    fn sample_quote() -> RouteQuote {
        RouteQuote {
            quote: "1994320000".to_string(),
            quote_gas_adjusted: "1992110000".to_string(),
            gas_use_estimate: "207000".to_string(),
            gas_use_estimate_quote_token: "2.21".to_string(),
            gas_use_estimate_usd: "2.21".to_string(),
            gas_price_wei: "60000000".to_string(),
            method_parameters: Some(MethodParameters {
                calldata: "0x5ae401dc1122".to_string(),
                value: "0x00".to_string(),
                to: ROUTER.to_string(),
            }),
            route_string: None,
        }
    }

    #[test]
    fn missing_route_aborts() {
        assert!(require_route(None).is_err());
    }

    #[test]
    fn route_without_call_data_aborts() {
        let mut quote = sample_quote();
        quote.method_parameters = None;
        assert!(require_route(Some(quote)).is_err());
    }

    #[test]
    fn usable_route_is_accepted() {
        assert!(require_route(Some(sample_quote())).is_ok());
    }

    #[test]
    fn transaction_carries_quote_call_data_and_value() {
        let from = Address::from_str(FROM).unwrap();
        let tx = build_swap_transaction(&sample_quote(), from).unwrap();

        assert_eq!(tx.from, Some(from));
        assert_eq!(
            tx.to,
            Some(TxKind::Call(Address::from_str(ROUTER).unwrap()))
        );
        assert_eq!(
            tx.input.input(),
            Some(&Bytes::from_str("0x5ae401dc1122").unwrap())
        );
        assert_eq!(tx.value, Some(U256::ZERO));
        assert_eq!(tx.gas_price, Some(60_000_000u128));
    }

    #[test]
    fn gas_limit_is_fixed_regardless_of_route_estimate() {
        let from = Address::from_str(FROM).unwrap();

        let low = sample_quote();
        let mut high = sample_quote();
        high.gas_use_estimate = "2500000".to_string();

        let tx_low = build_swap_transaction(&low, from).unwrap();
        let tx_high = build_swap_transaction(&high, from).unwrap();
        assert_eq!(tx_low.gas, Some(SWAP_GAS_LIMIT));
        assert_eq!(tx_high.gas, Some(SWAP_GAS_LIMIT));
    }

    #[test]
    fn transaction_from_quote_without_call_data_is_an_error() {
        let mut quote = sample_quote();
        quote.method_parameters = None;
        let from = Address::from_str(FROM).unwrap();
        assert!(build_swap_transaction(&quote, from).is_err());
    }

    fn receipt_json(status: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "0x2",
            "status": status,
            "cumulativeGasUsed": "0x3aa71",
            "logs": [],
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "transactionHash": "0x60b1b53f1a2f1f93feb6341dd956b52823b5eb13a4f9d1f266ce80a991abd08a",
            "transactionIndex": "0x1",
            "blockHash": "0x8e38b4dbf6b11fcc3b9dee84fb7986e29ca0a02cecd8977c161ff7333329681e",
            "blockNumber": "0x80b5f3",
            "gasUsed": "0x27af5",
            "effectiveGasPrice": "0x5f5e100",
            "from": FROM,
            "to": ROUTER,
            "contractAddress": null
        })
    }

    #[test]
    fn reverted_receipt_is_an_error() {
        let receipt: TransactionReceipt =
            serde_json::from_value(receipt_json("0x0")).unwrap();
        let err = ensure_swap_succeeded(&receipt).unwrap_err();
        assert!(err.to_string().contains("reverted"));
    }

    #[test]
    fn successful_receipt_passes() {
        let receipt: TransactionReceipt =
            serde_json::from_value(receipt_json("0x1")).unwrap();
        assert!(ensure_swap_succeeded(&receipt).is_ok());
    }

    #[test]
    fn resolves_known_symbols_and_addresses() {
        let weth = resolve_token("WETH").unwrap();
        assert_eq!(
            weth,
            Address::from_str("0x4200000000000000000000000000000000000006").unwrap()
        );
        // case-insensitive
        assert_eq!(
            resolve_token("usdc.e").unwrap(),
            resolve_token("USDC.e").unwrap()
        );
        // raw addresses pass through
        assert_eq!(
            resolve_token(ROUTER).unwrap(),
            Address::from_str(ROUTER).unwrap()
        );
    }

    #[test]
    fn rejects_unknown_symbols() {
        let err = resolve_token("NOPE").unwrap_err();
        assert!(err.to_string().contains("unknown token"));
        assert!(resolve_token("0x1234").is_err());
    }

    #[test]
    fn amounts_parse_with_token_decimals() {
        let raw: U256 = parse_units("1.5", 6u8).unwrap().into();
        assert_eq!(raw, U256::from(1_500_000u64));
        assert_eq!(display_units(U256::from(1_500_000u64), 6), "1.500000");
    }
}
