// cli/swap/src/main.rs

use anyhow::Result;
use clap::Parser;
use common::{init_logger, load_config, resolve_token, swap_flow};

/// Swap one ERC-20 token for another in a single transaction.
#[derive(Parser, Debug)]
#[command(name = "swap", version)]
struct Args {
    /// Input token: a known symbol (WETH, USDC, ...) or an ERC-20 address
    token_in: String,
    /// Output token: a known symbol or an ERC-20 address
    token_out: String,
    /// Amount of the input token to sell, in human units (e.g. "0.25")
    amount: String,
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    // Load .env (RPC_URL, PRIVATE_KEY or MNEMONIC)
    let cfg = load_config()?;

    let token_in = resolve_token(&args.token_in)?;
    let token_out = resolve_token(&args.token_out)?;

    // Execute the swap flow
    swap_flow(&cfg, token_in, token_out, &args.amount).await?;

    Ok(())
}
