use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use treasury_swap::domain::position::{Position, StopLoss, StrategyConfig, TakeProfitLevel};
use treasury_swap::{Config, SwapReason, SwapRequest, TreasuryServices};

#[derive(Parser, Debug)]
#[command(version, about = "Treasury swap execution for Solana: routing, locks and strategy exits")]
struct Args {
    /// Path to config file (optional)
    #[arg(long, global = true)]
    config: Option<String>,

    /// RPC endpoint URL (overrides config)
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// Treasury wallet public key (overrides config)
    #[arg(long, global = true)]
    treasury: Option<String>,

    /// Path to keypair file (overrides config)
    #[arg(long, global = true)]
    keypair: Option<String>,

    /// Slippage tolerance in basis points (overrides config)
    #[arg(long, global = true)]
    slippage_bps: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the best route and print its priced quote
    Quote {
        from: String,
        to: String,
        amount: Decimal,
    },
    /// Execute a treasury swap through the full lock/ledger lifecycle
    Swap {
        from: String,
        to: String,
        amount: String,
        /// manual, proposal or strategy
        #[arg(long, default_value = "manual")]
        reason: SwapReason,
        /// Idempotency key; resubmitting an executed id is a no-op
        #[arg(long)]
        id: Option<String>,
    },
    /// Current and available (pending-adjusted) treasury balance
    Balance { token: String },
    /// Open a position and monitor its exit strategy until ctrl-c
    Monitor {
        token: String,
        #[arg(long, default_value = "SOL")]
        quote_token: String,
        #[arg(long)]
        amount: Decimal,
        /// Entry price in quote-token units
        #[arg(long)]
        entry_price: Decimal,
        /// Take-profit level as TRIGGER_PCT:SELL_PCT, repeatable
        #[arg(long = "take-profit", value_parser = parse_take_profit)]
        take_profits: Vec<(Decimal, Decimal)>,
        /// Fixed stop-loss distance below entry, percent
        #[arg(long, conflicts_with = "trailing_stop")]
        stop_loss: Option<Decimal>,
        /// Trailing stop distance below the high-water mark, percent
        #[arg(long)]
        trailing_stop: Option<Decimal>,
    },
}

fn parse_take_profit(s: &str) -> Result<(Decimal, Decimal), String> {
    let (trigger, sell) = s
        .split_once(':')
        .ok_or_else(|| format!("expected TRIGGER_PCT:SELL_PCT, got {}", s))?;
    let trigger = trigger.trim().parse::<Decimal>().map_err(|e| e.to_string())?;
    let sell = sell.trim().parse::<Decimal>().map_err(|e| e.to_string())?;
    Ok((trigger, sell))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    // Priority: CLI args > Config file > Defaults
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => {
            let rpc_url = args
                .rpc_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--rpc-url is required when not using --config"))?;
            let treasury = args
                .treasury
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--treasury is required when not using --config"))?;
            Config::with_defaults(rpc_url, treasury)
        }
    };
    if let Some(rpc_url) = args.rpc_url {
        config.rpc.url = rpc_url;
    }
    if let Some(treasury) = args.treasury {
        config.wallet.treasury = treasury;
    }
    if let Some(keypair) = args.keypair {
        config.wallet.keypair = Some(keypair);
    }
    if let Some(slippage_bps) = args.slippage_bps {
        config.venues.slippage_bps = slippage_bps;
    }

    let services = TreasuryServices::build(config).context("initialize treasury services")?;

    match args.command {
        Command::Quote { from, to, amount } => {
            let quote = services.quote(&from, &to, amount).await?;
            println!("{}", serde_json::to_string_pretty(&quote)?);
        }
        Command::Swap {
            from,
            to,
            amount,
            reason,
            id,
        } => {
            let mut request = SwapRequest::new(from, to, amount, reason, "cli");
            if let Some(id) = id {
                request = request.with_id(id);
            }
            let result = services.orchestrator.execute_swap(request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Balance { token } => {
            let (current, available) = services.available_balance(&token).await?;
            println!("{} current={} available={}", token, current, available);
        }
        Command::Monitor {
            token,
            quote_token,
            amount,
            entry_price,
            take_profits,
            stop_loss,
            trailing_stop,
        } => {
            let strategy = StrategyConfig {
                take_profit_levels: take_profits
                    .into_iter()
                    .map(|(trigger, sell)| TakeProfitLevel::new(entry_price, trigger, sell))
                    .collect(),
                stop_loss: match (stop_loss, trailing_stop) {
                    (_, Some(distance)) => Some(StopLoss::trailing(entry_price, distance)),
                    (Some(pct), None) => Some(StopLoss::fixed(entry_price, pct)),
                    (None, None) => None,
                },
            };
            let position = services
                .monitor
                .open_position(Position::open(token, quote_token, amount, entry_price, Some(strategy)))
                .await?;
            info!(position = %position.id, "👀 Monitoring position, ctrl-c to stop");

            tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
            services.monitor.shutdown().await;
            if let Some(position) = services.monitor.position(&position.id).await? {
                println!("{}", serde_json::to_string_pretty(&position)?);
            }
        }
    }

    Ok(())
}
