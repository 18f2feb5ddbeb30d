//! Read-only view of the order ledger: open orders, position, realized
//! PnL, and the last persisted price for a symbol.

use anyhow::Context;
use clap::Parser;
use serde_json::json;

use gridbot::ledger::Ledger;

#[derive(Parser, Debug)]
#[command(name = "ledger_status", about = "Inspect the gridbot order ledger")]
struct Args {
    /// Symbol to report on.
    #[arg(short, long)]
    symbol: String,

    /// Ledger database URL.
    #[arg(short, long, default_value = "sqlite://gridbot.db")]
    database_url: String,

    /// Emit machine-readable JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let ledger = Ledger::open(&args.database_url)
        .await
        .with_context(|| format!("opening ledger at {}", args.database_url))?;

    let open_orders = ledger.open_orders(&args.symbol).await?;
    let position = ledger.position(&args.symbol).await?;
    let realized = ledger.realized_pnl(&args.symbol).await?;
    let committed = ledger.committed_cash(&args.symbol).await?;
    let latest_price = ledger.latest_price(&args.symbol).await?;

    if args.json {
        let report = json!({
            "symbol": args.symbol,
            "position": position,
            "realized_pnl": realized,
            "committed_cash": committed,
            "latest_price": latest_price,
            "open_orders": open_orders,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("symbol:         {}", args.symbol);
    println!("position:       {position}");
    println!("realized pnl:   {realized:.2}");
    println!("committed cash: {committed:.2}");
    match latest_price {
        Some(price) => println!("latest price:   {price:.2}"),
        None => println!("latest price:   (none recorded)"),
    }

    println!("open orders:    {}", open_orders.len());
    for order in &open_orders {
        let price = order
            .price
            .map(|p| format!("{p:.2}"))
            .unwrap_or_else(|| "MKT".to_string());
        println!(
            "  #{:<6} {:4} {:>6} @ {:>8}  broker={:?}",
            order.local_id, order.action, order.quantity, price, order.broker_order_id
        );
    }

    Ok(())
}
