//! Dosirak CLI - database migrations and refund quotes.
//!
//! # Usage
//!
//! ```bash
//! # Run order database migrations
//! dosirak-cli migrate
//!
//! # Quote a refund from a delivery date and charge
//! dosirak-cli refund-quote amount --delivery-date 2026-10-05 --amount 50000
//!
//! # Quote cancelling a stored order
//! dosirak-cli refund-quote order ORDER_ID
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

mod commands;

use commands::CommandError;

#[derive(Parser)]
#[command(name = "dosirak-cli")]
#[command(author, version, about = "Dosirak CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Show what a cancellation would refund
    RefundQuote {
        #[command(subcommand)]
        target: QuoteTarget,
    },
}

#[derive(Subcommand)]
enum QuoteTarget {
    /// Apply the refund policy to a single charge
    Amount {
        /// Scheduled delivery date (YYYY-MM-DD)
        #[arg(short, long)]
        delivery_date: NaiveDate,

        /// Charge in won
        #[arg(short, long)]
        amount: Decimal,

        /// Pretend today is this date (default: today in the business timezone)
        #[arg(short, long)]
        today: Option<NaiveDate>,
    },
    /// Quote cancelling every active payment of a stored order
    Order {
        order_id: String,

        /// Pretend today is this date (default: today in the business timezone)
        #[arg(short, long)]
        today: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::RefundQuote { target } => {
            let quote = match target {
                QuoteTarget::Amount {
                    delivery_date,
                    amount,
                    today,
                } => commands::quote::amount(delivery_date, amount, today)?,
                QuoteTarget::Order { order_id, today } => {
                    commands::quote::order(&order_id, today).await?
                }
            };
            #[allow(clippy::print_stdout)]
            {
                println!("{quote}");
            }
        }
    }
    Ok(())
}
