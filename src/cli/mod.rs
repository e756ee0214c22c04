use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::application::{DepositRequest, LedgerService, OperationQuery, OperationView, TransferRequest};
use crate::domain::{Direction, Page, WalletId, format_cents};
use crate::error::LedgerError;
use crate::logging::LogFormat;
use crate::storage::{SqliteStore, StoreConfig};

/// Wallet ledger with idempotent, atomic money movements
#[derive(Parser)]
#[command(name = "wallet-ledger")]
#[command(about = "An idempotent wallet ledger backed by SQLite")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "LEDGER_DATABASE", default_value = "ledger.db", global = true)]
    pub database: String,

    /// Maximum number of pooled database connections
    #[arg(long, env = "LEDGER_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    pub max_connections: u32,

    /// Log output format
    #[arg(long, env = "LEDGER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    /// Default log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Wallet management commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Deposit money into a wallet
    Deposit {
        /// Wallet ID
        wallet_id: WalletId,

        /// Amount to deposit (e.g., "100.53"); digits past the cents are dropped
        amount: Decimal,

        /// Idempotency key (a fresh UUID if omitted)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Transfer money between wallets
    Transfer {
        /// Amount to transfer (e.g., "50.51")
        amount: Decimal,

        /// Source wallet ID
        #[arg(long)]
        from: WalletId,

        /// Destination wallet ID
        #[arg(long)]
        to: WalletId,

        /// Idempotency key (a fresh UUID if omitted)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// List a wallet's operations for one day
    Operations {
        /// Wallet ID
        wallet_id: WalletId,

        /// Day to list (YYYY-MM-DD, UTC)
        #[arg(long)]
        date: String,

        /// Direction: credit/0 or debit/1
        #[arg(long, default_value = "credit")]
        direction: String,

        /// Maximum number of operations to show
        #[arg(short, long)]
        limit: Option<u32>,

        /// Number of operations to skip (requires --limit)
        #[arg(long, requires = "limit", default_value_t = 0)]
        offset: u32,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Verify that every balance matches its operations
    Check,
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Create a new wallet
    Create {
        /// Idempotency key (a fresh UUID if omitted)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Show a wallet's balance
    Show {
        /// Wallet ID
        id: WalletId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Csv,
    Json,
}

impl Cli {
    fn store_config(&self, create: bool) -> StoreConfig {
        let database_url = if create {
            format!("sqlite:{}?mode=rwc", self.database)
        } else {
            format!("sqlite:{}", self.database)
        };
        StoreConfig {
            database_url,
            max_connections: self.max_connections,
            ..StoreConfig::default()
        }
    }

    async fn connect(&self) -> Result<LedgerService<SqliteStore>> {
        let store = SqliteStore::connect(&self.store_config(false))
            .await
            .with_context(|| format!("Cannot open '{}'. Run 'init' first", self.database))?;
        Ok(LedgerService::new(store))
    }

    pub async fn run(self) -> Result<()> {
        if matches!(self.command, Commands::Init) {
            SqliteStore::init(&self.store_config(true)).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = self.connect().await?;

        match self.command {
            Commands::Init => {}

            Commands::Wallet(wallet_cmd) => run_wallet_command(&service, wallet_cmd).await?,

            Commands::Deposit {
                wallet_id,
                amount,
                key,
            } => {
                let idempotency_key = key.unwrap_or_else(new_key);
                service
                    .deposit(DepositRequest {
                        wallet_id,
                        amount,
                        idempotency_key: idempotency_key.clone(),
                    })
                    .await?;
                println!("Deposited {} into wallet {} (key: {})", amount, wallet_id, idempotency_key);
            }

            Commands::Transfer {
                amount,
                from,
                to,
                key,
            } => {
                let idempotency_key = key.unwrap_or_else(new_key);
                service
                    .transfer(TransferRequest {
                        from_wallet_id: from,
                        to_wallet_id: to,
                        amount,
                        idempotency_key: idempotency_key.clone(),
                    })
                    .await?;
                println!(
                    "Transferred {} from wallet {} to wallet {} (key: {})",
                    amount, from, to, idempotency_key
                );
            }

            Commands::Operations {
                wallet_id,
                date,
                direction,
                limit,
                offset,
                format,
            } => {
                let date = parse_date(&date)
                    .with_context(|| format!("Invalid date format '{}'. Use YYYY-MM-DD", date))?;
                let direction = Direction::from_str(&direction).with_context(|| {
                    format!("Invalid direction '{}'. Use credit, debit, 0 or 1", direction)
                })?;

                let operations = service
                    .list_operations(OperationQuery {
                        wallet_id,
                        date,
                        direction,
                        page: limit.map(|limit| Page::new(limit, offset)),
                    })
                    .await?;

                print_operations(&operations, format)?;
            }

            Commands::Check => run_check_command(&service).await?,
        }

        Ok(())
    }
}

async fn run_wallet_command(service: &LedgerService<SqliteStore>, cmd: WalletCommands) -> Result<()> {
    match cmd {
        WalletCommands::Create { key } => {
            let idempotency_key = key.unwrap_or_else(new_key);
            let wallet_id = service.create_wallet(&idempotency_key).await?;
            println!("Created wallet: {} (key: {})", wallet_id, idempotency_key);
        }

        WalletCommands::Show { id } => {
            let wallet = service
                .store()
                .get_wallet(id)
                .await?
                .ok_or(LedgerError::WalletNotFound(id))?;

            println!("Wallet: {}", wallet.id);
            println!("  Key:      {}", wallet.idempotency_key);
            println!("  Balance:  {}", format_cents(wallet.balance));
            println!(
                "  Created:  {}",
                wallet.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService<SqliteStore>) -> Result<()> {
    let report = service.store().check_integrity().await?;

    println!("Wallets:    {}", report.wallet_count);
    println!("Operations: {}", report.operation_count);

    if report.is_consistent() {
        println!("Ledger is consistent.");
        return Ok(());
    }

    println!();
    println!("{:<10} {:>15} {:>15}", "WALLET", "STORED", "COMPUTED");
    println!("{}", "-".repeat(42));
    for mismatch in &report.mismatches {
        println!(
            "{:<10} {:>15} {:>15}",
            mismatch.wallet_id,
            format_cents(mismatch.stored_balance),
            format_cents(mismatch.computed_balance)
        );
    }
    bail!(
        "Ledger integrity check failed: {} wallet(s) inconsistent",
        report.mismatches.len()
    )
}

fn print_operations(operations: &[OperationView], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if operations.is_empty() {
                println!("No operations found.");
                return Ok(());
            }
            println!("{:<10} {:>15} {:<10} {:<10}", "WALLET", "VALUE", "DIRECTION", "DATE");
            println!("{}", "-".repeat(48));
            for op in operations {
                println!(
                    "{:<10} {:>15} {:<10} {:<10}",
                    op.wallet_id, op.value, op.direction, op.date
                );
            }
        }
        OutputFormat::Csv => {
            write_operations_csv(std::io::stdout(), operations)?;
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(operations)?),
    }
    Ok(())
}

/// Write operations as CSV with a `wallet_id,value,direction,date` header.
/// Direction is written as its numeric code (0 = credit, 1 = debit).
pub fn write_operations_csv<W: std::io::Write>(writer: W, operations: &[OperationView]) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(["wallet_id", "value", "direction", "date"])?;

    for op in operations {
        csv_writer.write_record([
            op.wallet_id.to_string(),
            op.value.to_string(),
            op.direction.code().to_string(),
            op.date.to_string(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(operations.len())
}

/// Map a command failure to the process exit code: 2 when the request was at
/// fault, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<LedgerError>() {
        Some(ledger_err) if ledger_err.is_client_error() => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

fn new_key() -> String {
    Uuid::new_v4().to_string()
}

fn parse_date(date_str: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(date_str, "%Y-%m-%d")?)
}
