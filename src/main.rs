use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use receipt_sheets_lib::commands::{self, AppError};
use receipt_sheets_lib::config::AppConfig;
use receipt_sheets_lib::db::{Db, HistoryStatus};
use receipt_sheets_lib::excel::XlsxSink;
use receipt_sheets_lib::{parse_receipt_text, ColumnMapping, ConfirmedReceipt, ReceiptExtraction, ReceiptOverrides};

#[derive(Debug, Parser)]
#[command(name = "receipt-sheets", version, about = "Receipt OCR text to spreadsheet rows")]
struct Cli {
    /// SQLite file holding profiles and history.
    #[arg(long, global = true, env = "RECEIPT_DB_PATH", value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract date, items and total from OCR text (`-` reads stdin).
    Scan {
        input: String,
        /// Print the extraction without recording it.
        #[arg(long, default_value_t = false)]
        no_history: bool,
    },
    /// Check a single column reference such as `B` or `AD`.
    ValidateColumn { reference: String },
    /// Manage saved column mappings.
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Append one confirmed receipt to the profile's workbook.
    Save {
        #[arg(long)]
        profile: i64,
        /// OCR text to fill fields that are not given explicitly.
        #[arg(long, value_name = "FILE")]
        text: Option<String>,
        /// Scan history entry this save confirms.
        #[arg(long)]
        history: Option<i64>,
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,
        #[arg(long)]
        items: Option<String>,
        #[arg(long)]
        amount: Option<Decimal>,
    },
    /// List history entries, newest first.
    History {
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ProfileAction {
    Save {
        #[arg(long)]
        id: Option<i64>,
        #[arg(long)]
        name: String,
        #[arg(long, value_name = "FILE")]
        workbook: PathBuf,
        #[arg(long, default_value = "Sheet1")]
        sheet: String,
        #[arg(long, default_value = "A")]
        date_column: String,
        #[arg(long, default_value = "B")]
        description_column: String,
        #[arg(long, default_value = "C")]
        price_column: String,
    },
    List,
    Delete { id: i64 },
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    error: String,
    code: &'a str,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_input(input: &str) -> anyhow::Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).context("reading stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("reading {}", input))
    }
}

fn open_db(cli_path: Option<PathBuf>, config: &AppConfig) -> anyhow::Result<Db> {
    let path = cli_path.unwrap_or_else(|| config.db_path.clone());
    Db::new(path.clone()).with_context(|| format!("opening database {}", path.display()))
}

fn run(cli: Cli, config: AppConfig) -> Result<(), AppError> {
    match cli.command {
        Command::Scan { input, no_history } => {
            let text = read_input(&input).map_err(fail)?;
            if no_history {
                print_json(&parse_receipt_text(&text)).map_err(fail)?;
            } else {
                let db = open_db(cli.db, &config).map_err(fail)?;
                print_json(&commands::scan_text(&db, &text)?).map_err(fail)?;
            }
        }
        Command::ValidateColumn { reference } => {
            print_json(&commands::validate_column_command(&reference)).map_err(fail)?;
        }
        Command::Profile { action } => {
            let db = open_db(cli.db, &config).map_err(fail)?;
            match action {
                ProfileAction::Save {
                    id,
                    name,
                    workbook,
                    sheet,
                    date_column,
                    description_column,
                    price_column,
                } => {
                    let mapping = ColumnMapping::new(&date_column, &description_column, &price_column);
                    let check = commands::check_mapping(&mapping);
                    let id = db.save_profile(id, &name, &workbook.to_string_lossy(), &sheet, &mapping)?;
                    print_json(&db.get_profile(id)?).map_err(fail)?;
                    if !check.duplicates.is_empty() {
                        tracing::warn!(duplicates = ?check.duplicates, "several fields share a column; values will be merged");
                    }
                }
                ProfileAction::List => print_json(&db.get_profiles()?).map_err(fail)?,
                ProfileAction::Delete { id } => {
                    db.delete_profile(id)?;
                    print_json(&serde_json::json!({ "deleted": id })).map_err(fail)?;
                }
            }
        }
        Command::Save {
            profile,
            text,
            history,
            date,
            items,
            amount,
        } => {
            let db = open_db(cli.db, &config).map_err(fail)?;
            let profile = commands::load_profile(&db, profile)?;
            let extraction = match text {
                Some(input) => parse_receipt_text(&read_input(&input).map_err(fail)?),
                None => ReceiptExtraction::default(),
            };
            let overrides = ReceiptOverrides {
                transaction_date: date,
                items,
                total_amount: amount,
            };
            let receipt = ConfirmedReceipt::from_extraction(extraction, overrides)?;
            let mut sink = XlsxSink::new(&profile.workbook_path, &profile.sheet_name);
            let outcome = commands::save_receipt(&db, &profile, &receipt, history, &mut sink, &config.retry)?;
            print_json(&outcome).map_err(fail)?;
        }
        Command::History { status } => {
            let db = open_db(cli.db, &config).map_err(fail)?;
            let status = match status.as_deref() {
                None => None,
                Some(s) => match HistoryStatus::parse(s) {
                    Some(status) => Some(status),
                    None => return Err(fail(anyhow::anyhow!("unknown status '{}'", s))),
                },
            };
            print_json(&db.get_history(status)?).map_err(fail)?;
        }
    }
    Ok(())
}

/// Non-domain failures (I/O, argument problems) surface as a plain error.
fn fail(e: anyhow::Error) -> AppError {
    AppError::Cli(format!("{:#}", e))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    receipt_sheets_lib::config::load_env();
    let cli = Cli::parse();
    let config = AppConfig::from_env();
    tracing::debug!(db = %config.db_path.display(), "receipt-sheets v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli, config) {
        let code = e.code();
        print_json(&ErrorOutput {
            error: e.to_string(),
            code: &code,
        })?;
        bail!("{}", code);
    }
    Ok(())
}
