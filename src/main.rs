use chrono::{Duration, Utc};
use clap::{Parser, ValueEnum};
use invoicepay::application::service::PaymentsService;
use invoicepay::config::ServiceConfig;
use invoicepay::infrastructure::{Ledger, StorageBackend};
use invoicepay::interfaces::jsonl::call_reader::CallReader;
use invoicepay::interfaces::jsonl::reply_writer::ReplyWriter;
use invoicepay::interfaces::jsonl::run;
use invoicepay::telemetry::init_tracing;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Memory,
    Rocksdb,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON-lines file of RPC calls to execute
    input: PathBuf,

    /// Storage backend for invoices, payments and idempotency records
    #[arg(long, env = "INVOICEPAY_BACKEND", value_enum)]
    backend: Option<Backend>,

    /// Path to the persistent database. Implies `--backend rocksdb`.
    #[arg(long, env = "INVOICEPAY_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Seconds an authorization may stay unconfirmed before it can be voided
    #[arg(long, env = "INVOICEPAY_AUTHORIZATION_TTL_SECS", default_value_t = 900)]
    authorization_ttl_secs: i64,

    /// Invoice update retries after a payment is confirmed
    #[arg(long, env = "INVOICEPAY_CONFIRM_RETRY_BUDGET", default_value_t = 3)]
    confirm_retry_budget: u32,

    /// Seconds before an unfinished idempotency reservation can be reclaimed
    #[arg(long, env = "INVOICEPAY_IDEMPOTENCY_PENDING_TTL_SECS", default_value_t = 30)]
    idempotency_pending_ttl_secs: i64,

    /// Run one reconciliation sweep after the input is processed
    #[arg(long)]
    reconcile: bool,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "INVOICEPAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "INVOICEPAY_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn service_config(&self) -> Result<ServiceConfig> {
        let backend = match (self.backend, &self.db_path) {
            (Some(Backend::Memory), _) => StorageBackend::InMemory,
            (Some(Backend::Rocksdb), Some(path)) | (None, Some(path)) => {
                StorageBackend::RocksDb(path.clone())
            }
            (Some(Backend::Rocksdb), None) => {
                miette::bail!("--backend rocksdb requires --db-path")
            }
            (None, None) => StorageBackend::InMemory,
        };

        Ok(ServiceConfig {
            backend,
            authorization_ttl: ttl("--authorization-ttl-secs", self.authorization_ttl_secs)?,
            confirm_retry_budget: self.confirm_retry_budget,
            idempotency_pending_ttl: ttl(
                "--idempotency-pending-ttl-secs",
                self.idempotency_pending_ttl_secs,
            )?,
        })
    }
}

fn ttl(flag: &str, secs: i64) -> Result<Duration> {
    match Duration::try_seconds(secs) {
        Some(ttl) if secs > 0 => Ok(ttl),
        _ => miette::bail!("{flag} must be a positive number of seconds, got {secs}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let config = cli.service_config()?;
    let ledger = Ledger::open(&config.backend)?;
    let service = PaymentsService::new(ledger, &config);

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = CallReader::new(BufReader::new(file));
    let stdout = io::stdout();
    let mut writer = ReplyWriter::new(stdout.lock());
    let failures = run(&service, reader, &mut writer).await.into_diagnostic()?;
    if failures > 0 {
        eprintln!("{failures} call(s) failed");
    }

    if cli.reconcile {
        let report = service
            .reconciler(config.authorization_ttl)
            .sweep(Utc::now())
            .await?;
        eprintln!(
            "Reconciliation: {} voided, {} released, {} settled, {} diverged",
            report.voided.len(),
            report.released.len(),
            report.settled.len(),
            report.diverged.len()
        );
    }

    Ok(())
}
