use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::ledger::editor::RescalePolicy;
use crate::ledger::DEFAULT_PAYMENT_METHOD;

const DEFAULT_DB_PATH: &str = "feeledger.sqlite3";
const DEFAULT_LISTEN: &str = "127.0.0.1:5000";
const DEFAULT_LOG_LEVEL: &str = "info";
const MAX_MONEY_SCALE: u32 = 10;

/// feeledgerd - fee installment ledger service
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "feeledgerd")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "FEELEDGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the ledger database file (SQLite)
    #[arg(long, env = "FEELEDGER_DB")]
    pub db: Option<PathBuf>,

    /// Address the HTTP API listens on
    #[arg(long, env = "FEELEDGER_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Serve the line-delimited JSON protocol on stdin/stdout instead of HTTP
    #[arg(long)]
    pub stdio: bool,

    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[arg(long, env = "FEELEDGER_LOG")]
    pub log_level: Option<String>,

    /// What a total-only edit does to paid installments (freeze_paid, scale_all)
    #[arg(long, env = "FEELEDGER_RESCALE_POLICY")]
    pub rescale_policy: Option<RescalePolicy>,

    /// Label recorded when a payment arrives without a method
    #[arg(long, env = "FEELEDGER_DEFAULT_PAYMENT_METHOD")]
    pub default_payment_method: Option<String>,
}

/// Keys accepted in the TOML file. All optional; the command line wins.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub db: Option<PathBuf>,
    pub listen: Option<SocketAddr>,
    pub log_level: Option<String>,
    pub rescale_policy: Option<RescalePolicy>,
    pub default_payment_method: Option<String>,
    pub money_scale: Option<u32>,
    pub receipt_retry_limit: Option<u32>,
    pub verify_parties_on_create: Option<bool>,
}

impl FileConfig {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid configuration file")
    }
}

/// Knobs the ledger operations read at request time.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    pub rescale_policy: RescalePolicy,
    pub default_payment_method: String,
    /// Decimal places every amount is rounded to.
    pub money_scale: u32,
    /// Fresh receipt numbers tried after a collision before giving up.
    pub receipt_retry_limit: u32,
    pub verify_parties_on_create: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            rescale_policy: RescalePolicy::default(),
            default_payment_method: DEFAULT_PAYMENT_METHOD.to_string(),
            money_scale: 2,
            receipt_retry_limit: 3,
            verify_parties_on_create: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub listen: SocketAddr,
    pub stdio: bool,
    pub log_level: String,
    pub ledger: LedgerConfig,
}

impl Config {
    /// Reads the file named by `--config` (if any) and merges it under `args`.
    pub fn load(args: Args) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).with_context(|| {
                    format!("failed to read config file {}", path.to_string_lossy())
                })?;
                FileConfig::parse(&text)?
            }
            None => FileConfig::default(),
        };
        Self::resolve(args, file)
    }

    /// Precedence: command line / environment, then file, then defaults.
    pub fn resolve(args: Args, file: FileConfig) -> anyhow::Result<Self> {
        let defaults = LedgerConfig::default();
        let ledger = LedgerConfig {
            rescale_policy: args
                .rescale_policy
                .or(file.rescale_policy)
                .unwrap_or(defaults.rescale_policy),
            default_payment_method: args
                .default_payment_method
                .or(file.default_payment_method)
                .unwrap_or(defaults.default_payment_method),
            money_scale: file.money_scale.unwrap_or(defaults.money_scale),
            receipt_retry_limit: file
                .receipt_retry_limit
                .unwrap_or(defaults.receipt_retry_limit),
            verify_parties_on_create: file
                .verify_parties_on_create
                .unwrap_or(defaults.verify_parties_on_create),
        };
        if ledger.default_payment_method.trim().is_empty() {
            bail!("default_payment_method must not be empty");
        }
        if ledger.money_scale > MAX_MONEY_SCALE {
            bail!("money_scale must be at most {MAX_MONEY_SCALE}");
        }

        let listen = match args.listen.or(file.listen) {
            Some(addr) => addr,
            None => DEFAULT_LISTEN.parse().context("invalid default listen address")?,
        };

        Ok(Config {
            db_path: args
                .db
                .or(file.db)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            listen,
            stdio: args.stdio,
            log_level: args
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            ledger,
        })
    }
}
