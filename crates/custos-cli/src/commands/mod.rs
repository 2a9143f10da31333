use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use custos_config::{ConfigLoader, CustosConfig, WarningSeverity};
use custos_core::{AccountId, CustosError, VaultExecutor};
use custos_runtime::{DisconnectedVault, DryRunVault, SystemClock, VaultService};
use custos_store::{AuditFilter, Store};

mod start;

/// Custos — delegated authority for agent-operated vaults
#[derive(Parser)]
#[command(name = "custos", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custos.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the renewal scheduler and the HTTP API
    Start {
        /// Don't start the API server
        #[arg(long)]
        no_server: bool,
    },
    /// Run a single renewal pass and print the report
    Tick,
    /// Show, verify or export the audit trail
    Audit {
        /// Only entries for this account
        #[arg(short, long)]
        account: Option<AccountId>,

        /// Write matching entries as JSON lines to FILE
        #[arg(long, value_name = "FILE")]
        export: Option<PathBuf>,

        /// Verify the hash chain instead of listing entries
        #[arg(long, conflicts_with = "export")]
        verify: bool,

        /// Number of entries to show (default 50)
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show an account's mode, credential, spend and subscriptions
    Status {
        account: AccountId,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check configuration, store and audit chain
    Doctor,
}

impl Cli {
    pub async fn run(self) -> custos_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        let filter = || {
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level))
        };

        match config.logging.format.as_str() {
            "json" => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .json()
                .with_target(true)
                .init(),
            "compact" => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .compact()
                .with_target(false)
                .init(),
            _ => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .init(),
        }

        match self.command {
            Commands::Start { no_server } => start::cmd_start(config, no_server).await,
            Commands::Tick => Self::cmd_tick(config).await,
            Commands::Audit {
                account,
                export,
                verify,
                limit,
                json,
            } => Self::cmd_audit(config, account, export, verify, limit, json),
            Commands::Status { account, json } => Self::cmd_status(config, account, json).await,
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Doctor => Self::cmd_doctor(config),
        }
    }

    async fn cmd_tick(config: CustosConfig) -> custos_core::Result<()> {
        let service = open_service(&config)?;
        let report = service.tick().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }

    fn cmd_audit(
        config: CustosConfig,
        account: Option<AccountId>,
        export: Option<PathBuf>,
        verify: bool,
        limit: usize,
        json: bool,
    ) -> custos_core::Result<()> {
        let store = Store::open(&config.store.db_path)?;

        if verify {
            let entries = store.verify_audit_chain()?;
            println!("✅ Audit chain intact ({entries} entries)");
            return Ok(());
        }

        let mut filter = AuditFilter {
            account_id: account,
            ..AuditFilter::default()
        };

        if let Some(path) = export {
            let file = std::io::BufWriter::new(std::fs::File::create(&path)?);
            let written = store.export_audit_jsonl(&filter, file)?;
            println!("Exported {written} entries to {}", path.display());
            return Ok(());
        }

        filter.limit = Some(limit);
        let entries = store.audit_entries(&filter)?;

        if json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }

        if entries.is_empty() {
            println!("No audit log entries.");
            return Ok(());
        }

        println!("\x1b[1mAudit Log\x1b[0m ({} entries)", entries.len());
        println!("{}", "-".repeat(80));

        for entry in &entries {
            let color = match entry.event_type.as_str() {
                t if t.contains("denied") || t.contains("failed") => "\x1b[31m", // red
                t if t.contains("confirm") || t.contains("ready") => "\x1b[33m", // yellow
                t if t.contains("executed") || t.contains("renewed") => "\x1b[32m", // green
                t if t.contains("credential") || t.contains("session") => "\x1b[35m", // magenta
                _ => "\x1b[37m",
            };
            let subject = entry
                .action_id
                .or(entry.account_id)
                .map(|id| id.to_string())
                .unwrap_or_default();

            println!(
                "\x1b[90m#{} {}\x1b[0m  {color}{}\x1b[0m  {subject}",
                entry.seq,
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.event_type
            );
            if !entry.details.is_null() {
                println!("   \x1b[90m{}\x1b[0m", truncate(&entry.details.to_string(), 120));
            }
        }

        Ok(())
    }

    async fn cmd_status(
        config: CustosConfig,
        account: AccountId,
        json: bool,
    ) -> custos_core::Result<()> {
        let service = open_service(&config)?;
        let status = service.get_account_status(account).await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        let acct = &status.account;
        println!("Account {}", acct.id);
        println!("   Vault:   {}", acct.vault);
        println!("   Owner:   {}", acct.owner);
        match &acct.agent {
            Some(agent) => println!("   Agent:   {agent}"),
            None => println!("   Agent:   (none)"),
        }
        println!(
            "   Mode:    {}{}",
            acct.mode,
            if acct.paused { " (paused)" } else { "" }
        );

        match &status.credential {
            Some(cred) if status.credential_valid => {
                println!("   Session key: {} (valid)", cred.address)
            }
            Some(cred) => println!("   Session key: {} (invalid)", cred.address),
            None => println!("   Session key: none"),
        }

        match status.daily_limit_usd {
            Some(limit) => println!(
                "   Spent today: ${:.2} of ${limit:.2}",
                status.spent_today_usd
            ),
            None => println!("   Spent today: ${:.2}", status.spent_today_usd),
        }
        println!("   Awaiting confirmation: {}", status.pending_confirmations);

        if !status.subscriptions.is_empty() {
            println!();
            println!("   Subscriptions:");
            for sub in &status.subscriptions {
                println!(
                    "     {} {} ${:.2} expires {} auto-renewal {}",
                    sub.id,
                    sub.plan,
                    sub.renewal_cost_usd,
                    sub.expires_at.format("%Y-%m-%d"),
                    if sub.auto_renewal_enabled { "on" } else { "off" }
                );
            }
        }

        if !status.recent_actions.is_empty() {
            println!();
            println!("   Recent actions:");
            for action in &status.recent_actions {
                println!(
                    "     {} {} ${:.2} {}",
                    action.id,
                    action.action_type,
                    action.value_usd,
                    action.state
                );
            }
        }

        Ok(())
    }

    fn cmd_config(config: CustosConfig, json: bool) -> custos_core::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| CustosError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_doctor(config: CustosConfig) -> custos_core::Result<()> {
        println!("🩺 Custos Doctor");
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{e}");
                return Ok(());
            }
        };

        let mut ok_count = 0;
        let mut warn_count = 0;
        let mut info_count = 0;

        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Warning | WarningSeverity::Error => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
            }
        }
        if warnings.is_empty() {
            ok_count += 1;
        }

        let db_path = &config.store.db_path;
        if db_path.exists() {
            match Store::open(db_path).and_then(|store| store.verify_audit_chain()) {
                Ok(entries) => {
                    println!("  ✅ store {}: audit chain intact ({entries} entries)", db_path.display());
                    ok_count += 1;
                }
                Err(e) => {
                    println!("  ❌ store {}: {e}", db_path.display());
                    warn_count += 1;
                }
            }
        } else {
            println!(
                "  💡 store {}: not created yet (created on first start)",
                db_path.display()
            );
            info_count += 1;
        }

        if config.execution.dry_run {
            println!("  💡 execution.dry_run: vault calls are simulated, nothing reaches the chain");
            info_count += 1;
        }

        if config.server.api_key.is_some() {
            ok_count += 1;
        } else {
            println!("  💡 server.api_key: the API accepts unauthenticated requests");
            info_count += 1;
        }

        println!();
        println!("  ✅ {ok_count} checks passed, ⚠️  {warn_count} warnings, 💡 {info_count} suggestions");

        Ok(())
    }
}

/// The executor `start`, `tick` and `status` drive vault calls through.
fn executor_for(config: &CustosConfig) -> Arc<dyn VaultExecutor> {
    if config.execution.dry_run {
        Arc::new(DryRunVault::new())
    } else {
        Arc::new(DisconnectedVault)
    }
}

/// Build a service over the configured store. Does not recover interrupted actions.
fn open_service(config: &CustosConfig) -> custos_core::Result<VaultService> {
    let store = Store::open(&config.store.db_path)?;
    VaultService::new(config, store, executor_for(config), Arc::new(SystemClock))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
