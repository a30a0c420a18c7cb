//! CLI entry point for `mailbackup`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use mailbackup::backup::progress::{FolderProgress, ProgressReporter};
use mailbackup::backup::{BackupOrchestrator, CycleReport, ShutdownPolicy};
use mailbackup::config::{self, Config};
use mailbackup::source::imap::ImapConnector;

/// Periodically back up IMAP mailboxes to local CSV, JSON and attachment files.
#[derive(Parser)]
#[command(name = "mailbackup", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (default: $MAILBACKUP_CONFIG, then the user config dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root directory for backup directories (overrides general.output_dir)
    #[arg(short, long, global = true, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Minutes between cycles (overrides schedule.interval_minutes)
    #[arg(short, long, global = true, value_name = "MINUTES")]
    interval: Option<u64>,

    /// What to do with running sessions on Ctrl-C: drain or abort
    #[arg(long, global = true, value_name = "POLICY")]
    shutdown: Option<ShutdownPolicy>,

    /// Disable progress bars
    #[arg(long, global = true)]
    no_progress: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up now, then once per interval until interrupted (default)
    Run,
    /// Run a single backup cycle and exit
    Once,
    /// Validate the configuration and list the accounts
    Check,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Completions { shell }) => return cmd_completions(shell),
        Some(Commands::Manpage) => return cmd_manpage(),
        _ => {}
    }

    let mut config = config::load_config(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);

    let log_level = match cli.verbose {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    };
    setup_logging(log_level, &config);
    match config.source {
        Some(ref path) => tracing::info!(
            path = %path.display(),
            accounts = config.accounts.len(),
            "Loaded config"
        ),
        None => tracing::debug!("No config file found, using defaults"),
    }

    match cli.command {
        Some(Commands::Check) => cmd_check(&config),
        Some(Commands::Once) => cmd_once(&config, !cli.no_progress).await,
        Some(Commands::Run) | None => cmd_run(&config, !cli.no_progress).await,
        Some(Commands::Completions { .. }) | Some(Commands::Manpage) => Ok(()),
    }
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(ref dir) = cli.output {
        config.general.output_dir = dir.clone();
    }
    if let Some(minutes) = cli.interval {
        config.schedule.interval_minutes = minutes;
    }
    if let Some(policy) = cli.shutdown {
        config.schedule.shutdown = policy;
    }
}

/// Set up tracing with stderr output and a daily rolling log file.
///
/// Level precedence: `-v` flags, then `RUST_LOG`, then `general.log_level`.
fn setup_logging(verbose: Option<&str>, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let env_filter = match verbose {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
    };

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::log_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "mailbackup.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Build the orchestrator for the IMAP transport.
fn build_orchestrator(config: &Config, progress: bool) -> anyhow::Result<BackupOrchestrator> {
    let accounts = config.resolve_accounts()?;
    let connector = ImapConnector::new()
        .accept_invalid_certs(config.connection.accept_invalid_certs)
        .timeout(config.connect_timeout()?);
    let orchestrator =
        BackupOrchestrator::new(accounts, Arc::new(connector), config.backup_options()?)?;

    if progress {
        Ok(orchestrator.with_progress(Arc::new(BarReporter::new()?)))
    } else {
        Ok(orchestrator)
    }
}

/// Cancel `token` on Ctrl-C or SIGTERM.
fn spawn_signal_handler(token: CancellationToken, policy: ShutdownPolicy) {
    tokio::spawn(async move {
        shutdown_signal().await;
        match policy {
            ShutdownPolicy::Drain => {
                tracing::warn!("Shutdown requested; waiting for running sessions to finish")
            }
            ShutdownPolicy::Abort => tracing::warn!("Shutdown requested; stopping sessions"),
        }
        token.cancel();
    });
}

async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let term = async {
        if let Ok(mut s) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            s.recv().await;
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();
    tokio::select! { _ = ctrl_c => {}, _ = term => {} }
}

/// Back up now and then once per interval.
async fn cmd_run(config: &Config, progress: bool) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, progress)?;
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone(), orchestrator.options().shutdown);

    tracing::info!(
        accounts = orchestrator.accounts().len(),
        interval_minutes = config.schedule.interval_minutes,
        shutdown = %orchestrator.options().shutdown,
        "Backup scheduler started"
    );
    orchestrator.run_forever(cancel).await;
    Ok(())
}

/// Run one cycle and print its summary.
async fn cmd_once(config: &Config, progress: bool) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, progress)?;
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone(), orchestrator.options().shutdown);

    let report = orchestrator.run_cycle(&cancel).await;
    print_cycle_summary(&report);

    if report.all_failed() {
        anyhow::bail!("no account was backed up successfully");
    }
    Ok(())
}

/// Validate the configuration and print the resolved accounts.
fn cmd_check(config: &Config) -> anyhow::Result<()> {
    config.validate()?;
    let accounts = config.resolve_accounts()?;
    let root = &config.general.output_dir;

    println!();
    println!("  {:<20} {}", "Output directory", root.display());
    println!("  {:<20} {} min", "Interval", config.schedule.interval_minutes);
    println!("  {:<20} {}", "Shutdown", config.schedule.shutdown);
    println!("  {:<20} {} s", "Socket timeout", config.connection.timeout_secs);
    println!("  {:<20} {}", "Accounts", accounts.len());
    println!();
    for account in &accounts {
        println!(
            "    {}  {}:{}  ->  {}",
            account.address,
            account.host,
            account.port,
            root.join(account.backup_dir_name()).display()
        );
    }
    println!();
    if accounts.is_empty() {
        anyhow::bail!("no accounts configured");
    }
    Ok(())
}

fn print_cycle_summary(report: &CycleReport) {
    println!();
    for session in &report.completed {
        println!(
            "  {:<32} {:>6} messages  {:>5} attachments  {:>4} skipped  {:>3} folders failed{}",
            session.address,
            session.records,
            session.attachments,
            session.failed_messages,
            session.failed_folders,
            if session.export_ok { "" } else { "  (export failed)" }
        );
    }
    println!();
    println!(
        "  {} completed, {} failed, {} cancelled in {:.2?}",
        report.completed.len(),
        report.failed,
        report.cancelled,
        report.elapsed
    );
    println!();
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailbackup", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// One progress bar per folder being fetched.
struct BarReporter {
    multi: MultiProgress,
    style: ProgressStyle,
}

impl BarReporter {
    fn new() -> anyhow::Result<Self> {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:40} [{bar:30.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-");
        Ok(Self {
            multi: MultiProgress::new(),
            style,
        })
    }
}

impl ProgressReporter for BarReporter {
    fn folder_started(&self, account: &str, folder: &str, total: u64) -> Box<dyn FolderProgress> {
        let pb = self.multi.add(ProgressBar::new(total));
        pb.set_style(self.style.clone());
        pb.set_message(format!("{account} {folder}"));
        Box::new(FolderBar(pb))
    }
}

struct FolderBar(ProgressBar);

impl FolderProgress for FolderBar {
    fn advance(&mut self) {
        self.0.inc(1);
    }

    fn finish(&mut self) {
        self.0.finish_and_clear();
    }
}
