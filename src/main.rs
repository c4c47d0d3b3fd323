//! burnlinkd - Burn-to-Mint Bridge Daemon
//!
//! Control surface:
//!
//! ```text
//! burnlinkd start      run the daemon loop (foreground)
//! burnlinkd once       one relay/scan/claim pass, then exit
//! burnlinkd bootstrap  tight-cadence catch-up, then exit
//! burnlinkd stop       signal a running daemon to stop
//! burnlinkd status     node tips, cursor, claim counts
//! burnlinkd logs       tail the newest log file
//! ```

use std::sync::Arc;

use anyhow::{Context, bail};

use burnlink::config::Config;
use burnlink::daemon::{BridgeDaemon, ShutdownSignal};
use burnlink::destination::{DestinationLedger, LedgerClient};
use burnlink::source::{BitcoinReader, SourceChainReader};
use burnlink::progress;
use burnlink::state::{StateDir, tail_log};

fn get_config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "burnlink.yaml".to_string()
}

fn get_command() -> Option<String> {
    // First non-flag argument, skipping flag values
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if arg == "--config" || arg == "-c" {
            i += 2;
            continue;
        }
        if !arg.starts_with('-') {
            return Some(arg.clone());
        }
        i += 1;
    }
    None
}

fn get_tail_lines() -> usize {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--lines" || args[i] == "-n") && i + 1 < args.len() {
            if let Ok(n) = args[i + 1].parse() {
                return n;
            }
        }
    }
    50
}

fn print_usage() {
    eprintln!("Usage: burnlinkd [-c CONFIG] <start|once|bootstrap|stop|status|logs>");
    eprintln!();
    eprintln!("  start      run the daemon loop");
    eprintln!("  once       run a single pass and exit");
    eprintln!("  bootstrap  catch up to the source tip, then exit");
    eprintln!("  stop       ask a running daemon to stop");
    eprintln!("  status     show node tips, scan cursor, claim counts");
    eprintln!("  logs       tail the newest log file (-n LINES)");
}

fn build_clients(
    config: &Config,
) -> anyhow::Result<(Arc<dyn SourceChainReader>, Arc<dyn DestinationLedger>)> {
    let source = BitcoinReader::new(&config.source.url, &config.source.user, &config.source.password)
        .context("building source RPC client")?;
    let ledger = LedgerClient::new(
        &config.destination.url,
        config.destination.user.as_deref(),
        config.destination.password.as_deref(),
    )
    .context("building destination RPC client")?;
    Ok((Arc::new(source), Arc::new(ledger)))
}

/// Both nodes must answer before the daemon takes the instance lock;
/// a misconfigured endpoint should fail fast, not spin.
async fn check_nodes(
    source: &Arc<dyn SourceChainReader>,
    ledger: &Arc<dyn DestinationLedger>,
) -> anyhow::Result<(u64, u64)> {
    let source_tip = source
        .tip_height()
        .await
        .context("source node unreachable")?;
    let header_tip = ledger
        .header_tip()
        .await
        .context("destination node unreachable")?;
    Ok((source_tip, header_tip))
}

async fn run_daemon(config: Config, bootstrap: bool, once: bool) -> anyhow::Result<()> {
    let (source, ledger) = build_clients(&config)?;
    let (source_tip, header_tip) = check_nodes(&source, &ledger).await?;
    tracing::info!(
        "Connected: source tip {}, ledger header tip {}",
        source_tip,
        header_tip
    );

    let state_dir = Arc::new(StateDir::new(config.state_dir.clone())?);
    let _lock = state_dir.acquire_lock()?;

    let shutdown = Arc::new(ShutdownSignal::new());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, shutting down");
                shutdown.request_shutdown();
            }
        });
    }

    let daemon = BridgeDaemon::new(source, ledger, &config, Some(state_dir), shutdown);
    if once {
        let report = daemon.run_pass().await?;
        println!(
            "Pass complete: scanned_to {:?}, burns {}, submitted {}, duplicate {}",
            report.scanned_to, report.burns_found, report.claims_submitted, report.claims_duplicate
        );
    } else if bootstrap {
        let report = daemon.run_bootstrap().await?;
        println!(
            "Bootstrap complete: scanned_to {:?}, burns {}, submitted {}",
            report.scanned_to, report.burns_found, report.claims_submitted
        );
    } else {
        daemon.run().await?;
    }
    Ok(())
}

/// Always prints the last-known-good local state first; node-derived
/// lines degrade to a warning when a node is unreachable.
async fn show_status(config: Config) -> anyhow::Result<()> {
    println!(
        "burnlinkd {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    let state_dir = StateDir::new(config.state_dir.clone())?;
    match state_dir.running_pid() {
        Some(pid) => println!("daemon: running (pid {})", pid),
        None => println!("daemon: not running"),
    }
    if let Some(mirror) = progress::read_mirror(&state_dir.mirror_path()) {
        println!(
            "local mirror:    {} (updated {})",
            mirror.height, mirror.updated_at
        );
    }

    let (source, ledger) = build_clients(&config)?;
    let (source_tip, header_tip) = match check_nodes(&source, &ledger).await {
        Ok(tips) => tips,
        Err(e) => {
            println!("nodes:           unreachable ({})", e);
            return Ok(());
        }
    };
    println!("source tip:      {}", source_tip);
    println!("ledger headers:  {}", header_tip);

    match ledger.scan_progress().await? {
        Some(p) => println!("scan cursor:     {} ({})", p.height, p.hash),
        None => println!(
            "scan cursor:     unset (checkpoint {})",
            config.relay.checkpoint_height
        ),
    }

    let pending = ledger
        .list_claims(Some(burnlink::ClaimStatus::Pending))
        .await?;
    let finalized = ledger
        .list_claims(Some(burnlink::ClaimStatus::Final))
        .await?;
    println!("claims pending:  {}", pending.len());
    println!("claims final:    {}", finalized.len());
    Ok(())
}

fn stop_daemon(config: &Config) -> anyhow::Result<()> {
    let state_dir = StateDir::new(config.state_dir.clone())?;
    match state_dir.running_pid() {
        Some(pid) => {
            state_dir.request_stop()?;
            println!("Stop requested for pid {}", pid);
        }
        None => println!("No running daemon found"),
    }
    Ok(())
}

fn show_logs(config: &Config) -> anyhow::Result<()> {
    let dir = std::path::Path::new(&config.log.dir);
    let tail = tail_log(dir, &config.log.file, get_tail_lines())?;
    print!("{}", tail);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = match get_command() {
        Some(c) => c,
        None => {
            print_usage();
            std::process::exit(2);
        }
    };

    let config_path = get_config_path();
    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading config from {}", config_path))?;

    // stop/logs must not write to the daemon's log files
    let _log_guard = match command.as_str() {
        "stop" | "logs" => None,
        _ => Some(burnlink::logging::init_logging(&config.log)),
    };

    match command.as_str() {
        "start" => run_daemon(config, false, false).await,
        "once" => run_daemon(config, false, true).await,
        "bootstrap" => run_daemon(config, true, false).await,
        "status" => show_status(config).await,
        "stop" => stop_daemon(&config),
        "logs" => show_logs(&config),
        other => {
            print_usage();
            bail!("unknown command: {}", other);
        }
    }
}
