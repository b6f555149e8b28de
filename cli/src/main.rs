//! chainrelay CLI — run the oracle request relay.
//!
//! Usage:
//! ```bash
//! # Relay every subscription in subs.json to a local node
//! chainrelay run --chainlink-url localhost:6688 --access-key KEY --secret SECRET \
//!     --subscriptions subs.json
//!
//! # Check a subscription file without connecting to anything
//! chainrelay validate --subscriptions subs.json
//!
//! # List supported chains
//! chainrelay chains
//! ```
//!
//! Every flag falls back to an environment variable (`CHAINRELAY_*`).

use std::env;
use std::fs;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};

use chainrelay_core::store::StoreSnapshot;
use chainrelay_core::{ChainType, InMemoryConfigStore};
use chainrelay_service::{init_tracing, normalize_localhost, RelayConfig, SubscriptionManager};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "validate" => cmd_validate(&args[2..]),
        "chains" => {
            cmd_chains();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chainrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainrelay {}", env!("CARGO_PKG_VERSION"));
    println!("Relay on-chain oracle requests to a job execution node\n");
    println!("USAGE:");
    println!("    chainrelay <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run        Start every subscription and relay until ctrl-c");
    println!("    validate   Check a subscription file");
    println!("    chains     List supported chains");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("RUN FLAGS:");
    println!("    --chainlink-url <URL>    Job execution node    [env: CHAINRELAY_CHAINLINK_URL]");
    println!("    --access-key <KEY>       Trigger access key    [env: CHAINRELAY_ACCESS_KEY]");
    println!("    --secret <SECRET>        Trigger secret        [env: CHAINRELAY_SECRET]");
    println!("    --subscriptions <FILE>   Endpoints and jobs    [env: CHAINRELAY_SUBSCRIPTIONS]");
    println!("    --config <FILE>          Relay tunables (JSON) [env: CHAINRELAY_CONFIG]");
    println!("    --log-level <LEVEL>      Default log level     [env: CHAINRELAY_LOG_LEVEL]");
    println!("    --log-json               JSON log lines        [env: CHAINRELAY_LOG_JSON]");
}

async fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    let config = relay_config(args)?;
    init_tracing(&config.log);

    let snapshot = load_snapshot(args)?;
    let store = Arc::new(InMemoryConfigStore::from_snapshot(snapshot));
    let manager = SubscriptionManager::from_config(&config, store).context("building trigger client")?;

    tracing::info!(chainlink_url = %config.chainlink_url, "starting relay");
    let started = manager.bootstrap().await?;
    if started == 0 {
        tracing::warn!("no subscription could be started");
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");
    manager.shutdown_all().await;

    let stats = manager.dispatcher().stats();
    tracing::info!(delivered = stats.delivered, failed = stats.failed, "relay stopped");
    Ok(())
}

fn cmd_validate(args: &[String]) -> anyhow::Result<()> {
    let snapshot = load_snapshot(args)?;
    let mut problems = 0;

    for endpoint in &snapshot.endpoints {
        if let Err(e) = endpoint.validate() {
            println!("  endpoint {:<20} {e}", endpoint.name);
            problems += 1;
        }
    }
    for sub in &snapshot.subscriptions {
        let Some(endpoint) = snapshot.endpoints.iter().find(|e| e.name == sub.endpoint_name) else {
            println!("  job {:<25} unknown endpoint {}", sub.job_id, sub.endpoint_name);
            problems += 1;
            continue;
        };
        if let Err(e) = sub.validate_for(endpoint) {
            println!("  job {:<25} {e}", sub.job_id);
            problems += 1;
        }
    }

    if problems > 0 {
        bail!("{problems} problem(s) found");
    }
    println!(
        "OK: {} endpoint(s), {} subscription(s)",
        snapshot.endpoints.len(),
        snapshot.subscriptions.len()
    );
    Ok(())
}

fn cmd_chains() {
    println!("Supported chains:\n");
    for chain in ChainType::ALL {
        let transports = match chain {
            ChainType::Substrate => "ws/wss",
            ChainType::Tezos | ChainType::Ontology => "http/https",
            _ => "ws/wss, http/https",
        };
        println!("  {:<20} {transports}", chain.as_str());
    }
}

/// Tunables from `--config`, then credentials and logging from flags or env.
fn relay_config(args: &[String]) -> anyhow::Result<RelayConfig> {
    let mut config = match setting(args, "--config", "CHAINRELAY_CONFIG") {
        Some(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?
        }
        None => RelayConfig::new("", "", ""),
    };

    if let Some(url) = setting(args, "--chainlink-url", "CHAINRELAY_CHAINLINK_URL") {
        config.chainlink_url = url;
    }
    if let Some(key) = setting(args, "--access-key", "CHAINRELAY_ACCESS_KEY") {
        config.access_key = key;
    }
    if let Some(secret) = setting(args, "--secret", "CHAINRELAY_SECRET") {
        config.secret = secret;
    }
    if let Some(level) = setting(args, "--log-level", "CHAINRELAY_LOG_LEVEL") {
        config.log.level = level;
    }
    if args.iter().any(|a| a == "--log-json") {
        config.log.json = true;
    } else if let Ok(v) = env::var("CHAINRELAY_LOG_JSON") {
        config.log.json = matches!(v.as_str(), "1" | "true" | "yes");
    }

    if config.chainlink_url.is_empty() {
        bail!("--chainlink-url is required");
    }
    if config.access_key.is_empty() || config.secret.is_empty() {
        bail!("--access-key and --secret are required");
    }
    config.chainlink_url = normalize_localhost(&config.chainlink_url);
    Ok(config)
}

fn load_snapshot(args: &[String]) -> anyhow::Result<StoreSnapshot> {
    let Some(path) = setting(args, "--subscriptions", "CHAINRELAY_SUBSCRIPTIONS") else {
        bail!("--subscriptions is required");
    };
    let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))
}

fn setting(args: &[String], flag: &str, var: &str) -> Option<String> {
    parse_flag(args, flag).or_else(|| env::var(var).ok().filter(|v| !v.is_empty()))
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}
