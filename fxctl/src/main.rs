//! Cashbook FX CLI
//!
//! Inspect and maintain the local exchange-rate cache.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cashbook_common::Currency;
use cashbook_fx::{parse_amount, CurrencyService, FileStore, FxConfig, RefreshOutcome};

mod feed;

/// Cashbook exchange-rate cache CLI
#[derive(Parser, Debug)]
#[command(name = "fxctl")]
#[command(about = "Inspect and maintain the Cashbook exchange-rate cache")]
struct Args {
    /// Directory holding the persisted rate table (overrides FX_STORE_DIR)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// JSON rate feed used for refreshes (overrides FX_FEED_PATH)
    #[arg(long)]
    feed: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Print the stored rates
    Rates {
        /// Print the persisted snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert an amount between two currencies
    Convert {
        #[arg(allow_hyphen_values = true)]
        amount: String,
        #[arg(value_parser = parse_currency)]
        from: Currency,
        #[arg(value_parser = parse_currency)]
        to: Currency,
    },

    /// Override a rate. RATE is units of FROM per one TO
    Set {
        #[arg(value_parser = parse_currency)]
        from: Currency,
        #[arg(value_parser = parse_currency)]
        to: Currency,
        #[arg(allow_hyphen_values = true)]
        rate: f64,
    },

    /// Refresh from the rate feed now
    Refresh,

    /// Turn periodic refresh on or off
    AutoUpdate {
        #[arg(value_enum)]
        mode: Toggle,
    },

    /// Initialize and keep rates refreshed until stopped
    Watch {
        /// Run duration in seconds (0 = until Ctrl+C)
        #[arg(long, default_value = "0")]
        duration: u64,
    },
}

/// Validating parser; `Currency`'s `From<String>` would accept any text.
fn parse_currency(raw: &str) -> Result<Currency, String> {
    raw.parse::<Currency>().map_err(|e| e.to_string())
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = FxConfig::from_env()?;
    if let Some(dir) = args.store_dir {
        config.store_dir = dir;
    }
    if let Some(feed) = args.feed {
        config.feed_path = Some(feed);
    }

    init_logging(&config.log_level);

    let store = Arc::new(
        FileStore::open(&config.store_dir)
            .with_context(|| format!("Failed to open store at {}", config.store_dir.display()))?,
    );
    let source = feed::rate_source(config.feed_path.as_deref());

    let service = match CurrencyService::new(config, store, source) {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(anyhow::anyhow!("Configuration error: {}", e));
        }
    };

    run(&service, args.command).await
}

fn init_logging(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let json = std::env::var("FX_LOG_JSON")
        .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn run(service: &CurrencyService, command: Command) -> anyhow::Result<()> {
    if !matches!(command, Command::Watch { .. }) {
        service.restore();
    }

    match command {
        Command::Rates { json } => print_rates(service, json)?,

        Command::Convert { amount, from, to } => {
            let quote = service.quote(parse_amount(&amount), &from, &to);
            println!(
                "{} {} = {} {} (rate {})",
                quote.input,
                from,
                quote.rounded_output(),
                to,
                quote.rate
            );
        }

        Command::Set { from, to, rate } => {
            service.set_exchange_rate(&from, &to, rate)?;
            println!("{}_TO_{} set to {}", from, to, rate);
        }

        Command::Refresh => match service.refresh_now().await {
            RefreshOutcome::Updated {
                applied,
                rejected,
                missing,
            } => println!(
                "refreshed: {} applied, {} rejected, {} missing",
                applied, rejected, missing
            ),
            RefreshOutcome::Failed { reason } => anyhow::bail!("Refresh failed: {}", reason),
        },

        Command::AutoUpdate { mode: Toggle::On } => {
            service.enable_auto_update();
            println!("auto-update on");
        }

        Command::AutoUpdate { mode: Toggle::Off } => {
            service.disable_auto_update();
            println!("auto-update off");
        }

        Command::Watch { duration } => watch(service, duration).await?,
    }

    Ok(())
}

async fn watch(service: &CurrencyService, duration: u64) -> anyhow::Result<()> {
    let summary = service.initialize().await;
    if !summary.armed {
        info!("Auto-update is off, rates will not be refreshed");
    }

    info!("Press Ctrl+C to stop");

    let elapsed = async {
        if duration > 0 {
            tokio::time::sleep(Duration::from_secs(duration)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Shutdown signal received");
        }
        _ = elapsed => info!(duration_secs = duration, "Watch duration elapsed"),
    }

    print_rates(service, false)
}

fn print_rates(service: &CurrencyService, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&service.table().snapshot())?);
        return Ok(());
    }

    println!("pivot:       {}", service.pivot());
    for (key, rate) in service.get_all_rates() {
        println!("{:<12} {}", key, rate);
    }
    match service.last_update() {
        Some(ts) => println!("last update: {}", ts.to_rfc3339()),
        None => println!("last update: never"),
    }
    println!(
        "auto-update: {}",
        if service.is_auto_update() { "on" } else { "off" }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Command {
        Args::try_parse_from(std::iter::once("fxctl").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_convert() {
        assert_eq!(
            parse(&["convert", "15,000", "syp", "USD"]),
            Command::Convert {
                amount: "15,000".to_string(),
                from: Currency::syp(),
                to: Currency::usd(),
            }
        );
    }

    #[test]
    fn test_parse_set_keeps_negative_rate() {
        assert_eq!(
            parse(&["set", "SYP", "USD", "-5"]),
            Command::Set {
                from: Currency::syp(),
                to: Currency::usd(),
                rate: -5.0,
            }
        );
    }

    #[test]
    fn test_parse_auto_update() {
        assert_eq!(
            parse(&["auto-update", "off"]),
            Command::AutoUpdate { mode: Toggle::Off }
        );
    }

    #[test]
    fn test_parse_watch_default_duration() {
        assert_eq!(parse(&["watch"]), Command::Watch { duration: 0 });
    }

    #[test]
    fn test_rejects_bad_currency_code() {
        for args in [
            ["fxctl", "convert", "1", "US", "SYP"],
            ["fxctl", "convert", "1", "USD", "SY1"],
            ["fxctl", "set", "SYPX", "USD", "15000"],
            ["fxctl", "set", "SYP", "", "15000"],
        ] {
            assert!(Args::try_parse_from(args).is_err(), "accepted {:?}", args);
        }
    }

    #[test]
    fn test_currency_argument_is_normalized() {
        assert_eq!(
            parse(&["set", " try ", "usd", "33"]),
            Command::Set {
                from: Currency::new("TRY"),
                to: Currency::usd(),
                rate: 33.0,
            }
        );
    }

    #[tokio::test]
    async fn test_set_then_rates_from_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let service = || {
            CurrencyService::new(
                FxConfig::default(),
                Arc::new(FileStore::open(dir.path()).unwrap()),
                feed::rate_source(None),
            )
            .unwrap()
        };

        run(
            &service(),
            Command::Set {
                from: Currency::syp(),
                to: Currency::usd(),
                rate: 14200.0,
            },
        )
        .await
        .unwrap();

        let reopened = service();
        reopened.restore();
        assert_eq!(reopened.get_all_rates()["SYP_TO_USD"], 14200.0);
    }

    #[tokio::test]
    async fn test_refresh_without_feed_fails() {
        let dir = tempfile::tempdir().unwrap();
        let service = CurrencyService::new(
            FxConfig::default(),
            Arc::new(FileStore::open(dir.path()).unwrap()),
            feed::rate_source(None),
        )
        .unwrap();

        assert!(run(&service, Command::Refresh).await.is_err());
        assert_eq!(service.last_update(), None);
    }
}
