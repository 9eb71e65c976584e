use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use meridian_clock::SystemClock;
use meridian_gateway::PaperBroker;
use meridian_order_manager::{ShutdownPolicy, TradingMode};
use meridian_runner::{EngineCoordinator, EngineEvent, EngineOptions, PaperFeed, load_config, load_default_config};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Meridian automated trading engine
#[derive(Parser, Debug)]
#[command(name = "meridian")]
#[command(about = "Run the Meridian trading engine", long_about = None)]
struct Cli {
    /// Engine configuration (JSON); the embedded paper config when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ModeArg::Paper)]
    mode: ModeArg,

    /// Required before any order is sent in live mode
    #[arg(long)]
    confirm_live: bool,

    /// What to do with open orders and positions on shutdown
    #[arg(long, value_enum, default_value_t = PolicyArg::LeaveOpen)]
    shutdown_policy: PolicyArg,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration_secs: Option<u64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
#[value(rename_all = "kebab-case")]
enum ModeArg {
    Paper,
    Live,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
#[value(rename_all = "kebab-case")]
enum PolicyArg {
    LeaveOpen,
    CancelOpen,
    Flatten,
}

impl From<PolicyArg> for ShutdownPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::LeaveOpen => ShutdownPolicy::LeaveOpen,
            PolicyArg::CancelOpen => ShutdownPolicy::CancelOpen,
            PolicyArg::Flatten => ShutdownPolicy::Flatten,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => load_default_config()?,
    };

    if cli.mode == ModeArg::Live {
        if !cli.confirm_live {
            bail!("live mode requires --confirm-live");
        }
        bail!("no live broker adapter is linked into this build; run with --mode paper");
    }

    let broker = Arc::new(
        PaperBroker::new(config.paper.starting_cash).with_auto_fill(config.paper.auto_fill),
    );
    for instrument in &config.instruments {
        if let Some(price) = config.paper.initial_prices.get(instrument.symbol()) {
            broker.set_price(instrument.clone(), *price);
        }
    }

    let feed = PaperFeed::new(&config.instruments, &config.paper);
    let tick_interval = Duration::from_millis(config.paper.tick_interval_ms.max(1));
    let policy = ShutdownPolicy::from(cli.shutdown_policy);

    let coordinator = Arc::new(EngineCoordinator::new(
        config,
        EngineOptions {
            mode: TradingMode::Paper,
            live_confirmed: false,
        },
        broker.clone(),
        SystemClock::shared(),
    )?);
    let mut events = coordinator.events();

    coordinator.start().await?;

    let (stop_feed, feed_stop) = watch::channel(false);
    let feed_task = tokio::spawn(feed.run(broker.clone(), tick_interval, feed_stop));

    let stopper = coordinator.clone();
    let duration = cli.duration_secs.map(Duration::from_secs);
    tokio::spawn(async move {
        match duration {
            Some(limit) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = tokio::time::sleep(limit) => {}
                }
            }
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Could not listen for Ctrl-C: {}", e);
                    return;
                }
            }
        }
        stopper.shutdown(policy);
    });

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::OrderSubmitted {
                    strategy,
                    instrument,
                    side,
                    quantity,
                    ..
                } => info!("{} sent {:?} {} {}", strategy, side, quantity, instrument),
                EngineEvent::TradingHalted { reason } => warn!("Trading halted: {}", reason),
                EngineEvent::PositionMismatch(m) => warn!(
                    "Position mismatch on {}: ledger {}, broker {}",
                    m.instrument, m.ledger_quantity, m.broker_quantity
                ),
                EngineEvent::Order(notice) => warn!("Order notice: {:?}", notice),
                _ => {}
            }
        }
    });

    let outcome = coordinator.run().await;
    stop_feed.send_replace(true);
    let _ = feed_task.await;

    let report = outcome?;
    let stats = coordinator.stats();
    info!(
        "Session done: {} intent(s), {} submitted, {} rejected, {} dropped; {} left open, {} cancelled, {} flatten order(s)",
        stats.intents,
        stats.submitted,
        stats.rejected,
        stats.dropped,
        report.left_open.len(),
        report.cancelled.len(),
        report.flatten_orders.len()
    );
    for position in coordinator.ledger().positions() {
        info!(
            "  {} qty {} avg {} realized {} unrealized {}",
            position.instrument,
            position.quantity,
            position.average_cost,
            position.realized_pnl,
            position.unrealized_pnl
        );
    }
    Ok(())
}
