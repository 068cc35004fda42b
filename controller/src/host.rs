use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use chrono_tz::Tz;
use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tempctl_common::{Clock, ConfigFile, Poller, RoomController, TelemetryStore};

use crate::{influx::InfluxStore, plug::Hs110Plug};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Info,
    Debug,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "tempctl-controller", about = "Per-room heating controller")]
struct Args {
    /// Path to the room file.
    #[arg(long, env = "TEMPCTL_CONFIG")]
    config: PathBuf,

    /// InfluxDB server to connect to.
    #[arg(long, env = "TEMPCTL_INFLUX_ADDRESS")]
    influx_address: String,

    /// Database on the InfluxDB server.
    #[arg(long, env = "TEMPCTL_INFLUX_DB")]
    influx_db: String,

    #[arg(long, env = "TEMPCTL_LOG_LEVEL", value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Seconds between checks.
    #[arg(
        long,
        env = "TEMPCTL_SYNC_FREQUENCY",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    sync_frequency: u64,

    /// IANA timezone for active hours. System local time when unset.
    #[arg(long, env = "TEMPCTL_TIMEZONE")]
    timezone: Option<String>,
}

/// Wall clock in the configured timezone.
struct ZonedClock {
    timezone: Option<Tz>,
}

impl ZonedClock {
    fn new(timezone: Option<&str>) -> anyhow::Result<Self> {
        let timezone = timezone
            .map(|name| {
                name.parse::<Tz>()
                    .map_err(|err| anyhow::anyhow!("invalid timezone {name:?}: {err}"))
            })
            .transpose()?;
        Ok(Self { timezone })
    }
}

impl Clock for ZonedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        match self.timezone {
            Some(tz) => {
                let local = Utc::now().with_timezone(&tz);
                local.with_timezone(&local.offset().fix())
            }
            None => Local::now().fixed_offset(),
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.directive())),
        )
        .init();

    let clock = ZonedClock::new(args.timezone.as_deref())?;

    let config = ConfigFile::load(&args.config)
        .with_context(|| format!("loading room file {}", args.config.display()))?;
    let rooms = config.rooms()?;
    let policy = config.occupancy_policy();

    let store: Arc<dyn TelemetryStore> = Arc::new(
        InfluxStore::connect(
            &args.influx_address,
            &args.influx_db,
            config.recency_windows(),
        )
        .await
        .context("creating storage")?,
    );

    let mut controllers = Vec::with_capacity(rooms.len());
    for room in rooms {
        let plug = Hs110Plug::new(&room.plug_address)
            .with_context(|| format!("room {}: initializing plug", room.name))?;
        let controller =
            RoomController::initialize(room, Box::new(plug), Arc::clone(&store), policy).await?;
        controllers.push(controller);
    }
    info!("initialized {} rooms", controllers.len());

    let poller = Poller::new(
        controllers,
        Duration::from_secs(args.sync_frequency),
        Arc::new(clock),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            // Dropping the sender would stop the poller, so keep it alive.
            warn!("listening for shutdown signal: {err}");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    poller.run(shutdown_rx).await;

    // The poller holds the remaining store handles; dropping both closes the
    // InfluxDB connection pool.
    drop(poller);
    drop(store);
    info!("storage closed");
    Ok(())
}
