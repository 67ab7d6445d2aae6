//! # Tank Tracker Application Entry Point
//!
//! Polls the configured tank source, prints a report for every tank and
//! persists state between runs. Run with `--once` for a single poll, which is
//! handy from cron or while setting things up.
//!
//! ```text
//! tank-tracker [--config PATH] [--once]
//! ```

use anyhow::Context;
use std::env;
use std::time::Duration;
use tank_tracker_lib::config::Config;
use tank_tracker_lib::coordinator::Coordinator;
use tank_tracker_lib::renderer::{draw_ascii, ReportOptions};
use tank_tracker_lib::source::TankSource;
use tank_tracker_lib::state::StateStore;
use tracing_subscriber::EnvFilter;

/// Pause between credential checks while the service is not ready
const SETUP_RETRY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Command line options
struct Args {
    /// Defaults to tank-config.toml in the working directory
    config_path: Option<String>,
    once: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        config_path: None,
        once: false,
    };

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--once" => args.once = true,
            "--config" => {
                args.config_path = Some(iter.next().context("--config needs a path")?);
            }
            other => anyhow::bail!("unknown argument '{other}'"),
        }
    }
    Ok(args)
}

/// Print the coordinator's current snapshots, if it has any.
fn report<S: TankSource>(coordinator: &Coordinator<S>) {
    let Some(snapshots) = coordinator.snapshots() else {
        return;
    };
    let settings = coordinator.settings();
    let options = ReportOptions {
        window_days: settings.window_days,
        reference_time: coordinator.updated().unwrap_or_else(chrono::Utc::now),
        stale: coordinator.is_stale(),
        updated: coordinator.updated(),
    };
    draw_ascii(snapshots, &coordinator.consumption(), &options);
}

/// Poll forever (or once), saving state after every successful poll.
async fn run<S: TankSource>(
    source: S,
    config: &Config,
    store: &StateStore,
    once: bool,
) -> anyhow::Result<()> {
    let mut coordinator = if once {
        Coordinator::setup(source, config, store.load())
            .await
            .context("tracker setup failed")?
    } else {
        // A service that is down at boot is waited out, bad credentials are not
        let mut coordinator = Coordinator::new(source, config);
        coordinator
            .wait_until_ready(SETUP_RETRY_INTERVAL)
            .await
            .context("tracker setup failed")?;
        coordinator.restore(store.load());
        coordinator
    };

    loop {
        // Failures are logged by the coordinator; old snapshots stay visible
        if coordinator.refresh(chrono::Utc::now()).await.is_ok() {
            if let Err(e) = store.save(&coordinator.saved_state()) {
                tracing::warn!(path = %store.path().display(), "Could not save state: {e}");
            }
        }
        report(&coordinator);

        if once {
            return Ok(());
        }
        tokio::time::sleep(coordinator.update_interval()).await;
    }
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let config = match &args.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    config.validate().context("invalid configuration")?;
    let store = StateStore::new(&config.state.path);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match config.http_source()? {
            Some(source) => run(source, &config, &store, args.once).await,
            None => match config.file_source() {
                Some(source) => run(source, &config, &store, args.once).await,
                None => anyhow::bail!("no tank source configured"),
            },
        }
    })
}
