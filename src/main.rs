use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

mod connectivity;
mod detector;
mod geo;
mod queue;
mod records;
mod reporter;
mod scheduler;
mod sensors;
mod stability;
mod store;
mod transport;

use connectivity::{Connectivity, TcpProbe};
use detector::{DetectorConfig, StopDetector};
use queue::OfflineQueue;
use reporter::PositionReporter;
use scheduler::SyncScheduler;
use store::OfflineStore;
use transport::HttpTransport;

#[derive(Parser, Debug)]
#[command(name = "fleet_tracker")]
#[command(about = "Truck tracking service - stop detection and offline record sync", long_about = None)]
struct Args {
    /// Fleet API base URL
    #[arg(long, default_value = "https://fleet.example.com/api")]
    base_url: String,

    /// Bearer token (empty disables sync, detection still runs)
    #[arg(long, default_value = "")]
    token: String,

    /// Truck id attached to stop events
    #[arg(long, default_value = "0")]
    truck_id: i64,

    /// Depot latitude
    #[arg(long, default_value = "0.0")]
    depot_lat: f64,

    /// Depot longitude
    #[arg(long, default_value = "0.0")]
    depot_lon: f64,

    /// Depot radius in meters
    #[arg(long, default_value = "100.0")]
    depot_radius: f64,

    /// Minimum dwell before a stop is registered, in minutes
    #[arg(long, default_value = "10")]
    dwell_minutes: u64,

    /// Offline queue drain interval in seconds
    #[arg(long, default_value = "10")]
    drain_interval_secs: u64,

    /// Minimum spacing between position reports in seconds
    #[arg(long, default_value = "4")]
    report_interval_secs: u64,

    /// GPS polling interval in seconds
    #[arg(long, default_value = "5")]
    gps_interval_secs: u64,

    /// Offline queue database path
    #[arg(long, default_value = "fleet_tracker.db")]
    db_path: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    log::info!(
        "fleet tracker starting: truck {}, depot ({}, {}), dwell {} min",
        args.truck_id,
        args.depot_lat,
        args.depot_lon,
        args.dwell_minutes
    );
    if args.token.is_empty() {
        log::warn!("no bearer token configured, sync is disabled");
    }

    let store = Arc::new(OfflineStore::open(&args.db_path)?);
    let transport = Arc::new(HttpTransport::new(args.base_url.clone(), args.token.clone()));
    let connectivity: Arc<dyn Connectivity> = Arc::new(TcpProbe::default());

    let offline_queue = Arc::new(OfflineQueue::new(
        store,
        transport.clone(),
        connectivity.clone(),
    ));
    let position_reporter = PositionReporter::new(
        transport,
        connectivity.clone(),
        Duration::from_secs(args.report_interval_secs),
    );

    let mut stop_detector = StopDetector::new(DetectorConfig {
        truck_id: args.truck_id,
        depot_lat: args.depot_lat,
        depot_lon: args.depot_lon,
        depot_radius_m: args.depot_radius,
        min_dwell_ms: (args.dwell_minutes * 60 * 1000) as i64,
        ..DetectorConfig::default()
    });

    let (fix_tx, mut fix_rx) = mpsc::channel(100);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let _gps_handle = tokio::spawn(sensors::gps_loop(fix_tx, args.gps_interval_secs));

    let sync_scheduler = SyncScheduler::new(
        offline_queue.clone(),
        connectivity,
        Duration::from_secs(args.drain_interval_secs),
    );
    let scheduler_handle = tokio::spawn(sync_scheduler.run(shutdown_rx));

    // Fix handling is serialized here: fix N+1's detector update never runs
    // before fix N's completes. The network side of each fix (position
    // report, stop submit) is spawned so a stalled send cannot back up the
    // channel.
    loop {
        tokio::select! {
            maybe_fix = fix_rx.recv() => {
                let Some(fix) = maybe_fix else { break };
                position_reporter.maybe_report(&fix);
                if let Some(stop) = stop_detector.process_fix(&fix) {
                    log::info!(
                        "stop detected at ({:.5}, {:.5}), dwell {}s",
                        stop.latitude,
                        stop.longitude,
                        (stop.ended_at_ms - stop.started_at_ms) / 1000
                    );
                    let offline_queue = offline_queue.clone();
                    tokio::spawn(async move {
                        offline_queue.submit_stop(&stop).await;
                    });
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown requested");
                break;
            }
        }
    }

    // Stop the scheduler between ticks; outstanding sends are abandoned and
    // their rows recovered as stale in-flight at the next start.
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;

    Ok(())
}
