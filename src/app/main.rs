use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use telemetry_lib::config::read_config;
use telemetry_lib::{poll_once, Gateway, PollReport, SnapshotListener};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        // set default to info if none is set already
        std::env::set_var("RUST_LOG", "info")
    }
    pretty_env_logger::init();

    let cfg = read_config();
    let map = Arc::new(cfg.register_map.build().unwrap_or_else(|e| {
        log::error!(target: "config", "Invalid register map: {}", e);
        std::process::exit(1);
    }));
    let shutdown = Arc::new(AtomicBool::new(false));

    if cfg.poll.once {
        return match poll_once(&cfg.device, &map, &shutdown).await {
            Ok(report) => {
                println!("{}", report.snapshot.to_json()?);
                if let Err(errors) = report.errors.into_result() {
                    log::warn!(target: "telemetry", "snapshot at {}: {}", report.snapshot.captured_at(), errors);
                }
                Ok(())
            }
            Err(err) => {
                log::error!(target: "gateway", "{}", err);
                std::process::exit(1);
            }
        };
    }

    let gateway = match Gateway::connect(&cfg.device, cfg.poll.clone(), map).await {
        Ok(gateway) => gateway,
        Err(err) => {
            log::error!(target: "gateway", "{}", err);
            std::process::exit(1);
        }
    };

    let mut snapshots = gateway.snapshot_receiver();
    let printer = tokio::spawn(async move {
        loop {
            match snapshots.recv().await {
                Ok(report) => log_report(&report),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!(target: "telemetry", "skipped {} snapshots", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    let poller = gateway.start(shutdown.clone());

    tokio::signal::ctrl_c().await?;
    log::info!(target: "gateway", "stopping gateway...");
    shutdown.store(true, Ordering::Relaxed);
    poller.await?;

    // dropping the gateway closes the broadcast channel, which ends the printer
    gateway.close().await;
    printer.await?;

    Ok(())
}

fn log_report(report: &PollReport) {
    match report.snapshot.to_json() {
        Ok(json) => log::info!(target: "telemetry", "{}", json),
        Err(err) => log::error!(target: "telemetry", "unable to render snapshot: {}", err),
    }
}
