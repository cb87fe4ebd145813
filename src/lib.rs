use crate::config::{DeviceConfig, PollConfig};
use crate::error::{ConnectError, PollError};
use log::{error, info, warn};
use register_map::RegisterMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio::task::JoinHandle;

pub mod assembler;
pub mod config;
pub mod error;
pub mod modbus;
pub mod reader;
pub mod snapshot;

pub use modbus::{poll_once, Device};
pub use snapshot::{AccumulatedError, FieldResult, PollReport, TelemetrySnapshot};

pub trait SnapshotListener {
    fn snapshot_receiver(&self) -> Receiver<PollReport>;
}

/// Polls one device with one register map and broadcasts every report.
pub struct Gateway {
    sender: Sender<PollReport>,
    device: Device,
    map: Arc<RegisterMap>,
    poll: PollConfig,
}

impl Gateway {
    pub async fn connect(
        device_cfg: &DeviceConfig,
        poll: PollConfig,
        map: Arc<RegisterMap>,
    ) -> Result<Arc<Self>, ConnectError> {
        let device = Device::connect(device_cfg).await?;
        Ok(Self::new(device, poll, map))
    }

    pub fn new(device: Device, poll: PollConfig, map: Arc<RegisterMap>) -> Arc<Self> {
        let (sender, _) = broadcast::channel(16);
        info!(target: "gateway", "polling {} ({} fields) every {} ms", map.model(), map.fields().len(), poll.interval_ms);
        Arc::new(Self {
            sender,
            device,
            map,
            poll,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Spawn the poll loop. It runs until `shutdown_listener` is set.
    pub fn start(self: &Arc<Self>, shutdown_listener: Arc<AtomicBool>) -> JoinHandle<()> {
        let instance = self.clone();
        tokio::spawn(async move {
            while !shutdown_listener.load(Ordering::Relaxed) {
                let pause = match instance.device.poll(&instance.map, &shutdown_listener).await {
                    Ok(report) => instance.publish(report),
                    Err(PollError::Cancelled) => break,
                    // only raised by Device::connect; a connected device never reconnects
                    Err(err @ PollError::Connect(_)) => {
                        error!(target: "gateway", "poll failed: {}", err);
                        Duration::from_millis(instance.poll.error_backoff_ms)
                    }
                };
                tokio::time::sleep(pause).await;
            }
            info!(target: "gateway", "poll loop for {} stopped", instance.device.endpoint());
        })
    }

    /// Disconnect from the device. Call after the poll loop has finished.
    pub async fn close(self: Arc<Self>) {
        match Arc::try_unwrap(self) {
            Ok(gateway) => gateway.device.close().await,
            Err(_) => warn!(target: "gateway", "gateway still in use, connection left open"),
        }
    }

    /// Forward a report to listeners and pick the delay before the next cycle.
    fn publish(&self, report: PollReport) -> Duration {
        let pause = next_pause(&self.poll, &report);
        if !report.errors.is_empty() {
            warn!(target: "gateway", "{}", report.errors);
        }
        if self.sender.receiver_count() > 0 {
            if let Err(err) = self.sender.send(report) {
                error!(target: "gateway", "forwarding failed: {}", err);
            }
        }
        pause
    }
}

/// Back off when a cycle read nothing at all, otherwise wait one interval.
fn next_pause(poll: &PollConfig, report: &PollReport) -> Duration {
    if report.snapshot.available_count() == 0 && !report.errors.is_empty() {
        Duration::from_millis(poll.error_backoff_ms)
    } else {
        Duration::from_millis(poll.interval_ms)
    }
}

impl SnapshotListener for Gateway {
    fn snapshot_receiver(&self) -> Receiver<PollReport> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FieldError, TransportError};
    use crate::reader::fake::FakeClient;
    use crate::snapshot::FieldReading;
    use chrono::Utc;
    use register_map::{Encoding, FieldDescriptor, Measurement};
    use tokio::time::timeout;
    use tokio_modbus::client::{Client, Context};

    fn report(results: Vec<FieldResult>) -> PollReport {
        let mut errors = AccumulatedError::default();
        let mut readings = Vec::new();
        for (i, result) in results.into_iter().enumerate() {
            let name = format!("field_{i}");
            if let FieldResult::Unavailable(err) = &result {
                errors.push(&name, err.clone());
            }
            readings.push(FieldReading {
                name,
                unit: None,
                result,
            });
        }
        PollReport {
            snapshot: TelemetrySnapshot::new("bench", Utc::now(), readings),
            errors,
        }
    }

    fn timed_out() -> FieldResult {
        FieldResult::Unavailable(FieldError::Transport(TransportError::Timeout(
            Duration::from_secs(2),
        )))
    }

    #[test]
    fn partial_cycle_waits_one_interval() {
        let poll = PollConfig::default();
        let partial = report(vec![FieldResult::Value(Measurement::UInt16(0)), timed_out()]);
        assert_eq!(next_pause(&poll, &partial), Duration::from_millis(1000));

        let empty_table = report(vec![]);
        assert_eq!(next_pause(&poll, &empty_table), Duration::from_millis(1000));
    }

    #[test]
    fn failed_cycle_backs_off() {
        let poll = PollConfig::default();
        let failed = report(vec![timed_out(), timed_out()]);
        assert_eq!(next_pause(&poll, &failed), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn gateway_broadcasts_reports_until_shutdown() {
        let map = RegisterMap::new(
            "pair",
            vec![
                FieldDescriptor::new("a", 4, Encoding::UInt16),
                FieldDescriptor::new("b", 5, Encoding::UInt16),
            ],
            vec![],
        )
        .unwrap();
        let client = FakeClient::default();
        let requests = client.requests.clone();
        let ctx = Context::from(Box::new(client) as Box<dyn Client>);
        let device = Device::new(ctx, 3, Duration::from_millis(500), "fake");
        let poll = PollConfig {
            interval_ms: 300,
            error_backoff_ms: 300,
            once: false,
        };
        let gateway = Gateway::new(device, poll, Arc::new(map));
        let mut reports = gateway.snapshot_receiver();
        let shutdown = Arc::new(AtomicBool::new(false));
        let poller = gateway.start(shutdown.clone());

        let report = timeout(Duration::from_secs(2), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.snapshot.value("a"), Some(Measurement::UInt16(4)));
        assert_eq!(report.snapshot.value("b"), Some(Measurement::UInt16(5)));
        assert!(report.errors.is_empty());
        assert_eq!(requests.lock().unwrap()[..2], [(3, 4, 1), (3, 5, 1)]);

        // the context is free while the loop waits for the next cycle
        let handle = gateway.device().handle();
        let guard = timeout(Duration::from_millis(100), handle.lock())
            .await
            .unwrap();
        drop(guard);

        shutdown.store(true, Ordering::Relaxed);
        timeout(Duration::from_secs(2), poller).await.unwrap().unwrap();
        gateway.close().await;
    }
}
