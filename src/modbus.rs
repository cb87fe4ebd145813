use crate::assembler::SnapshotAssembler;
use crate::config::{DeviceConfig, Parity, RtuConfig, TcpConfig, TransportConfig};
use crate::error::{ConnectError, PollError};
use crate::reader::ModbusReader;
use crate::snapshot::PollReport;
use log::{info, warn};
use register_map::RegisterMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::{rtu, tcp, Context};
use tokio_modbus::Slave;
use tokio_serial::SerialStream;

/// Connected Modbus device.
///
/// The client context is locked for the duration of one poll cycle only.
pub struct Device {
    ctx: Arc<Mutex<Context>>,
    unit_id: u8,
    req_timeout: Duration,
    endpoint: String,
}

impl Device {
    pub async fn connect(cfg: &DeviceConfig) -> Result<Self, ConnectError> {
        let req_timeout = Duration::from_millis(cfg.timeout_ms);
        let slave = Slave(cfg.unit_id);
        let (ctx, endpoint) = match &cfg.transport {
            TransportConfig::Rtu(rtu_cfg) => {
                (open_rtu(rtu_cfg, slave, req_timeout)?, rtu_cfg.tty_path.clone())
            }
            TransportConfig::Tcp(tcp_cfg) => connect_tcp(tcp_cfg, slave, req_timeout).await?,
        };
        info!(target: "modbus", "connected to unit {} on {}", cfg.unit_id, endpoint);
        Ok(Self::new(ctx, cfg.unit_id, req_timeout, endpoint))
    }

    /// Wrap an already connected client context.
    pub fn new(ctx: Context, unit_id: u8, req_timeout: Duration, endpoint: impl Into<String>) -> Self {
        Self {
            ctx: Arc::new(Mutex::new(ctx)),
            unit_id,
            req_timeout,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Shared client context, for users outside the poll loop.
    pub fn handle(&self) -> Arc<Mutex<Context>> {
        self.ctx.clone()
    }

    pub async fn poll(&self, map: &RegisterMap, cancel: &AtomicBool) -> Result<PollReport, PollError> {
        let mut ctx = self.ctx.lock().await;
        let mut reader = ModbusReader::new(&mut ctx, self.req_timeout);
        SnapshotAssembler::new(map, self.unit_id)
            .assemble(&mut reader, cancel)
            .await
    }

    pub async fn close(self) {
        let mut ctx = self.ctx.lock().await;
        if let Err(err) = ctx.disconnect().await {
            warn!(target: "modbus", "closing {} failed: {}", self.endpoint, err);
        }
        info!(target: "modbus", "disconnected from {}", self.endpoint);
    }
}

/// Connect, read one snapshot and disconnect.
pub async fn poll_once(
    cfg: &DeviceConfig,
    map: &RegisterMap,
    cancel: &AtomicBool,
) -> Result<PollReport, PollError> {
    let device = Device::connect(cfg).await?;
    let report = device.poll(map, cancel).await;
    device.close().await;
    report
}

fn open_rtu(cfg: &RtuConfig, slave: Slave, req_timeout: Duration) -> Result<Context, ConnectError> {
    let builder = tokio_serial::new(cfg.tty_path.as_str(), cfg.baud_rate)
        .data_bits(data_bits(cfg.data_bits)?)
        .stop_bits(stop_bits(cfg.stop_bits)?)
        .parity(parity(cfg.parity))
        .timeout(req_timeout);
    let port = SerialStream::open(&builder).map_err(|source| ConnectError::Serial {
        path: cfg.tty_path.clone(),
        source,
    })?;
    Ok(rtu::attach_slave(port, slave))
}

async fn connect_tcp(
    cfg: &TcpConfig,
    slave: Slave,
    req_timeout: Duration,
) -> Result<(Context, String), ConnectError> {
    let host = format!("{}:{}", cfg.host, cfg.port);
    let socket_addr = lookup_host(host.as_str())
        .await
        .map_err(|source| ConnectError::Resolve {
            host: host.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| ConnectError::NoAddress(host.clone()))?;

    match timeout(req_timeout, tcp::connect_slave(socket_addr, slave)).await {
        Ok(Ok(ctx)) => Ok((ctx, host)),
        Ok(Err(source)) => Err(ConnectError::Tcp { addr: host, source }),
        Err(_) => Err(ConnectError::Timeout(host)),
    }
}

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits, ConnectError> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(ConnectError::InvalidSetting(format!("{other} data bits"))),
    }
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits, ConnectError> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(ConnectError::InvalidSetting(format!("{other} stop bits"))),
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}
