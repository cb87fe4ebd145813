use crate::error::TransportError;
use async_trait::async_trait;
use register_map::codec::words_to_bytes;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::{Slave, SlaveContext};

/// Source of raw holding register blocks.
///
/// One call is one request; implementations do not retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegisterReader: Send {
    /// Read `word_count` holding registers starting at `address` and return
    /// them as big-endian bytes.
    async fn read(
        &mut self,
        unit_id: u8,
        address: u16,
        word_count: u16,
    ) -> Result<Vec<u8>, TransportError>;
}

/// [`RegisterReader`] on top of a tokio-modbus client context.
pub struct ModbusReader<'a> {
    ctx: &'a mut Context,
    req_timeout: Duration,
}

impl<'a> ModbusReader<'a> {
    pub fn new(ctx: &'a mut Context, req_timeout: Duration) -> Self {
        Self { ctx, req_timeout }
    }
}

#[async_trait]
impl RegisterReader for ModbusReader<'_> {
    async fn read(
        &mut self,
        unit_id: u8,
        address: u16,
        word_count: u16,
    ) -> Result<Vec<u8>, TransportError> {
        self.ctx.set_slave(Slave(unit_id));
        match timeout(
            self.req_timeout,
            self.ctx.read_holding_registers(address, word_count),
        )
        .await
        {
            Ok(Ok(Ok(words))) => Ok(words_to_bytes(&words)),
            Ok(Ok(Err(exception))) => Err(TransportError::Exception(format!("{exception:?}"))),
            Ok(Err(err)) => Err(TransportError::Io(err.to_string())),
            Err(_) => Err(TransportError::Timeout(self.req_timeout)),
        }
    }
}

/// In-memory register bank used by the tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};
    use tokio_modbus::client::Client;
    use tokio_modbus::{ExceptionCode, Request, Response};

    #[derive(Default)]
    pub struct FakeDevice {
        pub registers: HashMap<u16, u16>,
        pub failing: HashSet<u16>,
        /// Registers dropped from the end of every response.
        pub short_by: usize,
        pub requests: Vec<(u8, u16, u16)>,
    }

    impl FakeDevice {
        pub fn with_words(start: u16, words: &[u16]) -> Self {
            let mut device = Self::default();
            device.load(start, words);
            device
        }

        pub fn load(&mut self, start: u16, words: &[u16]) {
            for (i, word) in words.iter().enumerate() {
                self.registers.insert(start + i as u16, *word);
            }
        }

        pub fn fail_at(mut self, address: u16) -> Self {
            self.failing.insert(address);
            self
        }
    }

    #[async_trait]
    impl RegisterReader for FakeDevice {
        async fn read(
            &mut self,
            unit_id: u8,
            address: u16,
            word_count: u16,
        ) -> Result<Vec<u8>, TransportError> {
            self.requests.push((unit_id, address, word_count));
            if self.failing.contains(&address) {
                return Err(TransportError::Timeout(Duration::from_secs(2)));
            }
            let count = (word_count as usize).saturating_sub(self.short_by);
            let words: Vec<u16> = (0..count as u16)
                .map(|i| self.registers.get(&(address + i)).copied().unwrap_or(0))
                .collect();
            Ok(words_to_bytes(&words))
        }
    }

    /// tokio-modbus client whose holding register N holds the value N.
    #[derive(Debug, Default)]
    pub struct FakeClient {
        slave: Option<Slave>,
        pub requests: Arc<Mutex<Vec<(u8, u16, u16)>>>,
    }

    impl SlaveContext for FakeClient {
        fn set_slave(&mut self, slave: Slave) {
            self.slave = Some(slave);
        }
    }

    #[async_trait]
    impl Client for FakeClient {
        async fn call(&mut self, request: Request<'_>) -> tokio_modbus::Result<Response> {
            let unit_id = self.slave.map(|Slave(id)| id).unwrap_or_default();
            match request {
                Request::ReadHoldingRegisters(address, count) => {
                    self.requests.lock().unwrap().push((unit_id, address, count));
                    Ok(Ok(Response::ReadHoldingRegisters((address..address + count).collect())))
                }
                _ => Ok(Err(ExceptionCode::IllegalFunction)),
            }
        }

        async fn disconnect(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
