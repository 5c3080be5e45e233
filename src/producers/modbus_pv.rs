//! The PV inverter producer: reads grid and battery measurements from a
//! Modbus TCP inverter and writes them into the [`Situation`].

use crate::error::{ControllerError, Result};
use crate::situation::Situation;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

/// Resolves the inverter's network address. The shipped [`StaticLocator`]
/// resolves a configured address directly; a service-discovery-backed
/// locator (mDNS/DNS-SD) is a documented extension point, not implemented
/// here, since discovery is an external collaborator.
pub trait InverterLocator: Send + Sync {
    fn resolve(&self) -> Result<SocketAddr>;
}

/// Resolves a fixed, configured `ip:port` pair.
pub struct StaticLocator {
    pub ip: String,
    pub port: u16,
}

impl InverterLocator for StaticLocator {
    fn resolve(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.ip, self.port)
            .parse()
            .map_err(|e| ControllerError::modbus(format!("invalid inverter address: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ConnectionHealth {
    Ok,
    Failing { last_error: String },
}

/// Holding register layout for the measurements this producer needs.
/// Each value is a 32-bit float spanning two consecutive registers.
struct RegisterMap {
    pub grid_voltage: u16,
    pub grid_current: u16,
    pub inverter_output: u16,
    pub battery_output: u16,
    pub battery_state: u16,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            grid_voltage: 30001,
            grid_current: 30007,
            inverter_output: 30775,
            battery_output: 30843,
            battery_state: 30845,
        }
    }
}

fn decode_32bit_float(registers: &[u16]) -> Result<f32> {
    if registers.len() < 2 {
        return Err(ControllerError::modbus(
            "insufficient registers for 32-bit float",
        ));
    }
    let bytes = [
        (registers[0] >> 8) as u8,
        (registers[0] & 0xFF) as u8,
        (registers[1] >> 8) as u8,
        (registers[1] & 0xFF) as u8,
    ];
    Ok(f32::from_be_bytes(bytes))
}

/// Reads per-phase grid voltage/current and inverter/battery power from a
/// PV inverter over Modbus TCP.
///
/// Connection loss degrades gracefully: the previous `Situation` values are
/// left in place rather than zeroed, and repeated identical failures log
/// once on the `Ok -> Failing` transition, not on every tick.
pub struct ModbusPvProducer {
    locator: Box<dyn InverterLocator>,
    registers: RegisterMap,
    n_phases: usize,
    operation_timeout: Duration,
    client: tokio::sync::Mutex<Option<tokio_modbus::client::Context>>,
    health: ConnectionHealth,
}

impl ModbusPvProducer {
    pub fn new(locator: Box<dyn InverterLocator>, n_phases: usize) -> Self {
        Self {
            locator,
            registers: RegisterMap::default(),
            n_phases,
            operation_timeout: Duration::from_secs(2),
            client: tokio::sync::Mutex::new(None),
            health: ConnectionHealth::Ok,
        }
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.client.lock().await.is_some() {
            return Ok(());
        }
        let addr = self.locator.resolve()?;
        let client = timeout(self.operation_timeout, tcp::connect(addr))
            .await
            .map_err(|_| ControllerError::modbus("connect timed out"))?
            .map_err(|e| ControllerError::modbus(format!("connect failed: {e}")))?;
        *self.client.lock().await = Some(client);
        Ok(())
    }

    async fn read_f32(&mut self, address: u16) -> Result<f32> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| ControllerError::modbus("not connected"))?;
        let response = timeout(
            self.operation_timeout,
            client.read_holding_registers(address, 2),
        )
        .await
        .map_err(|_| ControllerError::modbus("read timed out"))?
        .map_err(|e| ControllerError::modbus(format!("read failed: {e}")))?
        .map_err(|e| ControllerError::modbus(format!("modbus exception: {e:?}")))?;
        decode_32bit_float(&response)
    }

    async fn poll_inner(&mut self, situation: &mut Situation) -> Result<()> {
        self.ensure_connected().await?;

        let inverter_output = self.read_f32(self.registers.inverter_output).await? as f64;
        let battery_output = self.read_f32(self.registers.battery_output).await? as f64;
        let battery_state = self.read_f32(self.registers.battery_state).await? as f64 / 100.0;

        situation.inverter_output = inverter_output;
        situation.battery_output = battery_output;
        situation.set_battery_state(battery_state);

        for phase in 0..self.n_phases.min(situation.grid.len()) {
            let voltage = self
                .read_f32(self.registers.grid_voltage + (phase as u16) * 2)
                .await? as f64;
            let current = self
                .read_f32(self.registers.grid_current + (phase as u16) * 2)
                .await? as f64;
            situation.grid[phase].voltage = voltage;
            situation.grid[phase].current = current;
        }
        Ok(())
    }
}

#[async_trait]
impl crate::registry::Producer for ModbusPvProducer {
    fn name(&self) -> &str {
        "inverter"
    }

    async fn poll(&mut self, situation: &mut Situation) -> Result<()> {
        match self.poll_inner(situation).await {
            Ok(()) => {
                if self.health != ConnectionHealth::Ok {
                    info!("Inverter producer recovered");
                    self.health = ConnectionHealth::Ok;
                }
                Ok(())
            }
            Err(e) => {
                *self.client.lock().await = None;
                let message = e.to_string();
                let is_new_failure = match &self.health {
                    ConnectionHealth::Ok => true,
                    ConnectionHealth::Failing { last_error } => last_error != &message,
                };
                if is_new_failure {
                    warn!("Inverter producer failing: {message}");
                }
                self.health = ConnectionHealth::Failing {
                    last_error: message,
                };
                debug!("Inverter poll error this tick (not logged again until it changes)");
                // Degrade gracefully: leave the previous situation values in place.
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_32bit_float_roundtrips_a_known_value() {
        let bytes = 12.5f32.to_be_bytes();
        let registers = [
            u16::from_be_bytes([bytes[0], bytes[1]]),
            u16::from_be_bytes([bytes[2], bytes[3]]),
        ];
        assert_eq!(decode_32bit_float(&registers).unwrap(), 12.5);
    }

    #[test]
    fn decode_32bit_float_rejects_short_input() {
        assert!(decode_32bit_float(&[1]).is_err());
    }

    #[test]
    fn static_locator_parses_ip_and_port() {
        let locator = StaticLocator {
            ip: "127.0.0.1".to_string(),
            port: 502,
        };
        let addr = locator.resolve().unwrap();
        assert_eq!(addr.port(), 502);
    }

    #[test]
    fn static_locator_rejects_bad_address() {
        let locator = StaticLocator {
            ip: "not-an-ip".to_string(),
            port: 502,
        };
        assert!(locator.resolve().is_err());
    }
}
