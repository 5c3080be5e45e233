//! Emits a DSMR-style P1 telegram summarizing the current budget and
//! situation, for downstream meters or displays that only understand the
//! P1 smart-meter wire format.

use crate::error::Result;
use crate::registry::Consumer;
use crate::situation::{Budget, Situation};
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

/// Where a rendered telegram is written. The shipped [`FileSink`] writes to a
/// path (a regular file, or a named pipe feeding a serial/IR emulator); other
/// sinks (a TCP listener, an actual UART) are an extension point, not
/// implemented here.
pub trait TelegramSink: Send + Sync {
    fn write_telegram(&mut self, text: &str) -> Result<()>;
}

/// Writes each telegram to a configured path, truncating the previous one.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TelegramSink for FileSink {
    fn write_telegram(&mut self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }
}

/// CRC-16/ARC, as used by the DSMR telegram checksum: computed over every
/// byte from the leading `/` through the trailing `!`, inclusive.
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn format_kw(value: f64) -> String {
    format!("{:07.3}", value.abs() / 1000.0)
}

/// Renders a [`Situation`]/[`Budget`] pair as a single DSMR telegram and
/// writes it through a [`TelegramSink`] on every tick.
///
/// I/O failures degrade the same way the inverter producer does: the error is
/// logged once on the `Ok -> Failing` transition, not on every tick, and the
/// consumer otherwise takes no further action (there is no hardware state to
/// roll back).
pub struct P1TelegramConsumer {
    meter_id: String,
    sink: Box<dyn TelegramSink>,
    last_error: Option<String>,
}

impl P1TelegramConsumer {
    pub fn new(meter_id: impl Into<String>, sink: Box<dyn TelegramSink>) -> Self {
        Self {
            meter_id: meter_id.into(),
            sink,
            last_error: None,
        }
    }

    fn render(&self, budget: &Budget, situation: &Situation) -> String {
        let consumption = situation.consumption();
        let (delivered, received) = if consumption >= 0.0 {
            (consumption, 0.0)
        } else {
            (0.0, -consumption)
        };

        let mut body = String::new();
        body.push_str(&format!("/{}\r\n\r\n", self.meter_id));
        body.push_str("1-3:0.2.8(50)\r\n");
        body.push_str("0-0:96.1.1(0000000000000000)\r\n");
        body.push_str(&format!("1-0:1.7.0({}*kW)\r\n", format_kw(delivered)));
        body.push_str(&format!("1-0:2.7.0({}*kW)\r\n", format_kw(received)));
        body.push_str(&format!(
            "96.96.0:curcap({:06.2}*A)\r\n",
            budget.clamped()
        ));
        body.push('!');

        let checksum = crc16(body.as_bytes());
        format!("{body}{checksum:04X}\r\n")
    }
}

#[async_trait]
impl Consumer for P1TelegramConsumer {
    fn name(&self) -> &str {
        "p1_telegram"
    }

    async fn handle(&mut self, budget: &Budget, situation: &Situation) -> Result<()> {
        let telegram = self.render(budget, situation);
        match self.sink.write_telegram(&telegram) {
            Ok(()) => {
                if self.last_error.take().is_some() {
                    info!("P1 telegram consumer recovered");
                }
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let is_new_failure = self.last_error.as_deref() != Some(message.as_str());
                if is_new_failure {
                    warn!("P1 telegram consumer failing: {message}");
                }
                self.last_error = Some(message);
                // Degrade gracefully: a dropped telegram has no hardware state to roll back.
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::situation::Phase;
    use std::sync::{Arc, Mutex};

    #[test]
    fn crc16_matches_a_known_vector() {
        // "123456789" under CRC-16/ARC is the textbook check value 0xBB3D.
        assert_eq!(crc16(b"123456789"), 0xBB3D);
    }

    #[tokio::test]
    async fn handle_writes_a_parseable_telegram() {
        let mut sit = Situation::new(1);
        sit.grid[0] = Phase::new(230.0, 10.0);
        let budget = Budget::new(6.0);

        let recorded = Arc::new(Mutex::new(String::new()));
        struct RecordingSink(Arc<Mutex<String>>);
        impl TelegramSink for RecordingSink {
            fn write_telegram(&mut self, text: &str) -> Result<()> {
                *self.0.lock().unwrap() = text.to_string();
                Ok(())
            }
        }

        let mut consumer =
            P1TelegramConsumer::new("ISK5\\2M550T-1012", Box::new(RecordingSink(recorded.clone())));
        consumer.handle(&budget, &sit).await.unwrap();

        let telegram = recorded.lock().unwrap().clone();
        assert!(telegram.starts_with('/'));
        assert!(telegram.contains("1-0:1.7.0("));
        assert!(telegram.trim_end().ends_with(|c: char| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn io_failure_does_not_propagate_as_an_error() {
        struct FailingSink;
        impl TelegramSink for FailingSink {
            fn write_telegram(&mut self, _text: &str) -> Result<()> {
                Err(crate::error::ControllerError::io("disk full"))
            }
        }
        let mut consumer = P1TelegramConsumer::new("test", Box::new(FailingSink));
        let sit = Situation::new(1);
        let result = consumer.handle(&Budget::new(6.0), &sit).await;
        assert!(result.is_ok());
        assert!(consumer.last_error.is_some());
    }
}
