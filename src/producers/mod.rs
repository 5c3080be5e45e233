//! Producers write fresh measurements into the shared [`crate::situation::Situation`]
//! before each tick.

mod modbus_pv;

pub use modbus_pv::{InverterLocator, ModbusPvProducer, StaticLocator};
