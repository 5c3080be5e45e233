//! # p1gen - a residential energy controller
//!
//! A control plane that decides, once per tick, how much current a car
//! charger may draw from a three-phase mains connection, given the
//! simultaneous state of the house, its PV inverter, and a home battery.
//! The decision is published by under-reporting available current in a
//! DSMR "P1" smart-meter telegram toward the charger, rather than by
//! cooperating with the charger's own protocol.
//!
//! ## Architecture
//!
//! - `registry`: the process-wide collection of producers, policies, and
//!   consumers, and the traits they implement
//! - `scheduler`: the control cycle that drives one tick at a fixed cadence
//! - `situation`: the electrical snapshot producers fill and policies read
//! - `policies`: the `red`/`orange`/`yellow`/`green` budget policy family
//! - `producers`: the Modbus PV inverter producer and its extension points
//! - `consumers`: the P1 telegram consumer
//! - `simulator`: a combined producer/consumer for offline testing and demos
//! - `config`: the subscribable key/value configuration store
//! - `settings`: persisted settings layered on top of `config`
//! - `web`: the HTTP RPC surface and static file serving
//! - `logging`: structured logging and tracing
//! - `error`: the controller's error type

pub mod config;
pub mod consumers;
pub mod error;
pub mod logging;
pub mod policies;
pub mod producers;
pub mod registry;
pub mod scheduler;
pub mod settings;
pub mod simulator;
pub mod situation;
pub mod web;

pub use error::{ControllerError, Result};
pub use registry::Registry;
pub use scheduler::Scheduler;
