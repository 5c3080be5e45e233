//! A software stand-in for real hardware: both produces a [`Situation`] from
//! operator-supplied inputs and consumes the resulting [`Budget`], so the
//! rest of the control plane can be exercised without a Modbus inverter or a
//! P1 meter attached.
//!
//! The feedback loop (car draw accumulates tick-over-tick from the budget,
//! clamped to `[car_min_power, car_max_power]`; the battery charges or
//! discharges to soak up any non-zero grid draw) mirrors a real household:
//! raising the budget doesn't move the car's draw instantaneously, and the
//! battery only participates while there's headroom on both its own state of
//! charge and the inverter's rating.

use crate::error::Result;
use crate::registry::{Consumer, Producer};
use crate::situation::{Budget, Situation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Operator-supplied household load, solar production, and hardware ratings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorInput {
    pub house_power: Vec<f64>,
    pub solar_power: f64,
    /// Battery state of charge in `[0.0, 1.0]`.
    pub battery_state: f64,
    /// Car stops drawing power below this threshold rather than trickle-charging.
    pub car_min_power: f64,
    pub car_max_power: f64,
    pub inverter_max_power: f64,
    pub battery_max_power: f64,
}

impl Default for SimulatorInput {
    fn default() -> Self {
        Self {
            house_power: vec![0.0; 3],
            solar_power: 0.0,
            battery_state: 0.5,
            car_min_power: 2000.0,
            car_max_power: 7000.0,
            inverter_max_power: 8000.0,
            battery_max_power: 5000.0,
        }
    }
}

/// The simulated hardware's response, exposed read-only for the RPC surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatorOutput {
    /// Power the simulated car is currently drawing, in watts.
    pub car_power: f64,
    /// Battery power; positive is discharge, negative is charge, in watts.
    pub battery_output: f64,
    pub grid_power: Vec<f64>,
    pub budget_current: f64,
}

#[derive(Default)]
struct SimulatorState {
    input: SimulatorInput,
    output: SimulatorOutput,
}

/// Shared input/output state behind the producer and consumer halves, and
/// the handle an RPC layer uses to read and mutate it between ticks.
#[derive(Clone)]
pub struct SimulatorHandle {
    state: Arc<Mutex<SimulatorState>>,
}

impl SimulatorHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatorState::default())),
        }
    }

    pub fn get_input(&self) -> SimulatorInput {
        self.state.lock().unwrap().input.clone()
    }

    pub fn set_input(&self, input: SimulatorInput) {
        self.state.lock().unwrap().input = input;
    }

    pub fn get_output(&self) -> SimulatorOutput {
        self.state.lock().unwrap().output.clone()
    }
}

impl Default for SimulatorHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives grid draw and battery behavior from the operator's inputs and the
/// car power left over from the previous tick's [`SimulatorConsumer::handle`],
/// standing in for a real Modbus producer.
pub struct SimulatorProducer {
    handle: SimulatorHandle,
}

impl SimulatorProducer {
    pub fn new(handle: SimulatorHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl Producer for SimulatorProducer {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn poll(&mut self, situation: &mut Situation) -> Result<()> {
        let mut state = self.handle.state.lock().unwrap();
        let n = situation.grid.len() as f64;
        let input = state.input.clone();

        let mut grid_power: Vec<f64> = input
            .house_power
            .iter()
            .copied()
            .chain(std::iter::repeat(0.0))
            .take(situation.grid.len())
            .map(|house| house + (state.output.car_power - input.solar_power) / n)
            .collect();
        let grid_total: f64 = grid_power.iter().sum();

        situation.set_battery_state(input.battery_state);

        let battery_output = if input.battery_state <= 0.99 && grid_total < 0.0 {
            grid_total.max(-input.battery_max_power)
        } else if input.battery_state >= 0.01 && grid_total > 0.0 {
            grid_total.min(input.battery_max_power.min(
                input.inverter_max_power - input.solar_power,
            ))
        } else {
            0.0
        };

        situation.battery_output = battery_output;
        situation.inverter_output = battery_output + input.solar_power;

        for (phase, power) in situation.grid.iter_mut().zip(grid_power.iter_mut()) {
            *power -= battery_output / n;
            phase.current = *power / phase.voltage.max(1.0);
        }

        state.output.battery_output = battery_output;
        state.output.grid_power = grid_power;
        Ok(())
    }
}

/// Accumulates a simulated car's power draw from the computed [`Budget`] and
/// records the resulting grid split, standing in for a real charger consumer.
pub struct SimulatorConsumer {
    handle: SimulatorHandle,
}

impl SimulatorConsumer {
    pub fn new(handle: SimulatorHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl Consumer for SimulatorConsumer {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn handle(&mut self, budget: &Budget, situation: &Situation) -> Result<()> {
        let mut state = self.handle.state.lock().unwrap();
        let input = state.input.clone();

        let mut car_power =
            state.output.car_power + budget.current * situation.grid_voltage() * situation.grid.len() as f64;
        car_power = car_power.min(input.car_max_power);
        if car_power < input.car_min_power {
            car_power = 0.0;
        }
        if state.output.car_power != car_power {
            info!(car_power, "simulated car charging rate changed");
        }
        state.output.car_power = car_power;
        state.output.budget_current = budget.current;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::situation::Phase;

    #[tokio::test]
    async fn producer_writes_configured_inputs_into_the_situation() {
        let handle = SimulatorHandle::new();
        handle.set_input(SimulatorInput {
            house_power: vec![230.0, 0.0, 0.0],
            solar_power: 1500.0,
            battery_state: 0.8,
            ..SimulatorInput::default()
        });
        let mut producer = SimulatorProducer::new(handle);
        let mut sit = Situation::new(3);
        producer.poll(&mut sit).await.unwrap();
        assert_eq!(sit.battery_state(), 0.8);
        // House load on phase 0 minus the solar credit split across phases,
        // with no car draw yet and the battery idle (grid_total > 0 but SoC
        // is high enough to discharge, soaking up the surplus).
        assert!(sit.inverter_output > 0.0);
    }

    #[tokio::test]
    async fn battery_discharges_to_cover_a_grid_deficit() {
        let handle = SimulatorHandle::new();
        handle.set_input(SimulatorInput {
            house_power: vec![3000.0, 0.0, 0.0],
            solar_power: 0.0,
            battery_state: 0.5,
            ..SimulatorInput::default()
        });
        let mut producer = SimulatorProducer::new(handle.clone());
        let mut sit = Situation::new(3);
        producer.poll(&mut sit).await.unwrap();
        // 3000 W of house load with no solar and no car draw is a grid
        // deficit the battery should discharge into.
        assert!(sit.battery_output > 0.0);
        assert_eq!(handle.get_output().battery_output, sit.battery_output);
    }

    #[tokio::test]
    async fn battery_stays_idle_when_empty() {
        let handle = SimulatorHandle::new();
        handle.set_input(SimulatorInput {
            house_power: vec![3000.0, 0.0, 0.0],
            solar_power: 0.0,
            battery_state: 0.0,
            ..SimulatorInput::default()
        });
        let mut producer = SimulatorProducer::new(handle);
        let mut sit = Situation::new(3);
        producer.poll(&mut sit).await.unwrap();
        assert_eq!(sit.battery_output, 0.0);
    }

    #[tokio::test]
    async fn car_power_accumulates_across_ticks_and_clamps_to_max() {
        let handle = SimulatorHandle::new();
        handle.set_input(SimulatorInput::default());
        let mut consumer = SimulatorConsumer::new(handle.clone());
        let mut sit = Situation::new(1);
        sit.grid[0] = Phase::new(230.0, 0.0);

        // A large positive budget should push car_power straight to its ceiling.
        consumer.handle(&Budget::new(100.0), &sit).await.unwrap();
        assert_eq!(handle.get_output().car_power, 7000.0);
    }

    #[tokio::test]
    async fn car_power_drops_to_zero_below_the_minimum_threshold() {
        let handle = SimulatorHandle::new();
        handle.set_input(SimulatorInput::default());
        let mut consumer = SimulatorConsumer::new(handle.clone());
        let mut sit = Situation::new(1);
        sit.grid[0] = Phase::new(230.0, 0.0);

        // A tiny positive budget lands below car_min_power (2000 W default)
        // and should be snapped to zero rather than trickle-charging.
        consumer.handle(&Budget::new(1.0), &sit).await.unwrap();
        assert_eq!(handle.get_output().car_power, 0.0);
    }

    #[tokio::test]
    async fn consumer_records_the_latest_budget_and_grid_draw() {
        let handle = SimulatorHandle::new();
        let mut consumer = SimulatorConsumer::new(handle.clone());
        let mut sit = Situation::new(1);
        sit.grid[0] = Phase::new(230.0, 2.0);
        consumer.handle(&Budget::new(6.0), &sit).await.unwrap();
        let output = handle.get_output();
        assert_eq!(output.budget_current, 6.0);
    }
}
