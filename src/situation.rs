//! The electrical snapshot producers fill in and policies read.

use serde::{Deserialize, Serialize};

/// One AC phase as observed at the grid connection point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// RMS voltage in volts. Defaults to 230 V.
    pub voltage: f64,
    /// Signed current in amperes; positive is import, negative is export.
    pub current: f64,
}

impl Phase {
    pub fn new(voltage: f64, current: f64) -> Self {
        Self { voltage, current }
    }

    /// Instantaneous power on this phase, signed the same way as `current`.
    pub fn power(&self) -> f64 {
        self.voltage * self.current
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self {
            voltage: 230.0,
            current: 0.0,
        }
    }
}

/// A full snapshot of electrical and battery state at a tick boundary.
///
/// Producers mutate this in place; policies only read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Situation {
    /// Home battery state of charge, clamped to `[0.0, 1.0]`.
    battery_state: f64,
    /// Instantaneous inverter output (solar + battery), in watts.
    pub inverter_output: f64,
    /// Battery output in watts; positive is discharge, negative is charge.
    pub battery_output: f64,
    /// Per-phase grid measurements. Never empty for a `Situation` built via `new`.
    pub grid: Vec<Phase>,
}

impl Situation {
    /// Build an N-phase situation with every phase defaulted to 230 V / 0 A.
    ///
    /// `n_phases` is clamped to at least 1 so the resulting `grid` is never empty.
    pub fn new(n_phases: usize) -> Self {
        let n = n_phases.max(1);
        Self {
            battery_state: 0.0,
            inverter_output: 0.0,
            battery_output: 0.0,
            grid: vec![Phase::default(); n],
        }
    }

    /// Home battery state of charge, always within `[0.0, 1.0]`.
    pub fn battery_state(&self) -> f64 {
        self.battery_state
    }

    /// Set the battery state of charge, clamping to `[0.0, 1.0]` on ingest.
    pub fn set_battery_state(&mut self, state: f64) {
        self.battery_state = state.clamp(0.0, 1.0);
    }

    /// `inverter_output - battery_output`.
    pub fn solar_output(&self) -> f64 {
        self.inverter_output - self.battery_output
    }

    /// Mean of the per-phase voltages, or `0.0` if `grid` is empty.
    pub fn grid_voltage(&self) -> f64 {
        if self.grid.is_empty() {
            return 0.0;
        }
        self.grid.iter().map(|p| p.voltage).sum::<f64>() / self.grid.len() as f64
    }

    /// Signed sum of `voltage * current` across all phases.
    pub fn grid_output(&self) -> f64 {
        self.grid.iter().map(Phase::power).sum()
    }

    /// `inverter_output + grid_output`.
    pub fn consumption(&self) -> f64 {
        self.inverter_output + self.grid_output()
    }
}

/// The allowance, in amperes per phase, the controller publishes to the charger.
///
/// Negative values mean "reduce"; the consumer clamps at zero before acting on it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Budget {
    pub current: f64,
}

impl Budget {
    pub fn new(current: f64) -> Self {
        Self { current }
    }

    /// The budget clamped to never request a negative allowance.
    pub fn clamped(&self) -> f64 {
        self.current.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_quantities_match_definitions() {
        let mut sit = Situation::new(3);
        sit.inverter_output = 4000.0;
        sit.battery_output = 1000.0;
        for (i, phase) in sit.grid.iter_mut().enumerate() {
            phase.voltage = 230.0;
            phase.current = (i as f64) - 1.0;
        }
        assert_eq!(sit.solar_output(), 3000.0);
        assert_eq!(sit.grid_voltage(), 230.0);
        assert_eq!(sit.grid_output(), 230.0 * (-1.0 + 0.0 + 1.0));
        assert_eq!(sit.consumption(), sit.inverter_output + sit.grid_output());
    }

    #[test]
    fn battery_state_is_clamped() {
        let mut sit = Situation::new(1);
        sit.set_battery_state(1.5);
        assert_eq!(sit.battery_state(), 1.0);
        sit.set_battery_state(-0.2);
        assert_eq!(sit.battery_state(), 0.0);
    }

    #[test]
    fn new_never_produces_an_empty_grid() {
        let sit = Situation::new(0);
        assert_eq!(sit.grid.len(), 1);
    }

    #[test]
    fn budget_clamps_negative_to_zero() {
        let b = Budget::new(-3.5);
        assert_eq!(b.clamped(), 0.0);
        assert_eq!(Budget::new(2.0).clamped(), 2.0);
    }
}
