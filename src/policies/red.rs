use super::CommonTunables;
use crate::error::Result;
use crate::registry::{Policy, PolicyInfo};
use crate::situation::{Budget, Situation};
use std::sync::Arc;

/// Maximum-draw policy, capped by the main breaker.
///
/// `budget.current = max_current - max(phase currents)`, keeping the peak
/// phase current at or below `max_current` regardless of load imbalance
/// across phases. Every generic-policy instance imposes this cap last.
pub struct RedPolicy {
    common: Arc<CommonTunables>,
}

impl RedPolicy {
    pub fn new(common: Arc<CommonTunables>) -> Self {
        Self { common }
    }
}

impl Policy for RedPolicy {
    fn info(&self) -> PolicyInfo {
        PolicyInfo {
            name: "red".to_string(),
            icon: "🛑".to_string(),
            label: "Red".to_string(),
            description: "Maximum draw, capped only by the main breaker.".to_string(),
        }
    }

    fn apply(&self, situation: &Situation) -> Result<Budget> {
        let Some(max_phase_current) = situation
            .grid
            .iter()
            .map(|p| p.current)
            .fold(None, |acc, c| match acc {
                None => Some(c),
                Some(m) => Some(m.max(c)),
            })
        else {
            return Ok(Budget::new(0.0));
        };
        Ok(Budget::new(self.common.max_current.get() - max_phase_current))
    }
}
