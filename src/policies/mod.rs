//! The budget policy family: `red`, and the solar-aware `orange`/`yellow`/`green`
//! instances built on a shared generic implementation.

mod generic;
mod red;

pub use generic::GenericPolicy;
pub use red::RedPolicy;

use crate::config::Config;
use crate::registry::Policy;

/// Common tunables shared by `red` and every generic-policy instance.
pub struct CommonTunables {
    pub max_current: crate::config::ConfigParam<f64>,
    pub battery_max_power: crate::config::ConfigParam<f64>,
    pub battery_min_state: crate::config::ConfigParam<f64>,
    pub inverter_max_power: crate::config::ConfigParam<f64>,
}

impl CommonTunables {
    pub fn subscribe(config: &Config) -> Self {
        use crate::config::{ConfigParam, parse_f64};
        Self {
            max_current: ConfigParam::subscribe(config, "max_current", 16.0, parse_f64),
            battery_max_power: ConfigParam::subscribe(
                config,
                "battery_max_power",
                5000.0,
                parse_f64,
            ),
            battery_min_state: ConfigParam::subscribe(
                config,
                "battery_min_state",
                10.0,
                parse_f64,
            ),
            inverter_max_power: ConfigParam::subscribe(
                config,
                "inverter_max_power",
                8000.0,
                parse_f64,
            ),
        }
    }
}

/// Build the canonical `red`, `orange`, `yellow`, `green` policy set, sharing
/// one set of common tunables the way the original implementation's
/// `config::param` statics are shared across policy instances.
pub fn build_policies(config: &Config) -> Vec<Box<dyn Policy>> {
    let common = std::sync::Arc::new(CommonTunables::subscribe(config));

    let red = RedPolicy::new(common.clone());

    let orange = GenericPolicy::new(
        config,
        common.clone(),
        "orange",
        "☀️",
        "Orange",
        "Charge always; caps total household and charger grid draw at the configured limit.",
        8000.0,
        0.0,
    );
    let yellow = GenericPolicy::new(
        config,
        common.clone(),
        "yellow",
        "🌤️",
        "Yellow",
        "Charge only from what would otherwise be exported; allows battery discharge above the configured floor.",
        0.0,
        0.0,
    );
    let green = GenericPolicy::new(
        config,
        common,
        "green",
        "🌱",
        "Green",
        "Require substantial solar production before allowing any grid or battery draw.",
        0.0,
        5000.0,
    );

    vec![
        Box::new(red),
        Box::new(orange),
        Box::new(yellow),
        Box::new(green),
    ]
}
