//! Typed, subscribable key/value configuration store.
//!
//! Parameters are declared with [`ConfigParam::subscribe`] against a dotted
//! key (e.g. `modbus.port`). Declaration resolves the initial value from,
//! in order: the hard-coded default, a matching environment variable, then
//! any string value already loaded into the store from a config file or CLI
//! argument. Runtime writes via [`Config::set_param`] re-parse and notify
//! every subscriber of that key.
//!
//! The store never calls back into its own lock while holding it: a
//! subscriber's parse callback may itself declare further params (as
//! `simulator.enable`'s nested settings do), so [`Config::set_param`] copies
//! out the list of subscribers under a short-lived lock and invokes their
//! parse callbacks after releasing it. This sidesteps the need for a
//! recursive mutex entirely.

use crate::error::Result;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error};

type ParseFn = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

#[derive(Default)]
struct Inner {
    raw: HashMap<String, String>,
    subscribers: HashMap<String, Vec<ParseFn>>,
}

/// The dotted-key configuration store, shared by clone across every subscriber.
#[derive(Clone, Default)]
pub struct Config {
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config").finish_non_exhaustive()
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `/etc/<product>.conf` then `./<product>.conf`, each overriding the
    /// previous. Missing files are silently skipped; this is the normal case
    /// for `./<product>.conf`.
    pub fn load_files(&self, product: &str) {
        self.load_file(Path::new(&format!("/etc/{product}.conf")));
        self.load_file(Path::new(&format!("./{product}.conf")));
    }

    fn load_file(&self, path: &Path) {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return;
        };
        for line in contents.lines() {
            let line = line.trim_end_matches(['\r', '\n']);
            let line = match line.find('#') {
                Some(idx) => &line[..idx],
                None => line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.set_raw(key.trim(), value.trim());
            }
        }
        debug!("Loaded config file {}", path.display());
    }

    /// Apply `--key value` CLI arguments, each overriding file values.
    /// Returns an error describing the offending token if one doesn't fit the shape.
    pub fn apply_cli_args(&self, args: &[String]) -> std::result::Result<(), String> {
        let mut iter = args.iter();
        while let Some(token) = iter.next() {
            let key = token
                .strip_prefix("--")
                .ok_or_else(|| format!("unrecognized argument '{token}', expected --key value"))?;
            let value = iter
                .next()
                .ok_or_else(|| format!("missing value for argument --{key}"))?;
            self.set_raw(key, value);
        }
        Ok(())
    }

    /// Record a string value without notifying subscribers (used for file/CLI loading,
    /// which happens before any parameter declaration).
    fn set_raw(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .expect("config mutex poisoned")
            .raw
            .insert(key.to_string(), value.to_string());
    }

    fn env_var_name(key: &str) -> String {
        key.to_uppercase().replace('.', "_")
    }

    /// Store `text` under `key` and fan it out to every subscriber declared
    /// against that key, parsing it through each one independently.
    pub fn set_param(&self, key: &str, text: &str) {
        self.set_raw(key, text);
        let subscribers = self
            .inner
            .lock()
            .expect("config mutex poisoned")
            .subscribers
            .get(key)
            .cloned()
            .unwrap_or_default();
        for parse in subscribers {
            if let Err(e) = parse(text) {
                error!("Failed to apply runtime config write to '{key}': {e}");
            }
        }
    }
}

/// A single typed configuration parameter, subscribed against a dotted key.
#[derive(Clone)]
pub struct ConfigParam<T> {
    key: String,
    slot: Arc<RwLock<T>>,
}

impl<T: Clone + Send + Sync + 'static> ConfigParam<T> {
    /// Declare a parameter, resolving its initial value per [`Config`]'s
    /// resolution order and registering it for future runtime writes.
    pub fn subscribe<P>(config: &Config, key: &str, default: T, parse: P) -> Self
    where
        P: Fn(&str) -> Result<T> + Send + Sync + 'static,
    {
        let mut value = default.clone();

        if let Ok(env_value) = std::env::var(Config::env_var_name(key)) {
            match parse(&env_value) {
                Ok(parsed) => value = parsed,
                Err(e) => error!("Invalid value for env override of '{key}': {e}"),
            }
        }

        let stored = {
            let inner = config.inner.lock().expect("config mutex poisoned");
            inner.raw.get(key).cloned()
        };
        if let Some(text) = stored {
            match parse(&text) {
                Ok(parsed) => value = parsed,
                Err(e) => error!("Invalid stored value for '{key}': {e}"),
            }
        }

        let slot = Arc::new(RwLock::new(value));
        let slot_for_closure = slot.clone();
        let parse_fn: ParseFn = Arc::new(move |text: &str| {
            let parsed = parse(text)?;
            *slot_for_closure.write().expect("config param poisoned") = parsed;
            Ok(())
        });

        config
            .inner
            .lock()
            .expect("config mutex poisoned")
            .subscribers
            .entry(key.to_string())
            .or_default()
            .push(parse_fn);

        Self {
            key: key.to_string(),
            slot,
        }
    }

    pub fn get(&self) -> T {
        self.slot.read().expect("config param poisoned").clone()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Overwrite the stored value directly, bypassing the parser. Used by
    /// the settings layer to apply an already-deserialized JSON value.
    pub fn set_from_value(&self, value: T) {
        *self.slot.write().expect("config param poisoned") = value;
    }
}

/// Parse helper for `f64`-valued parameters.
pub fn parse_f64(text: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|e| crate::error::ControllerError::config(format!("not a number: {e}")))
}

/// Parse helper for `String`-valued parameters.
pub fn parse_string(text: &str) -> Result<String> {
    Ok(text.to_string())
}

/// Parse helper for `bool`-valued parameters (`true`/`false`, case-insensitive).
pub fn parse_bool(text: &str) -> Result<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(crate::error::ControllerError::config(format!(
            "not a boolean: {other}"
        ))),
    }
}

/// Parse helper for `u16`-valued parameters.
pub fn parse_u16(text: &str) -> Result<u16> {
    text.trim()
        .parse::<u16>()
        .map_err(|e| crate::error::ControllerError::config(format!("not a port number: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_used_when_nothing_overrides() {
        let config = Config::new();
        let p = ConfigParam::subscribe(&config, "test.alpha", 1.0, parse_f64);
        assert_eq!(p.get(), 1.0);
    }

    #[test]
    fn stored_value_overrides_default_at_subscribe_time() {
        let config = Config::new();
        config.set_raw("test.beta", "42");
        let p = ConfigParam::subscribe(&config, "test.beta", 1.0, parse_f64);
        assert_eq!(p.get(), 42.0);
    }

    #[test]
    fn runtime_write_fans_out_to_subscriber() {
        let config = Config::new();
        let p = ConfigParam::subscribe(&config, "test.gamma", 1.0, parse_f64);
        config.set_param("test.gamma", "7.5");
        assert_eq!(p.get(), 7.5);
    }

    #[test]
    fn parse_failure_keeps_previous_value() {
        let config = Config::new();
        let p = ConfigParam::subscribe(&config, "test.delta", 3.0, parse_f64);
        config.set_param("test.delta", "not-a-number");
        assert_eq!(p.get(), 3.0);
    }

    #[test]
    fn cli_args_override_file_values() {
        let config = Config::new();
        config.set_raw("test.epsilon", "1");
        config
            .apply_cli_args(&["--test.epsilon".to_string(), "2".to_string()])
            .unwrap();
        let p = ConfigParam::subscribe(&config, "test.epsilon", 0.0, parse_f64);
        assert_eq!(p.get(), 2.0);
    }

    #[test]
    fn malformed_cli_token_is_rejected() {
        let config = Config::new();
        let err = config.apply_cli_args(&["not-a-flag".to_string()]);
        assert!(err.is_err());
    }

    #[test]
    fn subscribing_from_within_a_parse_callback_does_not_deadlock() {
        let config = Config::new();
        let inner_config = config.clone();
        let nested = Arc::new(RwLock::new(None));
        let nested_for_closure = nested.clone();
        let config_for_closure = inner_config.clone();
        let p = ConfigParam::subscribe(&inner_config, "test.zeta", 0.0, move |text| {
            let parsed = parse_f64(text)?;
            let nested_param = ConfigParam::subscribe(
                &config_for_closure,
                "test.zeta.nested",
                0.0,
                parse_f64,
            );
            *nested_for_closure.write().unwrap() = Some(nested_param);
            Ok(parsed)
        });
        config.set_param("test.zeta", "9");
        assert_eq!(p.get(), 9.0);
        assert!(nested.read().unwrap().is_some());
    }
}
