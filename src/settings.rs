//! Persisted settings layered on top of [`crate::config`].
//!
//! A settings parameter resolves the same way a config parameter does, plus
//! a JSON-backed store consulted at construction time: if the persisted
//! document has the key, it overwrites whatever `Config` produced. Settings
//! are mutated only through `POST /api/settings`; each write validates every
//! (key, value) pair independently, applies the ones that pass, and persists
//! the whole document atomically (`<path>.tmp` then rename).

use crate::config::{Config, ConfigParam};
use crate::error::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

type FromJsonFn = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;
type ToJsonFn = Arc<dyn Fn() -> Value + Send + Sync>;

struct Subscriber {
    from_json: FromJsonFn,
    to_json: ToJsonFn,
}

struct Inner {
    path: PathBuf,
    subscribers: HashMap<String, Subscriber>,
}

/// The settings registry: owns the on-disk JSON document and every typed
/// settings parameter's validate/apply/serialize hooks.
#[derive(Clone)]
pub struct Settings {
    inner: Arc<Mutex<Inner>>,
}

impl Settings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                path: path.into(),
                subscribers: HashMap::new(),
            })),
        }
    }

    fn load_document(path: &Path) -> serde_json::Map<String, Value> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok())
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default()
    }

    /// Validate and apply every (key, value) pair in `updates`, skipping and
    /// logging any that fail their subscriber's `from_json`, then persist the
    /// merged document atomically.
    pub fn apply_and_persist(&self, updates: &serde_json::Map<String, Value>) -> Result<()> {
        let (path, accepted) = {
            let inner = self.inner.lock().expect("settings mutex poisoned");
            let mut accepted = Vec::new();
            for (key, value) in updates {
                match inner.subscribers.get(key) {
                    Some(sub) => match (sub.from_json)(value) {
                        Ok(()) => accepted.push(key.clone()),
                        Err(e) => warn!("Rejected settings write for '{key}': {e}"),
                    },
                    None => warn!("Ignoring settings write for unknown key '{key}'"),
                }
            }
            (inner.path.clone(), accepted)
        };

        if accepted.is_empty() {
            return Ok(());
        }
        self.persist(&path)
    }

    fn persist(&self, path: &Path) -> Result<()> {
        let document = {
            let inner = self.inner.lock().expect("settings mutex poisoned");
            let mut document = serde_json::Map::new();
            for (key, sub) in &inner.subscribers {
                document.insert(key.clone(), (sub.to_json)());
            }
            document
        };

        let text = serde_json::to_string_pretty(&Value::Object(document))?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, text)?;
        std::fs::rename(&tmp_path, path)?;
        info!("Persisted settings to {}", path.display());
        Ok(())
    }

    /// The full settings document as currently held in memory, for `GET /api/settings`.
    pub fn to_json(&self) -> Value {
        let inner = self.inner.lock().expect("settings mutex poisoned");
        let mut document = serde_json::Map::new();
        for (key, sub) in &inner.subscribers {
            document.insert(key.clone(), (sub.to_json)());
        }
        Value::Object(document)
    }
}

/// A single typed settings parameter: config resolution plus JSON persistence.
#[derive(Clone)]
pub struct SettingsParam<T> {
    param: ConfigParam<T>,
}

impl<T> SettingsParam<T>
where
    T: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static,
{
    /// Declare a settings parameter: resolves through `Config` first, then
    /// overwrites from the persisted JSON document if the key is present there.
    pub fn subscribe<P>(settings: &Settings, config: &Config, key: &str, default: T, parse: P) -> Self
    where
        P: Fn(&str) -> Result<T> + Send + Sync + 'static,
    {
        let param = ConfigParam::subscribe(config, key, default, parse);

        let path = {
            let inner = settings.inner.lock().expect("settings mutex poisoned");
            inner.path.clone()
        };
        let document = Settings::load_document(&path);
        if let Some(value) = document.get(key) {
            match serde_json::from_value::<T>(value.clone()) {
                Ok(parsed) => {
                    // Route through the config param's own parse-free setter by
                    // re-serializing and writing it back through its slot directly.
                    param.set_from_value(parsed);
                }
                Err(e) => error!("Failed to load persisted setting '{key}': {e}"),
            }
        }

        let param_for_from_json = param.clone();
        let from_json: FromJsonFn = Arc::new(move |value: &Value| {
            let parsed: T = serde_json::from_value(value.clone())?;
            param_for_from_json.set_from_value(parsed);
            Ok(())
        });

        let param_for_to_json = param.clone();
        let to_json: ToJsonFn =
            Arc::new(move || serde_json::to_value(param_for_to_json.get()).unwrap_or(Value::Null));

        settings.inner.lock().expect("settings mutex poisoned").subscribers.insert(
            key.to_string(),
            Subscriber {
                from_json,
                to_json,
            },
        );

        Self { param }
    }

    pub fn get(&self) -> T {
        self.param.get()
    }
}
