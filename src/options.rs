//! Pool configuration and its translation to and from the script vocabulary.
//!
//! Scripts spell options in camelCase with millisecond durations
//! (`maxIdleTimeMS`, `waitQueueTimeoutMS`); the pool under test takes
//! snake_case options with durations. Keys outside the table below are
//! dropped in both directions.

use std::time::{Duration, TryFromFloatSecsError};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::HarnessError;

/// Field of [`PoolOptions`] a script key maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionField {
    MaxIdleTime,
    MaxPoolSize,
    MinPoolSize,
    WaitQueueSize,
    WaitQueueTimeout,
}

/// (script key, internal key, field)
const OPTION_KEYS: [(&str, &str, OptionField); 5] = [
    ("maxIdleTimeMS", "max_idle_time", OptionField::MaxIdleTime),
    ("maxPoolSize", "max_pool_size", OptionField::MaxPoolSize),
    ("minPoolSize", "min_pool_size", OptionField::MinPoolSize),
    ("waitQueueSize", "wait_queue_size", OptionField::WaitQueueSize),
    ("waitQueueTimeoutMS", "wait_queue_timeout", OptionField::WaitQueueTimeout),
];

/// Options handed to the pool under test.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pool_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_pool_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_queue_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_queue_timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_idle_time: Option<Duration>,
}

/// Map a script option key to the pool's internal key.
#[must_use]
pub fn script_key_to_internal(key: &str) -> Option<&'static str> {
    OPTION_KEYS
        .iter()
        .find(|(script, _, _)| *script == key)
        .map(|(_, internal, _)| *internal)
}

/// Map an internal pool option key to its script spelling.
#[must_use]
pub fn internal_key_to_script(key: &str) -> Option<&'static str> {
    OPTION_KEYS
        .iter()
        .find(|(_, internal, _)| *internal == key)
        .map(|(script, _, _)| *script)
}

impl PoolOptions {
    /// Build options from a script's `poolOptions` block.
    ///
    /// # Errors
    /// Returns [`HarnessError::Script`] if a recognized key carries a value that is not a
    /// non-negative number.
    pub fn from_script(block: &Map<String, Value>) -> Result<Self, HarnessError> {
        let mut options = PoolOptions::default();
        for (key, value) in block {
            let Some((_, _, field)) = OPTION_KEYS.iter().find(|(script, _, _)| script == key)
            else {
                tracing::debug!("dropping unrecognized pool option {key}");
                continue;
            };
            let number = value.as_f64().filter(|n| *n >= 0.0).ok_or_else(|| {
                HarnessError::Script(format!(
                    "pool option {key} must be a non-negative number, got {value}"
                ))
            })?;
            options.set(*field, number).map_err(|reason| {
                HarnessError::Script(format!("pool option {key} is out of range: {reason}"))
            })?;
        }
        Ok(options)
    }

    /// Render options back into script vocabulary (the `options` field of a
    /// `ConnectionPoolCreated` event).
    #[must_use]
    pub fn to_script(&self) -> Map<String, Value> {
        let mut block = Map::new();
        for (script, _, field) in OPTION_KEYS {
            if let Some(value) = self.get(field) {
                block.insert(script.to_string(), value);
            }
        }
        block
    }

    /// Current value of `field` in script units.
    fn get(&self, field: OptionField) -> Option<Value> {
        let millis = |d: Duration| Value::from(u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        match field {
            OptionField::MaxIdleTime => self.max_idle_time.map(millis),
            OptionField::MaxPoolSize => self.max_pool_size.map(Value::from),
            OptionField::MinPoolSize => self.min_pool_size.map(Value::from),
            OptionField::WaitQueueSize => self.wait_queue_size.map(Value::from),
            OptionField::WaitQueueTimeout => self.wait_queue_timeout.map(millis),
        }
    }

    /// Set `field` from a non-negative script number (a count, or milliseconds).
    fn set(&mut self, field: OptionField, number: f64) -> Result<(), TryFromFloatSecsError> {
        let millis = || Duration::try_from_secs_f64(number / 1000.0);
        match field {
            OptionField::MaxIdleTime => self.max_idle_time = Some(millis()?),
            OptionField::MaxPoolSize => self.max_pool_size = Some(as_count(number)),
            OptionField::MinPoolSize => self.min_pool_size = Some(as_count(number)),
            OptionField::WaitQueueSize => self.wait_queue_size = Some(as_count(number)),
            OptionField::WaitQueueTimeout => self.wait_queue_timeout = Some(millis()?),
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn as_count(number: f64) -> u64 {
    number.round() as u64
}
