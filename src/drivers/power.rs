//! Mock power driver — the reference driver used by tests and demos.
//!
//! Exports unary `on` / `off` and a stream `read` that replays a configured
//! sequence of voltage/current readings. No real hardware is touched; the
//! driver records its power state so tests can observe call effects.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registry::{
    DuplicateOperationError, MethodRegistry, OperationStream, StreamHandler, UnaryFn,
};
use crate::wire::Value;

use super::Driver;

/// One sample from the power rail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    pub voltage: f64,
    pub current: f64,
}

impl PowerReading {
    fn to_value(self) -> Value {
        let mut map = std::collections::BTreeMap::new();
        map.insert("voltage".to_string(), Value::Float(self.voltage));
        map.insert("current".to_string(), Value::Float(self.current));
        Value::Map(map)
    }
}

/// Observable power state, `None` until the first `on`/`off` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
}

/// Configuration accepted by the `mock-power` factory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockPowerConfig {
    /// Readings replayed by the `read` stream, in order.
    pub readings: Vec<PowerReading>,
}

impl Default for MockPowerConfig {
    fn default() -> Self {
        Self {
            readings: vec![
                PowerReading {
                    voltage: 0.0,
                    current: 0.0,
                },
                PowerReading {
                    voltage: 5.0,
                    current: 2.0,
                },
            ],
        }
    }
}

#[derive(Debug)]
pub struct MockPower {
    state: Mutex<Option<PowerState>>,
    readings: Vec<PowerReading>,
}

impl MockPower {
    pub fn new(config: MockPowerConfig) -> Self {
        Self {
            state: Mutex::new(None),
            readings: config.readings,
        }
    }

    pub fn state(&self) -> Option<PowerState> {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: PowerState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = Some(state);
    }
}

impl Default for MockPower {
    fn default() -> Self {
        Self::new(MockPowerConfig::default())
    }
}

#[async_trait]
impl Driver for MockPower {
    fn driver_type(&self) -> &'static str {
        "mock-power"
    }

    fn export(
        self: Arc<Self>,
        registry: &mut MethodRegistry,
    ) -> Result<(), DuplicateOperationError> {
        let driver = self.clone();
        registry.register_unary(
            "on",
            UnaryFn(move |_args| {
                let driver = driver.clone();
                async move {
                    driver.set_state(PowerState::On);
                    Ok(Value::Bool(true))
                }
            }),
        )?;

        let driver = self.clone();
        registry.register_unary(
            "off",
            UnaryFn(move |_args| {
                let driver = driver.clone();
                async move {
                    driver.set_state(PowerState::Off);
                    Ok(Value::Bool(true))
                }
            }),
        )?;

        registry.register_stream("read", ReadHandler { driver: self })?;
        Ok(())
    }

    async fn release(&self) -> anyhow::Result<()> {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = None;
        debug!(driver = self.driver_type(), "power rail released");
        Ok(())
    }
}

struct ReadHandler {
    driver: Arc<MockPower>,
}

#[async_trait]
impl StreamHandler for ReadHandler {
    async fn open(&self, _args: Vec<Value>) -> anyhow::Result<Box<dyn OperationStream>> {
        Ok(Box::new(ReadingStream {
            remaining: self.driver.readings.iter().copied().collect(),
        }))
    }
}

struct ReadingStream {
    remaining: VecDeque<PowerReading>,
}

#[async_trait]
impl OperationStream for ReadingStream {
    async fn next(&mut self) -> Option<anyhow::Result<Value>> {
        self.remaining.pop_front().map(|r| Ok(r.to_value()))
    }

    async fn cancel(&mut self) -> anyhow::Result<()> {
        self.remaining.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Invocation;

    #[tokio::test]
    async fn on_and_off_toggle_state() {
        let driver = Arc::new(MockPower::default());
        let mut registry = MethodRegistry::new();
        driver.clone().export(&mut registry).unwrap();

        assert_eq!(driver.state(), None);
        registry.invoke("on", vec![]).await.unwrap();
        assert_eq!(driver.state(), Some(PowerState::On));
        registry.invoke("off", vec![]).await.unwrap();
        assert_eq!(driver.state(), Some(PowerState::Off));
    }

    #[tokio::test]
    async fn read_replays_configured_readings_in_order() {
        let driver = Arc::new(MockPower::default());
        let mut registry = MethodRegistry::new();
        driver.clone().export(&mut registry).unwrap();

        let Invocation::Stream(mut stream) = registry.invoke("read", vec![]).await.unwrap()
        else {
            panic!("read should be a stream operation");
        };

        let first = stream.next().await.unwrap().unwrap();
        match first {
            Value::Map(fields) => {
                assert_eq!(fields.get("voltage"), Some(&Value::Float(0.0)));
                assert_eq!(fields.get("current"), Some(&Value::Float(0.0)));
            }
            other => panic!("expected map reading, got {other:?}"),
        }
        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(second, Value::Map(_)));
        assert!(stream.next().await.is_none(), "stream should be drained");
    }
}
