//! Tree composer — builds the driver node hierarchy from a static
//! description.
//!
//! Descriptions are YAML (or JSON) documents of nested `{ type, config,
//! children }` nodes, matching the exporter configs the fleet already
//! ships. Driver types are looked up in a [`DriverRegistry`] of factories;
//! a node that gives only `children` composes as the built-in composite
//! driver. Composition is all-or-nothing: any factory failure, unknown
//! type, or duplicate operation aborts with the offending node path.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::drivers::composite::Composite;
use crate::drivers::power::{MockPower, MockPowerConfig};
use crate::drivers::Driver;
use crate::registry::MethodRegistry;

use super::{format_path, DriverNode};

/// One node of a tree description.
///
/// ```yaml
/// children:
///   power:
///     type: mock-power
///     config:
///       readings:
///         - { voltage: 5.0, current: 1.2 }
///   dut:
///     children:
///       serial:
///         type: mock-power
/// ```
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    /// Driver type name. Omitted means `composite`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub driver_type: Option<String>,
    /// Driver-specific configuration, handed to the factory untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
    /// Extra labels merged into the node's report.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Named child nodes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, NodeSpec>,
}

impl NodeSpec {
    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    pub fn from_yaml_path(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&source)?)
    }
}

/// Factory producing a driver instance from its `config` document.
pub type DriverFactory =
    Box<dyn Fn(&serde_json::Value) -> anyhow::Result<Arc<dyn Driver>> + Send + Sync>;

/// Name→factory table the composer resolves `type` fields against.
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// An empty registry, for deployments that bring their own drivers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in drivers
    /// (`composite`, `mock-power`).
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("composite", |_config| Ok(Arc::new(Composite) as Arc<dyn Driver>));
        registry.register("mock-power", |config| {
            let config: MockPowerConfig = if config.is_null() {
                MockPowerConfig::default()
            } else {
                serde_json::from_value(config.clone())?
            };
            Ok(Arc::new(MockPower::new(config)) as Arc<dyn Driver>)
        });
        registry
    }

    /// Register a driver factory under `type_name`. Last registration wins,
    /// so deployments can shadow a built-in.
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<Arc<dyn Driver>> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Box::new(factory));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    fn get(&self, type_name: &str) -> Option<&DriverFactory> {
        self.factories.get(type_name)
    }
}

/// Composition failure. Every variant carries the offending node path.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("unknown driver type {driver_type:?} at {path}")]
    UnknownDriverType { path: String, driver_type: String },

    #[error("invalid configuration at {path}: {source}")]
    Configuration {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("duplicate operation {name:?} at {path}")]
    DuplicateOperation { path: String, name: String },
}

/// Recursively instantiate the tree described by `spec`.
///
/// Children are composed before their parent; parent back-references are
/// wired as each node is built. The returned root owns the whole tree.
pub fn compose(drivers: &DriverRegistry, spec: &NodeSpec) -> Result<Arc<DriverNode>, ComposeError> {
    let root = compose_node(drivers, "root", spec, &[])?;
    debug!(
        nodes = count_nodes(&root),
        "driver tree composed"
    );
    Ok(root)
}

fn compose_node(
    drivers: &DriverRegistry,
    name: &str,
    spec: &NodeSpec,
    path: &[String],
) -> Result<Arc<DriverNode>, ComposeError> {
    let path_str = format_path(path);

    // No type means a pure composite grouping node.
    let driver_type = spec.driver_type.as_deref().unwrap_or("composite");
    let factory = drivers
        .get(driver_type)
        .ok_or_else(|| ComposeError::UnknownDriverType {
            path: path_str.clone(),
            driver_type: driver_type.to_string(),
        })?;

    let driver = factory(&spec.config).map_err(|source| ComposeError::Configuration {
        path: path_str.clone(),
        source,
    })?;

    let mut children = BTreeMap::new();
    for (child_name, child_spec) in &spec.children {
        let mut child_path = path.to_vec();
        child_path.push(child_name.clone());
        let child = compose_node(drivers, child_name, child_spec, &child_path)?;
        children.insert(child_name.clone(), child);
    }

    let mut registry = MethodRegistry::new();
    Arc::clone(&driver)
        .export(&mut registry)
        .map_err(|e| ComposeError::DuplicateOperation {
            path: path_str.clone(),
            name: e.name,
        })?;

    debug!(
        node = %path_str,
        driver = driver_type,
        operations = registry.operation_names().len(),
        children = children.len(),
        "node composed"
    );

    Ok(DriverNode::new(
        name.to_string(),
        driver,
        registry,
        children,
        spec.labels.clone(),
    ))
}

fn count_nodes(node: &Arc<DriverNode>) -> usize {
    1 + node.children().map(|(_, c)| count_nodes(c)).sum::<usize>()
}
