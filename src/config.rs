//! Declarative graph descriptions loaded from YAML or JSON.
//!
//! A configuration file declares library device classes, device instances,
//! partition assignments, and links; `GraphConfig::build` turns it into a
//! [`DeviceGraph`](crate::graph::DeviceGraph) using a
//! [`ClassRegistry`](crate::registry::ClassRegistry) to resolve classes.
//! Assembly classes carry code (their expanders) and must be registered
//! ahead of time; only library classes can be declared inline.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! graph:
//!   attr:
//!     title: "two node mesh"
//!
//! classes:
//!   - name: Router
//!     library: merlin.hr_router
//!     ports:
//!       - name: network
//!         type: net
//!         cardinality: { bounded: 4 }
//!         latency: 10ns
//!
//! devices:
//!   - name: r0
//!     class: Router
//!     partition: { rank: 0, thread: 0 }
//!     attrs:
//!       num_ports: "4"
//!
//! links:
//!   - a: { device: r0, port: network, index: 0 }
//!     b: { device: r1, port: network, index: 0 }
//!     latency: 20ns
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::device::{DeviceClass, NamingContext};
use crate::error::GraphError;
use crate::graph::DeviceGraph;
use crate::port::{PortCardinality, PortDescriptor};
use crate::registry::ClassRegistry;
use crate::types::{Rank, Thread};

/// Errors that can occur while loading or building a graph description.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),

    #[error("Graph construction error: {0}")]
    Graph(#[from] GraphError),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Port cardinality as written in configuration files.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardinalityConfig {
    /// Exactly one connection, no index.
    #[default]
    Single,
    /// Up to `n` indexed connection points.
    Bounded(usize),
    /// Unlimited indexed connection points.
    Unbounded,
}

impl From<CardinalityConfig> for PortCardinality {
    fn from(value: CardinalityConfig) -> Self {
        match value {
            CardinalityConfig::Single => PortCardinality::Single,
            CardinalityConfig::Bounded(n) => PortCardinality::Bounded(n),
            CardinalityConfig::Unbounded => PortCardinality::Unbounded,
        }
    }
}

/// A port declaration within an inline class.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortConfig {
    /// Port name
    pub name: String,

    /// Compatibility type tag
    #[serde(rename = "type")]
    pub ty: String,

    /// Connection cardinality
    #[serde(default)]
    pub cardinality: CardinalityConfig,

    /// Whether `verify_links` demands a connection (default true)
    #[serde(default = "default_required")]
    pub required: bool,

    /// Default latency for links on this port
    #[serde(default)]
    pub latency: Option<String>,
}

fn default_required() -> bool {
    true
}

/// An inline library class declaration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassConfig {
    /// Class name
    pub name: String,

    /// Engine library identifier, e.g. `merlin.hr_router`
    pub library: String,

    /// Port declarations
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

/// Partition assignment as written in configuration files.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Execution rank
    pub rank: Rank,

    /// Thread within the rank (default 0)
    #[serde(default)]
    pub thread: Thread,
}

/// A device instance declaration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name; must be unique
    pub name: String,

    /// Class name, resolved against inline classes then the registry
    pub class: String,

    /// Optional model tag refining the device category
    #[serde(default)]
    pub model: Option<String>,

    /// Partition assignment
    #[serde(default)]
    pub partition: Option<PartitionConfig>,

    /// Device attributes, order preserved
    #[serde(default)]
    pub attrs: IndexMap<String, Value>,
}

/// One endpoint of a link declaration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Device name
    pub device: String,

    /// Port name
    pub port: String,

    /// Index for multi-cardinality ports
    #[serde(default)]
    pub index: Option<usize>,
}

/// A link declaration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkConfig {
    /// First endpoint
    pub a: EndpointConfig,

    /// Second endpoint
    pub b: EndpointConfig,

    /// Explicit latency; falls back to port defaults
    #[serde(default)]
    pub latency: Option<String>,
}

/// Graph-level parameters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphParams {
    /// Opaque client metadata copied onto the graph
    #[serde(default)]
    pub attr: IndexMap<String, Value>,
}

/// Complete declarative graph description.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Graph-level parameters
    #[serde(default)]
    pub graph: GraphParams,

    /// Inline library class declarations
    #[serde(default)]
    pub classes: Vec<ClassConfig>,

    /// Device instance declarations
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Link declarations
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

impl GraphConfig {
    /// Creates a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: GraphConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads a configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: GraphConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a file, auto-detecting the format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the structure of the description.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut class_names = HashSet::new();
        for class in &self.classes {
            if !class_names.insert(class.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate class declaration: {}",
                    class.name
                )));
            }
            let mut port_names = HashSet::new();
            for port in &class.ports {
                if !port_names.insert(port.name.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "Class {} declares port {} twice",
                        class.name, port.name
                    )));
                }
            }
        }

        let mut device_names = HashSet::new();
        for dev in &self.devices {
            if !device_names.insert(dev.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate device name: {}",
                    dev.name
                )));
            }
        }

        for (i, link) in self.links.iter().enumerate() {
            for endpoint in [&link.a, &link.b] {
                if !device_names.contains(endpoint.device.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "Link {} references undeclared device: {}",
                        i, endpoint.device
                    )));
                }
            }
        }

        Ok(())
    }

    /// Builds a [`DeviceGraph`] from the description.
    ///
    /// Inline classes are materialized as library classes; all other class
    /// references resolve against `registry`.
    pub fn build(&self, registry: &ClassRegistry) -> ConfigResult<DeviceGraph> {
        let mut inline = ClassRegistry::new();
        for class in &self.classes {
            let mut builder = DeviceClass::library(&class.name, &class.library);
            for port in &class.ports {
                builder = builder.with_port(PortDescriptor {
                    name: port.name.clone(),
                    ty: port.ty.clone(),
                    cardinality: port.cardinality.into(),
                    required: port.required,
                    default_latency: port.latency.clone(),
                });
            }
            inline.register(builder.build());
        }

        let mut graph = DeviceGraph::with_attr(self.graph.attr.clone());
        let mut names = NamingContext::new();

        for dev_cfg in &self.devices {
            let dev = inline
                .instantiate(&dev_cfg.class, Some(dev_cfg.name.as_str()), &mut names)
                .or_else(|| {
                    registry.instantiate(&dev_cfg.class, Some(dev_cfg.name.as_str()), &mut names)
                })
                .ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "Device {} references unknown class: {}",
                        dev_cfg.name, dev_cfg.class
                    ))
                })?;
            let dev = match &dev_cfg.model {
                Some(model) => dev.with_model(model),
                None => dev,
            };
            for (key, value) in &dev_cfg.attrs {
                dev.set_attr(key, value.clone());
            }
            if let Some(p) = dev_cfg.partition {
                dev.set_partition(p.rank, p.thread);
            }
            graph.add(&dev)?;
        }

        for link in &self.links {
            let a = resolve_endpoint(&graph, &link.a)?;
            let b = resolve_endpoint(&graph, &link.b)?;
            graph.link(a, b, link.latency.as_deref())?;
        }

        Ok(graph)
    }

    /// Saves the configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves the configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Converts to a YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to a JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns the number of declared devices.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Returns the number of declared links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Finds a device declaration by name.
    pub fn find_device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }
}

fn resolve_endpoint(
    graph: &DeviceGraph,
    endpoint: &EndpointConfig,
) -> ConfigResult<crate::port::PortInstance> {
    let dev = graph.device(&endpoint.device).ok_or_else(|| {
        ConfigError::Validation(format!("Unknown link endpoint device: {}", endpoint.device))
    })?;
    let instance = match endpoint.index {
        Some(i) => dev.port_indexed(&endpoint.port, i)?,
        None => dev.port(&endpoint.port)?,
    };
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESH: &str = r#"
graph:
  attr:
    title: "two router mesh"

classes:
  - name: Router
    library: merlin.hr_router
    ports:
      - name: network
        type: net
        cardinality: { bounded: 4 }
        required: false
        latency: 10ns
      - name: host
        type: mem
        required: false

devices:
  - name: r0
    class: Router
    partition: { rank: 0 }
    attrs:
      num_ports: "4"
  - name: r1
    class: Router
    partition: { rank: 1, thread: 1 }

links:
  - a: { device: r0, port: network, index: 0 }
    b: { device: r1, port: network, index: 0 }
    latency: 20ns
  - a: { device: r0, port: network, index: 1 }
    b: { device: r1, port: network, index: 1 }
"#;

    #[test]
    fn test_yaml_parsing() {
        let config = GraphConfig::from_yaml(MESH).unwrap();
        assert_eq!(config.classes.len(), 1);
        assert_eq!(config.device_count(), 2);
        assert_eq!(config.link_count(), 2);
        assert!(config.find_device("r0").is_some());
    }

    #[test]
    fn test_build() {
        let config = GraphConfig::from_yaml(MESH).unwrap();
        let graph = config.build(&ClassRegistry::new()).unwrap();

        assert_eq!(graph.device_count(), 2);
        assert_eq!(graph.link_count(), 2);
        assert_eq!(graph.attr["title"], "two router mesh");

        let latencies: Vec<_> = graph.links().map(|l| l.latency.as_str()).collect();
        assert_eq!(latencies, vec!["20ns", "10ns"]);

        let r1 = graph.device("r1").unwrap();
        assert_eq!(r1.partition().unwrap().rank, 1);
        assert_eq!(r1.partition().unwrap().thread, 1);
        graph.check_partition().unwrap();
    }

    #[test]
    fn test_json_parsing() {
        let json = r#"{
            "classes": [
                {"name": "Leaf", "library": "test.Leaf",
                 "ports": [{"name": "p", "type": "io", "required": false}]}
            ],
            "devices": [
                {"name": "a", "class": "Leaf"},
                {"name": "b", "class": "Leaf"}
            ],
            "links": [
                {"a": {"device": "a", "port": "p"}, "b": {"device": "b", "port": "p"}}
            ]
        }"#;
        let config = GraphConfig::from_json(json).unwrap();
        let graph = config.build(&ClassRegistry::new()).unwrap();
        assert_eq!(graph.device_count(), 2);
        assert_eq!(graph.link_count(), 1);
    }

    #[test]
    fn test_validation_duplicate_device() {
        let yaml = r#"
devices:
  - name: a
    class: Leaf
  - name: a
    class: Leaf
"#;
        assert!(GraphConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validation_unknown_endpoint() {
        let yaml = r#"
devices:
  - name: a
    class: Leaf
links:
  - a: { device: a, port: p }
    b: { device: ghost, port: p }
"#;
        assert!(GraphConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_class_at_build() {
        let yaml = r#"
devices:
  - name: a
    class: Phantom
"#;
        let config = GraphConfig::from_yaml(yaml).unwrap();
        let err = config.build(&ClassRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = GraphConfig::from_yaml(MESH).unwrap();
        let yaml = config.to_yaml().unwrap();
        let restored = GraphConfig::from_yaml(&yaml).unwrap();

        assert_eq!(config.device_count(), restored.device_count());
        assert_eq!(config.link_count(), restored.link_count());
    }
}
