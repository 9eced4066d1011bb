//! Boundary to the external execution engine.
//!
//! The engine is consumed through exactly two capabilities: create a
//! component of a class with parameters, and connect two component ports
//! with a latency. [`emit`] walks a fully flattened graph and drives a
//! [`Backend`] with those two calls; [`RecordingBackend`] is the stub used
//! when no real engine is installed, recording and logging every call
//! deterministically so construction logic can be exercised on its own.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{GraphError, GraphResult};
use crate::graph::DeviceGraph;

/// Opaque handle to a component created in the external engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentHandle(pub usize);

/// The two capabilities required of the external execution engine.
pub trait Backend {
    /// Creates a component of the given class with ordered parameters.
    fn create_component(
        &mut self,
        name: &str,
        class: &str,
        params: &IndexMap<String, String>,
    ) -> ComponentHandle;

    /// Connects two component ports with a latency annotation.
    fn connect(
        &mut self,
        a: &ComponentHandle,
        port_a: &str,
        b: &ComponentHandle,
        port_b: &str,
        latency: &str,
    );
}

/// One recorded backend invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    /// A component was created.
    CreateComponent {
        name: String,
        class: String,
        params: Vec<(String, String)>,
    },
    /// Two component ports were connected.
    Connect {
        a: String,
        port_a: String,
        b: String,
        port_b: String,
        latency: String,
    },
}

/// Engine stub: records every call in order and logs it deterministically.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
    names: Vec<String>,
}

impl RecordingBackend {
    /// Creates an empty recording backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded calls, in invocation order.
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Number of components created.
    pub fn component_count(&self) -> usize {
        self.names.len()
    }

    /// Number of connections made.
    pub fn connection_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, BackendCall::Connect { .. }))
            .count()
    }
}

impl Backend for RecordingBackend {
    fn create_component(
        &mut self,
        name: &str,
        class: &str,
        params: &IndexMap<String, String>,
    ) -> ComponentHandle {
        tracing::info!("Component '{name}' of class '{class}'");
        for (key, val) in params {
            tracing::info!("    {name}:{key} = '{val}'");
        }
        let handle = ComponentHandle(self.names.len());
        self.names.push(name.to_string());
        self.calls.push(BackendCall::CreateComponent {
            name: name.to_string(),
            class: class.to_string(),
            params: params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        });
        handle
    }

    fn connect(
        &mut self,
        a: &ComponentHandle,
        port_a: &str,
        b: &ComponentHandle,
        port_b: &str,
        latency: &str,
    ) {
        let name_a = &self.names[a.0];
        let name_b = &self.names[b.0];
        tracing::info!("Link ({latency})");
        tracing::info!("    {name_a}:{port_a}");
        tracing::info!("    {name_b}:{port_b}");
        self.calls.push(BackendCall::Connect {
            a: name_a.clone(),
            port_a: port_a.to_string(),
            b: name_b.clone(),
            port_b: port_b.to_string(),
            latency: latency.to_string(),
        });
    }
}

/// Hands a collapsed, library-only graph to the external engine.
///
/// One component per device in registration order, then one connection per
/// link in creation order. Device attributes (and the model tag, if set)
/// become the component's ordered parameter list. Fails with
/// [`GraphError::UnexpandedAssembly`] if any assembly survives; flatten
/// first.
pub fn emit(graph: &DeviceGraph, backend: &mut dyn Backend) -> GraphResult<()> {
    let mut handles: IndexMap<String, ComponentHandle> = IndexMap::new();

    for dev in graph.devices() {
        let library = dev
            .library()
            .ok_or_else(|| GraphError::UnexpandedAssembly(dev.name()))?;

        let mut params: IndexMap<String, String> = IndexMap::new();
        if let Some(model) = dev.model() {
            params.insert("model".to_string(), model);
        }
        for (key, value) in dev.attrs() {
            params.insert(key, stringify(&value));
        }

        let handle = backend.create_component(&dev.name(), &library, &params);
        handles.insert(dev.name(), handle);
    }

    for link in graph.links() {
        let a = &handles[&link.a.device.name()];
        let b = &handles[&link.b.device.name()];
        backend.connect(
            a,
            &link.a.port_name(),
            b,
            &link.b.port_name(),
            &link.latency,
        );
    }

    Ok(())
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
