//! Device classes and device instances.
//!
//! A [`DeviceClass`] declares, once, what a kind of device looks like: its
//! port descriptors and whether it is a *library* leaf (mapping directly to
//! an executable unit in the external engine) or an *assembly* (expanding on
//! demand into an internal sub-graph). Classes are immutable after
//! definition and shared via `Arc` across devices and graphs.
//!
//! A [`Device`] is one node in the hierarchy: a cheap-clone shared handle
//! whose pointer identity is the device identity the graph reasons about.
//! Re-registering the same handle is idempotent; a distinct handle reusing a
//! name is a duplicate-name error.

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::{GraphError, GraphResult};
use crate::graph::DeviceGraph;
use crate::port::{PortCardinality, PortDescriptor, PortInstance};
use crate::types::{Partition, Rank, Thread};

/// Produces the internal sub-graph of an assembly device.
///
/// The expander populates `graph` (a staging graph supplied by the flatten
/// machinery) with the assembly's submodule devices, conventionally named
/// with [`Device::scoped_name`], and with *binding links* that connect each
/// of the assembly's exposed ports to exactly one submodule port. Links that
/// touch only submodule ports become internal links of the expansion.
pub trait Expander: Send + Sync {
    /// Expands `device` into `graph`.
    fn expand(&self, device: &Device, graph: &mut DeviceGraph) -> GraphResult<()>;
}

impl<F> Expander for F
where
    F: Fn(&Device, &mut DeviceGraph) -> GraphResult<()> + Send + Sync,
{
    fn expand(&self, device: &Device, graph: &mut DeviceGraph) -> GraphResult<()> {
        self(device, graph)
    }
}

/// Whether a class is an executable leaf or an expandable assembly.
#[derive(Clone)]
pub enum ClassKind {
    /// Leaf device backed by an executable unit in the external engine.
    Library {
        /// Engine-side identifier, e.g. `"memory.Cache"`.
        library: String,
    },
    /// Composite device that expands into a sub-graph.
    Assembly {
        /// The expansion routine for devices of this class.
        expander: Arc<dyn Expander>,
    },
}

impl std::fmt::Debug for ClassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassKind::Library { library } => f.debug_struct("Library").field("library", library).finish(),
            ClassKind::Assembly { .. } => f.debug_struct("Assembly").finish_non_exhaustive(),
        }
    }
}

/// Immutable definition of a device class: name, kind, and port set.
#[derive(Debug)]
pub struct DeviceClass {
    name: String,
    kind: ClassKind,
    ports: IndexMap<String, Arc<PortDescriptor>>,
}

impl DeviceClass {
    /// Starts building a library class mapped to the given engine library.
    pub fn library(name: impl Into<String>, library: impl Into<String>) -> DeviceClassBuilder {
        DeviceClassBuilder {
            name: name.into(),
            kind: ClassKind::Library {
                library: library.into(),
            },
            ports: IndexMap::new(),
        }
    }

    /// Starts building an assembly class with the given expander.
    pub fn assembly(name: impl Into<String>, expander: impl Expander + 'static) -> DeviceClassBuilder {
        DeviceClassBuilder {
            name: name.into(),
            kind: ClassKind::Assembly {
                expander: Arc::new(expander),
            },
            ports: IndexMap::new(),
        }
    }

    /// The class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The class kind.
    pub fn kind(&self) -> &ClassKind {
        &self.kind
    }

    /// True if devices of this class expand into a sub-graph.
    pub fn is_assembly(&self) -> bool {
        matches!(self.kind, ClassKind::Assembly { .. })
    }

    /// Looks up a port descriptor by name.
    pub fn port(&self, name: &str) -> Option<&Arc<PortDescriptor>> {
        self.ports.get(name)
    }

    /// Iterates port descriptors in declaration order.
    pub fn ports(&self) -> impl Iterator<Item = &Arc<PortDescriptor>> {
        self.ports.values()
    }
}

/// Builder for [`DeviceClass`].
pub struct DeviceClassBuilder {
    name: String,
    kind: ClassKind,
    ports: IndexMap<String, Arc<PortDescriptor>>,
}

impl DeviceClassBuilder {
    /// Adds a port descriptor to the class.
    pub fn with_port(mut self, port: PortDescriptor) -> Self {
        self.ports.insert(port.name.clone(), Arc::new(port));
        self
    }

    /// Finalizes the class definition.
    pub fn build(self) -> Arc<DeviceClass> {
        Arc::new(DeviceClass {
            name: self.name,
            kind: self.kind,
            ports: self.ports,
        })
    }
}

/// Explicit naming context for auto-named devices.
///
/// Derives `ClassNameN` names from per-class ordinals. Owned by whoever
/// builds the graph rather than living in process-global state, so two
/// builders never interfere.
#[derive(Debug, Default)]
pub struct NamingContext {
    counters: HashMap<String, u64>,
}

impl NamingContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next auto-derived name for the given class.
    pub fn fresh(&mut self, class: &str) -> String {
        let n = self.counters.entry(class.to_string()).or_insert(0);
        let name = format!("{class}{n}");
        *n += 1;
        name
    }
}

/// Slot address of a submodule under its parent: `(slot name, index)`.
pub type SlotKey = (String, Option<usize>);

#[derive(Debug)]
struct DeviceState {
    name: String,
    class: Arc<DeviceClass>,
    model: Option<String>,
    attr: IndexMap<String, Value>,
    submodules: IndexMap<SlotKey, Device>,
    parent: Option<Weak<RwLock<DeviceState>>>,
    partition: Option<Partition>,
}

/// A node in the device hierarchy.
///
/// `Device` is a shared handle; clones refer to the same underlying device
/// and pointer identity is device identity. The handle is mutated through
/// `&self` methods (an internal lock), matching the engine's single-threaded
/// construction model.
#[derive(Clone)]
pub struct Device(Arc<RwLock<DeviceState>>);

impl Device {
    /// Creates a device of `class` with an explicit name.
    pub fn named(class: &Arc<DeviceClass>, name: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(DeviceState {
            name: name.into(),
            class: Arc::clone(class),
            model: None,
            attr: IndexMap::new(),
            submodules: IndexMap::new(),
            parent: None,
            partition: None,
        })))
    }

    /// Creates a device of `class` with a name drawn from the naming context.
    pub fn anonymous(class: &Arc<DeviceClass>, names: &mut NamingContext) -> Self {
        let name = names.fresh(class.name());
        Self::named(class, name)
    }

    /// Tags the device with a model variant, refining its category.
    pub fn with_model(self, model: impl Into<String>) -> Self {
        self.0.write().model = Some(model.into());
        self
    }

    /// Stable identity key for this device handle.
    pub(crate) fn ident(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// True if `self` and `other` are the same device object.
    pub fn same_identity(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The device's globally unique name.
    pub fn name(&self) -> String {
        self.0.read().name.clone()
    }

    /// The device's class.
    pub fn class(&self) -> Arc<DeviceClass> {
        Arc::clone(&self.0.read().class)
    }

    /// The class name.
    pub fn class_name(&self) -> String {
        self.0.read().class.name.clone()
    }

    /// The model tag, if any.
    pub fn model(&self) -> Option<String> {
        self.0.read().model.clone()
    }

    /// Category used by `DeviceGraph::count_devices`: the class name, or
    /// `Class_model` when a model tag is set.
    pub fn category(&self) -> String {
        let state = self.0.read();
        match &state.model {
            Some(m) => format!("{}_{}", state.class.name, m),
            None => state.class.name.clone(),
        }
    }

    /// True if this device expands into a sub-graph.
    pub fn is_assembly(&self) -> bool {
        self.0.read().class.is_assembly()
    }

    /// The engine library identifier for library devices.
    pub fn library(&self) -> Option<String> {
        match &self.0.read().class.kind {
            ClassKind::Library { library } => Some(library.clone()),
            ClassKind::Assembly { .. } => None,
        }
    }

    /// The expander for assembly devices.
    pub(crate) fn expander(&self) -> Option<Arc<dyn Expander>> {
        match &self.0.read().class.kind {
            ClassKind::Assembly { expander } => Some(Arc::clone(expander)),
            ClassKind::Library { .. } => None,
        }
    }

    /// Derives the compositional name `self.name + "." + leaf` for a device
    /// introduced by this device's expansion.
    pub fn scoped_name(&self, leaf: &str) -> String {
        format!("{}.{}", self.name(), leaf)
    }

    /// Sets an attribute, preserving insertion order.
    pub fn set_attr(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.write().attr.insert(key.into(), value.into());
    }

    /// Reads an attribute.
    pub fn attr(&self, key: &str) -> Option<Value> {
        self.0.read().attr.get(key).cloned()
    }

    /// Snapshot of all attributes in insertion order.
    pub fn attrs(&self) -> IndexMap<String, Value> {
        self.0.read().attr.clone()
    }

    /// The partition assignment, if set.
    pub fn partition(&self) -> Option<Partition> {
        self.0.read().partition
    }

    /// Assigns this device, and transitively all submodules, to a partition.
    pub fn set_partition(&self, rank: Rank, thread: Thread) {
        let subs: Vec<Device> = {
            let mut state = self.0.write();
            state.partition = Some(Partition::new(rank, thread));
            state.submodules.values().cloned().collect()
        };
        for sub in subs {
            sub.set_partition(rank, thread);
        }
    }

    /// Clears the partition assignment on this device only.
    pub fn clear_partition(&self) {
        self.0.write().partition = None;
    }

    /// Attaches `child` under `(slot, index)`.
    ///
    /// Re-attaching the identical child to the same slot is a no-op; a
    /// different device in an occupied slot is a [`GraphError::SlotConflict`].
    pub fn add_submodule(
        &self,
        child: &Device,
        slot: impl Into<String>,
        index: Option<usize>,
    ) -> GraphResult<()> {
        if self.same_identity(child) {
            return Err(GraphError::SlotConflict {
                device: self.name(),
                slot: slot.into(),
            });
        }
        let slot = slot.into();
        let key = (slot.clone(), index);
        {
            let state = self.0.read();
            if let Some(existing) = state.submodules.get(&key) {
                if existing.same_identity(child) {
                    return Ok(());
                }
                return Err(GraphError::SlotConflict {
                    device: state.name.clone(),
                    slot,
                });
            }
        }
        child.0.write().parent = Some(Arc::downgrade(&self.0));
        self.0.write().submodules.insert(key, child.clone());
        Ok(())
    }

    /// Snapshot of the submodule map in attachment order.
    pub fn submodules(&self) -> Vec<(SlotKey, Device)> {
        self.0
            .read()
            .submodules
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The owning parent device, if this device is attached as a submodule.
    pub fn parent(&self) -> Option<Device> {
        self.0
            .read()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Device)
    }

    /// Walks the parent chain to the topmost owner (self if unattached).
    pub fn root(&self) -> Device {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Addresses a single-cardinality port.
    ///
    /// Fails with [`GraphError::PortArity`] on multi-cardinality ports, which
    /// must be addressed through [`Device::port_indexed`].
    pub fn port(&self, name: &str) -> GraphResult<PortInstance> {
        let descriptor = self.lookup_port(name)?;
        if descriptor.cardinality.is_multi() {
            return Err(GraphError::PortArity(format!(
                "multi port {}.{} requires an index",
                self.name(),
                name
            )));
        }
        Ok(PortInstance {
            device: self.clone(),
            descriptor,
            index: None,
        })
    }

    /// Addresses one indexed slot of a multi-cardinality port.
    ///
    /// Fails with [`GraphError::PortArity`] on single ports or when the index
    /// exceeds a bounded port's limit.
    pub fn port_indexed(&self, name: &str, index: usize) -> GraphResult<PortInstance> {
        let descriptor = self.lookup_port(name)?;
        match descriptor.cardinality {
            PortCardinality::Single => {
                return Err(GraphError::PortArity(format!(
                    "single port {}.{} does not take an index",
                    self.name(),
                    name
                )));
            }
            PortCardinality::Bounded(limit) if index >= limit => {
                return Err(GraphError::PortArity(format!(
                    "index {} out of range for {}.{} (limit {})",
                    index,
                    self.name(),
                    name,
                    limit
                )));
            }
            _ => {}
        }
        Ok(PortInstance {
            device: self.clone(),
            descriptor,
            index: Some(index),
        })
    }

    fn lookup_port(&self, name: &str) -> GraphResult<Arc<PortDescriptor>> {
        let state = self.0.read();
        state
            .class
            .port(name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownPort {
                device: state.name.clone(),
                port: name.to_string(),
            })
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.same_identity(other)
    }
}

impl Eq for Device {}

impl std::hash::Hash for Device {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ident().hash(state);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0.read();
        f.debug_struct("Device")
            .field("name", &state.name)
            .field("class", &state.class.name)
            .field("partition", &state.partition)
            .finish()
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortDescriptor;

    fn leaf_class() -> Arc<DeviceClass> {
        DeviceClass::library("Leaf", "test.Leaf")
            .with_port(PortDescriptor::single("p", "io"))
            .with_port(PortDescriptor::bounded("q", "io", 2))
            .build()
    }

    #[test]
    fn test_class_definition() {
        let class = leaf_class();
        assert_eq!(class.name(), "Leaf");
        assert!(!class.is_assembly());
        assert!(class.port("p").is_some());
        assert!(class.port("missing").is_none());
        assert_eq!(class.ports().count(), 2);
    }

    #[test]
    fn test_naming_context() {
        let mut names = NamingContext::new();
        assert_eq!(names.fresh("Leaf"), "Leaf0");
        assert_eq!(names.fresh("Leaf"), "Leaf1");
        assert_eq!(names.fresh("Other"), "Other0");

        let class = leaf_class();
        let dev = Device::anonymous(&class, &mut names);
        assert_eq!(dev.name(), "Leaf2");
    }

    #[test]
    fn test_identity() {
        let class = leaf_class();
        let a = Device::named(&class, "a");
        let a2 = a.clone();
        let other = Device::named(&class, "a");

        assert!(a.same_identity(&a2));
        assert!(!a.same_identity(&other));
        assert_eq!(a, a2);
        assert_ne!(a, other);
    }

    #[test]
    fn test_category() {
        let class = leaf_class();
        let plain = Device::named(&class, "plain");
        assert_eq!(plain.category(), "Leaf");

        let modeled = Device::named(&class, "fancy").with_model("big");
        assert_eq!(modeled.category(), "Leaf_big");
    }

    #[test]
    fn test_attributes_ordered() {
        let class = leaf_class();
        let dev = Device::named(&class, "d");
        dev.set_attr("z", 1);
        dev.set_attr("a", "blue");
        dev.set_attr("m", false);

        let keys: Vec<_> = dev.attrs().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(dev.attr("a"), Some(Value::from("blue")));
    }

    #[test]
    fn test_submodules() {
        let class = leaf_class();
        let parent = Device::named(&class, "parent");
        let child = Device::named(&class, "child");
        let other = Device::named(&class, "other");

        parent.add_submodule(&child, "slot", Some(0)).unwrap();
        // same identity, same slot: no-op
        parent.add_submodule(&child, "slot", Some(0)).unwrap();
        assert_eq!(parent.submodules().len(), 1);

        // distinct identity in an occupied slot is rejected
        let err = parent.add_submodule(&other, "slot", Some(0)).unwrap_err();
        assert!(matches!(err, GraphError::SlotConflict { .. }));

        // distinct index is a distinct slot
        parent.add_submodule(&other, "slot", Some(1)).unwrap();
        assert_eq!(parent.submodules().len(), 2);

        assert_eq!(child.parent().unwrap(), parent);
        assert_eq!(child.root(), parent);
        assert_eq!(parent.root(), parent);
    }

    #[test]
    fn test_self_submodule_rejected() {
        let class = leaf_class();
        let dev = Device::named(&class, "d");
        assert!(dev.add_submodule(&dev, "slot", None).is_err());
    }

    #[test]
    fn test_partition_propagates() {
        let class = leaf_class();
        let parent = Device::named(&class, "parent");
        let child = Device::named(&class, "child");
        parent.add_submodule(&child, "slot", None).unwrap();

        assert!(parent.partition().is_none());
        parent.set_partition(3, 1);
        assert_eq!(parent.partition(), Some(Partition::new(3, 1)));
        assert_eq!(child.partition(), Some(Partition::new(3, 1)));
    }

    #[test]
    fn test_port_arity() {
        let class = leaf_class();
        let dev = Device::named(&class, "d");

        assert!(dev.port("p").is_ok());
        assert!(matches!(dev.port("q"), Err(GraphError::PortArity(_))));
        assert!(matches!(
            dev.port_indexed("p", 0),
            Err(GraphError::PortArity(_))
        ));
        assert!(dev.port_indexed("q", 1).is_ok());
        assert!(matches!(
            dev.port_indexed("q", 2),
            Err(GraphError::PortArity(_))
        ));
        assert!(matches!(
            dev.port("nope"),
            Err(GraphError::UnknownPort { .. })
        ));
    }

    #[test]
    fn test_scoped_name() {
        let class = leaf_class();
        let dev = Device::named(&class, "top");
        assert_eq!(dev.scoped_name("core"), "top.core");
    }
}
