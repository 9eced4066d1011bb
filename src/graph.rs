//! The `DeviceGraph` aggregate: all reachable devices plus the link table.
//!
//! The graph is built once by client code (`add` / `link`), validated
//! (`verify_links` / `check_partition`), then transformed (`follow_links` /
//! `flatten`, see the `flatten` module) before being handed to the external
//! engine boundary. Every mutating operation is atomic: a failed call leaves
//! the graph exactly as it was.

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;

use crate::device::Device;
use crate::error::{GraphError, GraphResult};
use crate::port::{PortCardinality, PortInstance};
use crate::types::Rank;

/// A validated, latency-annotated connection between two port instances.
///
/// Endpoint order preserves the original `link` call; the link table key is
/// the unordered pair.
#[derive(Clone, Debug)]
pub struct Link {
    /// First endpoint as given at the call site.
    pub a: PortInstance,
    /// Second endpoint as given at the call site.
    pub b: PortInstance,
    /// Latency annotation, e.g. `"1ps"`.
    pub latency: String,
}

/// Canonicalized unordered endpoint pair, the identity of a link.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct LinkKey {
    lo: (usize, String, Option<usize>),
    hi: (usize, String, Option<usize>),
}

impl LinkKey {
    pub(crate) fn new(a: &PortInstance, b: &PortInstance) -> Self {
        let ka = (a.device.ident(), a.descriptor.name.clone(), a.index);
        let kb = (b.device.ident(), b.descriptor.name.clone(), b.index);
        if ka <= kb {
            Self { lo: ka, hi: kb }
        } else {
            Self { lo: kb, hi: ka }
        }
    }
}

/// The aggregate owning all registered devices and all links between them.
///
/// Device iteration preserves registration order; the link table preserves
/// creation order. A graph is mutated from one thread at a time; independent
/// graphs are independent.
#[derive(Clone, Debug, Default)]
pub struct DeviceGraph {
    /// Opaque client metadata carried alongside the graph.
    pub attr: IndexMap<String, Value>,
    pub(crate) devices: IndexMap<String, Device>,
    pub(crate) links: IndexMap<LinkKey, Link>,
}

impl DeviceGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty graph carrying the given client metadata.
    pub fn with_attr(attr: IndexMap<String, Value>) -> Self {
        Self {
            attr,
            ..Self::default()
        }
    }

    /// Registers a device and, transitively, all of its current submodules.
    ///
    /// Re-adding an already registered device is a no-op. A distinct device
    /// reusing a registered name is a [`GraphError::DuplicateName`]; nothing
    /// is registered in that case.
    pub fn add(&mut self, device: &Device) -> GraphResult<()> {
        let tree = collect_tree(device);
        self.register_batch(&tree)
    }

    /// Looks up a registered device by name.
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    /// Iterates registered devices in registration order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Number of registered devices.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Iterates links in creation order.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// Number of links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Validates and records a connection between two port instances.
    ///
    /// The owning devices of both endpoints, along with their full ancestor
    /// trees, are registered implicitly on success (a submodule cannot exist
    /// in the graph without its parent). On failure nothing changes.
    ///
    /// Latency resolution: the explicit `latency` argument wins; otherwise
    /// `a`'s descriptor default, then `b`'s, then `"0s"`.
    pub fn link(
        &mut self,
        a: PortInstance,
        b: PortInstance,
        latency: Option<&str>,
    ) -> GraphResult<()> {
        let key = LinkKey::new(&a, &b);
        if let Some(existing) = self.links.get(&key) {
            // Same orientation is a plain duplicate; the reversed call trips
            // over the single-port occupancy instead.
            if existing.a == a || !single_endpoint(&a, &b) {
                return Err(GraphError::DuplicateLink(a.to_string(), b.to_string()));
            }
            return Err(GraphError::SinglePortReuse(reused_single(&a, &b, self)));
        }

        if a.descriptor.ty != b.descriptor.ty {
            return Err(GraphError::TypeMismatch {
                a: a.to_string(),
                a_ty: a.descriptor.ty.clone(),
                b: b.to_string(),
                b_ty: b.descriptor.ty.clone(),
            });
        }

        for endpoint in [&a, &b] {
            if endpoint.descriptor.cardinality == PortCardinality::Single
                && self.port_is_linked(endpoint)
            {
                return Err(GraphError::SinglePortReuse(endpoint.to_string()));
            }
        }

        let latency = latency
            .map(str::to_string)
            .or_else(|| a.descriptor.default_latency.clone())
            .or_else(|| b.descriptor.default_latency.clone())
            .unwrap_or_else(|| "0s".to_string());

        // Validate the implicit registrations before touching anything.
        let mut pending = collect_tree(&a.device.root());
        for dev in collect_tree(&b.device.root()) {
            if !pending.iter().any(|d| d.same_identity(&dev)) {
                pending.push(dev);
            }
        }
        self.register_batch(&pending)?;

        tracing::debug!(a = %a, b = %b, %latency, "link");
        self.links.insert(key, Link { a, b, latency });
        Ok(())
    }

    /// True if any link references the exact port instance.
    pub fn port_is_linked(&self, port: &PortInstance) -> bool {
        self.links
            .values()
            .any(|l| &l.a == port || &l.b == port)
    }

    /// Counts registered devices per category (class name, or `Class_model`).
    pub fn count_devices(&self) -> IndexMap<String, usize> {
        let mut counts: IndexMap<String, usize> = IndexMap::new();
        for dev in self.devices.values() {
            *counts.entry(dev.category()).or_insert(0) += 1;
        }
        counts
    }

    /// Fails if any registered device lacks a partition assignment.
    pub fn check_partition(&self) -> GraphResult<()> {
        for dev in self.devices.values() {
            if dev.partition().is_none() {
                return Err(GraphError::MissingPartition(dev.name()));
            }
        }
        Ok(())
    }

    /// Fails unless every required port of every registered device is
    /// referenced by at least one link (any index on multi ports).
    pub fn verify_links(&self) -> GraphResult<()> {
        let linked: HashSet<(usize, String)> = self
            .links
            .values()
            .flat_map(|l| [&l.a, &l.b])
            .map(|p| (p.device.ident(), p.descriptor.name.clone()))
            .collect();

        for dev in self.devices.values() {
            for port in dev.class().ports() {
                if port.required && !linked.contains(&(dev.ident(), port.name.clone())) {
                    return Err(GraphError::UnconnectedRequiredPort {
                        device: dev.name(),
                        port: port.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Structural summary for capacity and sanity checks before dispatch.
    pub fn summary(&self) -> Value {
        let categories = self.count_devices();
        let assemblies = self.devices.values().filter(|d| d.is_assembly()).count();

        let mut ranks: IndexMap<String, usize> = IndexMap::new();
        for dev in self.devices.values() {
            if let Some(p) = dev.partition() {
                *ranks.entry(p.rank.to_string()).or_insert(0) += 1;
            }
        }

        serde_json::json!({
            "devices": self.devices.len(),
            "links": self.links.len(),
            "assemblies": assemblies,
            "categories": categories,
            "ranks": ranks,
        })
    }

    /// Devices whose partition rank equals `rank`.
    pub(crate) fn devices_on_rank(&self, rank: Rank) -> Vec<Device> {
        self.devices
            .values()
            .filter(|d| d.partition().map(|p| p.rank) == Some(rank))
            .cloned()
            .collect()
    }

    /// Registers a batch of devices atomically: either all names are valid
    /// and every device lands in the graph, or nothing does.
    pub(crate) fn register_batch(&mut self, batch: &[Device]) -> GraphResult<()> {
        let mut incoming: IndexMap<String, &Device> = IndexMap::new();
        for dev in batch {
            let name = dev.name();
            if let Some(existing) = self.devices.get(&name) {
                if !existing.same_identity(dev) {
                    return Err(GraphError::DuplicateName(name));
                }
                continue;
            }
            if let Some(prior) = incoming.get(&name) {
                if !prior.same_identity(dev) {
                    return Err(GraphError::DuplicateName(name));
                }
                continue;
            }
            incoming.insert(name, dev);
        }
        for (name, dev) in incoming {
            tracing::debug!(device = %name, class = %dev.class_name(), "add device");
            self.devices.insert(name, dev.clone());
        }
        Ok(())
    }

    /// Removes a device and every link touching it. Used by the flatten
    /// machinery after an assembly has been spliced out.
    pub(crate) fn remove_device(&mut self, device: &Device) {
        self.devices.shift_remove(&device.name());
        self.links
            .retain(|_, l| !l.a.device.same_identity(device) && !l.b.device.same_identity(device));
    }
}

/// Collects a device and all transitively owned submodules, deduplicated by
/// identity, in ownership order.
pub(crate) fn collect_tree(device: &Device) -> Vec<Device> {
    let mut out: Vec<Device> = Vec::new();
    let mut stack = vec![device.clone()];
    while let Some(dev) = stack.pop() {
        if out.iter().any(|d| d.same_identity(&dev)) {
            continue;
        }
        for (_, sub) in dev.submodules().into_iter().rev() {
            stack.push(sub);
        }
        out.push(dev);
    }
    out
}

fn single_endpoint(a: &PortInstance, b: &PortInstance) -> bool {
    a.descriptor.cardinality == PortCardinality::Single
        || b.descriptor.cardinality == PortCardinality::Single
}

fn reused_single(a: &PortInstance, b: &PortInstance, graph: &DeviceGraph) -> String {
    if a.descriptor.cardinality == PortCardinality::Single && graph.port_is_linked(a) {
        a.to_string()
    } else {
        b.to_string()
    }
}
