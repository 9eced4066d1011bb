//! Port descriptors and addressable port instances.
//!
//! A [`PortDescriptor`] is the static definition of a connection point on a
//! device class: name, type tag, cardinality, whether a connection is
//! required, and an optional default latency. Descriptors are immutable and
//! shared read-only across devices and graphs.
//!
//! A [`PortInstance`] is a concrete, addressable endpoint: a descriptor bound
//! to one device, with an index for multi-cardinality ports. Two instances
//! are equal iff device identity, port name, and index all match; link
//! endpoints are identified this way.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::device::Device;

/// How many connections a port may carry, and how it is addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortCardinality {
    /// Exactly one connection, addressed without an index.
    Single,
    /// Up to `n` indexed connection points, addressed as `port[i]` with `i < n`.
    Bounded(usize),
    /// Unlimited indexed connection points.
    Unbounded,
}

impl PortCardinality {
    /// Returns true for `Bounded` and `Unbounded` ports, which require an
    /// explicit index at addressing time.
    pub fn is_multi(&self) -> bool {
        !matches!(self, PortCardinality::Single)
    }
}

/// Static definition of a connection point on a device class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// Port name, unique within the owning class.
    pub name: String,
    /// Free-form compatibility tag; two ports link only if their tags match.
    pub ty: String,
    /// Connection cardinality.
    pub cardinality: PortCardinality,
    /// Whether `verify_links` demands at least one connection.
    pub required: bool,
    /// Latency applied to links on this port when the call site gives none.
    pub default_latency: Option<String>,
}

impl PortDescriptor {
    /// Creates a required single-connection port.
    pub fn single(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            cardinality: PortCardinality::Single,
            required: true,
            default_latency: None,
        }
    }

    /// Creates a required bounded multi-port with `limit` indexed slots.
    pub fn bounded(name: impl Into<String>, ty: impl Into<String>, limit: usize) -> Self {
        Self {
            cardinality: PortCardinality::Bounded(limit),
            ..Self::single(name, ty)
        }
    }

    /// Creates a required unbounded multi-port.
    pub fn unbounded(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            cardinality: PortCardinality::Unbounded,
            ..Self::single(name, ty)
        }
    }

    /// Marks the port as optional for `verify_links`.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Sets the default latency for links on this port.
    pub fn with_latency(mut self, latency: impl Into<String>) -> Self {
        self.default_latency = Some(latency.into());
        self
    }
}

/// A concrete, addressable connection point on one device.
///
/// Obtained from [`Device::port`] or [`Device::port_indexed`], which enforce
/// the descriptor's arity before a link can be attempted.
#[derive(Clone, Debug)]
pub struct PortInstance {
    /// The device this port belongs to.
    pub device: Device,
    /// The shared class-level descriptor.
    pub descriptor: Arc<PortDescriptor>,
    /// Index into a multi-cardinality port; `None` for single ports.
    pub index: Option<usize>,
}

impl PortInstance {
    /// The endpoint name as the external engine sees it: `port` or `port.i`.
    pub fn port_name(&self) -> String {
        match self.index {
            Some(i) => format!("{}.{}", self.descriptor.name, i),
            None => self.descriptor.name.clone(),
        }
    }

    /// Comparable identity key: (device identity, port name, index).
    pub(crate) fn key(&self) -> (usize, &str, Option<usize>) {
        (self.device.ident(), &self.descriptor.name, self.index)
    }
}

impl PartialEq for PortInstance {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PortInstance {}

impl Hash for PortInstance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Display for PortInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}.{}[{}]", self.device.name(), self.descriptor.name, i),
            None => write!(f, "{}.{}", self.device.name(), self.descriptor.name),
        }
    }
}
