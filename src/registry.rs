//! Device class registry for configuration-driven graph construction.
//!
//! The registry allows device classes to be registered by name, enabling
//! declarative graph descriptions to reference them. Assembly classes in
//! particular must come through the registry, since their expanders are code
//! and cannot be expressed in a configuration file.
//!
//! # Example
//!
//! ```
//! use devgraph::registry::ClassRegistry;
//! use devgraph::device::{DeviceClass, NamingContext};
//! use devgraph::port::PortDescriptor;
//!
//! let cache = DeviceClass::library("Cache", "memory.Cache")
//!     .with_port(PortDescriptor::single("cpu", "mem"))
//!     .build();
//!
//! let mut registry = ClassRegistry::new();
//! registry.register(cache);
//!
//! let mut names = NamingContext::new();
//! let dev = registry.instantiate("Cache", None, &mut names).unwrap();
//! assert_eq!(dev.name(), "Cache0");
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::device::{Device, DeviceClass, NamingContext};

/// A registry of device classes keyed by class name.
#[derive(Default)]
pub struct ClassRegistry {
    classes: HashMap<String, Arc<DeviceClass>>,
}

impl ClassRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device class under its own name, replacing any previous
    /// registration for that name.
    pub fn register(&mut self, class: Arc<DeviceClass>) {
        self.classes.insert(class.name().to_string(), class);
    }

    /// Looks up a class by name.
    pub fn get(&self, name: &str) -> Option<&Arc<DeviceClass>> {
        self.classes.get(name)
    }

    /// Returns true if a class is registered under the name.
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Creates a device of the named class.
    ///
    /// With an explicit `name` the device is named directly; otherwise the
    /// naming context derives one. Returns `None` for unregistered classes.
    pub fn instantiate(
        &self,
        class: &str,
        name: Option<&str>,
        names: &mut NamingContext,
    ) -> Option<Device> {
        let class = self.classes.get(class)?;
        Some(match name {
            Some(name) => Device::named(class, name),
            None => Device::anonymous(class, names),
        })
    }

    /// Returns the number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if no classes are registered.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Returns an iterator over registered class names.
    pub fn class_names(&self) -> impl Iterator<Item = &String> {
        self.classes.keys()
    }

    /// Unregisters a class.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.classes.remove(name).is_some()
    }

    /// Clears all registrations.
    pub fn clear(&mut self) {
        self.classes.clear();
    }
}

impl std::fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .finish()
    }
}
