//! # Devgraph
//!
//! A hierarchical device-graph engine for describing the structural
//! composition of a simulated architecture: library leaf devices, assembly
//! devices that expand on demand into sub-graphs, typed and
//! arity-constrained ports, and latency-annotated links. The graph is built
//! once by client code, validated, then transformed (rank-projected and
//! recursively flattened) into a library-only form suitable for a
//! distributed, partitioned execution engine.
//!
//! ## Design Principles
//!
//! - **Graph as source of truth**: the [`DeviceGraph`] aggregate owns every
//!   reachable device and every validated link; all transformations rewrite
//!   this one structure.
//! - **Classes over subclasses**: a [`DeviceClass`] carries the port
//!   descriptors and the library/assembly kind; devices are instances, and
//!   the closed `Library`/`Assembly` distinction is matched exhaustively.
//! - **Checked connectivity**: every `link` call validates port types,
//!   cardinality, and duplicate use before anything is recorded; failures
//!   leave the graph untouched.
//! - **Deterministic iteration**: devices, links, attributes, and emitted
//!   parameters all preserve insertion order.
//!
//! ## Quick Start
//!
//! ```rust
//! use devgraph::{Device, DeviceClass, DeviceGraph, PortDescriptor};
//! use devgraph::backend::{emit, RecordingBackend};
//!
//! let core = DeviceClass::library("Core", "proc.Core")
//!     .with_port(PortDescriptor::single("mem", "mem").with_latency("1ns"))
//!     .build();
//! let cache = DeviceClass::library("Cache", "memory.Cache")
//!     .with_port(PortDescriptor::single("cpu", "mem"))
//!     .build();
//!
//! let cpu0 = Device::named(&core, "cpu0");
//! let l1 = Device::named(&cache, "l1");
//!
//! let mut graph = DeviceGraph::new();
//! graph.link(cpu0.port("mem")?, l1.port("cpu")?, None)?;
//! graph.verify_links()?;
//!
//! let mut backend = RecordingBackend::new();
//! emit(&graph, &mut backend)?;
//! assert_eq!(backend.component_count(), 2);
//! # Ok::<(), devgraph::GraphError>(())
//! ```
//!
//! ## Flattening and Rank Projection
//!
//! ```rust,ignore
//! use devgraph::FlattenPolicy;
//!
//! // Expand every assembly down to library leaves.
//! graph.flatten(FlattenPolicy::Full)?;
//!
//! // Or project the graph for one execution rank first.
//! let local = graph.follow_links(0)?;
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use devgraph::config::GraphConfig;
//!
//! let config = GraphConfig::from_yaml_file("topology.yaml")?;
//! let graph = config.build(&registry)?;
//! ```

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod flatten;
pub mod graph;
pub mod port;
pub mod registry;
pub mod types;

// Re-export commonly used types
pub use backend::{Backend, BackendCall, ComponentHandle, RecordingBackend};
pub use config::{ConfigError, ConfigResult, GraphConfig};
pub use device::{Device, DeviceClass, Expander, NamingContext};
pub use error::{GraphError, GraphResult};
pub use flatten::{FlattenPolicy, MAX_EXPANSION_DEPTH};
pub use graph::{DeviceGraph, Link};
pub use port::{PortCardinality, PortDescriptor, PortInstance};
pub use registry::ClassRegistry;
pub use types::{Partition, Rank, Thread};

/// Initialize the tracing subscriber for logging.
///
/// The default filter applies `level` to this crate only, so embedding
/// applications keep their own verbosity; `RUST_LOG` overrides it entirely.
/// Output is compact without targets, which keeps the recording backend's
/// component and link lines readable as plain engine output.
///
/// # Example
///
/// ```rust,ignore
/// devgraph::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("devgraph={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
