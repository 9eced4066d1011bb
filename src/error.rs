//! Error types for graph construction and transformation.
//!
//! Every variant is a local validation failure surfaced synchronously to the
//! caller of the offending operation. A failed operation leaves the graph in
//! its last valid state; there is no retry or recovery path.

use thiserror::Error;

/// Errors raised during device graph construction and transformation.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Two distinct device identities share a name.
    #[error("duplicate device name '{0}' used by distinct devices")]
    DuplicateName(String),

    /// A multi-cardinality port was addressed without an index, an index was
    /// supplied for a single port, or an index exceeded the port's bound.
    #[error("port arity violation: {0}")]
    PortArity(String),

    /// Linked ports declare incompatible type tags.
    #[error("port type mismatch: {a} is '{a_ty}' but {b} is '{b_ty}'")]
    TypeMismatch {
        a: String,
        a_ty: String,
        b: String,
        b_ty: String,
    },

    /// The same unordered endpoint pair was linked twice.
    #[error("duplicate link between {0} and {1}")]
    DuplicateLink(String, String),

    /// A single-cardinality port already carries a link.
    #[error("single port {0} is already linked")]
    SinglePortReuse(String),

    /// `check_partition` found a device without a partition assignment.
    #[error("device '{0}' has no partition assigned")]
    MissingPartition(String),

    /// `verify_links` found a required port with zero connections.
    #[error("required port {device}.{port} has no links")]
    UnconnectedRequiredPort { device: String, port: String },

    /// Assembly expansion failed to terminate within the depth ceiling.
    #[error("assembly expansion exceeded depth limit of {0}; self-referential assembly?")]
    RecursionLimit(usize),

    /// A port name that does not exist on the device's class.
    #[error("device '{device}' has no port named '{port}'")]
    UnknownPort { device: String, port: String },

    /// A submodule slot is already occupied by a different device.
    #[error("slot '{slot}' on device '{device}' is already occupied")]
    SlotConflict { device: String, slot: String },

    /// An assembly expansion violated the expansion contract.
    #[error("invalid expansion of assembly '{device}': {reason}")]
    Expansion { device: String, reason: String },

    /// The graph still contains an assembly where only libraries are allowed.
    #[error("cannot emit unexpanded assembly '{0}'; flatten the graph first")]
    UnexpandedAssembly(String),
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;
