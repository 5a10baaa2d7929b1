//! gcbridge - interop core between two garbage-collected runtimes
//!
//! Keeps every host object paired with at most one foreign proxy, moves
//! property values across the boundary per value kind, and routes native
//! function calls to foreign method bodies.
//!
//! All state lives in a `BridgeContext`, passed explicitly to every
//! boundary operation. A context is single-threaded but re-entrant.

pub mod accessor;
pub mod config;
pub mod context;
pub mod delegate;
pub mod error;
pub mod handle;
pub mod logging;
pub mod marshal;
pub mod metrics;
pub mod property;
pub mod redirect;
pub mod runtime;
pub mod sandbox;
pub mod signature;
pub mod table;

// Re-export commonly used items
pub use config::BridgeConfig;
pub use context::BridgeContext;
pub use delegate::{MulticastDelegate, ScriptDelegate};
pub use error::{BridgeError, BridgeResult, ForeignException, LinkError};
pub use handle::HandleStrength;
pub use marshal::{CopyDirection, Marshaller, MarshallerRegistry};
pub use property::{
    ForeignMethodDescriptor, FunctionDescriptor, FunctionFlags, PropertyDescriptor, PropertyFlags, PropertyKind,
};
pub use redirect::{ArgumentStack, FunctionRedirector, NativeStack, RedirectorState};
pub use runtime::{ForeignObject, ForeignRuntime, HostObject, HostRuntime};
pub use signature::MethodSignature;
pub use table::{ObjectTable, SweepReport};
