//! Function invocation redirector
//!
//! A native function whose body lives in the foreign runtime is called
//! through a `FunctionRedirector`. The first call links the native
//! parameter block against the foreign method by parameter name; every
//! later call reuses that binding.
//!
//! Architecture:
//! - `stack.rs` - where a call reads its native arguments
//! - `linker.rs` - name-based parameter binding, built once per function
//! - `frame.rs` - call-local mirror and scratch memory
//! - `redirector.rs` - link state machine and the per-call trampoline
//!
//! Every buffer a call hands to the foreign side is owned by that call's
//! frame, so re-entrant calls never alias.

mod frame;
mod linker;
mod redirector;
mod stack;

pub use frame::FrameBuffer;
pub use linker::{FunctionCallLinker, LinkedArgument, LinkedReturn};
pub use redirector::{FunctionRedirector, RedirectorState};
pub use stack::{ArgumentStack, NativeStack};
