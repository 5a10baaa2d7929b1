//! Proxy handles - owned GC references into the foreign runtime
//!
//! A handle keeps its foreign proxy alive (strong) or merely observable
//! (weak). Changing strength frees the old GC handle and creates a new one
//! in a single `&mut self` call, so no caller ever sees both or neither.
//! The GC handle is freed when the `ProxyHandle` drops.

use crate::runtime::{ForeignObject, ForeignRuntime, GcHandle};
use std::fmt;
use std::rc::Rc;

/// Strength tag of a proxy handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleStrength {
    Strong,
    Weak,
    Released,
}

pub struct ProxyHandle {
    runtime: Rc<dyn ForeignRuntime>,
    handle: Option<GcHandle>,
    strength: HandleStrength,
}

impl ProxyHandle {
    /// Wrap `object` in a new GC handle
    pub fn new(runtime: Rc<dyn ForeignRuntime>, object: ForeignObject, strength: HandleStrength) -> Self {
        let handle = match strength {
            HandleStrength::Strong => Some(runtime.create_handle(object, false)),
            HandleStrength::Weak => Some(runtime.create_handle(object, true)),
            HandleStrength::Released => None,
        };

        Self {
            runtime,
            handle,
            strength,
        }
    }

    #[inline]
    pub fn strength(&self) -> HandleStrength {
        self.strength
    }

    #[inline]
    pub fn gc_handle(&self) -> Option<GcHandle> {
        self.handle
    }

    /// The proxy, if the handle is live and its target not collected
    pub fn target(&self) -> Option<ForeignObject> {
        self.handle.and_then(|handle| self.runtime.handle_target(handle))
    }

    /// Move to `strength`; no-op if already there or already released
    pub fn set_strength(&mut self, strength: HandleStrength) {
        if strength == self.strength || self.strength == HandleStrength::Released {
            return;
        }

        if strength == HandleStrength::Released {
            self.release();
            return;
        }

        let target = self.target();
        if let Some(old) = self.handle.take() {
            self.runtime.free_handle(old);
        }

        match target {
            Some(object) => {
                let weak = strength == HandleStrength::Weak;
                self.handle = Some(self.runtime.create_handle(object, weak));
                self.strength = strength;
            }
            // Weak target already collected
            None => self.strength = HandleStrength::Released,
        }
    }

    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.runtime.free_handle(handle);
        }
        self.strength = HandleStrength::Released;
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandle")
            .field("handle", &self.handle)
            .field("strength", &self.strength)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxForeign;

    fn runtime() -> (Rc<SandboxForeign>, Rc<dyn ForeignRuntime>) {
        let foreign = Rc::new(SandboxForeign::new());
        let runtime: Rc<dyn ForeignRuntime> = foreign.clone();
        (foreign, runtime)
    }

    #[test]
    fn test_strong_roots_target() {
        let (foreign, runtime) = runtime();
        let object = foreign.new_string("rooted");
        let handle = ProxyHandle::new(runtime, object, HandleStrength::Strong);

        foreign.collect_garbage(true);
        assert!(foreign.is_alive(object));
        assert_eq!(handle.target(), Some(object));
    }

    #[test]
    fn test_weak_target_is_collected() {
        let (foreign, runtime) = runtime();
        let object = foreign.new_string("observed");
        let handle = ProxyHandle::new(runtime, object, HandleStrength::Weak);

        foreign.collect_garbage(true);
        assert!(!foreign.is_alive(object));
        assert_eq!(handle.target(), None);
        assert!(handle.gc_handle().is_some());
    }

    #[test]
    fn test_set_strength_swaps_gc_handle() {
        let (foreign, runtime) = runtime();
        let object = foreign.new_string("swapped");
        let mut handle = ProxyHandle::new(runtime, object, HandleStrength::Strong);
        let before = handle.gc_handle();

        handle.set_strength(HandleStrength::Weak);
        assert_eq!(handle.strength(), HandleStrength::Weak);
        assert_ne!(handle.gc_handle(), before);
        assert_eq!(foreign.live_handles(), 1);

        handle.set_strength(HandleStrength::Strong);
        foreign.collect_garbage(true);
        assert_eq!(handle.target(), Some(object));
    }

    #[test]
    fn test_strengthening_collected_weak_releases() {
        let (foreign, runtime) = runtime();
        let object = foreign.new_string("gone");
        let mut handle = ProxyHandle::new(runtime, object, HandleStrength::Weak);

        foreign.collect_garbage(false);
        handle.set_strength(HandleStrength::Strong);
        assert_eq!(handle.strength(), HandleStrength::Released);
        assert_eq!(handle.gc_handle(), None);
        assert_eq!(foreign.live_handles(), 0);
    }

    #[test]
    fn test_release_is_final() {
        let (foreign, runtime) = runtime();
        let object = foreign.new_string("released");
        let mut handle = ProxyHandle::new(runtime, object, HandleStrength::Strong);

        handle.release();
        handle.set_strength(HandleStrength::Strong);
        assert_eq!(handle.strength(), HandleStrength::Released);
        assert_eq!(foreign.live_handles(), 0);
    }

    #[test]
    fn test_drop_frees_gc_handle() {
        let (foreign, runtime) = runtime();
        let object = foreign.new_string("dropped");
        {
            let _handle = ProxyHandle::new(runtime, object, HandleStrength::Strong);
            assert_eq!(foreign.live_handles(), 1);
        }
        assert_eq!(foreign.live_handles(), 0);
    }
}
