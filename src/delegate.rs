//! Script delegates - host-side bindings dispatched through redirectors
//!
//! Delegate properties are not marshalled as data: executing one looks up
//! the redirected function it names and calls it on the bound object.

use crate::context::BridgeContext;
use crate::error::BridgeResult;
use crate::redirect::{ArgumentStack, FunctionRedirector, NativeStack};
use crate::runtime::HostObject;
use std::ptr;
use std::rc::Rc;

/// Single-cast binding: an object and the name of a function on its class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptDelegate {
    object: Option<HostObject>,
    function: String,
}

impl ScriptDelegate {
    pub fn new(object: HostObject, function: impl Into<String>) -> Self {
        Self {
            object: Some(object),
            function: function.into(),
        }
    }

    pub fn bind(&mut self, object: HostObject, function: impl Into<String>) {
        self.object = Some(object);
        self.function = function.into();
    }

    pub fn unbind(&mut self) {
        self.object = None;
        self.function.clear();
    }

    pub fn is_bound(&self) -> bool {
        self.object.is_some() && !self.function.is_empty()
    }

    pub fn is_bound_to(&self, object: HostObject) -> bool {
        self.object == Some(object)
    }

    pub fn object(&self) -> Option<HostObject> {
        self.object
    }

    pub fn function_name(&self) -> &str {
        &self.function
    }

    /// Redirector for the bound function, searched up the object's class chain
    pub fn resolve(&self, cx: &BridgeContext) -> Option<Rc<FunctionRedirector>> {
        let object = self.object?;
        let host = cx.host();
        let mut class = Some(host.class_of(object));
        while let Some(current) = class {
            let info = host.class_info(current);
            if let Some(redirector) = cx.redirector(&info.name, &self.function) {
                return Some(redirector);
            }
            class = info.super_class;
        }
        None
    }

    /// Call the bound function; `Ok(false)` when unbound or not redirected
    ///
    /// # Safety
    /// As `FunctionRedirector::invoke`
    pub unsafe fn execute(&self, cx: &BridgeContext, stack: &mut dyn NativeStack, result: *mut u8) -> BridgeResult<bool> {
        if !self.is_bound() {
            return Ok(false);
        }
        let Some(redirector) = self.resolve(cx) else {
            return Ok(false);
        };
        redirector.invoke(cx, self.object, stack, result)?;
        Ok(true)
    }
}

/// Ordered list of bindings invoked together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MulticastDelegate {
    bindings: Vec<ScriptDelegate>,
}

impl MulticastDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, delegate: ScriptDelegate) {
        self.bindings.push(delegate);
    }

    /// Add unless an identical binding is present; returns whether it was added
    pub fn add_unique(&mut self, delegate: ScriptDelegate) -> bool {
        if self.contains(&delegate) {
            return false;
        }
        self.bindings.push(delegate);
        true
    }

    pub fn remove(&mut self, delegate: &ScriptDelegate) -> bool {
        let before = self.bindings.len();
        self.bindings.retain(|existing| existing != delegate);
        self.bindings.len() != before
    }

    /// Remove every binding on `object`
    pub fn remove_all(&mut self, object: HostObject) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|existing| !existing.is_bound_to(object));
        before - self.bindings.len()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn contains(&self, delegate: &ScriptDelegate) -> bool {
        self.bindings.contains(delegate)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScriptDelegate> {
        self.bindings.iter()
    }

    /// Execute every binding in order with a fresh argument list each;
    /// returns how many ran
    ///
    /// Stops at the first error.
    ///
    /// # Safety
    /// As `FunctionRedirector::invoke`
    pub unsafe fn broadcast<'a>(
        &self,
        cx: &BridgeContext,
        mut arguments: impl FnMut() -> ArgumentStack<'a>,
    ) -> BridgeResult<usize> {
        let mut executed = 0;
        for delegate in &self.bindings {
            let mut stack = arguments();
            if delegate.execute(cx, &mut stack, ptr::null_mut())? {
                executed += 1;
            }
        }
        Ok(executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{ForeignMethodDescriptor, FunctionDescriptor, PropertyKind};
    use crate::sandbox::{Sandbox, GAME_ASSEMBLY};
    use crate::signature::MethodSignature;
    use std::cell::RefCell;

    /// `Door::Open(amount)` redirected to a body that records its instance
    fn door(sandbox: &Sandbox) -> Rc<RefCell<Vec<i32>>> {
        let opened = Rc::new(RefCell::new(Vec::new()));
        let record = Rc::clone(&opened);
        sandbox
            .foreign
            .define_method(GAME_ASSEMBLY, "Game.Door:Open (int)", move |call| {
                record.borrow_mut().push(unsafe { call.read::<i32>(0) });
                Ok(None)
            });

        let function = FunctionDescriptor::builder("Door", "Open")
            .param("amount", PropertyKind::Int32)
            .build(sandbox.host.as_ref());
        let signature = MethodSignature::parse("Game.Door:Open (int)").unwrap();
        sandbox
            .cx
            .redirect(function, ForeignMethodDescriptor::new(GAME_ASSEMBLY, signature).arg("amount"));
        opened
    }

    #[test]
    fn test_execute_calls_redirected_function() {
        let sandbox = Sandbox::new().unwrap();
        let opened = door(&sandbox);
        let class = sandbox.define_bound_class("Game.Door", None);
        let delegate = ScriptDelegate::new(sandbox.spawn(class, "Door_0"), "Open");

        let amount = 90i32;
        let mut stack = ArgumentStack::new().value(&amount);
        let ran = unsafe { delegate.execute(&sandbox.cx, &mut stack, ptr::null_mut()) }.unwrap();

        assert!(ran);
        assert_eq!(*opened.borrow(), vec![90]);
    }

    #[test]
    fn test_resolve_walks_class_chain() {
        let sandbox = Sandbox::new().unwrap();
        door(&sandbox);
        let base = sandbox.define_bound_class("Game.Door", None);
        let derived = sandbox.define_bound_class("Game.SlidingDoor", Some(base));
        let delegate = ScriptDelegate::new(sandbox.spawn(derived, "SlidingDoor_0"), "Open");

        let redirector = delegate.resolve(&sandbox.cx).unwrap();
        assert_eq!(redirector.function().qualified_name(), "Door::Open");
    }

    #[test]
    fn test_unbound_and_unknown_do_not_run() {
        let sandbox = Sandbox::new().unwrap();
        let opened = door(&sandbox);
        let class = sandbox.define_bound_class("Game.Door", None);
        let object = sandbox.spawn(class, "Door_0");

        let mut delegate = ScriptDelegate::new(object, "Close");
        let mut stack = ArgumentStack::new();
        assert!(!unsafe { delegate.execute(&sandbox.cx, &mut stack, ptr::null_mut()) }.unwrap());

        delegate.unbind();
        assert!(!delegate.is_bound());
        assert!(!unsafe { delegate.execute(&sandbox.cx, &mut stack, ptr::null_mut()) }.unwrap());
        assert!(opened.borrow().is_empty());
    }

    #[test]
    fn test_broadcast_runs_in_order() {
        let sandbox = Sandbox::new().unwrap();
        let opened = door(&sandbox);
        let class = sandbox.define_bound_class("Game.Door", None);
        let first = sandbox.spawn(class, "Door_0");
        let second = sandbox.spawn(class, "Door_1");

        let mut multicast = MulticastDelegate::new();
        multicast.add(ScriptDelegate::new(first, "Open"));
        assert!(multicast.add_unique(ScriptDelegate::new(second, "Open")));
        assert!(!multicast.add_unique(ScriptDelegate::new(second, "Open")));
        multicast.add(ScriptDelegate::new(second, "Slam"));

        let amounts = [10i32, 20, 30];
        let mut next = amounts.iter();
        let ran = unsafe {
            multicast.broadcast(&sandbox.cx, || match next.next() {
                Some(amount) => ArgumentStack::new().value(amount),
                None => ArgumentStack::new(),
            })
        }
        .unwrap();

        assert_eq!(ran, 2);
        assert_eq!(*opened.borrow(), vec![10, 20]);
    }

    #[test]
    fn test_remove_all_for_object() {
        let sandbox = Sandbox::new().unwrap();
        let class = sandbox.define_bound_class("Game.Door", None);
        let first = sandbox.spawn(class, "Door_0");
        let second = sandbox.spawn(class, "Door_1");

        let mut multicast = MulticastDelegate::new();
        multicast.add(ScriptDelegate::new(first, "Open"));
        multicast.add(ScriptDelegate::new(first, "Close"));
        multicast.add(ScriptDelegate::new(second, "Open"));

        assert_eq!(multicast.remove_all(first), 2);
        assert_eq!(multicast.len(), 1);
        assert!(multicast.remove(&ScriptDelegate::new(second, "Open")));
        assert!(multicast.is_empty());
    }
}
