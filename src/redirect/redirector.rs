//! Per-function trampoline: `Unbound -> Linked -> Active`

use super::frame::FrameBuffer;
use super::linker::FunctionCallLinker;
use super::stack::NativeStack;
use crate::context::BridgeContext;
use crate::error::{BridgeResult, LinkError};
use crate::logging::{log_foreign_exception, log_function_linked, log_link_failure, log_redirect_call};
use crate::marshal::{self, ArgumentList, CopyDirection, ScratchSlot, StagedRoots, POINTER_SLOT};
use crate::metrics;
use crate::property::{ForeignMethodDescriptor, FunctionDescriptor};
use crate::runtime::{ForeignMethod, HostObject, HostRuntime};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::ptr;
use std::rc::Rc;
use std::time::Instant;

/// Observable lifecycle of a redirected function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirectorState {
    Unbound,
    Linked,
    /// At least one call is on the stack
    Active,
    /// Linking failed; every call reports the cached error
    Failed,
}

#[derive(Debug)]
struct LinkedCall {
    linker: FunctionCallLinker,
    method: ForeignMethod,
}

#[derive(Debug)]
enum Binding {
    Unbound,
    Linked(Rc<LinkedCall>),
    Failed(LinkError),
}

/// Routes calls of one native function to its foreign implementation
#[derive(Debug)]
pub struct FunctionRedirector {
    function: FunctionDescriptor,
    method: ForeignMethodDescriptor,
    qualified_name: String,
    binding: RefCell<Binding>,
    depth: Cell<usize>,
}

impl FunctionRedirector {
    pub fn new(function: FunctionDescriptor, method: ForeignMethodDescriptor) -> Self {
        let qualified_name = function.qualified_name();
        Self {
            function,
            method,
            qualified_name,
            binding: RefCell::new(Binding::Unbound),
            depth: Cell::new(0),
        }
    }

    #[inline]
    pub fn function(&self) -> &FunctionDescriptor {
        &self.function
    }

    #[inline]
    pub fn method(&self) -> &ForeignMethodDescriptor {
        &self.method
    }

    pub fn state(&self) -> RedirectorState {
        match &*self.binding.borrow() {
            Binding::Unbound => RedirectorState::Unbound,
            Binding::Failed(_) => RedirectorState::Failed,
            Binding::Linked(_) if self.depth.get() > 0 => RedirectorState::Active,
            Binding::Linked(_) => RedirectorState::Linked,
        }
    }

    /// Calls currently on the stack, counting re-entrant ones
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Bind against the foreign method, once
    ///
    /// A failure is cached and logged the first time only.
    pub fn link(&self, cx: &BridgeContext) -> Result<(), LinkError> {
        self.linked(cx).map(|_| ())
    }

    fn linked(&self, cx: &BridgeContext) -> Result<Rc<LinkedCall>, LinkError> {
        match &*self.binding.borrow() {
            Binding::Linked(call) => return Ok(Rc::clone(call)),
            Binding::Failed(error) => return Err(error.clone()),
            Binding::Unbound => {}
        }

        let start = Instant::now();
        let outcome = self.resolve(cx);
        cx.metrics().record_timing(metrics::LINK_TIME, start.elapsed());

        match outcome {
            Ok(call) => {
                let call = Rc::new(call);
                log_function_linked(
                    &self.qualified_name,
                    &self.method.signature.to_string(),
                    call.linker.arguments().len(),
                    call.linker.scratch_size(),
                );
                *self.binding.borrow_mut() = Binding::Linked(Rc::clone(&call));
                Ok(call)
            }
            Err(error) => {
                log_link_failure(&self.qualified_name, &error.to_string());
                cx.metrics().increment(metrics::LINK_FAILURES);
                *self.binding.borrow_mut() = Binding::Failed(error.clone());
                Err(error)
            }
        }
    }

    fn resolve(&self, cx: &BridgeContext) -> Result<LinkedCall, LinkError> {
        let foreign = cx.foreign();
        let method = foreign
            .lookup_method(&self.method.assembly, &self.method.signature)
            .ok_or_else(|| LinkError::MissingMethod {
                assembly: self.method.assembly.clone(),
                signature: self.method.signature.to_string(),
            })?;

        let expected = foreign.method_parameter_count(method);
        let found = self.method.parameter_count();
        if expected != found {
            return Err(LinkError::ArityMismatch {
                method: self.method.signature.to_string(),
                expected,
                found,
            });
        }

        let linker = FunctionCallLinker::link(cx.marshallers(), &self.function, &self.method)?;
        Ok(LinkedCall { linker, method })
    }

    /// Run one redirected call
    ///
    /// Arguments are read from `stack` in native order; the return value,
    /// if any, lands in `result`. On a foreign exception nothing is
    /// written back and `result` is reset to its kind's default.
    ///
    /// # Safety
    /// `stack` must yield values matching the native parameter layouts;
    /// `result` must be null or point at an initialized value of the
    /// return property.
    pub unsafe fn invoke(
        &self,
        cx: &BridgeContext,
        target: Option<HostObject>,
        stack: &mut dyn NativeStack,
        result: *mut u8,
    ) -> BridgeResult<()> {
        let call = self.linked(cx)?;
        let _frame = ActiveFrame::enter(&self.depth);
        let linker = &call.linker;
        let function = &self.function;
        let host = cx.host();

        log_redirect_call(&self.qualified_name, self.depth.get());
        cx.metrics().increment(metrics::CALLS);

        let mut mirror = FrameBuffer::new(function.params_size, function.params_align);
        let mut scratch = FrameBuffer::new(linker.scratch_size(), POINTER_SLOT);
        let mut write_back: SmallVec<[*mut u8; 8]> = SmallVec::from_elem(ptr::null_mut(), function.params.len());
        let params = mirror.as_mut_ptr();
        let temps = scratch.as_mut_ptr();

        // Native declaration order
        for (index, property) in function.params.iter().enumerate() {
            if property.is_return() {
                continue;
            }
            let value = property.container_ptr(params);
            host.initialize_value(property, value);
            let caller = stack.step(host, property, value);
            write_back[index] = caller.unwrap_or(value);
        }
        let _mirror = MirrorGuard { host, function, params };

        // Foreign declaration order
        // Staged foreign objects stay rooted until the frame is gone
        let mut args = ArgumentList::new();
        let mut roots = StagedRoots::new();
        for entry in linker.arguments() {
            let property = &function.params[entry.native_index];
            let slot = ScratchSlot::from_raw(temps.add(entry.scratch_offset));
            entry.marshaller.add_argument(
                cx,
                property,
                property.container_ptr(params),
                slot,
                entry.by_ref,
                &mut args,
                &mut roots,
            )?;
        }

        let instance = match target {
            Some(object) if !function.is_static() => Some(cx.get_foreign_object(object)?),
            _ => None,
        };

        let returned = match cx.foreign().invoke(call.method, instance, &args) {
            Ok(returned) => returned,
            Err(exception) => {
                log_foreign_exception(&self.qualified_name, &exception.message, &exception.stack_trace);
                cx.metrics().increment(metrics::FOREIGN_EXCEPTIONS);
                if let Some(ret) = linker.return_value().filter(|_| !result.is_null()) {
                    marshal::reset_value(host, &function.params[ret.native_index], result);
                }
                return Err(exception.into());
            }
        };

        for (index, property) in function.params.iter().enumerate() {
            let Some(entry) = linker.for_native(index).filter(|entry| entry.by_ref) else {
                continue;
            };
            let slot = ScratchSlot::from_raw(temps.add(entry.scratch_offset));
            entry
                .marshaller
                .copy(cx, property, write_back[index], slot.read_ref(), CopyDirection::ForeignToHost)?;
        }

        if let (Some(ret), Some(value)) = (linker.return_value(), returned) {
            if !result.is_null() {
                let property = &function.params[ret.native_index];
                ret.marshaller
                    .copy(cx, property, result, value.as_ptr(), CopyDirection::ForeignReturnToHost)?;
            }
        }

        Ok(())
    }
}

/// Depth counter held for the duration of one call
struct ActiveFrame<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> ActiveFrame<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for ActiveFrame<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

/// Destroys the mirrored parameters when the call unwinds or returns
struct MirrorGuard<'a> {
    host: &'a dyn HostRuntime,
    function: &'a FunctionDescriptor,
    params: *mut u8,
}

impl Drop for MirrorGuard<'_> {
    fn drop(&mut self) {
        for property in self.function.params.iter().filter(|p| !p.is_return()) {
            unsafe { self.host.destroy_value(property, property.container_ptr(self.params)) };
        }
    }
}
