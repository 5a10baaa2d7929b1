//! Native call stack - where a redirected function reads its arguments

use crate::property::PropertyDescriptor;
use crate::runtime::HostRuntime;
use std::marker::PhantomData;

/// Source of a redirected function's arguments, read in native order
pub trait NativeStack {
    /// Copy the next argument into `dest`, an initialized value of
    /// `property`; returns the caller's own storage when the argument was
    /// passed by reference
    ///
    /// # Safety
    /// `dest` must point at an initialized value described by `property`
    unsafe fn step(&mut self, host: &dyn HostRuntime, property: &PropertyDescriptor, dest: *mut u8) -> Option<*mut u8>;
}

#[derive(Debug, Clone, Copy)]
enum StackArgument {
    Value(*const u8),
    Reference(*mut u8),
}

/// Argument list built by a host-side call site
///
/// Borrows every argument for `'a`; by-reference arguments are written
/// back when the call returns.
#[derive(Debug, Default)]
pub struct ArgumentStack<'a> {
    args: Vec<StackArgument>,
    cursor: usize,
    _borrow: PhantomData<&'a mut u8>,
}

impl<'a> ArgumentStack<'a> {
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            cursor: 0,
            _borrow: PhantomData,
        }
    }

    /// Pass `value` by value; it must have the parameter's host layout
    pub fn value<T>(mut self, value: &'a T) -> Self {
        self.args.push(StackArgument::Value(value as *const T as *const u8));
        self
    }

    /// Pass `value` by reference; it receives the callee's output
    pub fn reference<T>(mut self, value: &'a mut T) -> Self {
        self.args.push(StackArgument::Reference(value as *mut T as *mut u8));
        self
    }

    /// Pass host memory laid out by reflection rather than a Rust value
    ///
    /// # Safety
    /// `value` must stay valid for `'a` and match the parameter layout
    pub unsafe fn raw_value(mut self, value: *const u8) -> Self {
        self.args.push(StackArgument::Value(value));
        self
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Arguments not yet consumed
    pub fn remaining(&self) -> usize {
        self.args.len() - self.cursor
    }

    /// Read again from the first argument
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl NativeStack for ArgumentStack<'_> {
    unsafe fn step(&mut self, host: &dyn HostRuntime, property: &PropertyDescriptor, dest: *mut u8) -> Option<*mut u8> {
        let argument = *self
            .args
            .get(self.cursor)
            .unwrap_or_else(|| panic!("native stack exhausted reading `{}`", property.name));
        self.cursor += 1;

        match argument {
            StackArgument::Value(src) => {
                host.copy_value(property, dest, src);
                None
            }
            StackArgument::Reference(src) => {
                host.copy_value(property, dest, src);
                Some(src)
            }
        }
    }
}
