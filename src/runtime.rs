//! Runtime boundary - the host and the foreign runtime as the bridge sees them
//!
//! Design: both runtimes are reached through trait objects held by an
//! explicit `BridgeContext`; nothing here is process-global.
//!
//! Architecture:
//! - `HostRuntime` - reflective object host with its own collector
//! - `ForeignRuntime` - independently collected runtime hosting proxies
//! - handle types (`HostObject`, `ForeignObject`, ...) - copyable addresses
//! - boundary records - `#[repr(C)]` layouts the foreign side reads

use crate::error::ForeignException;
use crate::property::{PropertyDescriptor, PropertyKind};
use crate::signature::MethodSignature;
use std::ffi::c_void;
use std::ptr::NonNull;

/// Size and alignment of a host value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLayout {
    pub size: usize,
    pub align: usize,
}

impl ValueLayout {
    #[inline]
    pub const fn new(size: usize, align: usize) -> Self {
        Self { size, align }
    }

    #[inline]
    pub const fn of<T>() -> Self {
        Self::new(std::mem::size_of::<T>(), std::mem::align_of::<T>())
    }
}

macro_rules! address_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(NonNull<c_void>);

        impl $name {
            #[inline]
            pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
                NonNull::new(ptr).map(Self)
            }

            #[inline]
            pub fn as_ptr(self) -> *mut c_void {
                self.0.as_ptr()
            }

            #[inline]
            pub fn addr(self) -> usize {
                self.0.as_ptr() as usize
            }
        }
    };
}

address_handle! {
    /// Object in the host's memory domain, identified by its stable address
    HostObject
}

address_handle! {
    /// Host class (type) object
    HostClass
}

address_handle! {
    /// Object in the foreign runtime's heap
    ForeignObject
}

/// Resolved foreign type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForeignType(pub u64);

/// Resolved foreign method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForeignMethod(pub u64);

/// GC handle into the foreign runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcHandle(pub u64);

/// Where a host class was defined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassOrigin {
    /// Compiled into the host
    Native,
    /// Generated from a foreign class
    Foreign,
    /// Authored in the host editor
    Editor,
}

/// Reflection data for a host class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostClassInfo {
    pub name: String,
    pub foreign_full_name: String,
    pub assembly: String,
    pub super_class: Option<HostClass>,
    pub origin: ClassOrigin,
    /// Static-only library classes are constructed without a native pointer
    pub is_function_library: bool,
}

/// Interned name as the foreign side lays it out
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NameRecord {
    pub comparison_index: u32,
    pub number: u32,
}

/// Localized text as the foreign side lays it out
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRecord {
    /// Foreign string object
    pub text: *mut c_void,
}

/// Typed class handle as the foreign side lays it out
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubclassOfRecord {
    pub class: *mut c_void,
}

/// The native object host
///
/// All `unsafe` methods take addresses of values laid out as the matching
/// `PropertyDescriptor` says; callers guarantee the memory is valid.
pub trait HostRuntime {
    /// Host liveness predicate, queried during the reachability pass
    fn is_reachable(&self, object: HostObject) -> bool;

    /// Whether `object` is logically owned by `scope_root`
    fn is_in_scope(&self, object: HostObject, scope_root: HostObject) -> bool;

    fn class_of(&self, object: HostObject) -> HostClass;

    fn class_info(&self, class: HostClass) -> HostClassInfo;

    fn layout_of(&self, kind: &PropertyKind) -> ValueLayout;

    /// Construct the kind's default value in uninitialized memory
    unsafe fn initialize_value(&self, property: &PropertyDescriptor, dest: *mut u8);

    unsafe fn destroy_value(&self, property: &PropertyDescriptor, dest: *mut u8);

    /// Assign `src` to the already initialized `dest`
    unsafe fn copy_value(&self, property: &PropertyDescriptor, dest: *mut u8, src: *const u8);

    unsafe fn read_string(&self, src: *const u8) -> String;

    unsafe fn write_string(&self, dest: *mut u8, value: &str);

    unsafe fn read_text(&self, src: *const u8) -> String;

    unsafe fn write_text(&self, dest: *mut u8, value: &str);

    unsafe fn read_name(&self, src: *const u8) -> NameRecord;

    unsafe fn write_name(&self, dest: *mut u8, name: NameRecord);
}

/// The foreign runtime hosting proxies and method bodies
pub trait ForeignRuntime {
    fn lookup_type(&self, assembly: &str, full_name: &str) -> Option<ForeignType>;

    fn lookup_method(&self, assembly: &str, key: &MethodSignature) -> Option<ForeignMethod>;

    fn method_parameter_count(&self, method: ForeignMethod) -> usize;

    /// Allocate an instance without running a constructor
    fn new_object(&self, ty: ForeignType) -> Option<ForeignObject>;

    /// Invoke `method`; each argument is a pointer to the value, or the
    /// object itself for reference types
    ///
    /// # Safety
    /// Every pointer in `args` must stay valid for the duration of the call
    /// and match the method's parameter types.
    unsafe fn invoke(
        &self,
        method: ForeignMethod,
        instance: Option<ForeignObject>,
        args: &[*mut c_void],
    ) -> Result<Option<ForeignObject>, ForeignException>;

    fn create_handle(&self, object: ForeignObject, weak: bool) -> GcHandle;

    /// Target of a handle; `None` once a weak target was collected
    fn handle_target(&self, handle: GcHandle) -> Option<ForeignObject>;

    fn free_handle(&self, handle: GcHandle);

    /// Blocking collection, full or young generation only
    fn collect_garbage(&self, full: bool);

    fn new_string(&self, value: &str) -> ForeignObject;

    /// Contents of a foreign string; empty for `None`
    fn read_string(&self, string: Option<ForeignObject>) -> String;

    fn is_value_type(&self, object: ForeignObject) -> bool;

    /// Address of a boxed value's payload
    fn unbox(&self, object: ForeignObject) -> *mut u8;
}
