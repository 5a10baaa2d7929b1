//! In-process foreign runtime: a tiny managed heap with GC handles and
//! closure-bodied methods

use super::host::ScriptContainer;
use crate::config::EngineBindingConfig;
use crate::error::ForeignException;
use crate::runtime::{ForeignMethod, ForeignObject, ForeignRuntime, ForeignType, GcHandle};
use crate::signature::MethodSignature;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;
use std::ptr;
use std::rc::Rc;

pub type MethodResult = Result<Option<ForeignObject>, ForeignException>;

/// Body of a sandbox method
pub type MethodBody = Rc<dyn Fn(&Invocation<'_>) -> MethodResult>;

enum Managed {
    Instance {
        ty: ForeignType,
        native: Cell<*mut c_void>,
    },
    Str(String),
    Boxed {
        data: UnsafeCell<Vec<u64>>,
        len: usize,
    },
    Collection(ScriptContainer),
    SoftRef(String),
}

struct MethodEntry {
    assembly: String,
    signature: MethodSignature,
    parameter_count: usize,
    body: MethodBody,
    calls: Cell<usize>,
}

#[derive(Debug, Clone, Copy)]
struct HandleEntry {
    target: Option<ForeignObject>,
    weak: bool,
}

/// Arguments of one sandbox method call
///
/// Value arguments arrive as pointers to the value; reference arguments as
/// the object itself, or as a slot holding it when passed by reference.
pub struct Invocation<'a> {
    runtime: &'a SandboxForeign,
    instance: Option<ForeignObject>,
    args: &'a [*mut c_void],
}

impl<'a> Invocation<'a> {
    pub fn runtime(&self) -> &'a SandboxForeign {
        self.runtime
    }

    pub fn instance(&self) -> Option<ForeignObject> {
        self.instance
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn raw(&self, index: usize) -> *mut c_void {
        *self
            .args
            .get(index)
            .unwrap_or_else(|| panic!("argument {index} out of range ({} passed)", self.args.len()))
    }

    /// # Safety
    /// Argument `index` must point at a `T`
    pub unsafe fn read<T: Copy>(&self, index: usize) -> T {
        ptr::read_unaligned(self.raw(index) as *const T)
    }

    /// # Safety
    /// Argument `index` must point at a writable `T`
    pub unsafe fn write<T: Copy>(&self, index: usize, value: T) {
        ptr::write_unaligned(self.raw(index) as *mut T, value)
    }

    pub fn object(&self, index: usize) -> Option<ForeignObject> {
        ForeignObject::from_ptr(self.raw(index))
    }

    /// Object in a by-reference slot
    ///
    /// # Safety
    /// Argument `index` must be a pointer slot
    pub unsafe fn object_ref(&self, index: usize) -> Option<ForeignObject> {
        ForeignObject::from_ptr(self.read::<*mut c_void>(index))
    }

    /// # Safety
    /// Argument `index` must be a pointer slot
    pub unsafe fn set_object_ref(&self, index: usize, object: Option<ForeignObject>) {
        self.write(index, object.map_or(ptr::null_mut(), ForeignObject::as_ptr));
    }

    pub fn string(&self, index: usize) -> String {
        self.runtime.read_string(self.object(index))
    }

    /// # Safety
    /// Argument `index` must be a pointer slot
    pub unsafe fn string_ref(&self, index: usize) -> String {
        self.runtime.read_string(self.object_ref(index))
    }

    /// # Safety
    /// Argument `index` must be a pointer slot
    pub unsafe fn set_string_ref(&self, index: usize, value: &str) {
        let string = self.runtime.new_string(value);
        self.set_object_ref(index, Some(string));
    }
}

/// Foreign runtime backed by boxed heap cells; an object's address is its
/// cell's address
#[derive(Default)]
pub struct SandboxForeign {
    heap: RefCell<HashMap<ForeignObject, Box<Managed>>>,
    types: RefCell<HashMap<(String, String), ForeignType>>,
    methods: RefCell<Vec<MethodEntry>>,
    handles: RefCell<HashMap<GcHandle, HandleEntry>>,
    next_handle: Cell<u64>,
    collections: Cell<usize>,
    last_collection_full: Cell<Option<bool>>,
}

impl SandboxForeign {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&self, value: Managed) -> ForeignObject {
        let boxed = Box::new(value);
        let object = ForeignObject::from_ptr(&*boxed as *const Managed as *mut c_void)
            .unwrap_or_else(|| unreachable!("boxed object has a null address"));
        self.heap.borrow_mut().insert(object, boxed);
        object
    }

    fn with_object<R>(&self, object: ForeignObject, read: impl FnOnce(&Managed) -> R) -> Option<R> {
        self.heap.borrow().get(&object).map(|managed| read(managed))
    }

    pub fn is_alive(&self, object: ForeignObject) -> bool {
        self.heap.borrow().contains_key(&object)
    }

    pub fn live_objects(&self) -> usize {
        self.heap.borrow().len()
    }

    pub fn live_handles(&self) -> usize {
        self.handles.borrow().len()
    }

    pub fn collection_count(&self) -> usize {
        self.collections.get()
    }

    pub fn last_collection_was_full(&self) -> Option<bool> {
        self.last_collection_full.get()
    }

    pub fn define_type(&self, assembly: &str, full_name: &str) -> ForeignType {
        let mut types = self.types.borrow_mut();
        let next = ForeignType(types.len() as u64 + 1);
        *types
            .entry((assembly.to_string(), full_name.to_string()))
            .or_insert(next)
    }

    /// Register a method under a concrete lookup key
    ///
    /// # Panics
    /// If `key` does not parse or has no parameter list
    pub fn define_method(
        &self,
        assembly: &str,
        key: &str,
        body: impl Fn(&Invocation<'_>) -> MethodResult + 'static,
    ) -> ForeignMethod {
        let signature = MethodSignature::parse(key).unwrap_or_else(|error| panic!("bad sandbox method key: {error}"));
        let parameter_count = signature
            .arity()
            .unwrap_or_else(|| panic!("sandbox method `{key}` needs a parameter list"));
        self.define_method_with_arity(assembly, signature, parameter_count, Rc::new(body))
    }

    /// Register a method whose real arity differs from its key
    pub fn define_method_with_arity(
        &self,
        assembly: &str,
        signature: MethodSignature,
        parameter_count: usize,
        body: MethodBody,
    ) -> ForeignMethod {
        let mut methods = self.methods.borrow_mut();
        methods.push(MethodEntry {
            assembly: assembly.to_string(),
            signature,
            parameter_count,
            body,
            calls: Cell::new(0),
        });
        ForeignMethod(methods.len() as u64 - 1)
    }

    /// How often `method` has been invoked
    pub fn call_count(&self, method: ForeignMethod) -> usize {
        self.methods
            .borrow()
            .get(method.0 as usize)
            .map_or(0, |entry| entry.calls.get())
    }

    /// Proxy class constructed with the host pointer: `.ctor (intptr)`
    pub fn define_proxy_class(&self, assembly: &str, full_name: &str) -> ForeignType {
        let ty = self.define_type(assembly, full_name);
        self.define_method(assembly, &format!("{full_name}:.ctor (intptr)"), |call| {
            let native = unsafe { call.read::<*mut c_void>(0) };
            if let Some(proxy) = call.instance() {
                call.runtime().set_native(proxy, native);
            }
            Ok(None)
        });
        ty
    }

    /// Static library class constructed without a host pointer: `.ctor ()`
    pub fn define_library_class(&self, assembly: &str, full_name: &str) -> ForeignType {
        let ty = self.define_type(assembly, full_name);
        self.define_method(assembly, &format!("{full_name}:.ctor ()"), |_| Ok(None));
        ty
    }

    /// Struct type with `FromNative`/`ToNative` boxing factories over `size` bytes
    pub fn define_struct(&self, assembly: &str, full_name: &str, size: usize) -> ForeignType {
        let ty = self.define_type(assembly, full_name);
        self.define_method(assembly, &format!("{full_name}:FromNative (intptr,int)"), move |call| {
            let bytes = unsafe {
                let buffer = call.read::<*const u8>(0);
                let offset = call.read::<i32>(1) as usize;
                std::slice::from_raw_parts(buffer.add(offset), size).to_vec()
            };
            Ok(Some(call.runtime().box_bytes(&bytes)))
        });
        self.define_method(
            assembly,
            &format!("{full_name}:ToNative (intptr,int,{full_name}&)"),
            move |call| {
                unsafe {
                    let buffer = call.read::<*mut u8>(0);
                    let offset = call.read::<i32>(1) as usize;
                    ptr::copy(call.raw(2) as *const u8, buffer.add(offset), size);
                }
                Ok(None)
            },
        );
        ty
    }

    /// Install the object triplet and the collection / soft reference
    /// factory the bridge binds at startup
    pub fn install_engine_library(&self, engine: &EngineBindingConfig) {
        let assembly = engine.assembly.as_str();
        let ns = engine.namespace.as_str();
        let object = format!("{ns}.{}", engine.object_class);
        let factory = format!("{ns}.{}", engine.factory_class);
        self.define_type(assembly, &object);
        self.define_type(assembly, &factory);

        self.define_method(assembly, &format!("{object}:DisconnectFromNative ()"), |call| {
            if let Some(proxy) = call.instance() {
                call.runtime().set_native(proxy, ptr::null_mut());
            }
            Ok(None)
        });
        self.define_method(assembly, &format!("{object}:GetNativePtr ()"), |call| {
            let native = call
                .instance()
                .and_then(|proxy| call.runtime().native_of(proxy))
                .unwrap_or(ptr::null_mut());
            Ok(Some(call.runtime().box_value(native)))
        });
        self.define_method(assembly, &format!("{object}:BeforeConstruct (intptr)"), |call| {
            let native = unsafe { call.read::<*mut c_void>(0) };
            if let Some(proxy) = call.instance() {
                call.runtime().set_native(proxy, native);
            }
            Ok(None)
        });
        self.define_method(assembly, &format!("{object}:AfterConstruct ()"), |_| Ok(None));

        let enumerable = "System.Collections.IEnumerable";
        for kind in ["Array", "Set", "Map"] {
            self.define_method(assembly, &format!("{factory}:Create{kind} (intptr,intptr)"), |call| {
                let container = unsafe { call.read::<*const ScriptContainer>(1) };
                let copy = unsafe { (*container).clone() };
                Ok(Some(call.runtime().alloc(Managed::Collection(copy))))
            });
            self.define_method(
                assembly,
                &format!("{factory}:Write{kind} (intptr,intptr,{enumerable})"),
                |call| {
                    let container = unsafe { &mut *call.read::<*mut ScriptContainer>(1) };
                    *container = call
                        .object(2)
                        .and_then(|collection| call.runtime().collection(collection))
                        .unwrap_or_default();
                    Ok(None)
                },
            );
        }

        for (kind, interface) in [("SoftObjectPtr", "ISoftObjectPtr"), ("SoftClassPtr", "ISoftClassPtr")] {
            self.define_method(assembly, &format!("{factory}:Create{kind} (intptr,intptr)"), |call| {
                let path = unsafe { (*call.read::<*const String>(1)).clone() };
                Ok(Some(call.runtime().alloc(Managed::SoftRef(path))))
            });
            self.define_method(
                assembly,
                &format!("{factory}:Write{kind} (intptr,{ns}.{interface})"),
                |call| {
                    let path = unsafe { &mut *call.read::<*mut String>(0) };
                    *path = call
                        .object(1)
                        .and_then(|soft| call.runtime().soft_path(soft))
                        .unwrap_or_default();
                    Ok(None)
                },
            );
        }
    }

    /// Box a plain value; the box is a value type
    pub fn box_value<T: Copy>(&self, value: T) -> ForeignObject {
        let raw = unsafe { std::slice::from_raw_parts(&value as *const T as *const u8, size_of::<T>()) };
        self.box_bytes(raw)
    }

    pub fn box_bytes(&self, bytes: &[u8]) -> ForeignObject {
        let mut words = vec![0u64; (bytes.len() + 7) / 8];
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), words.as_mut_ptr() as *mut u8, bytes.len()) };
        self.alloc(Managed::Boxed {
            data: UnsafeCell::new(words),
            len: bytes.len(),
        })
    }

    /// Payload of a boxed value
    pub fn boxed_bytes(&self, object: ForeignObject) -> Option<Vec<u8>> {
        self.with_object(object, |managed| match managed {
            Managed::Boxed { data, len } => {
                let words = unsafe { &*data.get() };
                let bytes = unsafe { std::slice::from_raw_parts(words.as_ptr() as *const u8, *len) };
                Some(bytes.to_vec())
            }
            _ => None,
        })
        .flatten()
    }

    pub fn new_collection(&self, contents: ScriptContainer) -> ForeignObject {
        self.alloc(Managed::Collection(contents))
    }

    pub fn collection(&self, object: ForeignObject) -> Option<ScriptContainer> {
        self.with_object(object, |managed| match managed {
            Managed::Collection(contents) => Some(contents.clone()),
            _ => None,
        })
        .flatten()
    }

    pub fn new_soft_ref(&self, path: &str) -> ForeignObject {
        self.alloc(Managed::SoftRef(path.to_string()))
    }

    pub fn soft_path(&self, object: ForeignObject) -> Option<String> {
        self.with_object(object, |managed| match managed {
            Managed::SoftRef(path) => Some(path.clone()),
            _ => None,
        })
        .flatten()
    }

    /// Host pointer a proxy holds; `None` for non-instances
    pub fn native_of(&self, proxy: ForeignObject) -> Option<*mut c_void> {
        self.with_object(proxy, |managed| match managed {
            Managed::Instance { native, .. } => Some(native.get()),
            _ => None,
        })
        .flatten()
    }

    pub fn set_native(&self, proxy: ForeignObject, value: *mut c_void) {
        self.with_object(proxy, |managed| {
            if let Managed::Instance { native, .. } = managed {
                native.set(value);
            }
        });
    }

    pub fn type_of(&self, object: ForeignObject) -> Option<ForeignType> {
        self.with_object(object, |managed| match managed {
            Managed::Instance { ty, .. } => Some(*ty),
            _ => None,
        })
        .flatten()
    }
}

impl ForeignRuntime for SandboxForeign {
    fn lookup_type(&self, assembly: &str, full_name: &str) -> Option<ForeignType> {
        self.types
            .borrow()
            .get(&(assembly.to_string(), full_name.to_string()))
            .copied()
    }

    fn lookup_method(&self, assembly: &str, key: &MethodSignature) -> Option<ForeignMethod> {
        self.methods
            .borrow()
            .iter()
            .position(|entry| entry.assembly == assembly && key.matches(&entry.signature))
            .map(|index| ForeignMethod(index as u64))
    }

    fn method_parameter_count(&self, method: ForeignMethod) -> usize {
        self.methods
            .borrow()
            .get(method.0 as usize)
            .map_or(0, |entry| entry.parameter_count)
    }

    fn new_object(&self, ty: ForeignType) -> Option<ForeignObject> {
        let known = self.types.borrow().values().any(|existing| *existing == ty);
        known.then(|| {
            self.alloc(Managed::Instance {
                ty,
                native: Cell::new(ptr::null_mut()),
            })
        })
    }

    unsafe fn invoke(
        &self,
        method: ForeignMethod,
        instance: Option<ForeignObject>,
        args: &[*mut c_void],
    ) -> Result<Option<ForeignObject>, ForeignException> {
        let body = {
            let methods = self.methods.borrow();
            let entry = methods
                .get(method.0 as usize)
                .unwrap_or_else(|| panic!("unknown sandbox method {}", method.0));
            entry.calls.set(entry.calls.get() + 1);
            Rc::clone(&entry.body)
        };

        let call = Invocation {
            runtime: self,
            instance,
            args,
        };
        body(&call)
    }

    fn create_handle(&self, object: ForeignObject, weak: bool) -> GcHandle {
        let id = self.next_handle.get() + 1;
        self.next_handle.set(id);
        let handle = GcHandle(id);
        self.handles.borrow_mut().insert(
            handle,
            HandleEntry {
                target: Some(object),
                weak,
            },
        );
        handle
    }

    fn handle_target(&self, handle: GcHandle) -> Option<ForeignObject> {
        self.handles
            .borrow()
            .get(&handle)
            .and_then(|entry| entry.target)
            .filter(|object| self.is_alive(*object))
    }

    fn free_handle(&self, handle: GcHandle) {
        self.handles.borrow_mut().remove(&handle);
    }

    fn collect_garbage(&self, full: bool) {
        let roots: HashSet<ForeignObject> = self
            .handles
            .borrow()
            .values()
            .filter(|entry| !entry.weak)
            .filter_map(|entry| entry.target)
            .collect();

        let dead: Vec<Box<Managed>> = {
            let mut heap = self.heap.borrow_mut();
            let doomed: Vec<ForeignObject> = heap.keys().filter(|object| !roots.contains(object)).copied().collect();
            doomed.iter().filter_map(|object| heap.remove(object)).collect()
        };

        if !dead.is_empty() {
            let mut handles = self.handles.borrow_mut();
            for entry in handles.values_mut().filter(|entry| entry.weak) {
                if entry.target.map_or(false, |object| !self.heap.borrow().contains_key(&object)) {
                    entry.target = None;
                }
            }
        }
        drop(dead);

        self.collections.set(self.collections.get() + 1);
        self.last_collection_full.set(Some(full));
    }

    fn new_string(&self, value: &str) -> ForeignObject {
        self.alloc(Managed::Str(value.to_string()))
    }

    fn read_string(&self, string: Option<ForeignObject>) -> String {
        string
            .and_then(|object| {
                self.with_object(object, |managed| match managed {
                    Managed::Str(text) => Some(text.clone()),
                    _ => None,
                })
            })
            .flatten()
            .unwrap_or_default()
    }

    fn is_value_type(&self, object: ForeignObject) -> bool {
        self.with_object(object, |managed| matches!(managed, Managed::Boxed { .. }))
            .unwrap_or(false)
    }

    fn unbox(&self, object: ForeignObject) -> *mut u8 {
        self.with_object(object, |managed| match managed {
            Managed::Boxed { data, .. } => unsafe { (*data.get()).as_mut_ptr() as *mut u8 },
            _ => panic!("unbox of a reference object"),
        })
        .unwrap_or_else(|| panic!("unbox of a collected object {:#x}", object.addr()))
    }
}

impl fmt::Debug for SandboxForeign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxForeign")
            .field("objects", &self.live_objects())
            .field("handles", &self.live_handles())
            .field("methods", &self.methods.borrow().len())
            .field("collections", &self.collections.get())
            .finish()
    }
}
