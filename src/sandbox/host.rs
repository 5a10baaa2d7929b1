//! In-process host runtime: classes, objects and value layouts

use crate::delegate::{MulticastDelegate, ScriptDelegate};
use crate::property::{PropertyDescriptor, PropertyKind};
use crate::runtime::{
    ClassOrigin, HostClass, HostClassInfo, HostObject, HostRuntime, NameRecord, ValueLayout,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::mem::size_of;
use std::ptr;

/// Interned name as the sandbox host stores it
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HostName {
    pub comparison: u32,
    pub display: u32,
    pub number: u32,
}

/// Host-side array, set or map storage: packed element bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptContainer {
    bytes: Vec<u8>,
    len: usize,
}

impl ScriptContainer {
    pub fn from_bytes(bytes: Vec<u8>, len: usize) -> Self {
        Self { bytes, len }
    }

    pub fn from_values<T: Copy>(values: &[T]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * size_of::<T>());
        for value in values {
            let raw = unsafe { std::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) };
            bytes.extend_from_slice(raw);
        }
        Self {
            bytes,
            len: values.len(),
        }
    }

    /// Elements decoded as `T`
    ///
    /// # Panics
    /// If the element size is not `size_of::<T>()`
    pub fn values<T: Copy>(&self) -> Vec<T> {
        assert_eq!(self.bytes.len(), self.len * size_of::<T>(), "container element size mismatch");
        self.bytes
            .chunks_exact(size_of::<T>().max(1))
            .take(self.len)
            .map(|chunk| unsafe { ptr::read_unaligned(chunk.as_ptr() as *const T) })
            .collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug)]
struct ObjectSlot {
    class: HostClass,
    outer: Option<HostObject>,
    reachable: Cell<bool>,
    name: String,
}

/// How the sandbox host stores a kind
enum Storage {
    Bytes,
    Bool(u8),
    Owned,
    Container,
    Delegate,
    Multicast,
}

fn storage(kind: &PropertyKind) -> Storage {
    match kind {
        PropertyKind::Bool { mask } => Storage::Bool(*mask),
        PropertyKind::Str | PropertyKind::Text | PropertyKind::SoftObject | PropertyKind::SoftClass => Storage::Owned,
        PropertyKind::Array(_) | PropertyKind::Set(_) | PropertyKind::Map(..) => Storage::Container,
        PropertyKind::Delegate { .. } => Storage::Delegate,
        PropertyKind::MulticastDelegate { .. } => Storage::Multicast,
        _ => Storage::Bytes,
    }
}

/// Host runtime whose objects live in boxed slots; an object's address is
/// its slot's address
#[derive(Debug, Default)]
pub struct SandboxHost {
    classes: RefCell<HashMap<HostClass, Box<HostClassInfo>>>,
    objects: RefCell<HashMap<HostObject, Box<ObjectSlot>>>,
    names: RefCell<Vec<String>>,
}

impl SandboxHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_class(&self, info: HostClassInfo) -> HostClass {
        let boxed = Box::new(info);
        let class = HostClass::from_ptr(&*boxed as *const HostClassInfo as *mut c_void)
            .unwrap_or_else(|| unreachable!("boxed class has a null address"));
        self.classes.borrow_mut().insert(class, boxed);
        class
    }

    /// Native class whose proxy is `foreign_full_name` in `assembly`
    pub fn define_native_class(
        &self,
        name: &str,
        foreign_full_name: &str,
        assembly: &str,
        super_class: Option<HostClass>,
    ) -> HostClass {
        self.define_class(HostClassInfo {
            name: name.to_string(),
            foreign_full_name: foreign_full_name.to_string(),
            assembly: assembly.to_string(),
            super_class,
            origin: ClassOrigin::Native,
            is_function_library: false,
        })
    }

    pub fn spawn(&self, class: HostClass, outer: Option<HostObject>, name: &str) -> HostObject {
        let boxed = Box::new(ObjectSlot {
            class,
            outer,
            reachable: Cell::new(true),
            name: name.to_string(),
        });
        let object = HostObject::from_ptr(&*boxed as *const ObjectSlot as *mut c_void)
            .unwrap_or_else(|| unreachable!("boxed object has a null address"));
        self.objects.borrow_mut().insert(object, boxed);
        object
    }

    pub fn mark_unreachable(&self, object: HostObject) {
        if let Some(slot) = self.objects.borrow().get(&object) {
            slot.reachable.set(false);
        }
    }

    pub fn mark_reachable(&self, object: HostObject) {
        if let Some(slot) = self.objects.borrow().get(&object) {
            slot.reachable.set(true);
        }
    }

    pub fn object_name(&self, object: HostObject) -> Option<String> {
        self.objects.borrow().get(&object).map(|slot| slot.name.clone())
    }

    pub fn object_count(&self) -> usize {
        self.objects.borrow().len()
    }

    /// Intern `text`, returning its stored form
    pub fn name(&self, text: &str, number: u32) -> HostName {
        let mut names = self.names.borrow_mut();
        let index = match names.iter().position(|existing| existing == text) {
            Some(index) => index,
            None => {
                names.push(text.to_string());
                names.len() - 1
            }
        };
        HostName {
            comparison: index as u32,
            display: index as u32,
            number,
        }
    }

    pub fn name_text(&self, name: HostName) -> Option<String> {
        self.names.borrow().get(name.comparison as usize).cloned()
    }

    fn slot<R>(&self, object: HostObject, read: impl FnOnce(&ObjectSlot) -> R) -> Option<R> {
        self.objects.borrow().get(&object).map(|slot| read(slot))
    }
}

impl HostRuntime for SandboxHost {
    fn is_reachable(&self, object: HostObject) -> bool {
        self.slot(object, |slot| slot.reachable.get()).unwrap_or(false)
    }

    fn is_in_scope(&self, object: HostObject, scope_root: HostObject) -> bool {
        let mut current = Some(object);
        while let Some(candidate) = current {
            if candidate == scope_root {
                return true;
            }
            current = self.slot(candidate, |slot| slot.outer).flatten();
        }
        false
    }

    fn class_of(&self, object: HostObject) -> HostClass {
        self.slot(object, |slot| slot.class)
            .unwrap_or_else(|| panic!("unknown host object {:#x}", object.addr()))
    }

    fn class_info(&self, class: HostClass) -> HostClassInfo {
        self.classes
            .borrow()
            .get(&class)
            .map(|info| (**info).clone())
            .unwrap_or_else(|| panic!("unknown host class {:#x}", class.addr()))
    }

    fn layout_of(&self, kind: &PropertyKind) -> ValueLayout {
        match kind {
            PropertyKind::Str | PropertyKind::Text | PropertyKind::SoftObject | PropertyKind::SoftClass => {
                ValueLayout::of::<String>()
            }
            PropertyKind::Name => ValueLayout::of::<HostName>(),
            PropertyKind::Array(_) | PropertyKind::Set(_) | PropertyKind::Map(..) => ValueLayout::of::<ScriptContainer>(),
            PropertyKind::Delegate { .. } => ValueLayout::of::<ScriptDelegate>(),
            PropertyKind::MulticastDelegate { .. } => ValueLayout::of::<MulticastDelegate>(),
            plain => plain
                .plain_layout()
                .unwrap_or_else(|| panic!("no sandbox layout for {} values", plain.tag().name())),
        }
    }

    unsafe fn initialize_value(&self, property: &PropertyDescriptor, dest: *mut u8) {
        match storage(&property.kind) {
            Storage::Bytes | Storage::Bool(_) => ptr::write_bytes(dest, 0, property.size),
            Storage::Owned => ptr::write(dest as *mut String, String::new()),
            Storage::Container => ptr::write(dest as *mut ScriptContainer, ScriptContainer::default()),
            Storage::Delegate => ptr::write(dest as *mut ScriptDelegate, ScriptDelegate::default()),
            Storage::Multicast => ptr::write(dest as *mut MulticastDelegate, MulticastDelegate::default()),
        }
    }

    unsafe fn destroy_value(&self, property: &PropertyDescriptor, dest: *mut u8) {
        match storage(&property.kind) {
            Storage::Bytes | Storage::Bool(_) => {}
            Storage::Owned => ptr::drop_in_place(dest as *mut String),
            Storage::Container => ptr::drop_in_place(dest as *mut ScriptContainer),
            Storage::Delegate => ptr::drop_in_place(dest as *mut ScriptDelegate),
            Storage::Multicast => ptr::drop_in_place(dest as *mut MulticastDelegate),
        }
    }

    unsafe fn copy_value(&self, property: &PropertyDescriptor, dest: *mut u8, src: *const u8) {
        match storage(&property.kind) {
            Storage::Bytes => ptr::copy(src, dest, property.size),
            Storage::Bool(mask) => *dest = (*dest & !mask) | (*src & mask),
            Storage::Owned => (*(dest as *mut String)).clone_from(&*(src as *const String)),
            Storage::Container => (*(dest as *mut ScriptContainer)).clone_from(&*(src as *const ScriptContainer)),
            Storage::Delegate => (*(dest as *mut ScriptDelegate)).clone_from(&*(src as *const ScriptDelegate)),
            Storage::Multicast => {
                (*(dest as *mut MulticastDelegate)).clone_from(&*(src as *const MulticastDelegate))
            }
        }
    }

    unsafe fn read_string(&self, src: *const u8) -> String {
        (*(src as *const String)).clone()
    }

    unsafe fn write_string(&self, dest: *mut u8, value: &str) {
        let string = &mut *(dest as *mut String);
        string.clear();
        string.push_str(value);
    }

    unsafe fn read_text(&self, src: *const u8) -> String {
        self.read_string(src)
    }

    unsafe fn write_text(&self, dest: *mut u8, value: &str) {
        self.write_string(dest, value)
    }

    unsafe fn read_name(&self, src: *const u8) -> NameRecord {
        let name = ptr::read_unaligned(src as *const HostName);
        NameRecord {
            comparison_index: name.comparison,
            number: name.number,
        }
    }

    unsafe fn write_name(&self, dest: *mut u8, name: NameRecord) {
        ptr::write_unaligned(
            dest as *mut HostName,
            HostName {
                comparison: name.comparison_index,
                display: name.comparison_index,
                number: name.number,
            },
        );
    }
}
