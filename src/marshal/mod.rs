//! Property marshalling - move one value across the runtime boundary
//!
//! Design: one tagged variant per staging strategy, dispatched by exhaustive
//! match. Every operation takes the bridge context explicitly.
//!
//! Architecture:
//! - `mod.rs` - `Marshaller` operations and the per-argument scratch slot
//! - `registry.rs` - kind to marshaller mapping, one registration point
//!
//! Value conventions for `copy`:
//! - value kinds (scalars, bool, enum, name, text, class, struct): the
//!   foreign address points at the value itself
//! - reference kinds (string, object, soft references, collections): the
//!   foreign value is the object pointer; as a `HostToForeign` destination
//!   the address is a slot that receives the object pointer

mod registry;

pub use registry::MarshallerRegistry;

use crate::context::BridgeContext;
use crate::error::BridgeResult;
use crate::handle::{HandleStrength, ProxyHandle};
use crate::property::{PropertyDescriptor, PropertyKind};
use crate::runtime::{ForeignObject, HostObject, HostRuntime, NameRecord, SubclassOfRecord, TextRecord};
use smallvec::SmallVec;
use std::ffi::c_void;
use std::mem::size_of;
use std::ptr;

/// Size of the pointer slot every argument owns in the scratch buffer
pub const POINTER_SLOT: usize = size_of::<*mut c_void>();

/// Foreign-ready argument list for one invocation
pub type ArgumentList = SmallVec<[*mut c_void; 8]>;

/// Strong handles on the foreign objects staged for one invocation
///
/// Dropping the list unroots them, so it must outlive the foreign call.
pub type StagedRoots = SmallVec<[ProxyHandle; 4]>;

/// Direction of a `Marshaller::copy`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyDirection {
    ForeignToHost,
    HostToForeign,
    /// A returned value, possibly boxed
    ForeignReturnToHost,
}

/// Per-kind converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marshaller {
    Bool,
    Scalar,
    Enum,
    Name,
    Text,
    Str,
    Object,
    Class,
    SoftReference,
    Struct,
    Collection,
}

/// One argument's region in the scratch buffer: a pointer slot followed by
/// `Marshaller::scratch_bytes` of staging
#[derive(Debug, Clone, Copy)]
pub struct ScratchSlot {
    base: *mut u8,
}

impl ScratchSlot {
    /// # Safety
    /// `base` must be pointer-aligned and own at least `Marshaller::slot_size` bytes
    #[inline]
    pub unsafe fn from_raw(base: *mut u8) -> Self {
        debug_assert_eq!(base as usize % POINTER_SLOT, 0, "scratch slot must be pointer aligned");
        Self { base }
    }

    #[inline]
    pub fn ref_slot(self) -> *mut *mut c_void {
        self.base as *mut *mut c_void
    }

    /// Value left in the pointer slot, read back after the call
    ///
    /// # Safety
    /// The slot must have been written by `pass_pointer`
    #[inline]
    pub unsafe fn read_ref(self) -> *mut c_void {
        *self.ref_slot()
    }

    #[inline]
    fn staging<T>(self) -> *mut T {
        unsafe { self.base.add(POINTER_SLOT) as *mut T }
    }
}

impl Marshaller {
    /// Staging bytes beyond the pointer slot
    pub const fn scratch_bytes(self) -> usize {
        match self {
            Self::Name => size_of::<NameRecord>(),
            Self::Text => size_of::<TextRecord>(),
            Self::Class => size_of::<SubclassOfRecord>(),
            Self::Bool
            | Self::Scalar
            | Self::Enum
            | Self::Str
            | Self::Object
            | Self::SoftReference
            | Self::Struct
            | Self::Collection => 0,
        }
    }

    /// Bytes this marshaller occupies in the scratch buffer
    pub const fn slot_size(self) -> usize {
        let raw = POINTER_SLOT + self.scratch_bytes();
        (raw + POINTER_SLOT - 1) & !(POINTER_SLOT - 1)
    }

    /// Foreign value is an object reference rather than a pointer to data
    const fn is_reference(self) -> bool {
        matches!(self, Self::Str | Self::Object | Self::SoftReference | Self::Collection)
    }

    /// Pointer to hand to the foreign call for the value at `host`
    ///
    /// For `by_ref`, the pointer is also stored in the slot's pointer
    /// field; reference kinds then pass the slot itself so the callee can
    /// replace the object.
    ///
    /// # Safety
    /// `host` must point at an initialized value described by `property`
    pub unsafe fn pass_pointer(
        self,
        cx: &BridgeContext,
        property: &PropertyDescriptor,
        host: *mut u8,
        slot: ScratchSlot,
        by_ref: bool,
    ) -> BridgeResult<*mut c_void> {
        self.stage(cx, property, host, slot, by_ref).map(|(pointer, _)| pointer)
    }

    /// `pass_pointer`, also returning the foreign object created for the
    /// value, if any
    unsafe fn stage(
        self,
        cx: &BridgeContext,
        property: &PropertyDescriptor,
        host: *mut u8,
        slot: ScratchSlot,
        by_ref: bool,
    ) -> BridgeResult<(*mut c_void, Option<ForeignObject>)> {
        let (value, staged): (*mut c_void, Option<ForeignObject>) = match self {
            Self::Bool | Self::Scalar | Self::Enum => (host as *mut c_void, None),
            Self::Name => {
                let staged = slot.staging::<NameRecord>();
                staged.write(cx.host().read_name(host));
                (staged as *mut c_void, None)
            }
            Self::Text => {
                let text = cx.foreign().new_string(&cx.host().read_text(host));
                let staged = slot.staging::<TextRecord>();
                staged.write(TextRecord { text: text.as_ptr() });
                (staged as *mut c_void, Some(text))
            }
            Self::Str => {
                let text = cx.foreign().new_string(&cx.host().read_string(host));
                (text.as_ptr(), Some(text))
            }
            // Proxies are rooted by the identity table
            Self::Object => (foreign_for_host(cx, ptr::read_unaligned(host as *const *mut c_void))?, None),
            Self::Class => {
                let staged = slot.staging::<SubclassOfRecord>();
                staged.write(SubclassOfRecord {
                    class: ptr::read_unaligned(host as *const *mut c_void),
                });
                (staged as *mut c_void, None)
            }
            Self::SoftReference => {
                let soft = cx.accessor().create_soft_ref(cx.foreign(), property, host)?;
                (object_ptr(soft), soft)
            }
            Self::Struct => {
                let info = struct_info(property);
                let factory = cx.accessor().struct_factory(cx.foreign(), info)?;
                let boxed = factory.from_native(cx.foreign(), host)?;
                let boxed = boxed.unwrap_or_else(|| panic!("`{}` boxed to null", info.foreign_full_name));
                (cx.foreign().unbox(boxed) as *mut c_void, Some(boxed))
            }
            Self::Collection => {
                let collection = cx.accessor().create_collection(cx.foreign(), property, host)?;
                (object_ptr(collection), collection)
            }
        };

        if !by_ref {
            return Ok((value, staged));
        }

        *slot.ref_slot() = value;
        if self.is_reference() {
            Ok((slot.ref_slot() as *mut c_void, staged))
        } else {
            Ok((value, staged))
        }
    }

    /// Reset by-reference outputs, stage the value, append it to `args`
    ///
    /// Any foreign object created for the value is rooted in `roots`.
    ///
    /// # Safety
    /// As `pass_pointer`
    pub unsafe fn add_argument(
        self,
        cx: &BridgeContext,
        property: &PropertyDescriptor,
        host: *mut u8,
        slot: ScratchSlot,
        by_ref: bool,
        args: &mut ArgumentList,
        roots: &mut StagedRoots,
    ) -> BridgeResult<()> {
        if by_ref {
            reset_value(cx.host(), property, host);
        }

        let (pointer, staged) = self.stage(cx, property, host, slot, by_ref)?;
        if let Some(object) = staged {
            roots.push(ProxyHandle::new(cx.foreign_rc(), object, HandleStrength::Strong));
        }
        args.push(pointer);
        Ok(())
    }

    /// Transfer one value between `host` and `foreign`
    ///
    /// # Safety
    /// `host` must point at an initialized value described by `property`;
    /// `foreign` must follow the conventions in the module docs
    pub unsafe fn copy(
        self,
        cx: &BridgeContext,
        property: &PropertyDescriptor,
        host: *mut u8,
        foreign: *mut c_void,
        direction: CopyDirection,
    ) -> BridgeResult<()> {
        match direction {
            CopyDirection::ForeignToHost => self.foreign_to_host(cx, property, host, foreign),
            CopyDirection::HostToForeign => self.host_to_foreign(cx, property, host, foreign),
            CopyDirection::ForeignReturnToHost => {
                let value = match self {
                    // Reference kinds come back as the object itself
                    Self::Str | Self::Object | Self::SoftReference | Self::Collection => foreign,
                    Self::Class => {
                        let boxed = expect_object(foreign, property);
                        assert!(
                            cx.foreign().is_value_type(boxed),
                            "class handle `{}` returned unboxed",
                            property.name
                        );
                        cx.foreign().unbox(boxed) as *mut c_void
                    }
                    Self::Bool | Self::Scalar | Self::Enum | Self::Name | Self::Text | Self::Struct => {
                        let object = expect_object(foreign, property);
                        if cx.foreign().is_value_type(object) {
                            cx.foreign().unbox(object) as *mut c_void
                        } else {
                            foreign
                        }
                    }
                };
                self.foreign_to_host(cx, property, host, value)
            }
        }
    }

    unsafe fn foreign_to_host(
        self,
        cx: &BridgeContext,
        property: &PropertyDescriptor,
        host: *mut u8,
        foreign: *mut c_void,
    ) -> BridgeResult<()> {
        match self {
            Self::Bool => {
                let mask = bool_mask(property);
                let value = *(expect_data(foreign, property) as *const u8) != 0;
                if value {
                    *host |= mask;
                } else {
                    *host &= !mask;
                }
            }
            Self::Scalar => {
                ptr::copy(expect_data(foreign, property) as *const u8, host, property.size);
            }
            Self::Enum => copy_enum(property.size, expect_data(foreign, property) as *const u8, host),
            Self::Name => {
                let record = ptr::read_unaligned(expect_data(foreign, property) as *const NameRecord);
                cx.host().write_name(host, record);
            }
            Self::Text => {
                let record = ptr::read_unaligned(expect_data(foreign, property) as *const TextRecord);
                let text = cx.foreign().read_string(ForeignObject::from_ptr(record.text));
                cx.host().write_text(host, &text);
            }
            Self::Str => {
                let text = cx.foreign().read_string(ForeignObject::from_ptr(foreign));
                cx.host().write_string(host, &text);
            }
            Self::Object => {
                let resolved = ForeignObject::from_ptr(foreign).and_then(|proxy| cx.get_host_object(proxy));
                ptr::write_unaligned(
                    host as *mut *mut c_void,
                    resolved.map_or(ptr::null_mut(), HostObject::as_ptr),
                );
            }
            Self::Class => {
                let record = ptr::read_unaligned(expect_data(foreign, property) as *const SubclassOfRecord);
                ptr::write_unaligned(host as *mut *mut c_void, record.class);
            }
            Self::SoftReference => {
                cx.accessor()
                    .copy_soft_ref(cx.foreign(), property, host, ForeignObject::from_ptr(foreign))?;
            }
            Self::Struct => {
                let factory = cx.accessor().struct_factory(cx.foreign(), struct_info(property))?;
                factory.to_native(cx.foreign(), host, expect_data(foreign, property) as *mut u8)?;
            }
            Self::Collection => {
                cx.accessor()
                    .copy_into_collection(cx.foreign(), property, host, ForeignObject::from_ptr(foreign))?;
            }
        }
        Ok(())
    }

    unsafe fn host_to_foreign(
        self,
        cx: &BridgeContext,
        property: &PropertyDescriptor,
        host: *mut u8,
        foreign: *mut c_void,
    ) -> BridgeResult<()> {
        let dest = expect_data(foreign, property);
        match self {
            Self::Bool => {
                let mask = bool_mask(property);
                *(dest as *mut u8) = u8::from(*host & mask != 0);
            }
            Self::Scalar => ptr::copy(host as *const u8, dest as *mut u8, property.size),
            Self::Enum => copy_enum(property.size, host, dest as *mut u8),
            Self::Name => {
                ptr::write_unaligned(dest as *mut NameRecord, cx.host().read_name(host));
            }
            Self::Text => {
                let text = cx.foreign().new_string(&cx.host().read_text(host));
                ptr::write_unaligned(dest as *mut TextRecord, TextRecord { text: text.as_ptr() });
            }
            Self::Str => {
                let text = cx.foreign().new_string(&cx.host().read_string(host));
                ptr::write_unaligned(dest as *mut *mut c_void, text.as_ptr());
            }
            Self::Object => {
                let proxy = foreign_for_host(cx, ptr::read_unaligned(host as *const *mut c_void))?;
                ptr::write_unaligned(dest as *mut *mut c_void, proxy);
            }
            Self::Class => {
                let class = ptr::read_unaligned(host as *const *mut c_void);
                ptr::write_unaligned(dest as *mut SubclassOfRecord, SubclassOfRecord { class });
            }
            Self::SoftReference | Self::Struct | Self::Collection => panic!(
                "{} property `{}` cannot be copied into foreign memory in place",
                property.tag().name(),
                property.name
            ),
        }
        Ok(())
    }
}

/// Overwrite the value at `dest` with its kind's default
///
/// # Safety
/// `dest` must point at an initialized value described by `property`
pub unsafe fn reset_value(host: &dyn HostRuntime, property: &PropertyDescriptor, dest: *mut u8) {
    match property.kind {
        PropertyKind::Bool { mask } => *dest &= !mask,
        ref kind if kind.is_plain_data() => ptr::write_bytes(dest, 0, property.size),
        _ => {
            host.destroy_value(property, dest);
            host.initialize_value(property, dest);
        }
    }
}

unsafe fn foreign_for_host(cx: &BridgeContext, host: *mut c_void) -> BridgeResult<*mut c_void> {
    match HostObject::from_ptr(host) {
        Some(object) => Ok(cx.get_foreign_object(object)?.as_ptr()),
        None => Ok(ptr::null_mut()),
    }
}

/// Copy an enum of `width` bytes without widening or truncation
unsafe fn copy_enum(width: usize, src: *const u8, dest: *mut u8) {
    match width {
        1 => ptr::write_unaligned(dest, ptr::read_unaligned(src)),
        2 => ptr::write_unaligned(dest as *mut u16, ptr::read_unaligned(src as *const u16)),
        4 => ptr::write_unaligned(dest as *mut u32, ptr::read_unaligned(src as *const u32)),
        8 => ptr::write_unaligned(dest as *mut u64, ptr::read_unaligned(src as *const u64)),
        other => panic!("unsupported enum width: {other} bytes"),
    }
}

fn bool_mask(property: &PropertyDescriptor) -> u8 {
    match property.kind {
        PropertyKind::Bool { mask } => mask,
        _ => panic!("`{}` is not a bool property", property.name),
    }
}

fn struct_info(property: &PropertyDescriptor) -> &crate::property::StructInfo {
    match &property.kind {
        PropertyKind::Struct(info) => info,
        _ => panic!("`{}` is not a struct property", property.name),
    }
}

fn object_ptr(object: Option<ForeignObject>) -> *mut c_void {
    object.map_or(ptr::null_mut(), ForeignObject::as_ptr)
}

fn expect_data(foreign: *mut c_void, property: &PropertyDescriptor) -> *mut c_void {
    assert!(!foreign.is_null(), "null foreign address for `{}`", property.name);
    foreign
}

fn expect_object(foreign: *mut c_void, property: &PropertyDescriptor) -> ForeignObject {
    ForeignObject::from_ptr(foreign)
        .unwrap_or_else(|| panic!("null foreign return value for `{}`", property.name))
}
