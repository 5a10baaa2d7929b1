//! Reflection metadata crossing the boundary
//!
//! Design: the host's reflection database is produced elsewhere; this module
//! only models what the bridge needs from it.
//!
//! - `PropertyKind` / `KindTag` - value kind of one field or parameter
//! - `PropertyDescriptor` - kind, byte size, alignment, offset and flags
//! - `FunctionDescriptor` - native parameter block in declaration order
//! - `ForeignMethodDescriptor` - foreign parameter list, matched by name

use crate::runtime::{HostRuntime, ValueLayout};
use crate::signature::MethodSignature;
use bitflags::bitflags;

/// Name the host gives the return slot of a function parameter block
pub const RETURN_VALUE_NAME: &str = "ReturnValue";

bitflags! {
    /// Per-property parameter flags
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u64 {
        const PARM = 1 << 0;
        const OUT_PARM = 1 << 1;
        const RETURN_PARM = 1 << 2;
        const REFERENCE_PARM = 1 << 3;
        const CONST_PARM = 1 << 4;
    }
}

bitflags! {
    /// Per-function flags
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FunctionFlags: u32 {
        const STATIC = 1 << 0;
        const NATIVE = 1 << 1;
        const HAS_OUT_PARMS = 1 << 2;
        const BLUEPRINT_EVENT = 1 << 3;
    }
}

bitflags! {
    /// Per-argument flags of a foreign method
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ArgumentFlags: u8 {
        const PASS_BY_REF = 1 << 0;
        const RETURN = 1 << 1;
    }
}

/// Value struct layout as the host reflects it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructInfo {
    pub name: String,
    pub foreign_full_name: String,
    pub assembly: String,
    pub size: usize,
    pub align: usize,
}

/// Value kind of a reflected property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    /// Boolean field, possibly one bit of a packed byte
    Bool { mask: u8 },
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Enumeration with a 1/2/4/8-byte underlying integer
    Enum { width: usize },
    Str,
    Name,
    Text,
    Object,
    Class,
    SoftObject,
    SoftClass,
    Struct(StructInfo),
    Array(Box<PropertyDescriptor>),
    Set(Box<PropertyDescriptor>),
    Map(Box<PropertyDescriptor>, Box<PropertyDescriptor>),
    Delegate { signature: String },
    MulticastDelegate { signature: String },
}

/// Payload-free discriminant of `PropertyKind`, used as registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindTag {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Enum,
    Str,
    Name,
    Text,
    Object,
    Class,
    SoftObject,
    SoftClass,
    Struct,
    Array,
    Set,
    Map,
    Delegate,
    MulticastDelegate,
}

impl KindTag {
    pub const ALL: [KindTag; 25] = [
        Self::Bool,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
        Self::Float32,
        Self::Float64,
        Self::Enum,
        Self::Str,
        Self::Name,
        Self::Text,
        Self::Object,
        Self::Class,
        Self::SoftObject,
        Self::SoftClass,
        Self::Struct,
        Self::Array,
        Self::Set,
        Self::Map,
        Self::Delegate,
        Self::MulticastDelegate,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Enum => "enum",
            Self::Str => "string",
            Self::Name => "name",
            Self::Text => "text",
            Self::Object => "object",
            Self::Class => "class",
            Self::SoftObject => "soft object",
            Self::SoftClass => "soft class",
            Self::Struct => "struct",
            Self::Array => "array",
            Self::Set => "set",
            Self::Map => "map",
            Self::Delegate => "delegate",
            Self::MulticastDelegate => "multicast delegate",
        }
    }
}

impl PropertyKind {
    pub fn tag(&self) -> KindTag {
        match self {
            Self::Bool { .. } => KindTag::Bool,
            Self::Int8 => KindTag::Int8,
            Self::Int16 => KindTag::Int16,
            Self::Int32 => KindTag::Int32,
            Self::Int64 => KindTag::Int64,
            Self::UInt8 => KindTag::UInt8,
            Self::UInt16 => KindTag::UInt16,
            Self::UInt32 => KindTag::UInt32,
            Self::UInt64 => KindTag::UInt64,
            Self::Float32 => KindTag::Float32,
            Self::Float64 => KindTag::Float64,
            Self::Enum { .. } => KindTag::Enum,
            Self::Str => KindTag::Str,
            Self::Name => KindTag::Name,
            Self::Text => KindTag::Text,
            Self::Object => KindTag::Object,
            Self::Class => KindTag::Class,
            Self::SoftObject => KindTag::SoftObject,
            Self::SoftClass => KindTag::SoftClass,
            Self::Struct(_) => KindTag::Struct,
            Self::Array(_) => KindTag::Array,
            Self::Set(_) => KindTag::Set,
            Self::Map(..) => KindTag::Map,
            Self::Delegate { .. } => KindTag::Delegate,
            Self::MulticastDelegate { .. } => KindTag::MulticastDelegate,
        }
    }

    /// Layout for kinds whose representation is fixed regardless of host
    pub fn plain_layout(&self) -> Option<ValueLayout> {
        let size = match self {
            Self::Bool { .. } | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
            Self::Enum { width } => *width,
            Self::Object | Self::Class => std::mem::size_of::<usize>(),
            Self::Struct(info) => return Some(ValueLayout::new(info.size, info.align)),
            _ => return None,
        };
        Some(ValueLayout::new(size, size))
    }

    /// Plain bytes: copy, reset and destroy need no host cooperation
    pub fn is_plain_data(&self) -> bool {
        matches!(
            self,
            Self::Bool { .. }
                | Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
                | Self::Float32
                | Self::Float64
                | Self::Enum { .. }
                | Self::Object
                | Self::Class
        )
    }

    /// Bool that owns the whole byte
    pub fn bool() -> Self {
        Self::Bool { mask: 0xFF }
    }
}

/// Static metadata for one reflected field or parameter
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
    pub size: usize,
    pub align: usize,
    pub offset: usize,
    pub flags: PropertyFlags,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, kind: PropertyKind, layout: ValueLayout) -> Self {
        Self {
            name: name.into(),
            kind,
            size: layout.size,
            align: layout.align.max(1),
            offset: 0,
            flags: PropertyFlags::empty(),
        }
    }

    /// Descriptor laid out through the host's value layouts
    pub fn with_host(name: impl Into<String>, kind: PropertyKind, host: &dyn HostRuntime) -> Self {
        let layout = host.layout_of(&kind);
        Self::new(name, kind, layout)
    }

    pub fn with_flags(mut self, flags: PropertyFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn at(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    #[inline]
    pub fn tag(&self) -> KindTag {
        self.kind.tag()
    }

    #[inline]
    pub fn is_return(&self) -> bool {
        self.flags.contains(PropertyFlags::RETURN_PARM)
    }

    /// Output parameter: written by the callee, never carries input
    #[inline]
    pub fn is_out(&self) -> bool {
        self.flags.contains(PropertyFlags::OUT_PARM) && !self.flags.contains(PropertyFlags::CONST_PARM)
    }

    /// The caller passed its own storage, not a copy
    #[inline]
    pub fn is_reference(&self) -> bool {
        self.flags.contains(PropertyFlags::REFERENCE_PARM) || (self.is_out() && !self.is_return())
    }

    /// Address of this property inside a container starting at `base`
    ///
    /// # Safety
    /// `base` must point at a block of at least `offset + size` bytes
    #[inline]
    pub unsafe fn container_ptr(&self, base: *mut u8) -> *mut u8 {
        base.add(self.offset)
    }
}

/// Native function: parameter block in host declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    pub owner: String,
    pub name: String,
    pub flags: FunctionFlags,
    pub params: Vec<PropertyDescriptor>,
    pub params_size: usize,
    pub params_align: usize,
}

impl FunctionDescriptor {
    pub fn builder(owner: impl Into<String>, name: impl Into<String>) -> FunctionBuilder {
        FunctionBuilder {
            owner: owner.into(),
            name: name.into(),
            flags: FunctionFlags::empty(),
            params: Vec::new(),
        }
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FunctionFlags::STATIC)
    }

    pub fn return_property(&self) -> Option<&PropertyDescriptor> {
        self.params.iter().find(|p| p.is_return())
    }

    pub fn find_param(&self, name: &str) -> Option<(usize, &PropertyDescriptor)> {
        self.params.iter().enumerate().find(|(_, p)| p.name == name)
    }

    /// `Owner::Name`, used in logs and errors
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.owner, self.name)
    }
}

/// Builder computing parameter offsets the way the host packs them
pub struct FunctionBuilder {
    owner: String,
    name: String,
    flags: FunctionFlags,
    params: Vec<(String, PropertyKind, PropertyFlags)>,
}

impl FunctionBuilder {
    pub fn flags(mut self, flags: FunctionFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn param(self, name: &str, kind: PropertyKind) -> Self {
        self.push(name, kind, PropertyFlags::PARM)
    }

    /// Output-only parameter (`out T`)
    pub fn out_param(self, name: &str, kind: PropertyKind) -> Self {
        self.push(name, kind, PropertyFlags::PARM | PropertyFlags::OUT_PARM)
    }

    /// In/out parameter (`ref T`)
    pub fn ref_param(self, name: &str, kind: PropertyKind) -> Self {
        self.push(
            name,
            kind,
            PropertyFlags::PARM | PropertyFlags::OUT_PARM | PropertyFlags::REFERENCE_PARM,
        )
    }

    pub fn returns(self, kind: PropertyKind) -> Self {
        self.push(
            RETURN_VALUE_NAME,
            kind,
            PropertyFlags::PARM | PropertyFlags::OUT_PARM | PropertyFlags::RETURN_PARM,
        )
    }

    fn push(mut self, name: &str, kind: PropertyKind, flags: PropertyFlags) -> Self {
        if flags.contains(PropertyFlags::OUT_PARM) && !flags.contains(PropertyFlags::RETURN_PARM) {
            self.flags |= FunctionFlags::HAS_OUT_PARMS;
        }
        self.params.push((name.to_string(), kind, flags));
        self
    }

    pub fn build(self, host: &dyn HostRuntime) -> FunctionDescriptor {
        self.build_with(|kind| host.layout_of(kind))
    }

    /// Lay out parameters with an explicit layout function
    pub fn build_with(self, mut layout_of: impl FnMut(&PropertyKind) -> ValueLayout) -> FunctionDescriptor {
        let mut offset = 0usize;
        let mut params_align = 1usize;
        let mut params = Vec::with_capacity(self.params.len());

        for (name, kind, flags) in self.params {
            let layout = layout_of(&kind);
            let align = layout.align.max(1);
            offset = align_up(offset, align);
            params_align = params_align.max(align);
            let descriptor = PropertyDescriptor::new(name, kind, layout)
                .with_flags(flags)
                .at(offset);
            offset += descriptor.size;
            params.push(descriptor);
        }

        FunctionDescriptor {
            owner: self.owner,
            name: self.name,
            flags: self.flags,
            params,
            params_size: align_up(offset, params_align),
            params_align,
        }
    }
}

/// One argument of a foreign method, in foreign declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignArgument {
    pub name: String,
    pub flags: ArgumentFlags,
}

impl ForeignArgument {
    #[inline]
    pub fn is_pass_by_reference(&self) -> bool {
        self.flags.contains(ArgumentFlags::PASS_BY_REF)
    }

    #[inline]
    pub fn is_return_value(&self) -> bool {
        self.flags.contains(ArgumentFlags::RETURN)
    }
}

/// Foreign side of a redirected function, captured when bindings were generated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignMethodDescriptor {
    pub assembly: String,
    pub signature: MethodSignature,
    pub arguments: Vec<ForeignArgument>,
}

impl ForeignMethodDescriptor {
    pub fn new(assembly: impl Into<String>, signature: MethodSignature) -> Self {
        Self {
            assembly: assembly.into(),
            signature,
            arguments: Vec::new(),
        }
    }

    pub fn arg(self, name: &str) -> Self {
        self.push(name, ArgumentFlags::empty())
    }

    pub fn ref_arg(self, name: &str) -> Self {
        self.push(name, ArgumentFlags::PASS_BY_REF)
    }

    pub fn returns(self) -> Self {
        self.push(RETURN_VALUE_NAME, ArgumentFlags::RETURN)
    }

    fn push(mut self, name: &str, flags: ArgumentFlags) -> Self {
        self.arguments.push(ForeignArgument {
            name: name.to_string(),
            flags,
        });
        self
    }

    /// Arguments actually passed to the foreign method
    pub fn parameter_count(&self) -> usize {
        self.arguments.iter().filter(|a| !a.is_return_value()).count()
    }

    pub fn name(&self) -> &str {
        self.signature.method()
    }
}

#[inline]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests;
