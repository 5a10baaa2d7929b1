//! Marshaller registry - single registration point per property kind

use super::Marshaller;
use crate::error::LinkError;
use crate::property::{KindTag, PropertyDescriptor};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MarshallerRegistry {
    marshallers: HashMap<KindTag, Marshaller>,
}

impl MarshallerRegistry {
    /// Registry with no kinds registered
    pub fn empty() -> Self {
        Self {
            marshallers: HashMap::with_capacity(KindTag::ALL.len()),
        }
    }

    /// Registry covering every data kind
    ///
    /// Delegates are left out: they bind through function descriptors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();

        registry.register(KindTag::Bool, Marshaller::Bool);
        for tag in [
            KindTag::Int8,
            KindTag::Int16,
            KindTag::Int32,
            KindTag::Int64,
            KindTag::UInt8,
            KindTag::UInt16,
            KindTag::UInt32,
            KindTag::UInt64,
            KindTag::Float32,
            KindTag::Float64,
        ] {
            registry.register(tag, Marshaller::Scalar);
        }
        registry.register(KindTag::Enum, Marshaller::Enum);
        registry.register(KindTag::Name, Marshaller::Name);
        registry.register(KindTag::Text, Marshaller::Text);
        registry.register(KindTag::Str, Marshaller::Str);
        registry.register(KindTag::Object, Marshaller::Object);
        registry.register(KindTag::Class, Marshaller::Class);
        registry.register(KindTag::SoftObject, Marshaller::SoftReference);
        registry.register(KindTag::SoftClass, Marshaller::SoftReference);
        registry.register(KindTag::Struct, Marshaller::Struct);
        registry.register(KindTag::Array, Marshaller::Collection);
        registry.register(KindTag::Set, Marshaller::Collection);
        registry.register(KindTag::Map, Marshaller::Collection);

        registry
    }

    /// Register `marshaller` for `tag`
    ///
    /// # Panics
    /// If `tag` already has a marshaller
    pub fn register(&mut self, tag: KindTag, marshaller: Marshaller) {
        let previous = self.marshallers.insert(tag, marshaller);
        assert!(previous.is_none(), "duplicate marshaller for {} properties", tag.name());
    }

    #[inline]
    pub fn get(&self, tag: KindTag) -> Option<Marshaller> {
        self.marshallers.get(&tag).copied()
    }

    pub fn resolve(&self, property: &PropertyDescriptor) -> Result<Marshaller, LinkError> {
        let tag = property.tag();
        self.get(tag).ok_or_else(|| LinkError::UnsupportedKind {
            property: property.name.clone(),
            kind: tag.name(),
        })
    }

    pub fn len(&self) -> usize {
        self.marshallers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marshallers.is_empty()
    }
}

impl Default for MarshallerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
