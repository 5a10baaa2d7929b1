//! Library accessor - fixed foreign-side methods the bridge depends on
//!
//! Binds, once, the proxy lifecycle methods on the engine object class and
//! the bulk collection / soft reference helpers on the engine factory
//! class. A missing method is a `LinkError`: the foreign assemblies do not
//! match this bridge. Per-struct boxing factories are resolved lazily and
//! memoized per struct type.

use crate::config::EngineBindingConfig;
use crate::error::{ForeignException, LinkError};
use crate::logging::{log_boundary_error, log_struct_factory};
use crate::property::{KindTag, PropertyDescriptor, StructInfo};
use crate::runtime::{ForeignMethod, ForeignObject, ForeignRuntime, HostObject};
use crate::signature::MethodSignature;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use std::rc::Rc;

#[derive(Debug)]
pub struct LibraryAccessor {
    disconnect: ForeignMethod,
    native_ptr: ForeignMethod,
    before_construct: ForeignMethod,
    after_construct: ForeignMethod,
    create_array: ForeignMethod,
    write_array: ForeignMethod,
    create_set: ForeignMethod,
    write_set: ForeignMethod,
    create_map: ForeignMethod,
    write_map: ForeignMethod,
    create_soft_object: ForeignMethod,
    write_soft_object: ForeignMethod,
    create_soft_class: ForeignMethod,
    write_soft_class: ForeignMethod,
    structs: RefCell<HashMap<String, Rc<StructFactory>>>,
}

/// Boxing factory for one struct type
#[derive(Debug)]
pub struct StructFactory {
    name: String,
    from_native: ForeignMethod,
    to_native: ForeignMethod,
}

impl LibraryAccessor {
    pub fn bind(foreign: &dyn ForeignRuntime, engine: &EngineBindingConfig) -> Result<Self, LinkError> {
        let namespace = engine.namespace.as_str();
        let bind = |class: &str, method: &str, params: &[&str]| -> Result<ForeignMethod, LinkError> {
            let key = MethodSignature::new(namespace, class, method, params.iter().copied());
            foreign
                .lookup_method(&engine.assembly, &key)
                .ok_or_else(|| LinkError::MissingMethod {
                    assembly: engine.assembly.clone(),
                    signature: key.to_string(),
                })
        };

        let object = engine.object_class.as_str();
        let factory = engine.factory_class.as_str();
        let enumerable = "System.Collections.IEnumerable";
        let soft_object = format!("{namespace}.ISoftObjectPtr");
        let soft_class = format!("{namespace}.ISoftClassPtr");

        Ok(Self {
            disconnect: bind(object, "DisconnectFromNative", &[])?,
            native_ptr: bind(object, "GetNativePtr", &[])?,
            before_construct: bind(object, "BeforeConstruct", &["intptr"])?,
            after_construct: bind(object, "AfterConstruct", &[])?,
            create_array: bind(factory, "CreateArray", &["intptr", "intptr"])?,
            write_array: bind(factory, "WriteArray", &["intptr", "intptr", enumerable])?,
            create_set: bind(factory, "CreateSet", &["intptr", "intptr"])?,
            write_set: bind(factory, "WriteSet", &["intptr", "intptr", enumerable])?,
            create_map: bind(factory, "CreateMap", &["intptr", "intptr"])?,
            write_map: bind(factory, "WriteMap", &["intptr", "intptr", enumerable])?,
            create_soft_object: bind(factory, "CreateSoftObjectPtr", &["intptr", "intptr"])?,
            write_soft_object: bind(factory, "WriteSoftObjectPtr", &["intptr", soft_object.as_str()])?,
            create_soft_class: bind(factory, "CreateSoftClassPtr", &["intptr", "intptr"])?,
            write_soft_class: bind(factory, "WriteSoftClassPtr", &["intptr", soft_class.as_str()])?,
            structs: RefCell::new(HashMap::new()),
        })
    }

    /// Tell the proxy to drop its native back-reference
    pub fn disconnect(&self, foreign: &dyn ForeignRuntime, proxy: ForeignObject) {
        if let Err(exception) = unsafe { foreign.invoke(self.disconnect, Some(proxy), &[]) } {
            log_boundary_error("DisconnectFromNative", &exception.message);
        }
    }

    /// Host address the proxy is bound to; `None` once disconnected
    pub fn native_ptr(&self, foreign: &dyn ForeignRuntime, proxy: ForeignObject) -> Option<HostObject> {
        match unsafe { foreign.invoke(self.native_ptr, Some(proxy), &[]) } {
            Ok(Some(boxed)) => {
                let payload = foreign.unbox(boxed) as *const *mut c_void;
                HostObject::from_ptr(unsafe { ptr::read_unaligned(payload) })
            }
            Ok(None) => None,
            Err(exception) => {
                log_boundary_error("GetNativePtr", &exception.message);
                None
            }
        }
    }

    pub fn before_construct(
        &self,
        foreign: &dyn ForeignRuntime,
        proxy: ForeignObject,
        host: HostObject,
    ) -> Result<(), ForeignException> {
        let mut native = host.as_ptr();
        let args = [ptr::addr_of_mut!(native) as *mut c_void];
        unsafe { foreign.invoke(self.before_construct, Some(proxy), &args) }.map(drop)
    }

    pub fn after_construct(&self, foreign: &dyn ForeignRuntime, proxy: ForeignObject) -> Result<(), ForeignException> {
        unsafe { foreign.invoke(self.after_construct, Some(proxy), &[]) }.map(drop)
    }

    /// New foreign collection holding a copy of the host container at `host`
    ///
    /// # Safety
    /// `host` must point at an initialized container described by `property`
    pub unsafe fn create_collection(
        &self,
        foreign: &dyn ForeignRuntime,
        property: &PropertyDescriptor,
        host: *mut u8,
    ) -> Result<Option<ForeignObject>, ForeignException> {
        let method = match property.tag() {
            KindTag::Array => self.create_array,
            KindTag::Set => self.create_set,
            KindTag::Map => self.create_map,
            other => panic!("`{}` is a {} property, not a collection", property.name, other.name()),
        };
        self.invoke_create(foreign, method, property, host)
    }

    /// Overwrite the host container at `host` with the foreign collection
    ///
    /// # Safety
    /// `host` must point at an initialized container described by `property`
    pub unsafe fn copy_into_collection(
        &self,
        foreign: &dyn ForeignRuntime,
        property: &PropertyDescriptor,
        host: *mut u8,
        collection: Option<ForeignObject>,
    ) -> Result<(), ForeignException> {
        let method = match property.tag() {
            KindTag::Array => self.write_array,
            KindTag::Set => self.write_set,
            KindTag::Map => self.write_map,
            other => panic!("`{}` is a {} property, not a collection", property.name, other.name()),
        };

        let mut descriptor = property as *const PropertyDescriptor as *mut c_void;
        let mut buffer = host as *mut c_void;
        let args = [
            ptr::addr_of_mut!(descriptor) as *mut c_void,
            ptr::addr_of_mut!(buffer) as *mut c_void,
            collection.map_or(ptr::null_mut(), ForeignObject::as_ptr),
        ];
        foreign.invoke(method, None, &args).map(drop)
    }

    /// # Safety
    /// `host` must point at an initialized soft reference described by `property`
    pub unsafe fn create_soft_ref(
        &self,
        foreign: &dyn ForeignRuntime,
        property: &PropertyDescriptor,
        host: *mut u8,
    ) -> Result<Option<ForeignObject>, ForeignException> {
        let method = match property.tag() {
            KindTag::SoftObject => self.create_soft_object,
            KindTag::SoftClass => self.create_soft_class,
            other => panic!("`{}` is a {} property, not a soft reference", property.name, other.name()),
        };
        self.invoke_create(foreign, method, property, host)
    }

    /// # Safety
    /// `host` must point at an initialized soft reference described by `property`
    pub unsafe fn copy_soft_ref(
        &self,
        foreign: &dyn ForeignRuntime,
        property: &PropertyDescriptor,
        host: *mut u8,
        value: Option<ForeignObject>,
    ) -> Result<(), ForeignException> {
        let method = match property.tag() {
            KindTag::SoftObject => self.write_soft_object,
            KindTag::SoftClass => self.write_soft_class,
            other => panic!("`{}` is a {} property, not a soft reference", property.name, other.name()),
        };

        let mut buffer = host as *mut c_void;
        let args = [
            ptr::addr_of_mut!(buffer) as *mut c_void,
            value.map_or(ptr::null_mut(), ForeignObject::as_ptr),
        ];
        foreign.invoke(method, None, &args).map(drop)
    }

    unsafe fn invoke_create(
        &self,
        foreign: &dyn ForeignRuntime,
        method: ForeignMethod,
        property: &PropertyDescriptor,
        host: *mut u8,
    ) -> Result<Option<ForeignObject>, ForeignException> {
        let mut descriptor = property as *const PropertyDescriptor as *mut c_void;
        let mut buffer = host as *mut c_void;
        let args = [
            ptr::addr_of_mut!(descriptor) as *mut c_void,
            ptr::addr_of_mut!(buffer) as *mut c_void,
        ];
        foreign.invoke(method, None, &args)
    }

    /// Boxing factory for `info`, bound on first use
    pub fn struct_factory(&self, foreign: &dyn ForeignRuntime, info: &StructInfo) -> Result<Rc<StructFactory>, LinkError> {
        if let Some(factory) = self.structs.borrow().get(&info.foreign_full_name) {
            return Ok(Rc::clone(factory));
        }

        let full = info.foreign_full_name.as_str();
        let by_ref = format!("{full}&");
        let resolve = |key: MethodSignature| {
            foreign
                .lookup_method(&info.assembly, &key)
                .ok_or_else(|| LinkError::MissingMethod {
                    assembly: info.assembly.clone(),
                    signature: key.to_string(),
                })
        };

        let factory = Rc::new(StructFactory {
            name: info.foreign_full_name.clone(),
            from_native: resolve(MethodSignature::for_class(full, "FromNative", ["intptr", "int"]))?,
            to_native: resolve(MethodSignature::for_class(full, "ToNative", ["intptr", "int", by_ref.as_str()]))?,
        });

        log_struct_factory(full);
        self.structs
            .borrow_mut()
            .insert(info.foreign_full_name.clone(), Rc::clone(&factory));
        Ok(factory)
    }

    pub fn cached_struct_factories(&self) -> usize {
        self.structs.borrow().len()
    }
}

impl StructFactory {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Box a copy of the host struct at `host`
    ///
    /// # Safety
    /// `host` must point at an initialized value of this struct type
    pub unsafe fn from_native(&self, foreign: &dyn ForeignRuntime, host: *mut u8) -> Result<Option<ForeignObject>, ForeignException> {
        let mut buffer = host as *mut c_void;
        let mut offset: i32 = 0;
        let args = [
            ptr::addr_of_mut!(buffer) as *mut c_void,
            ptr::addr_of_mut!(offset) as *mut c_void,
        ];
        foreign.invoke(self.from_native, None, &args)
    }

    /// Write the unboxed foreign struct at `data` into the host struct at `host`
    ///
    /// # Safety
    /// `host` must point at an initialized value of this struct type and
    /// `data` at an unboxed foreign value of it
    pub unsafe fn to_native(&self, foreign: &dyn ForeignRuntime, host: *mut u8, data: *mut u8) -> Result<(), ForeignException> {
        let mut buffer = host as *mut c_void;
        let mut offset: i32 = 0;
        let args = [
            ptr::addr_of_mut!(buffer) as *mut c_void,
            ptr::addr_of_mut!(offset) as *mut c_void,
            data as *mut c_void,
        ];
        foreign.invoke(self.to_native, None, &args).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{SandboxForeign, GAME_ASSEMBLY};

    fn vector() -> StructInfo {
        StructInfo {
            name: "Vector".into(),
            foreign_full_name: "Game.Vector".into(),
            assembly: GAME_ASSEMBLY.into(),
            size: 12,
            align: 4,
        }
    }

    #[test]
    fn test_bind_requires_engine_library() {
        let foreign = SandboxForeign::new();
        let error = LibraryAccessor::bind(&foreign, &EngineBindingConfig::default()).unwrap_err();
        assert!(matches!(
            error,
            LinkError::MissingMethod { ref signature, .. } if signature == "Interop.Engine.Object:DisconnectFromNative ()"
        ));
    }

    #[test]
    fn test_bind_custom_namespace() {
        let engine = EngineBindingConfig {
            assembly: "Runtime".into(),
            namespace: "Runtime.Core".into(),
            ..EngineBindingConfig::default()
        };
        let foreign = SandboxForeign::new();
        foreign.install_engine_library(&engine);

        assert!(LibraryAccessor::bind(&foreign, &engine).is_ok());
        assert!(LibraryAccessor::bind(&foreign, &EngineBindingConfig::default()).is_err());
    }

    #[test]
    fn test_struct_factory_memoized() {
        let engine = EngineBindingConfig::default();
        let foreign = SandboxForeign::new();
        foreign.install_engine_library(&engine);
        foreign.define_struct(GAME_ASSEMBLY, "Game.Vector", 12);
        let accessor = LibraryAccessor::bind(&foreign, &engine).unwrap();

        let first = accessor.struct_factory(&foreign, &vector()).unwrap();
        let second = accessor.struct_factory(&foreign, &vector()).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "Game.Vector");
        assert_eq!(accessor.cached_struct_factories(), 1);
    }

    #[test]
    fn test_missing_struct_factory_not_cached() {
        let engine = EngineBindingConfig::default();
        let foreign = SandboxForeign::new();
        foreign.install_engine_library(&engine);
        let accessor = LibraryAccessor::bind(&foreign, &engine).unwrap();

        let error = accessor.struct_factory(&foreign, &vector()).unwrap_err();
        assert!(matches!(error, LinkError::MissingMethod { .. }));
        assert_eq!(accessor.cached_struct_factories(), 0);
    }
}
