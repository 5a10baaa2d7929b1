//! Object identity table - host object to foreign proxy, one to one
//!
//! Design: a side table keyed by host address. The reverse direction is not
//! a second map: the proxy itself holds the authoritative back-reference
//! and is asked through the library accessor.
//!
//! Entries are created on demand and removed by the reachability sweep,
//! scope teardown or shutdown. Removal disconnects the proxy and releases
//! its handle in the same step.
//!
//! No `RefCell` borrow is held across a call into the foreign runtime, so
//! proxy constructors may re-enter the table.

use crate::context::BridgeContext;
use crate::error::{BridgeResult, LinkError};
use crate::handle::{HandleStrength, ProxyHandle};
use crate::logging::{
    log_foreign_collection, log_handle_strength, log_link_failure, log_proxy_class_resolved, log_proxy_created,
    log_proxy_severed, log_scope_teardown, log_sweep_complete, perf,
};
use crate::metrics;
use crate::runtime::{ClassOrigin, ForeignMethod, ForeignObject, ForeignType, GcHandle, HostClass, HostObject};
use crate::signature::MethodSignature;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Memoized constructor binding for one host class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyBinding {
    /// Class whose foreign counterpart is instantiated
    pub proxy_class: String,
    pub assembly: String,
    pub constructor: MethodSignature,
    ty: ForeignType,
    method: ForeignMethod,
    takes_native_ptr: bool,
}

/// Outcome of one reachability pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub severed: usize,
    pub remaining: usize,
    pub duration: Duration,
}

#[derive(Default)]
pub struct ObjectTable {
    entries: RefCell<HashMap<HostObject, ProxyHandle>>,
    bindings: RefCell<HashMap<HostClass, Rc<ProxyBinding>>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn contains(&self, host: HostObject) -> bool {
        self.entries.borrow().contains_key(&host)
    }

    /// Live proxy for `host`, without creating one
    pub fn find_proxy(&self, host: HostObject) -> Option<ForeignObject> {
        self.entries.borrow().get(&host).and_then(ProxyHandle::target)
    }

    pub fn handle_strength(&self, host: HostObject) -> Option<HandleStrength> {
        self.entries.borrow().get(&host).map(ProxyHandle::strength)
    }

    pub fn gc_handle(&self, host: HostObject) -> Option<GcHandle> {
        self.entries.borrow().get(&host).and_then(ProxyHandle::gc_handle)
    }

    /// Proxy for `host`, created and registered on first request
    pub fn get_or_create(&self, cx: &BridgeContext, host: HostObject) -> BridgeResult<ForeignObject> {
        if let Some(proxy) = self.find_proxy(host) {
            return Ok(proxy);
        }

        // A weak handle whose proxy was collected
        self.entries.borrow_mut().remove(&host);

        let class = cx.host().class_of(host);
        let binding = self.binding_for(cx, class)?;
        let foreign = cx.foreign();

        let proxy = foreign
            .new_object(binding.ty)
            .ok_or_else(|| LinkError::AllocationFailed {
                full_name: binding.proxy_class.clone(),
            })?;

        // Registered before construction so re-entrant lookups see it
        let handle = ProxyHandle::new(cx.foreign_rc(), proxy, HandleStrength::Strong);
        self.entries.borrow_mut().insert(host, handle);

        if let Err(error) = self.construct(cx, &binding, proxy, host) {
            // The proxy may already carry the back-reference
            cx.accessor().disconnect(foreign, proxy);
            self.entries.borrow_mut().remove(&host);
            return Err(error);
        }

        log_proxy_created(host.addr(), &binding.proxy_class);
        cx.metrics().increment(metrics::PROXIES_CREATED);
        Ok(proxy)
    }

    fn construct(
        &self,
        cx: &BridgeContext,
        binding: &ProxyBinding,
        proxy: ForeignObject,
        host: HostObject,
    ) -> BridgeResult<()> {
        let foreign = cx.foreign();
        let accessor = cx.accessor();

        accessor.before_construct(foreign, proxy, host)?;

        let mut native = host.as_ptr();
        let native_arg = [ptr::addr_of_mut!(native) as *mut c_void];
        let args: &[*mut c_void] = if binding.takes_native_ptr { &native_arg } else { &[] };
        unsafe { foreign.invoke(binding.method, Some(proxy), args) }?;

        accessor.after_construct(foreign, proxy)?;
        Ok(())
    }

    /// Host object bound to `proxy`, asked of the proxy itself
    pub fn get_host_object(&self, cx: &BridgeContext, proxy: ForeignObject) -> Option<HostObject> {
        cx.accessor().native_ptr(cx.foreign(), proxy)
    }

    /// Memoized constructor binding for the dynamic class `class`
    ///
    /// A failure means the foreign type database does not match the host
    /// and is logged as a link failure every time it is hit.
    pub fn binding_for(&self, cx: &BridgeContext, class: HostClass) -> Result<Rc<ProxyBinding>, LinkError> {
        if let Some(binding) = self.bindings.borrow().get(&class) {
            return Ok(Rc::clone(binding));
        }

        self.resolve_binding(cx, class).map_err(|error| {
            log_link_failure(&cx.host().class_info(class).name, &error.to_string());
            cx.metrics().increment(metrics::LINK_FAILURES);
            error
        })
    }

    fn resolve_binding(&self, cx: &BridgeContext, class: HostClass) -> Result<Rc<ProxyBinding>, LinkError> {

        let host = cx.host();
        let requested = host.class_info(class);
        let support_editor = cx.config().support_blueprint_binding;

        let mut current = Some(class);
        let mut found = None;
        while let Some(candidate) = current {
            let info = host.class_info(candidate);
            let bindable = match info.origin {
                ClassOrigin::Native | ClassOrigin::Foreign => true,
                ClassOrigin::Editor => support_editor && !self.inherits_foreign(cx, info.super_class),
            };
            if bindable {
                found = Some(info);
                break;
            }
            current = info.super_class;
        }

        let info = found.ok_or_else(|| LinkError::NoProxyClass {
            class: requested.name.clone(),
        })?;

        let ty = cx
            .foreign()
            .lookup_type(&info.assembly, &info.foreign_full_name)
            .ok_or_else(|| LinkError::MissingType {
                assembly: info.assembly.clone(),
                full_name: info.foreign_full_name.clone(),
            })?;

        let takes_native_ptr = !info.is_function_library;
        let params: &[&str] = if takes_native_ptr { &["intptr"] } else { &[] };
        let constructor = MethodSignature::for_class(&info.foreign_full_name, ".ctor", params.iter().copied());
        let method = cx
            .foreign()
            .lookup_method(&info.assembly, &constructor)
            .ok_or_else(|| LinkError::MissingMethod {
                assembly: info.assembly.clone(),
                signature: constructor.to_string(),
            })?;

        log_proxy_class_resolved(&requested.name, &info.foreign_full_name);

        let binding = Rc::new(ProxyBinding {
            proxy_class: info.foreign_full_name,
            assembly: info.assembly,
            constructor,
            ty,
            method,
            takes_native_ptr,
        });
        self.bindings.borrow_mut().insert(class, Rc::clone(&binding));
        Ok(binding)
    }

    fn inherits_foreign(&self, cx: &BridgeContext, mut class: Option<HostClass>) -> bool {
        while let Some(current) = class {
            let info = cx.host().class_info(current);
            if info.origin == ClassOrigin::Foreign {
                return true;
            }
            class = info.super_class;
        }
        false
    }

    /// Sever every entry whose host object is no longer reachable, then
    /// run one blocking foreign collection
    pub fn on_reachability_pass(&self, cx: &BridgeContext) -> SweepReport {
        let _perf = perf::track("reachability_pass");
        let start = Instant::now();

        let dead: Vec<HostObject> = {
            let host = cx.host();
            self.entries
                .borrow()
                .keys()
                .filter(|object| !host.is_reachable(**object))
                .copied()
                .collect()
        };
        let severed = self.sever(cx, &dead, "unreachable");

        let full = cx.config().full_collection_after_sweep;
        let collect_start = Instant::now();
        cx.foreign().collect_garbage(full);
        log_foreign_collection(full, collect_start.elapsed().as_micros() as u64);

        let report = SweepReport {
            severed,
            remaining: self.len(),
            duration: start.elapsed(),
        };

        cx.metrics().increment(metrics::SWEEPS);
        cx.metrics().record_timing(metrics::SWEEP_TIME, report.duration);
        log_sweep_complete(report.severed, report.remaining, report.duration.as_micros() as u64);
        report
    }

    /// Sever every entry owned by `scope_root` without waiting for a sweep
    pub fn on_scope_teardown(&self, cx: &BridgeContext, scope_root: HostObject) -> usize {
        let owned: Vec<HostObject> = {
            let host = cx.host();
            self.entries
                .borrow()
                .keys()
                .filter(|object| host.is_in_scope(**object, scope_root))
                .copied()
                .collect()
        };

        let severed = self.sever(cx, &owned, "scope teardown");
        log_scope_teardown(scope_root.addr(), severed);
        severed
    }

    /// Root (strong) or unroot (weak) the proxy of `host`
    ///
    /// Returns false when `host` has no live entry.
    pub fn set_rooted(&self, host: HostObject, rooted: bool) -> bool {
        let mut entries = self.entries.borrow_mut();
        let Some(handle) = entries.get_mut(&host) else {
            return false;
        };

        let strength = if rooted { HandleStrength::Strong } else { HandleStrength::Weak };
        if handle.strength() != strength {
            handle.set_strength(strength);
            log_handle_strength(host.addr(), !rooted);
        }
        handle.strength() != HandleStrength::Released
    }

    /// Sever every entry
    pub fn clear(&self, cx: &BridgeContext) -> usize {
        let all: Vec<HostObject> = self.entries.borrow().keys().copied().collect();
        self.sever(cx, &all, "shutdown")
    }

    fn sever(&self, cx: &BridgeContext, objects: &[HostObject], reason: &'static str) -> usize {
        let mut severed = 0;
        for &object in objects {
            let Some(mut handle) = self.entries.borrow_mut().remove(&object) else {
                continue;
            };

            if let Some(proxy) = handle.target() {
                cx.accessor().disconnect(cx.foreign(), proxy);
            }
            handle.release();

            log_proxy_severed(object.addr(), reason);
            severed += 1;
        }

        cx.metrics().add(metrics::PROXIES_SEVERED, severed as u64);
        severed
    }
}
