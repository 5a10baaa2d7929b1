//! Bridge context - everything a boundary operation needs, passed explicitly
//!
//! One context pairs one host runtime with one foreign runtime. It is not
//! `Send`: all table mutation and every redirected call happen on the
//! thread that owns it.

use crate::accessor::LibraryAccessor;
use crate::config::BridgeConfig;
use crate::error::BridgeResult;
use crate::logging::{log_bridge_init, log_bridge_shutdown};
use crate::marshal::MarshallerRegistry;
use crate::metrics::BridgeMetrics;
use crate::property::{ForeignMethodDescriptor, FunctionDescriptor};
use crate::redirect::FunctionRedirector;
use crate::runtime::{ForeignObject, ForeignRuntime, HostObject, HostRuntime};
use crate::table::{ObjectTable, SweepReport};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

type RedirectorKey = (String, String);

pub struct BridgeContext {
    host: Rc<dyn HostRuntime>,
    foreign: Rc<dyn ForeignRuntime>,
    config: BridgeConfig,
    marshallers: MarshallerRegistry,
    accessor: LibraryAccessor,
    table: ObjectTable,
    redirectors: RefCell<HashMap<RedirectorKey, Rc<FunctionRedirector>>>,
    metrics: Arc<BridgeMetrics>,
}

impl BridgeContext {
    /// Bind the engine library and build an empty bridge
    ///
    /// Fails when the foreign engine assembly lacks a required helper.
    pub fn new(host: Rc<dyn HostRuntime>, foreign: Rc<dyn ForeignRuntime>, config: BridgeConfig) -> BridgeResult<Self> {
        Self::with_marshallers(host, foreign, config, MarshallerRegistry::with_defaults())
    }

    pub fn with_marshallers(
        host: Rc<dyn HostRuntime>,
        foreign: Rc<dyn ForeignRuntime>,
        config: BridgeConfig,
        marshallers: MarshallerRegistry,
    ) -> BridgeResult<Self> {
        let accessor = LibraryAccessor::bind(foreign.as_ref(), &config.engine)?;
        log_bridge_init(&config.engine.assembly);

        Ok(Self {
            host,
            foreign,
            config,
            marshallers,
            accessor,
            table: ObjectTable::new(),
            redirectors: RefCell::new(HashMap::new()),
            metrics: Arc::new(BridgeMetrics::new()),
        })
    }

    #[inline]
    pub fn host(&self) -> &dyn HostRuntime {
        self.host.as_ref()
    }

    #[inline]
    pub fn host_rc(&self) -> Rc<dyn HostRuntime> {
        Rc::clone(&self.host)
    }

    #[inline]
    pub fn foreign(&self) -> &dyn ForeignRuntime {
        self.foreign.as_ref()
    }

    #[inline]
    pub fn foreign_rc(&self) -> Rc<dyn ForeignRuntime> {
        Rc::clone(&self.foreign)
    }

    #[inline]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[inline]
    pub fn marshallers(&self) -> &MarshallerRegistry {
        &self.marshallers
    }

    #[inline]
    pub fn accessor(&self) -> &LibraryAccessor {
        &self.accessor
    }

    #[inline]
    pub fn table(&self) -> &ObjectTable {
        &self.table
    }

    #[inline]
    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    /// Shared handle for reporting outside the bridge thread
    pub fn metrics_handle(&self) -> Arc<BridgeMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Proxy for `host`, created on first use
    pub fn get_foreign_object(&self, host: HostObject) -> BridgeResult<ForeignObject> {
        self.table.get_or_create(self, host)
    }

    /// Host object behind `proxy`; `None` once severed
    pub fn get_host_object(&self, proxy: ForeignObject) -> Option<HostObject> {
        self.table.get_host_object(self, proxy)
    }

    /// Called by the host after each reachability analysis
    pub fn on_reachability_pass(&self) -> SweepReport {
        self.table.on_reachability_pass(self)
    }

    /// Called by the host when a world or level unloads
    pub fn on_scope_teardown(&self, scope_root: HostObject) -> usize {
        self.table.on_scope_teardown(self, scope_root)
    }

    pub fn set_rooted(&self, host: HostObject, rooted: bool) -> bool {
        self.table.set_rooted(host, rooted)
    }

    /// Route `function` to `method`; linking happens on the first call
    ///
    /// Registering the same function twice returns the existing redirector.
    pub fn redirect(&self, function: FunctionDescriptor, method: ForeignMethodDescriptor) -> Rc<FunctionRedirector> {
        let key = (function.owner.clone(), function.name.clone());
        let mut redirectors = self.redirectors.borrow_mut();
        let redirector = redirectors
            .entry(key)
            .or_insert_with(|| Rc::new(FunctionRedirector::new(function, method)));
        Rc::clone(redirector)
    }

    pub fn redirector(&self, owner: &str, name: &str) -> Option<Rc<FunctionRedirector>> {
        self.redirectors
            .borrow()
            .get(&(owner.to_string(), name.to_string()))
            .cloned()
    }

    pub fn redirector_count(&self) -> usize {
        self.redirectors.borrow().len()
    }

    /// Sever every proxy; returns how many were live
    pub fn shutdown(&self) -> usize {
        let live = self.table.clear(self);
        log_bridge_shutdown(live);
        live
    }
}

impl std::fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeContext")
            .field("proxies", &self.table.len())
            .field("redirectors", &self.redirector_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::sandbox::{Sandbox, GAME_ASSEMBLY};

    #[test]
    fn test_contexts_are_independent() {
        let first = Sandbox::new().unwrap();
        let second = Sandbox::new().unwrap();
        let class = first.define_bound_class("Game.Pawn", None);
        let pawn = first.spawn(class, "Pawn_0");

        let proxy = first.cx.get_foreign_object(pawn).unwrap();
        assert_eq!(first.cx.get_host_object(proxy), Some(pawn));
        assert!(second.cx.table().is_empty());
        assert_eq!(second.cx.get_host_object(proxy), None);
        assert_eq!(first.cx.metrics().get_counter(crate::metrics::PROXIES_CREATED), 1);
        assert_eq!(second.cx.metrics().get_counter(crate::metrics::PROXIES_CREATED), 0);
    }

    #[test]
    fn test_shutdown_disconnects_every_proxy() {
        let sandbox = Sandbox::new().unwrap();
        let class = sandbox.define_bound_class("Game.Pawn", None);
        let proxies: Vec<_> = (0..3)
            .map(|i| {
                let pawn = sandbox.spawn(class, &format!("Pawn_{i}"));
                sandbox.cx.get_foreign_object(pawn).unwrap()
            })
            .collect();

        assert_eq!(sandbox.cx.shutdown(), 3);
        assert!(sandbox.cx.table().is_empty());
        for proxy in proxies {
            assert_eq!(sandbox.foreign.native_of(proxy), Some(std::ptr::null_mut()));
        }
        assert_eq!(sandbox.foreign.live_handles(), 0);
    }

    #[test]
    fn test_debug_reports_counts() {
        let sandbox = Sandbox::new().unwrap();
        let rendered = format!("{:?}", sandbox.cx);
        assert!(rendered.contains("proxies: 0"));
        assert!(rendered.contains("redirectors: 0"));
        assert_eq!(sandbox.cx.config().engine.assembly, "Interop.Engine");
        assert_ne!(sandbox.cx.config().engine.assembly, GAME_ASSEMBLY);
    }
}
